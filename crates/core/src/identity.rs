//! Resource identifiers: `namespace::groupVersion::kind::name`.
//!
//! The identifier is the only thing a host keeps between calls, so it has to
//! carry enough to rebuild an empty object of the right kind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SettleError};
use crate::object::{GroupVersion, GroupVersionKind, Object, ObjectKey};

pub const ID_DELIMITER: &str = "::";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub namespace: String,
    pub group_version: String,
    pub kind: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, group_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), group_version: group_version.into(), kind: kind.into(), name: name.into() }
    }

    pub fn from_object(obj: &Object) -> Result<Self> {
        Ok(Self::new(obj.namespace()?, obj.api_version()?, obj.kind()?, obj.name()?))
    }

    pub fn gvk(&self) -> Result<GroupVersionKind> {
        GroupVersion::parse(&self.group_version)
            .map(|gv| gv.with_kind(&self.kind))
            .map_err(|reason| self.invalid(reason))
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: if self.namespace.is_empty() { None } else { Some(self.namespace.clone()) },
            name: self.name.clone(),
        }
    }

    /// Empty object of the identified kind, ready to be filled by a get.
    pub fn to_object(&self) -> Result<Object> {
        Ok(Object::empty(&self.gvk()?, &self.namespace, &self.name))
    }

    fn invalid(&self, reason: String) -> SettleError {
        SettleError::InvalidIdentifier { id: self.to_string(), reason }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ns}{d}{gv}{d}{kind}{d}{name}",
            ns = self.namespace,
            gv = self.group_version,
            kind = self.kind,
            name = self.name,
            d = ID_DELIMITER
        )
    }
}

impl FromStr for ResourceId {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: String| SettleError::InvalidIdentifier { id: s.to_string(), reason };
        let parts: Vec<&str> = s.split(ID_DELIMITER).collect();
        let [namespace, gv, kind, name] = parts.as_slice() else {
            return Err(invalid(format!("expected 4 '{}'-separated parts, got {}", ID_DELIMITER, parts.len())));
        };
        if kind.is_empty() || name.is_empty() {
            return Err(invalid("kind and name must not be empty".into()));
        }
        GroupVersion::parse(gv).map_err(|e| invalid(format!("invalid group/version: {}", e)))?;
        Ok(Self::new(*namespace, *gv, *kind, *name))
    }
}
