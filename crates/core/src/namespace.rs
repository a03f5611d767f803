//! Namespace resolution between the caller's parameter and the manifest.
//!
//! A namespace set in the document wins over the parameter. Whether that is
//! the right precedence is still open, so both policies below keep it and
//! only differ when neither side names a namespace.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SettleError};
use crate::object::Object;

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespacePolicy {
    /// Fall back to `default` when nothing is set.
    #[default]
    Permissive,
    /// Refuse to guess; fail with `MissingNamespace`.
    Strict,
}

impl NamespacePolicy {
    pub fn resolve(self, param: &str, document: &str) -> Result<String> {
        match (param.is_empty(), document.is_empty()) {
            (true, true) => match self {
                NamespacePolicy::Permissive => Ok(DEFAULT_NAMESPACE.to_string()),
                NamespacePolicy::Strict => Err(SettleError::MissingNamespace),
            },
            (false, true) => Ok(param.to_string()),
            (_, false) => Ok(document.to_string()),
        }
    }

    /// Resolve and write the result back into `obj`.
    pub fn apply(self, obj: &mut Object, param: &str) -> Result<String> {
        let document = obj.namespace()?.to_string();
        let resolved = self.resolve(param, &document)?;
        if !param.is_empty() && !document.is_empty() && param != document {
            debug!(param = %param, document = %document, "manifest namespace overrides parameter");
        }
        obj.set_namespace(&resolved)?;
        Ok(resolved)
    }
}

impl FromStr for NamespacePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "permissive" => Ok(NamespacePolicy::Permissive),
            "strict" => Ok(NamespacePolicy::Strict),
            other => Err(format!("unknown namespace policy '{}' (expect permissive or strict)", other)),
        }
    }
}
