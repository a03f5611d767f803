//! Untyped resource documents.
//!
//! An [`Object`] is a JSON mapping with typed accessors for the handful of
//! fields settle cares about. Accessors fail with `InvalidManifest` when the
//! document has the wrong shape instead of silently returning defaults.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::{Result, SettleError};

/// Group/version pair parsed from an `apiVersion` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    /// Accepts `v1` (core group) and `group/version`. An empty version or more
    /// than one `/` is rejected.
    pub fn parse(gv: &str) -> std::result::Result<Self, String> {
        let (group, version) = match gv.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", gv),
        };
        if version.is_empty() {
            return Err(format!("'{}' has no version", gv));
        }
        if version.contains('/') {
            return Err(format!("'{}' has more than one '/'", gv));
        }
        Ok(Self { group: group.to_string(), version: version.to_string() })
    }

    pub fn with_kind(self, kind: &str) -> GroupVersionKind {
        GroupVersionKind { group: self.group, version: self.version, kind: kind.to_string() }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn api_version(&self) -> String {
        GroupVersion { group: self.group.clone(), version: self.version.clone() }.to_string()
    }
}

/// Namespace/name pair addressing one object of a known kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => write!(f, "{}/{}", ns, self.name),
            _ => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object(Map<String, Json>);

impl Object {
    /// Wrap a decoded value; anything but a mapping is rejected.
    pub fn from_value(v: Json) -> Result<Self> {
        match v {
            Json::Object(map) => Ok(Self(map)),
            other => Err(SettleError::InvalidManifest(format!("expected a mapping, got {}", type_name(&other)))),
        }
    }

    /// Skeleton with only type and identity set, filled in by a remote get.
    pub fn empty(gvk: &GroupVersionKind, namespace: &str, name: &str) -> Self {
        let mut meta = Map::new();
        meta.insert("name".into(), Json::String(name.to_string()));
        if !namespace.is_empty() {
            meta.insert("namespace".into(), Json::String(namespace.to_string()));
        }
        let mut map = Map::new();
        map.insert("apiVersion".into(), Json::String(gvk.api_version()));
        map.insert("kind".into(), Json::String(gvk.kind.clone()));
        map.insert("metadata".into(), Json::Object(meta));
        Self(map)
    }

    pub fn into_value(self) -> Json {
        Json::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Json> {
        &self.0
    }

    pub fn as_map_mut(&mut self) -> &mut Map<String, Json> {
        &mut self.0
    }

    /// Replace the whole document, e.g. with the latest remote state.
    pub fn replace(&mut self, other: Object) {
        self.0 = other.0;
    }

    pub fn api_version(&self) -> Result<&str> {
        required_str(&self.0, "apiVersion")
    }

    pub fn kind(&self) -> Result<&str> {
        required_str(&self.0, "kind")
    }

    pub fn name(&self) -> Result<&str> {
        required_str(self.metadata()?, "name").map_err(|_| SettleError::InvalidManifest("missing metadata.name".into()))
    }

    /// Empty string when unset, matching how the API server reports it.
    pub fn namespace(&self) -> Result<&str> {
        match self.metadata()?.get("namespace") {
            None | Some(Json::Null) => Ok(""),
            Some(Json::String(s)) => Ok(s),
            Some(other) => Err(SettleError::InvalidManifest(format!("metadata.namespace must be a string, got {}", type_name(other)))),
        }
    }

    pub fn gvk(&self) -> Result<GroupVersionKind> {
        let gv = GroupVersion::parse(self.api_version()?).map_err(SettleError::InvalidManifest)?;
        Ok(gv.with_kind(self.kind()?))
    }

    pub fn key(&self) -> Result<ObjectKey> {
        let ns = self.namespace()?;
        Ok(ObjectKey {
            namespace: if ns.is_empty() { None } else { Some(ns.to_string()) },
            name: self.name()?.to_string(),
        })
    }

    /// `None` when the document has no `status` at all (or an explicit null).
    pub fn status(&self) -> Option<&Json> {
        match self.0.get("status") {
            None | Some(Json::Null) => None,
            Some(v) => Some(v),
        }
    }

    pub fn annotation(&self, key: &str) -> Result<Option<&str>> {
        let Some(annos) = self.metadata()?.get("annotations") else { return Ok(None) };
        match annos {
            Json::Null => Ok(None),
            Json::Object(m) => Ok(m.get(key).and_then(|v| v.as_str())),
            other => Err(SettleError::InvalidManifest(format!("metadata.annotations must be a mapping, got {}", type_name(other)))),
        }
    }

    pub fn set_namespace(&mut self, ns: &str) -> Result<()> {
        self.metadata_mut()?.insert("namespace".into(), Json::String(ns.to_string()));
        Ok(())
    }

    pub fn set_annotation(&mut self, key: &str, value: String) -> Result<()> {
        let meta = self.metadata_mut()?;
        let annos = meta.entry("annotations").or_insert_with(|| Json::Object(Map::new()));
        if annos.is_null() {
            *annos = Json::Object(Map::new());
        }
        match annos {
            Json::Object(m) => {
                m.insert(key.to_string(), Json::String(value));
                Ok(())
            }
            other => Err(SettleError::InvalidManifest(format!("metadata.annotations must be a mapping, got {}", type_name(other)))),
        }
    }

    /// Fails unless `apiVersion`, `kind` and `metadata.name` are present strings.
    pub fn validate(&self) -> Result<()> {
        self.api_version().map_err(|_| SettleError::InvalidManifest("missing apiVersion".into()))?;
        self.kind().map_err(|_| SettleError::InvalidManifest("missing kind".into()))?;
        self.name()?;
        Ok(())
    }

    fn metadata(&self) -> Result<&Map<String, Json>> {
        match self.0.get("metadata") {
            Some(Json::Object(m)) => Ok(m),
            Some(other) => Err(SettleError::InvalidManifest(format!("metadata must be a mapping, got {}", type_name(other)))),
            None => Err(SettleError::InvalidManifest("missing metadata".into())),
        }
    }

    fn metadata_mut(&mut self) -> Result<&mut Map<String, Json>> {
        let meta = self.0.entry("metadata").or_insert_with(|| Json::Object(Map::new()));
        match meta {
            Json::Object(m) => Ok(m),
            other => Err(SettleError::InvalidManifest(format!("metadata must be a mapping, got {}", type_name(other)))),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind().unwrap_or("?");
        match self.key() {
            Ok(key) => write!(f, "{} {}", kind, key),
            Err(_) => write!(f, "{} <unnamed>", kind),
        }
    }
}

fn required_str<'a>(map: &'a Map<String, Json>, field: &str) -> Result<&'a str> {
    match map.get(field) {
        Some(Json::String(s)) if !s.is_empty() => Ok(s),
        Some(Json::String(_)) | None | Some(Json::Null) => Err(SettleError::InvalidManifest(format!("missing {}", field))),
        Some(other) => Err(SettleError::InvalidManifest(format!("{} must be a string, got {}", field, type_name(other)))),
    }
}

pub(crate) fn type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "sequence",
        Json::Object(_) => "mapping",
    }
}
