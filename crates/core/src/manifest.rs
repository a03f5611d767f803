//! Manifest decoding: YAML or JSON text into one [`Object`].

use serde::Deserialize;
use serde_json::Value as Json;
use tracing::warn;

use crate::error::{Result, SettleError};
use crate::object::Object;

/// Size bounds applied before a manifest becomes an [`Object`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_bytes: usize,
    /// Counts every mapping, sequence and scalar in the decoded tree.
    pub max_nodes: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self { max_bytes: 1 << 20, max_nodes: 100_000 }
    }
}

impl DecodeLimits {
    /// Defaults overridden by `SETTLE_MAX_MANIFEST_BYTES` and `SETTLE_MAX_MANIFEST_NODES`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut limits = Self::default();
        if let Some(n) = get("SETTLE_MAX_MANIFEST_BYTES").and_then(|v| v.trim().parse::<usize>().ok()) {
            limits.max_bytes = n;
        }
        if let Some(n) = get("SETTLE_MAX_MANIFEST_NODES").and_then(|v| v.trim().parse::<usize>().ok()) {
            limits.max_nodes = n;
        }
        limits
    }
}

/// True when `v` has more than `max` nodes. Stops counting at `max + 1`.
fn exceeds_node_budget(v: &Json, max: usize) -> bool {
    let mut stack = vec![v];
    let mut seen = 0usize;
    while let Some(node) = stack.pop() {
        seen += 1;
        if seen > max {
            return true;
        }
        match node {
            Json::Object(map) => stack.extend(map.values()),
            Json::Array(items) => stack.extend(items.iter()),
            _ => {}
        }
    }
    false
}

/// Decode the first document in `text`.
///
/// Returns `Ok(None)` for an empty stream (including comment-only text and an
/// explicit null document). Only one object per manifest is supported: any
/// further documents are ignored with a warning.
pub fn decode(text: &str) -> Result<Option<Object>> {
    decode_with(text, &DecodeLimits::from_env())
}

/// [`decode`] with explicit limits.
pub fn decode_with(text: &str, limits: &DecodeLimits) -> Result<Option<Object>> {
    if text.len() > limits.max_bytes {
        return Err(SettleError::ManifestTooLarge(format!("{} bytes exceeds the {} byte limit", text.len(), limits.max_bytes)));
    }
    let mut docs = serde_yaml::Deserializer::from_str(text);
    let Some(first) = docs.next() else { return Ok(None) };
    let value = serde_yaml::Value::deserialize(first)?;
    if docs.next().is_some() {
        warn!("manifest contains more than one document; only the first is used");
    }
    if value.is_null() {
        return Ok(None);
    }
    let json = serde_json::to_value(value).map_err(|e| SettleError::InvalidManifest(format!("not representable as JSON: {}", e)))?;
    if exceeds_node_budget(&json, limits.max_nodes) {
        return Err(SettleError::ManifestTooLarge(format!("more than {} nodes", limits.max_nodes)));
    }
    let obj = Object::from_value(json)?;
    obj.validate()?;
    Ok(Some(obj))
}
