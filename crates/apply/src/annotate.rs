//! Last-applied annotation: the resolved document stored on the object itself
//! so a later diff can recover what was applied without the manifest text.

use serde_json::Value as Json;
use settle_core::{Object, Result, SettleError};

pub const LAST_APPLIED_ANNOTATION: &str = "settle.io/last-applied";

/// Drop server-populated fields and our own annotation so that annotating
/// the same document twice yields the same value.
fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
        meta.remove("resourceVersion");
        meta.remove("generation");
        meta.remove("creationTimestamp");
        meta.remove("uid");
        let emptied = match meta.get_mut("annotations").and_then(|a| a.as_object_mut()) {
            Some(annos) => {
                annos.remove(LAST_APPLIED_ANNOTATION);
                annos.is_empty()
            }
            None => false,
        };
        if emptied {
            meta.remove("annotations");
        }
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

/// Serialize `obj` and store it under [`LAST_APPLIED_ANNOTATION`].
pub fn annotate(obj: &mut Object) -> Result<()> {
    let doc = strip_noisy(obj.clone().into_value());
    let encoded = serde_json::to_string(&doc).map_err(SettleError::Annotation)?;
    obj.set_annotation(LAST_APPLIED_ANNOTATION, encoded)
}

/// The stored document, if any.
pub fn last_applied(obj: &Object) -> Result<Option<Object>> {
    let Some(raw) = obj.annotation(LAST_APPLIED_ANNOTATION)? else { return Ok(None) };
    let v: Json = serde_json::from_str(raw).map_err(SettleError::Annotation)?;
    Object::from_value(v).map(Some)
}
