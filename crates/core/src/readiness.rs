//! Schema-agnostic readiness heuristic.
//!
//! Works across unrelated kinds by looking at two common status fields only.
//! It says nothing about conditions, observed generations or rollouts.

use std::fmt;

use serde::Deserialize;
use serde_json::Value as Json;

use crate::error::{Result, SettleError};
use crate::object::{type_name, Object};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
}

impl Readiness {
    pub const PENDING: &'static str = "pending";
    pub const READY: &'static str = "ready";

    pub fn label(self) -> &'static str {
        match self {
            Readiness::Pending => Self::PENDING,
            Readiness::Ready => Self::READY,
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The two status fields the heuristic reads. Unset means "not known yet".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    #[serde(default)]
    pub ready_replicas: Option<i64>,
    #[serde(default)]
    pub phase: Option<String>,
}

impl StatusSnapshot {
    pub fn decode(status: &Json) -> Result<Self> {
        Self::deserialize(status).map_err(|e| SettleError::StatusShape(e.to_string()))
    }
}

pub fn readiness(obj: &Object) -> Result<Readiness> {
    let Some(status) = obj.status() else {
        return Ok(Readiness::Ready);
    };
    let map = status
        .as_object()
        .ok_or_else(|| SettleError::StatusShape(format!("status must be a mapping, got {}", type_name(status))))?;
    if map.is_empty() {
        return Ok(Readiness::Pending);
    }
    let snap = StatusSnapshot::decode(status)?;
    if snap.ready_replicas.is_some_and(|n| n > 0) {
        return Ok(Readiness::Ready);
    }
    if snap.phase.as_deref() == Some("Active") {
        return Ok(Readiness::Ready);
    }
    Ok(Readiness::Pending)
}
