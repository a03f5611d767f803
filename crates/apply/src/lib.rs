//! Settle apply: drive one manifest through create/read/update/delete and wait
//! until the cluster reports it settled.
//!
//! The cluster itself sits behind [`ClusterClient`]; the real implementation
//! lives in `settle-kubehub`, tests plug in an in-memory fake.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use settle_core::{ClientError, Object, ObjectKey};

pub mod annotate;
pub mod config;
pub mod reconcile;

pub use annotate::{annotate, last_applied, LAST_APPLIED_ANNOTATION};
pub use config::{PollConfig, ReconcileConfig};
pub use reconcile::Reconciler;

/// Generic object CRUD against a control plane.
///
/// Implementations write the server's view of the object back into the
/// argument on `create`, `get` and `update`. A missing object must be
/// reported as [`ClientError::NotFound`].
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create(&self, obj: &mut Object) -> Result<(), ClientError>;
    async fn get(&self, key: &ObjectKey, obj: &mut Object) -> Result<(), ClientError>;
    async fn update(&self, obj: &mut Object) -> Result<(), ClientError>;
    async fn delete(&self, obj: &Object) -> Result<(), ClientError>;
}
