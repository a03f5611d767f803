//! Settle core: untyped resource documents and the pure pieces of the
//! apply-and-wait flow (decode, namespace, identity, readiness).

#![forbid(unsafe_code)]

pub mod error;
pub mod identity;
pub mod manifest;
pub mod namespace;
pub mod object;
pub mod readiness;

pub use error::{ClientError, Result, SettleError};
pub use identity::{ResourceId, ID_DELIMITER};
pub use manifest::DecodeLimits;
pub use namespace::{NamespacePolicy, DEFAULT_NAMESPACE};
pub use object::{GroupVersion, GroupVersionKind, Object, ObjectKey};
pub use readiness::{readiness, Readiness, StatusSnapshot};

pub mod prelude {
    pub use super::{ClientError, NamespacePolicy, Object, ObjectKey, Readiness, ResourceId, SettleError};
}
