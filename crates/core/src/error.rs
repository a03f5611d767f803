//! Error taxonomy shared by every settle crate.

use std::time::Duration;

/// Errors reported by a cluster client. `NotFound` is the one kind callers
/// branch on; everything else is passed through to the user.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("api error {code} ({reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettleError {
    #[error("failed to parse manifest: {0}")]
    ManifestParse(#[from] serde_yaml::Error),
    #[error("manifest too large: {0}")]
    ManifestTooLarge(String),
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("manifest is empty")]
    EmptyManifest,
    #[error("namespace is required: neither the parameter nor the manifest sets one")]
    MissingNamespace,
    #[error("invalid resource id '{id}': {reason}")]
    InvalidIdentifier { id: String, reason: String },
    #[error("failed to record last-applied annotation: {0}")]
    Annotation(#[source] serde_json::Error),
    #[error(transparent)]
    Remote(#[from] ClientError),
    #[error("unexpected status shape: {0}")]
    StatusShape(String),
    #[error("timeout after {timeout:?} waiting for {subject} (last state: {})", last_state.as_deref().unwrap_or("none"))]
    ConvergenceTimeout { subject: String, timeout: Duration, last_state: Option<String> },
    #[error("error waiting for {subject}: {source}")]
    Convergence {
        subject: String,
        #[source]
        source: Box<SettleError>,
    },
    #[error("unexpected state '{state}' while waiting for {subject}, wanted {target:?}")]
    UnexpectedState { subject: String, state: String, target: Vec<String> },
    #[error("{field} changed from '{current}' to '{requested}'; the object must be replaced")]
    IdentityMismatch { field: &'static str, current: String, requested: String },
}

impl SettleError {
    /// True when this is (or wraps) a remote not-found error.
    pub fn is_not_found(&self) -> bool {
        match self {
            SettleError::Remote(e) => e.is_not_found(),
            SettleError::Convergence { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SettleError>;
