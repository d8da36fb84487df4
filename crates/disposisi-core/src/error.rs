use thiserror::Error;

use crate::model::{DispositionStatus, HopId};

/// Error taxonomy shared by the ledger, the HTTP client and the push layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortalError {
    /// The platform has no push capability. Permanent.
    #[error("push notifications are not supported on this platform")]
    Unsupported,

    /// The user declined the permission prompt.
    #[error("notification permission was denied")]
    PermissionDenied,

    /// The caller's expected status is stale. Refetch before retrying.
    #[error("hop {hop} changed: expected {expected}, found {}", status_label(.actual))]
    Conflict {
        hop: HopId,
        expected: DispositionStatus,
        actual: Option<DispositionStatus>,
    },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The remote resource no longer exists (HTTP 410).
    #[error("gone: {0}")]
    Gone(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("no live push subscription")]
    NotSubscribed,

    #[error("invalid push key: {0}")]
    InvalidKey(String),

    #[error("subscription manager has been disposed")]
    Disposed,

    #[error("client state error: {0}")]
    State(String),
}

fn status_label(status: &Option<DispositionStatus>) -> &'static str {
    status.map_or("unknown", |s| s.as_str())
}

impl PortalError {
    /// Only transient transport failures are eligible for automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Errors that should disable the UI affordance rather than offer a retry.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Unsupported | Self::InvalidTransition(_) | Self::Forbidden(_) | Self::Disposed
        )
    }

    /// The endpoint or resource has disappeared on the remote side.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone(_) | Self::NotFound(_))
    }
}
