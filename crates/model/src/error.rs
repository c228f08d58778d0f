use thiserror::Error;

use crate::types::BackendType;

/// Error taxonomy for the firewall core, one variant per kind named in the
/// design's error-handling section. Backend and leaf crates return
/// `anyhow::Result` for I/O-heavy internals; the Manager converts failures
/// at its boundary into these variants and into `FirewallState::Error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FirewallError {
    #[error("backend {backend} unavailable: {reason}")]
    Unavailable { backend: BackendType, reason: String },

    #[error("another VPN is active and no privileged backend is available")]
    OtherVpnActive,

    #[error("virtual device permission required")]
    PermissionRequired,

    #[error("backend {backend} failed to start: {cause}")]
    BackendStartFailed { backend: BackendType, cause: String },

    #[error("backend {backend} failed to apply rules: {cause}")]
    BackendApplyFailed { backend: BackendType, cause: String },

    #[error("backend {backend} failed its health check")]
    BackendHealthFailed { backend: BackendType },

    #[error("no eligible backend: {cause}")]
    PlanFailure { cause: String },

    #[error("internal error: {cause}")]
    Fatal { cause: String },
}

impl FirewallError {
    /// The backend this error concerns, if any — used to decide whether a
    /// previously-running backend should be kept alive after a failure.
    pub fn backend(&self) -> Option<BackendType> {
        match self {
            FirewallError::Unavailable { backend, .. }
            | FirewallError::BackendStartFailed { backend, .. }
            | FirewallError::BackendApplyFailed { backend, .. }
            | FirewallError::BackendHealthFailed { backend } => Some(*backend),
            _ => None,
        }
    }
}
