//! Error types for Firewatch Core.

use firewatch_council::CouncilError;
use firewatch_dispatch::DispatchError;
use firewatch_registry::{AlertId, RegistryError};
use thiserror::Error;

/// Core error type for verification operations.
#[derive(Debug, Error)]
pub enum FirewatchError {
    /// Unknown alert or verifier, or no outstanding request for a vote.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The alert already left `pending`.
    #[error("Alert {0} is closed")]
    AlertClosed(AlertId),

    /// A wave found no one to ask.
    #[error("No eligible verifiers for wave {wave}")]
    NoEligibleVerifiers { wave: u8 },

    /// The detection backend failed; the alert is left untouched.
    #[error("Detector unavailable: {0}")]
    DetectorUnavailable(String),

    /// A wave run is already active for the alert.
    #[error("Verification already running for alert {0}")]
    VerificationInProgress(AlertId),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Registry error passthrough.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Council error passthrough.
    #[error("Council error: {0}")]
    Council(CouncilError),

    /// Dispatch error passthrough.
    #[error("Dispatch error: {0}")]
    Dispatch(DispatchError),
}

impl From<CouncilError> for FirewatchError {
    fn from(err: CouncilError) -> Self {
        match err {
            CouncilError::NotFound { .. } => FirewatchError::NotFound(err.to_string()),
            CouncilError::AlertClosed(id) => FirewatchError::AlertClosed(id),
            CouncilError::Registry(e) => FirewatchError::Registry(e),
        }
    }
}

impl From<DispatchError> for FirewatchError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NoEligibleVerifiers { wave } => {
                FirewatchError::NoEligibleVerifiers { wave }
            }
            DispatchError::Registry(e) => FirewatchError::Registry(e),
        }
    }
}

impl FirewatchError {
    /// True for rejections a verifier or caller can act on, as opposed to
    /// storage failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::AlertClosed(_) | Self::VerificationInProgress(_)
        )
    }
}
