//! Error types for the verification council.
//!
//! Vote submission failures are surfaced to the submitting verifier as
//! explicit rejections; none of them is fatal.

use firewatch_registry::{AlertId, RegistryError, VerifierId};
use thiserror::Error;

/// Errors that can occur during ledger and consensus operations.
#[derive(Debug, Error)]
pub enum CouncilError {
    /// No outstanding request exists for the pair: already voted, never
    /// requested, expired, or unknown alert/verifier.
    #[error("No outstanding verification request for {verifier} on alert {alert}")]
    NotFound {
        alert: AlertId,
        verifier: VerifierId,
    },

    /// The alert already left `pending`.
    #[error("Alert {0} is closed")]
    AlertClosed(AlertId),

    /// Storage failure passthrough.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
