//! Error types for wave dispatch.

use firewatch_registry::RegistryError;
use thiserror::Error;

/// Errors that can occur while running a wave.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The wave found nobody to ask.
    ///
    /// Not a failure: it tells the orchestrator to escalate immediately
    /// instead of waiting out the wave timeout.
    #[error("No eligible verifiers for wave {wave}")]
    NoEligibleVerifiers {
        /// 1-based wave number.
        wave: u8,
    },

    /// Storage failure passthrough.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
