//! Result of one verification run.

use firewatch_council::VoteTally;
use firewatch_registry::AlertStatus;
use serde::{Deserialize, Serialize};

/// How a detection event ended.
///
/// - `Resolved`: quorum reached, the alert is confirmed or a false alarm
/// - `Inconclusive`: every wave ran out without quorum, the alert stays
///   pending until a fresh detection
/// - `NotEscalated`: confidence at or below the acceptance threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VerificationOutcome {
    Resolved {
        status: AlertStatus,
        tally: VoteTally,
        /// Waves started before quorum.
        waves_run: u8,
    },

    Inconclusive { tally: VoteTally, waves_run: u8 },

    NotEscalated { confidence: f64 },
}

impl VerificationOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(
            self,
            Self::Resolved {
                status: AlertStatus::Confirmed,
                ..
            }
        )
    }

    pub fn is_inconclusive(&self) -> bool {
        matches!(self, Self::Inconclusive { .. })
    }

    pub fn is_not_escalated(&self) -> bool {
        matches!(self, Self::NotEscalated { .. })
    }

    /// Status the alert was left in.
    pub fn status(&self) -> AlertStatus {
        match self {
            Self::Resolved { status, .. } => *status,
            Self::Inconclusive { .. } => AlertStatus::Pending,
            Self::NotEscalated { .. } => AlertStatus::NotEscalated,
        }
    }

    pub fn waves_run(&self) -> u8 {
        match self {
            Self::Resolved { waves_run, .. } | Self::Inconclusive { waves_run, .. } => *waves_run,
            Self::NotEscalated { .. } => 0,
        }
    }
}
