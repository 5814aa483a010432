//! Quorum resolution over the vote ledger.
//!
//! An alert resolves once a quorum of votes has been cast (default 3).
//! With quorum met it is confirmed if enough of the cast votes are
//! affirmative (default 2), otherwise it is a false alarm. Unanswered or
//! expired requests never count for or against resolution.

use firewatch_registry::{AlertId, AlertStatus, Storage, VoteOutcome, VoteRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Result;

/// Result of applying the quorum rule to a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusResult {
    /// Fewer votes cast than the quorum.
    NoQuorum,
    Confirmed,
    FalseAlarm,
}

impl ConsensusResult {
    /// Status the alert should move to, if any.
    pub fn status(self) -> Option<AlertStatus> {
        match self {
            ConsensusResult::NoQuorum => None,
            ConsensusResult::Confirmed => Some(AlertStatus::Confirmed),
            ConsensusResult::FalseAlarm => Some(AlertStatus::FalseAlarm),
        }
    }
}

/// Counts over all requests issued for one alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub yes: u32,
    pub no: u32,
    /// Requests still waiting for an answer.
    pub outstanding: u32,
    pub expired: u32,
}

impl VoteTally {
    pub fn from_records(records: &[VoteRecord]) -> Self {
        let mut tally = VoteTally::default();
        for record in records {
            match record.outcome {
                VoteOutcome::Yes => tally.yes += 1,
                VoteOutcome::No => tally.no += 1,
                VoteOutcome::Unset if record.expired => tally.expired += 1,
                VoteOutcome::Unset => tally.outstanding += 1,
            }
        }
        tally
    }

    /// Votes actually cast.
    pub fn cast(&self) -> u32 {
        self.yes + self.no
    }

    /// Every request ever issued.
    pub fn requested(&self) -> u32 {
        self.cast() + self.outstanding + self.expired
    }
}

/// Applies the majority-of-quorum rule and persists the outcome.
///
/// # Voting Rules
///
/// - At least `quorum` cast votes before any resolution
/// - `affirmative_required` yes votes among them confirms, anything less
///   is a false alarm
/// - Resolution is monotonic: a resolved alert is never re-evaluated
#[derive(Debug, Clone)]
pub struct ConsensusResolver {
    quorum: u32,
    affirmative_required: u32,
}

impl Default for ConsensusResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsensusResolver {
    /// Quorum of 3, 2 affirmative votes to confirm.
    pub fn new() -> Self {
        Self {
            quorum: 3,
            affirmative_required: 2,
        }
    }

    /// Creates a resolver with a custom quorum rule.
    ///
    /// # Panics
    ///
    /// If `quorum` is zero or `affirmative_required` exceeds it.
    pub fn with_quorum(quorum: u32, affirmative_required: u32) -> Self {
        assert!(quorum > 0, "Quorum must be at least one vote");
        assert!(
            affirmative_required <= quorum,
            "Affirmative votes required cannot exceed the quorum"
        );
        Self {
            quorum,
            affirmative_required,
        }
    }

    pub fn quorum(&self) -> u32 {
        self.quorum
    }

    pub fn affirmative_required(&self) -> u32 {
        self.affirmative_required
    }

    /// Pure quorum decision over a tally.
    pub fn decide(&self, tally: &VoteTally) -> ConsensusResult {
        if tally.cast() < self.quorum {
            return ConsensusResult::NoQuorum;
        }
        if tally.yes >= self.affirmative_required {
            ConsensusResult::Confirmed
        } else {
            ConsensusResult::FalseAlarm
        }
    }

    /// Re-evaluates an alert against its ledger and stores the result.
    ///
    /// Refreshes the alert's tallies while it is pending and moves it to
    /// its final status once quorum is met. A resolved alert is left
    /// untouched. Returns the alert's status after evaluation.
    ///
    /// Callers must serialise evaluation per alert.
    pub fn evaluate(&self, storage: &Storage, alert_id: AlertId) -> Result<AlertStatus> {
        let records = storage.votes_for_alert(alert_id)?;
        let tally = VoteTally::from_records(&records);
        let decision = self.decide(&tally);

        let updated = storage.modify_alert(alert_id, |alert| {
            if !alert.status.is_pending() {
                return false;
            }
            alert.yes_count = tally.yes;
            alert.no_count = tally.no;
            if let Some(status) = decision.status() {
                alert.transition(status);
            }
            true
        })?;

        match updated {
            Some(alert) => {
                if alert.status.is_terminal() {
                    info!(
                        "Alert {} resolved {} ({} yes / {} no)",
                        alert_id, alert.status, tally.yes, tally.no
                    );
                } else {
                    debug!(
                        "Alert {} at {}/{} votes, no quorum yet",
                        alert_id,
                        tally.cast(),
                        self.quorum
                    );
                }
                Ok(alert.status)
            }
            None => {
                let status = storage
                    .load_alert(alert_id)?
                    .map(|a| a.status)
                    .unwrap_or(AlertStatus::Pending);
                Ok(status)
            }
        }
    }
}
