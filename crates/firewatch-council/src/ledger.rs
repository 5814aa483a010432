//! # Vote Ledger
//!
//! Records one verification decision per (alert, verifier) pair.
//!
//! ## Submission Pipeline
//!
//! ```text
//!  submit_vote ──▶ alert pending? ──▶ outstanding request? ──▶ cast (CAS)
//!                      │ no                 │ no                  │
//!                      ▼                    ▼                     ▼
//!                 AlertClosed           NotFound        release verifier
//!                                                              │
//!                                                              ▼
//!                                                     score + credit points
//!                                                              │
//!                                                              ▼
//!                                                     re-evaluate consensus
//! ```
//!
//! The unset-to-cast transition is a compare-and-swap on the stored
//! record, so a pair can be consumed at most once even when the same vote
//! is submitted twice concurrently. A second submission always fails with
//! [`CouncilError::NotFound`].

use std::sync::Arc;

use firewatch_registry::{
    AlertId, AlertStatus, Clock, RankTier, Storage, VerifierId, VerifierPool, VoteOutcome,
    VoteRecord,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consensus::{ConsensusResolver, VoteTally};
use crate::error::CouncilError;
use crate::scorer::ReputationScorer;
use crate::Result;

/// Acknowledgement returned to a verifier whose vote was accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub alert_id: AlertId,
    pub verifier_id: VerifierId,
    pub outcome: VoteOutcome,
    pub response_time_secs: f64,
    pub points_awarded: u64,
    pub new_total: u64,
    pub rank: RankTier,
    /// Alert status after consensus re-evaluation.
    pub alert_status: AlertStatus,
}

impl VoteReceipt {
    /// True if this vote completed the quorum.
    pub fn resolved_alert(&self) -> bool {
        self.alert_status.is_terminal()
    }
}

/// Ledger of verification requests and votes.
pub struct VoteLedger {
    storage: Storage,
    pool: VerifierPool,
    scorer: ReputationScorer,
    resolver: ConsensusResolver,
    clock: Arc<dyn Clock>,
}

impl VoteLedger {
    pub fn new(
        storage: Storage,
        scorer: ReputationScorer,
        resolver: ConsensusResolver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool: VerifierPool::new(storage.clone()),
            storage,
            scorer,
            resolver,
            clock,
        }
    }

    pub fn resolver(&self) -> &ConsensusResolver {
        &self.resolver
    }

    pub fn scorer(&self) -> &ReputationScorer {
        &self.scorer
    }

    /// Records a verifier's decision on an alert.
    ///
    /// Callers must serialise submissions per alert so that consensus
    /// evaluation never runs twice concurrently for the same alert.
    ///
    /// # Errors
    ///
    /// - [`CouncilError::NotFound`] if the alert or verifier is unknown, or
    ///   no outstanding request exists for the pair.
    /// - [`CouncilError::AlertClosed`] if the alert already resolved.
    pub fn submit_vote(
        &self,
        alert_id: AlertId,
        verifier_id: VerifierId,
        affirmative: bool,
    ) -> Result<VoteReceipt> {
        let not_found = || CouncilError::NotFound {
            alert: alert_id,
            verifier: verifier_id,
        };

        let alert = self.storage.load_alert(alert_id)?.ok_or_else(not_found)?;
        if !alert.status.is_pending() {
            warn!("Rejected late vote from {} on closed alert {}", verifier_id, alert_id);
            return Err(CouncilError::AlertClosed(alert_id));
        }

        let record = self
            .storage
            .load_vote(alert_id, verifier_id)?
            .filter(VoteRecord::is_outstanding)
            .ok_or_else(not_found)?;
        let verifier = self.storage.load_verifier(verifier_id)?.ok_or_else(not_found)?;

        let outcome = VoteOutcome::from_bool(affirmative);
        let now = self.clock.now();
        let latency = record.latency_secs(now);
        let points = self.scorer.score(&verifier, latency);

        let cast = self
            .storage
            .modify_vote(alert_id, verifier_id, |r| r.cast(outcome, now, points))?;
        if cast.is_none() {
            debug!("Lost race consuming {} / {}", alert_id, verifier_id);
            return Err(not_found());
        }

        self.pool.release(verifier_id)?;
        let credited = self.scorer.apply(&self.pool, verifier_id, points, latency)?;
        let alert_status = self.resolver.evaluate(&self.storage, alert_id)?;

        debug!(
            "{} voted {:?} on {} after {:.3}s (+{} points)",
            verifier_id, outcome, alert_id, latency, points
        );

        Ok(VoteReceipt {
            alert_id,
            verifier_id,
            outcome,
            response_time_secs: latency,
            points_awarded: points,
            new_total: credited.points(),
            rank: credited.rank(),
            alert_status,
        })
    }

    /// Marks every unanswered request for `alert_id` as expired and
    /// releases the verifiers holding them.
    ///
    /// Returns the verifiers that were released.
    pub fn expire_outstanding(&self, alert_id: AlertId) -> Result<Vec<VerifierId>> {
        let mut released = Vec::new();
        for record in self.storage.votes_for_alert(alert_id)? {
            if !record.is_outstanding() {
                continue;
            }
            let expired = self.storage.modify_vote(alert_id, record.verifier_id, |r| {
                if !r.is_outstanding() {
                    return false;
                }
                r.expired = true;
                true
            })?;
            if expired.is_some() {
                self.pool.release(record.verifier_id)?;
                released.push(record.verifier_id);
            }
        }
        if !released.is_empty() {
            debug!("Expired {} open requests on {}", released.len(), alert_id);
        }
        Ok(released)
    }

    /// Every request issued for an alert.
    pub fn records(&self, alert_id: AlertId) -> Result<Vec<VoteRecord>> {
        Ok(self.storage.votes_for_alert(alert_id)?)
    }

    pub fn tally(&self, alert_id: AlertId) -> Result<VoteTally> {
        Ok(VoteTally::from_records(&self.records(alert_id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use firewatch_registry::{Alert, GeoPoint, ManualClock};

    struct Fixture {
        storage: Storage,
        pool: VerifierPool,
        clock: Arc<ManualClock>,
        ledger: VoteLedger,
        alert: AlertId,
    }

    fn fixture() -> Fixture {
        let storage = Storage::temporary().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 8, 15, 14, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let ledger = VoteLedger::new(
            storage.clone(),
            ReputationScorer::new(),
            ConsensusResolver::new(),
            clock.clone(),
        );
        let alert = Alert::new(GeoPoint::new(39.7, -121.6), start);
        storage.insert_alert(&alert).unwrap();
        Fixture {
            pool: VerifierPool::new(storage.clone()),
            storage,
            clock,
            ledger,
            alert: alert.id,
        }
    }

    impl Fixture {
        /// Registers a verifier and issues it a request, as a wave would.
        fn request(&self, points: u64) -> VerifierId {
            let v = self.pool.register_with_points("v", points).unwrap();
            let now = self.clock.now();
            assert!(self.pool.try_claim(v.id, now).unwrap());
            self.storage
                .insert_vote_if_absent(&VoteRecord::new(self.alert, v.id, 1, now))
                .unwrap();
            v.id
        }
    }

    #[test]
    fn test_vote_scores_and_releases() {
        let f = fixture();
        let v = f.request(0);
        f.clock.advance(Duration::seconds(12));

        let receipt = f.ledger.submit_vote(f.alert, v, true).unwrap();
        assert_eq!(receipt.response_time_secs, 12.0);
        assert_eq!(receipt.points_awarded, 10 + 18);
        assert_eq!(receipt.new_total, 28);
        assert_eq!(receipt.alert_status, AlertStatus::Pending);
        assert!(f.pool.get(v).unwrap().available);
    }

    #[test]
    fn test_sub_second_latency_is_not_rounded_up() {
        let f = fixture();
        let v = f.request(0);
        f.clock.advance(Duration::milliseconds(29_900));

        let receipt = f.ledger.submit_vote(f.alert, v, true).unwrap();
        assert_eq!(receipt.points_awarded, 10);
        assert_eq!(receipt.new_total, 10);
        assert!((receipt.response_time_secs - 29.9).abs() < 1e-9);

        let record = f.storage.load_vote(f.alert, v).unwrap().unwrap();
        assert_eq!(record.points_awarded, 10);
        assert!((f.pool.get(v).unwrap().avg_response_secs - 29.9).abs() < 1e-9);
    }

    #[test]
    fn test_ranked_vote_scores_higher() {
        let f = fixture();
        let v = f.request(2_100);
        f.clock.advance(Duration::seconds(40));

        let receipt = f.ledger.submit_vote(f.alert, v, false).unwrap();
        assert_eq!(receipt.points_awarded, 20);
        assert_eq!(receipt.new_total, 2_120);
    }

    #[test]
    fn test_second_submission_not_found() {
        let f = fixture();
        let v = f.request(0);
        f.ledger.submit_vote(f.alert, v, true).unwrap();

        let err = f.ledger.submit_vote(f.alert, v, false).unwrap_err();
        assert!(matches!(err, CouncilError::NotFound { .. }));

        let record = f.storage.load_vote(f.alert, v).unwrap().unwrap();
        assert_eq!(record.outcome, VoteOutcome::Yes);
    }

    #[test]
    fn test_never_requested_not_found() {
        let f = fixture();
        let stranger = f.pool.register("stranger").unwrap();
        let err = f.ledger.submit_vote(f.alert, stranger.id, true).unwrap_err();
        assert!(matches!(err, CouncilError::NotFound { .. }));
    }

    #[test]
    fn test_unknown_alert_not_found() {
        let f = fixture();
        let v = f.request(0);
        let err = f.ledger.submit_vote(AlertId::new(), v, true).unwrap_err();
        assert!(matches!(err, CouncilError::NotFound { .. }));
    }

    #[test]
    fn test_quorum_resolves_and_closes() {
        let f = fixture();
        let voters: Vec<_> = (0..4).map(|_| f.request(0)).collect();

        f.ledger.submit_vote(f.alert, voters[0], true).unwrap();
        f.ledger.submit_vote(f.alert, voters[1], true).unwrap();
        let third = f.ledger.submit_vote(f.alert, voters[2], false).unwrap();
        assert!(third.resolved_alert());
        assert_eq!(third.alert_status, AlertStatus::Confirmed);

        let err = f.ledger.submit_vote(f.alert, voters[3], false).unwrap_err();
        assert!(matches!(err, CouncilError::AlertClosed(_)));

        let alert = f.storage.load_alert(f.alert).unwrap().unwrap();
        assert_eq!((alert.yes_count, alert.no_count), (2, 1));
    }

    #[test]
    fn test_expire_outstanding_releases() {
        let f = fixture();
        let answered = f.request(0);
        let silent = f.request(0);
        f.ledger.submit_vote(f.alert, answered, true).unwrap();

        let released = f.ledger.expire_outstanding(f.alert).unwrap();
        assert_eq!(released, vec![silent]);
        assert!(f.pool.get(silent).unwrap().available);

        let err = f.ledger.submit_vote(f.alert, silent, true).unwrap_err();
        assert!(matches!(err, CouncilError::NotFound { .. }));

        let tally = f.ledger.tally(f.alert).unwrap();
        assert_eq!((tally.yes, tally.expired, tally.outstanding), (1, 1, 0));
    }
}
