//! # Wave Scheduler
//!
//! Selects verifiers for one escalation wave, books them, records the
//! requests and sends the notifications.
//!
//! ## Booking
//!
//! Every selected verifier is claimed through
//! [`VerifierPool::try_claim`] before its request is written. A verifier
//! that another wave (for another alert) claims first is skipped and the
//! next candidate is tried, so a capped wave still fills up when there are
//! enough free people.
//!
//! ## Exclusions
//!
//! Verifiers that already hold a record for the alert (from an earlier
//! wave or an earlier escalation run) are never asked again.

use std::collections::HashSet;
use std::sync::Arc;

use firewatch_registry::{AlertId, Clock, Storage, Verifier, VerifierId, VerifierPool, VoteRecord};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::eligibility::{Selection, WaveSpec};
use crate::error::{DispatchError, Result};
use crate::notifier::{Notification, Notifier};

/// What a wave did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveReport {
    pub wave: u8,
    /// Verifiers that received a request, in selection order.
    pub issued: Vec<VerifierId>,
    /// Candidates lost to a concurrent claim.
    pub contended: usize,
}

impl WaveReport {
    pub fn requests_issued(&self) -> usize {
        self.issued.len()
    }
}

/// Runs individual waves against the verifier pool.
pub struct WaveScheduler {
    storage: Storage,
    pool: VerifierPool,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl WaveScheduler {
    pub fn new(storage: Storage, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: VerifierPool::new(storage.clone()),
            storage,
            notifier,
            clock,
        }
    }

    /// Issues verification requests for `alert` according to `wave`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NoEligibleVerifiers`] if no request could be issued.
    pub fn run_wave(&self, alert: AlertId, wave: &WaveSpec) -> Result<WaveReport> {
        let now = self.clock.now();
        let already_asked: HashSet<VerifierId> = self
            .storage
            .votes_for_alert(alert)?
            .into_iter()
            .map(|r| r.verifier_id)
            .collect();

        let mut candidates = self.pool.filter(|v| {
            !already_asked.contains(&v.id) && wave.eligibility.admits(v, now)
        })?;
        let cap = order_candidates(&mut candidates, wave.selection);

        let mut report = WaveReport {
            wave: wave.number,
            issued: Vec::new(),
            contended: 0,
        };

        for candidate in candidates {
            if cap.map_or(false, |cap| report.issued.len() >= cap) {
                break;
            }
            if !self.pool.try_claim(candidate.id, now)? {
                report.contended += 1;
                continue;
            }

            let record = VoteRecord::new(alert, candidate.id, wave.number, now);
            if !self.storage.insert_vote_if_absent(&record)? {
                warn!("{} already holds a request for {}", candidate.id, alert);
                self.pool.release(candidate.id)?;
                continue;
            }

            self.notifier.notify(Notification {
                verifier: candidate.id,
                alert,
                wave: wave.number,
            });
            debug!("Wave {} asked {} ({})", wave.number, candidate.id, candidate.rank());
            report.issued.push(candidate.id);
        }

        if report.issued.is_empty() {
            debug!("Wave {} for {} found no one", wave.number, alert);
            return Err(DispatchError::NoEligibleVerifiers { wave: wave.number });
        }

        info!(
            "Wave {} for alert {} issued {} requests",
            wave.number,
            alert,
            report.requests_issued()
        );
        Ok(report)
    }
}

/// Orders candidates for selection and returns the wave's cap.
fn order_candidates(candidates: &mut [Verifier], selection: Selection) -> Option<usize> {
    match selection {
        Selection::Random { cap } => {
            candidates.shuffle(&mut rand::thread_rng());
            Some(cap)
        }
        Selection::ByPointsDescending => {
            candidates.sort_by(|a, b| b.points().cmp(&a.points()).then(a.id.cmp(&b.id)));
            None
        }
    }
}
