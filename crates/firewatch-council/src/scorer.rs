//! Reputation scoring for completed votes.
//!
//! A vote earns a base award (higher for ranked tiers) plus a speed bonus
//! of one point per second answered inside the speed window:
//!
//! ```text
//! points = floor(base(rank) + max(0, window - latency_secs))
//! ```
//!
//! Latency keeps its fractional part; only the total is truncated, so a
//! vote at 29.9 s earns `floor(10.1)` and not a rounded-up bonus.

use firewatch_registry::{RankTier, Result, Verifier, VerifierId, VerifierPool};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scoring parameters and the update applied to a verifier's record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationScorer {
    base_points: u64,
    ranked_base_points: u64,
    speed_window_secs: u64,
    ranked_tiers: Vec<RankTier>,
}

impl Default for ReputationScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReputationScorer {
    /// 10 base points, 20 for expert/master, 30 second speed window.
    pub fn new() -> Self {
        Self {
            base_points: 10,
            ranked_base_points: 20,
            speed_window_secs: 30,
            ranked_tiers: vec![RankTier::Expert, RankTier::Master],
        }
    }

    pub fn with_base_points(mut self, base: u64, ranked: u64) -> Self {
        self.base_points = base;
        self.ranked_base_points = ranked;
        self
    }

    pub fn with_speed_window(mut self, secs: u64) -> Self {
        self.speed_window_secs = secs;
        self
    }

    pub fn with_ranked_tiers(mut self, tiers: Vec<RankTier>) -> Self {
        self.ranked_tiers = tiers;
        self
    }

    pub fn is_ranked(&self, tier: RankTier) -> bool {
        self.ranked_tiers.contains(&tier)
    }

    pub fn speed_bonus(&self, latency_secs: f64) -> f64 {
        (self.speed_window_secs as f64 - latency_secs).max(0.0)
    }

    /// Points earned by `verifier` for a vote cast after `latency_secs`.
    ///
    /// Uses the verifier's tier at the time of the vote.
    pub fn score(&self, verifier: &Verifier, latency_secs: f64) -> u64 {
        let base = if self.is_ranked(verifier.rank()) {
            self.ranked_base_points
        } else {
            self.base_points
        };
        (base as f64 + self.speed_bonus(latency_secs)).floor() as u64
    }

    /// Credits an award: adds the points, recomputes the tier and folds the
    /// latency into the running response-time mean.
    pub fn apply(
        &self,
        pool: &VerifierPool,
        verifier: VerifierId,
        points: u64,
        latency_secs: f64,
    ) -> Result<Verifier> {
        let before = pool.get(verifier)?.rank();
        let updated = pool.update(verifier, |v| {
            v.add_points(points);
            v.record_response(latency_secs);
        })?;
        if updated.rank() != before {
            debug!("{} promoted {} -> {}", verifier, before, updated.rank());
        }
        Ok(updated)
    }
}
