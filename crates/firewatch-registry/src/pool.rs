//! # Verifier Pool
//!
//! Tracks every verifier's availability, points and tier. Availability is
//! the contended resource of the protocol: concurrent waves for different
//! alerts compete for the same people.
//!
//! ## Claim Protocol
//!
//! ```text
//!   available ──try_claim (CAS)──▶ busy ──release──▶ available
//!        ▲                                              │
//!        └──────────────────────────────────────────────┘
//! ```
//!
//! [`VerifierPool::try_claim`] flips `available` from `true` to `false` in a
//! single compare-and-swap on the stored record, so two schedulers can never
//! both book the same verifier.

use std::collections::HashSet;

use crate::models::{RegistryError, Result, Verifier, VerifierId};
use crate::storage::Storage;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Activity summary for one verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierStats {
    pub id: VerifierId,
    pub completed_votes: u64,
    /// Running mean, `None` before the first vote.
    pub avg_response_secs: Option<f64>,
    /// Consecutive UTC days, ending today, with at least one cast vote.
    pub current_streak: u32,
}

/// Persistent set of registered verifiers.
#[derive(Debug, Clone)]
pub struct VerifierPool {
    storage: Storage,
}

impl VerifierPool {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Registers a new verifier with zero points.
    pub fn register(&self, name: impl Into<String>) -> Result<Verifier> {
        self.register_with_points(name, 0)
    }

    /// Registers a new verifier with a starting point total.
    pub fn register_with_points(&self, name: impl Into<String>, points: u64) -> Result<Verifier> {
        let id = self.storage.generate_verifier_id()?;
        let verifier = Verifier::new(id, name).with_points(points);
        self.storage.insert_verifier(&verifier)?;
        info!(
            "Registered {} '{}' as {} ({} points)",
            verifier.id,
            verifier.name,
            verifier.rank(),
            verifier.points()
        );
        Ok(verifier)
    }

    /// Adds a fully-formed verifier record (imports, fixtures).
    pub fn insert(&self, verifier: &Verifier) -> Result<()> {
        self.storage.insert_verifier(verifier)
    }

    /// Loads a verifier.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for unknown ids.
    pub fn get(&self, id: VerifierId) -> Result<Verifier> {
        self.storage
            .load_verifier(id)?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<Verifier>> {
        self.storage.list_verifiers()
    }

    /// Verifiers matching `predicate`, in id order.
    pub fn filter<P>(&self, predicate: P) -> Result<Vec<Verifier>>
    where
        P: Fn(&Verifier) -> bool,
    {
        Ok(self.list()?.into_iter().filter(|v| predicate(v)).collect())
    }

    /// Top `limit` verifiers by points, ties broken by id.
    pub fn leaderboard(&self, limit: usize) -> Result<Vec<Verifier>> {
        let mut all = self.list()?;
        all.sort_by(|a, b| b.points().cmp(&a.points()).then(a.id.cmp(&b.id)));
        all.truncate(limit);
        Ok(all)
    }

    /// Books a verifier for a request if it is currently available.
    ///
    /// On success the verifier becomes unavailable and its last activity is
    /// set to `now`. Returns `false` if someone else holds it.
    pub fn try_claim(&self, id: VerifierId, now: DateTime<Utc>) -> Result<bool> {
        let claimed = self.storage.modify_verifier(id, |v| {
            if !v.available {
                return false;
            }
            v.available = false;
            v.last_activity = Some(now);
            true
        })?;
        if claimed.is_none() {
            debug!("{} already claimed", id);
        }
        Ok(claimed.is_some())
    }

    /// Makes a verifier available again. Returns `false` if it already was.
    pub fn release(&self, id: VerifierId) -> Result<bool> {
        let released = self.storage.modify_verifier(id, |v| {
            if v.available {
                return false;
            }
            v.available = true;
            true
        })?;
        Ok(released.is_some())
    }

    /// Applies an arbitrary update atomically and returns the new record.
    pub fn update<F>(&self, id: VerifierId, mut f: F) -> Result<Verifier>
    where
        F: FnMut(&mut Verifier),
    {
        self.storage
            .modify_verifier(id, |v| {
                f(v);
                true
            })?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Number of consecutive days ending on `today` on which the verifier
    /// cast at least one vote. Zero if nothing was cast on `today`.
    pub fn verification_streak(&self, id: VerifierId, today: NaiveDate) -> Result<u32> {
        let days: HashSet<NaiveDate> = self
            .storage
            .votes_for_verifier(id)?
            .into_iter()
            .filter(|r| r.outcome.is_cast())
            .filter_map(|r| r.cast_at)
            .map(|at| at.date_naive())
            .collect();

        let mut streak = 0;
        let mut day = Some(today);
        while let Some(d) = day.filter(|d| days.contains(d)) {
            streak += 1;
            day = d.pred_opt();
        }
        Ok(streak)
    }

    /// Vote count, mean latency and current streak for a verifier.
    pub fn stats(&self, id: VerifierId, today: NaiveDate) -> Result<VerifierStats> {
        let verifier = self.get(id)?;
        Ok(VerifierStats {
            id,
            completed_votes: verifier.completed_votes,
            avg_response_secs: (verifier.completed_votes > 0)
                .then_some(verifier.avg_response_secs),
            current_streak: self.verification_streak(id, today)?,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}
