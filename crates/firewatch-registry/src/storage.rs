//! # Persistent Storage Layer
//!
//! This module provides a persistence layer using Sled, an embedded database.
//! Alerts, verifiers and vote records survive process restarts and every
//! update to an existing record is applied with compare-and-swap, so two
//! writers racing on the same record never lose an update.
//!
//! ## Storage Structure
//!
//! The database uses three trees (namespaces):
//!
//! | Tree | Key | Value | Purpose |
//! |------|-----|-------|---------|
//! | `alerts` | 16-byte alert id | JSON `Alert` | Detection events |
//! | `verifiers` | big-endian u64 id | JSON `Verifier` | Verifier pool |
//! | `votes` | alert id ++ verifier id | JSON `VoteRecord` | Vote ledger |
//!
//! The vote key puts the alert first so a prefix scan returns every
//! request issued for one alert.
//!
//! ## Concurrency
//!
//! - Record creation is insert-if-absent: the one-record-per-pair rule for
//!   votes is enforced here, not by callers.
//! - [`Storage::modify_verifier`] and friends retry their closure until the
//!   swap lands. Closures may therefore run more than once and must be pure.
//!
//! ## References
//!
//! - Sled documentation: <https://sled.rs/>

use crate::models::{
    vote_key, Alert, AlertId, RegistryError, Result, Verifier, VerifierId, VoteRecord,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::path::Path;
use tracing::debug;

/// Tree name for storing alerts.
const ALERT_TREE: &str = "alerts";

/// Tree name for storing verifiers.
const VERIFIER_TREE: &str = "verifiers";

/// Tree name for storing vote records.
const VOTE_TREE: &str = "votes";

/// Wrapper around a Sled database for registry storage.
///
/// Cloning is cheap; clones share the same underlying database.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use firewatch_registry::storage::Storage;
/// use firewatch_registry::{Alert, GeoPoint};
///
/// let storage = Storage::temporary().unwrap();
/// let alert = Alert::new(GeoPoint::new(38.5, -121.7), Utc::now());
/// storage.insert_alert(&alert).unwrap();
///
/// let loaded = storage.load_alert(alert.id).unwrap().unwrap();
/// assert_eq!(loaded.id, alert.id);
/// ```
#[derive(Clone)]
pub struct Storage {
    /// The underlying Sled database.
    db: sled::Db,

    alerts: sled::Tree,

    verifiers: sled::Tree,

    votes: sled::Tree,
}

impl Storage {
    /// Opens or creates a storage database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Database` if the path is invalid, permissions
    /// are insufficient or the database is corrupted.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Creates a temporary in-memory storage for testing.
    ///
    /// The database is lost when the last clone is dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let alerts = db.open_tree(ALERT_TREE)?;
        let verifiers = db.open_tree(VERIFIER_TREE)?;
        let votes = db.open_tree(VOTE_TREE)?;

        Ok(Storage {
            db,
            alerts,
            verifiers,
            votes,
        })
    }

    /// Allocates a fresh verifier id from sled's monotonic counter.
    pub fn generate_verifier_id(&self) -> Result<VerifierId> {
        Ok(VerifierId(self.db.generate_id()?))
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    /// Stores a new alert.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::AlreadyExists` if the id is taken.
    pub fn insert_alert(&self, alert: &Alert) -> Result<()> {
        if !insert_new(&self.alerts, alert.id.as_bytes(), alert)? {
            return Err(RegistryError::AlreadyExists(format!("alert {}", alert.id)));
        }
        Ok(())
    }

    pub fn load_alert(&self, id: AlertId) -> Result<Option<Alert>> {
        load(&self.alerts, id.as_bytes())
    }

    /// Atomically applies `f` to a stored alert.
    ///
    /// `f` returns `false` to leave the record untouched, in which case
    /// `Ok(None)` is returned.
    pub fn modify_alert<F>(&self, id: AlertId, f: F) -> Result<Option<Alert>>
    where
        F: FnMut(&mut Alert) -> bool,
    {
        modify(&self.alerts, id.as_bytes(), &format_args!("alert {}", id), f)
    }

    pub fn list_alerts(&self) -> Result<Vec<Alert>> {
        scan(self.alerts.iter())
    }

    // ------------------------------------------------------------------
    // Verifiers
    // ------------------------------------------------------------------

    /// Stores a new verifier.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::AlreadyExists` if the id is taken.
    pub fn insert_verifier(&self, verifier: &Verifier) -> Result<()> {
        if !insert_new(&self.verifiers, &verifier.id.to_key(), verifier)? {
            return Err(RegistryError::AlreadyExists(verifier.id.to_string()));
        }
        Ok(())
    }

    pub fn load_verifier(&self, id: VerifierId) -> Result<Option<Verifier>> {
        load(&self.verifiers, &id.to_key())
    }

    /// Atomically applies `f` to a stored verifier. See [`Storage::modify_alert`].
    pub fn modify_verifier<F>(&self, id: VerifierId, f: F) -> Result<Option<Verifier>>
    where
        F: FnMut(&mut Verifier) -> bool,
    {
        modify(&self.verifiers, &id.to_key(), &id, f)
    }

    /// Lists all verifiers in id order.
    pub fn list_verifiers(&self) -> Result<Vec<Verifier>> {
        scan(self.verifiers.iter())
    }

    pub fn verifier_count(&self) -> usize {
        self.verifiers.len()
    }

    // ------------------------------------------------------------------
    // Votes
    // ------------------------------------------------------------------

    /// Stores a vote record unless one already exists for the pair.
    ///
    /// Returns `true` if the record was created.
    pub fn insert_vote_if_absent(&self, record: &VoteRecord) -> Result<bool> {
        insert_new(&self.votes, &record.key(), record)
    }

    pub fn load_vote(&self, alert: AlertId, verifier: VerifierId) -> Result<Option<VoteRecord>> {
        load(&self.votes, &vote_key(alert, verifier))
    }

    /// Atomically applies `f` to a stored vote record. See [`Storage::modify_alert`].
    pub fn modify_vote<F>(&self, alert: AlertId, verifier: VerifierId, f: F) -> Result<Option<VoteRecord>>
    where
        F: FnMut(&mut VoteRecord) -> bool,
    {
        modify(
            &self.votes,
            &vote_key(alert, verifier),
            &format_args!("vote {} / {}", alert, verifier),
            f,
        )
    }

    /// Every vote record issued for `alert`, ordered by verifier id.
    pub fn votes_for_alert(&self, alert: AlertId) -> Result<Vec<VoteRecord>> {
        scan(self.votes.scan_prefix(alert.as_bytes()))
    }

    /// Every request ever issued to `verifier`, across all alerts.
    ///
    /// Votes are keyed by alert first, so this walks the whole tree.
    pub fn votes_for_verifier(&self, verifier: VerifierId) -> Result<Vec<VoteRecord>> {
        let suffix = verifier.to_key();
        scan(self.votes.iter().filter(|entry| match entry {
            Ok((key, _)) => key.ends_with(&suffix),
            Err(_) => true,
        }))
    }

    /// Flushes all pending writes to disk.
    ///
    /// Returns the number of bytes flushed.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("alerts", &self.alerts.len())
            .field("verifiers", &self.verifiers.len())
            .field("votes", &self.votes.len())
            .finish()
    }
}

fn load<T: DeserializeOwned>(tree: &sled::Tree, key: &[u8]) -> Result<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn insert_new<T: Serialize>(tree: &sled::Tree, key: &[u8], value: &T) -> Result<bool> {
    let bytes = serde_json::to_vec(value)?;
    Ok(tree
        .compare_and_swap(key, None::<&[u8]>, Some(bytes))?
        .is_ok())
}

fn modify<T, F>(tree: &sled::Tree, key: &[u8], what: &dyn Display, mut f: F) -> Result<Option<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(&mut T) -> bool,
{
    loop {
        let current = tree
            .get(key)?
            .ok_or_else(|| RegistryError::NotFound(what.to_string()))?;
        let mut value: T = serde_json::from_slice(&current)?;
        if !f(&mut value) {
            return Ok(None);
        }

        let next = serde_json::to_vec(&value)?;
        match tree.compare_and_swap(key, Some(&current), Some(next))? {
            Ok(()) => return Ok(Some(value)),
            Err(_) => debug!("Concurrent update on {}, retrying", what),
        }
    }
}

fn scan<T, I>(iter: I) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    I: Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>,
{
    let mut out = Vec::new();
    for entry in iter {
        let (_, bytes) = entry?;
        out.push(serde_json::from_slice(&bytes)?);
    }
    Ok(out)
}
