//! # Core Data Models for the Verification Registry
//!
//! This module defines the three persistent entities of the verification
//! protocol (alerts, verifiers, vote records) and the small value types
//! they are built from.
//!
//! ## Invariants
//!
//! The types in this module encode the protocol's state rules directly:
//!
//! - **Monotonic status**: [`Alert::transition`] only ever leaves
//!   `Pending`, never re-enters it.
//! - **Monotonic deadline**: [`Alert::arm_deadline`] never moves an armed
//!   deadline earlier.
//! - **Derived rank**: a [`Verifier`]'s tier is recomputed from its points
//!   on every change and cannot be set independently.
//! - **Immutable votes**: a [`VoteRecord`] accepts exactly one cast via
//!   [`VoteRecord::cast`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Point thresholds at which each rank tier begins, lowest first.
///
/// Boundaries are inclusive on the upper tier: 500 points is already
/// `Trusted`.
pub const RANK_THRESHOLDS: [(RankTier, u64); 5] = [
    (RankTier::Rookie, 0),
    (RankTier::Trusted, 500),
    (RankTier::Expert, 2_000),
    (RankTier::Master, 5_000),
    (RankTier::Legend, 10_000),
];

/// Unique identifier of one detection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertId(Uuid);

impl AlertId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Raw 16-byte form, used as the storage key.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Rebuilds an identifier from its storage key.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a registered human verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VerifierId(pub u64);

impl VerifierId {
    /// Big-endian key bytes, so sled iteration follows id order.
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for VerifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "verifier-{}", self.0)
    }
}

/// Geographic position of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Axis-aligned box reported by the detector, in pixel coordinates.
///
/// Kept on the alert for audit only; nothing in the protocol reads it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// Verification status of an alert.
///
/// `Pending` is the only non-terminal state. `NotEscalated` marks an alert
/// whose detection confidence never crossed the acceptance threshold; no
/// quorum rule applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Confirmed,
    FalseAlarm,
    NotEscalated,
}

impl AlertStatus {
    pub fn is_pending(self) -> bool {
        self == AlertStatus::Pending
    }

    pub fn is_terminal(self) -> bool {
        !self.is_pending()
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Confirmed => "confirmed",
            AlertStatus::FalseAlarm => "false_alarm",
            AlertStatus::NotEscalated => "not_escalated",
        };
        f.write_str(s)
    }
}

/// One detection event awaiting (or past) human verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub location: GeoPoint,
    /// Camera that captured the image, when known.
    pub camera_id: Option<u64>,
    /// Maximum detector confidence; `None` until a detection result lands.
    pub confidence: Option<f64>,
    pub boxes: Vec<BoundingBox>,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub verification_deadline: Option<DateTime<Utc>>,
    pub yes_count: u32,
    pub no_count: u32,
    /// Waves issued by the most recent escalation run.
    pub waves_run: u8,
    /// Set when every wave ran out without reaching quorum.
    pub inconclusive: bool,
}

impl Alert {
    /// Creates a pending alert with no detection result attached.
    pub fn new(location: GeoPoint, created_at: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::new(),
            location,
            camera_id: None,
            confidence: None,
            boxes: Vec::new(),
            status: AlertStatus::Pending,
            created_at,
            verification_deadline: None,
            yes_count: 0,
            no_count: 0,
            waves_run: 0,
            inconclusive: false,
        }
    }

    pub fn with_camera(mut self, camera_id: u64) -> Self {
        self.camera_id = Some(camera_id);
        self
    }

    /// Arms the verification deadline, keeping whichever is later.
    ///
    /// Returns the deadline now in effect.
    pub fn arm_deadline(&mut self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        let deadline = match self.verification_deadline {
            Some(current) if current >= candidate => current,
            _ => candidate,
        };
        self.verification_deadline = Some(deadline);
        deadline
    }

    /// Moves the alert out of `Pending`.
    ///
    /// Returns `false` (and changes nothing) if the alert already left
    /// `Pending` or `to` is `Pending` itself.
    pub fn transition(&mut self, to: AlertStatus) -> bool {
        if !self.status.is_pending() || to.is_pending() {
            return false;
        }
        self.status = to;
        self.inconclusive = false;
        true
    }

    pub fn is_verification_expired(&self, now: DateTime<Utc>) -> bool {
        match self.verification_deadline {
            Some(deadline) => now > deadline,
            None => false,
        }
    }
}

/// Ordered reputation class derived purely from accumulated points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankTier {
    Rookie,
    Trusted,
    Expert,
    Master,
    Legend,
}

impl RankTier {
    /// Maps a point total onto its tier via [`RANK_THRESHOLDS`].
    pub fn from_points(points: u64) -> Self {
        RANK_THRESHOLDS
            .iter()
            .rev()
            .find(|(_, floor)| points >= *floor)
            .map(|(tier, _)| *tier)
            .unwrap_or(RankTier::Rookie)
    }

    /// Points at which this tier begins.
    pub fn threshold(self) -> u64 {
        RANK_THRESHOLDS
            .iter()
            .find(|(tier, _)| *tier == self)
            .map(|(_, floor)| *floor)
            .unwrap_or(0)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RankTier::Rookie => "rookie",
            RankTier::Trusted => "trusted",
            RankTier::Expert => "expert",
            RankTier::Master => "master",
            RankTier::Legend => "legend",
        }
    }
}

impl fmt::Display for RankTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered human participant.
///
/// `points` and `rank` are private so the tier can only change through
/// [`Verifier::add_points`], which keeps it consistent with the total.
/// A stored `rank` is ignored on load and recomputed from `points`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredVerifier")]
pub struct Verifier {
    pub id: VerifierId,
    pub name: String,
    points: u64,
    rank: RankTier,
    /// Cleared while the verifier holds an unanswered request.
    pub available: bool,
    /// Time of the last verification request; `None` if never asked.
    pub last_activity: Option<DateTime<Utc>>,
    /// Running mean of response latency in seconds.
    pub avg_response_secs: f64,
    pub completed_votes: u64,
}

/// Wire shape of [`Verifier`].
#[derive(Deserialize)]
struct StoredVerifier {
    id: VerifierId,
    name: String,
    points: u64,
    #[serde(default, rename = "rank")]
    _rank: Option<RankTier>,
    available: bool,
    last_activity: Option<DateTime<Utc>>,
    avg_response_secs: f64,
    completed_votes: u64,
}

impl From<StoredVerifier> for Verifier {
    fn from(stored: StoredVerifier) -> Self {
        Self {
            id: stored.id,
            name: stored.name,
            points: stored.points,
            rank: RankTier::from_points(stored.points),
            available: stored.available,
            last_activity: stored.last_activity,
            avg_response_secs: stored.avg_response_secs,
            completed_votes: stored.completed_votes,
        }
    }
}

impl Verifier {
    pub fn new(id: VerifierId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            points: 0,
            rank: RankTier::Rookie,
            available: true,
            last_activity: None,
            avg_response_secs: 0.0,
            completed_votes: 0,
        }
    }

    /// Seeds a starting point total (e.g. migrated reputation).
    pub fn with_points(mut self, points: u64) -> Self {
        self.points = points;
        self.rank = RankTier::from_points(points);
        self
    }

    pub fn points(&self) -> u64 {
        self.points
    }

    pub fn rank(&self) -> RankTier {
        self.rank
    }

    /// Adds points and recomputes the tier. Returns the new total.
    pub fn add_points(&mut self, points: u64) -> u64 {
        self.points = self.points.saturating_add(points);
        self.rank = RankTier::from_points(self.points);
        self.points
    }

    /// Folds one response latency into the running mean.
    pub fn record_response(&mut self, latency_secs: f64) {
        self.completed_votes += 1;
        let n = self.completed_votes as f64;
        self.avg_response_secs += (latency_secs - self.avg_response_secs) / n;
    }

    /// True if at least `cooldown` has passed since the last request.
    pub fn cooled_down(&self, now: DateTime<Utc>, cooldown: chrono::Duration) -> bool {
        match self.last_activity {
            Some(last) => now - last >= cooldown,
            None => true,
        }
    }
}

/// Ternary vote outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    Unset,
    Yes,
    No,
}

impl VoteOutcome {
    pub fn from_bool(affirmative: bool) -> Self {
        if affirmative {
            VoteOutcome::Yes
        } else {
            VoteOutcome::No
        }
    }

    pub fn is_cast(self) -> bool {
        self != VoteOutcome::Unset
    }
}

/// One verification request and its eventual vote, per (alert, verifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub alert_id: AlertId,
    pub verifier_id: VerifierId,
    /// Wave number (1-based) that issued the request.
    pub wave: u8,
    pub outcome: VoteOutcome,
    pub requested_at: DateTime<Utc>,
    pub cast_at: Option<DateTime<Utc>>,
    pub response_time_secs: Option<f64>,
    pub points_awarded: u64,
    pub expired: bool,
}

impl VoteRecord {
    pub fn new(
        alert_id: AlertId,
        verifier_id: VerifierId,
        wave: u8,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            alert_id,
            verifier_id,
            wave,
            outcome: VoteOutcome::Unset,
            requested_at,
            cast_at: None,
            response_time_secs: None,
            points_awarded: 0,
            expired: false,
        }
    }

    /// Still waiting for an answer.
    pub fn is_outstanding(&self) -> bool {
        !self.outcome.is_cast() && !self.expired
    }

    /// Seconds between request and `at`, at millisecond resolution and
    /// clamped at zero.
    pub fn latency_secs(&self, at: DateTime<Utc>) -> f64 {
        (at - self.requested_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// Records the vote. Returns `false` if the record is not outstanding
    /// or `outcome` is `Unset`.
    pub fn cast(&mut self, outcome: VoteOutcome, at: DateTime<Utc>, points: u64) -> bool {
        if !self.is_outstanding() || !outcome.is_cast() {
            return false;
        }
        self.outcome = outcome;
        self.cast_at = Some(at);
        self.response_time_secs = Some(self.latency_secs(at));
        self.points_awarded = points;
        true
    }

    /// Storage key: alert bytes followed by the verifier id.
    pub fn key(&self) -> [u8; 24] {
        vote_key(self.alert_id, self.verifier_id)
    }
}

/// Builds the composite vote key for a pair.
pub fn vote_key(alert: AlertId, verifier: VerifierId) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(alert.as_bytes());
    key[16..].copy_from_slice(&verifier.to_key());
    key
}

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to open, read or write the database.
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Failed to serialize or deserialize a record.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A record with this key already exists.
    #[error("Record already exists: {0}")]
    AlreadyExists(String),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_rank_boundaries() {
        assert_eq!(RankTier::from_points(0), RankTier::Rookie);
        assert_eq!(RankTier::from_points(499), RankTier::Rookie);
        assert_eq!(RankTier::from_points(500), RankTier::Trusted);
        assert_eq!(RankTier::from_points(1_999), RankTier::Trusted);
        assert_eq!(RankTier::from_points(2_000), RankTier::Expert);
        assert_eq!(RankTier::from_points(4_999), RankTier::Expert);
        assert_eq!(RankTier::from_points(5_000), RankTier::Master);
        assert_eq!(RankTier::from_points(9_999), RankTier::Master);
        assert_eq!(RankTier::from_points(10_000), RankTier::Legend);
        assert_eq!(RankTier::from_points(u64::MAX), RankTier::Legend);
    }

    #[test]
    fn test_rank_ordering() {
        assert!(RankTier::Rookie < RankTier::Trusted);
        assert!(RankTier::Trusted < RankTier::Expert);
        assert!(RankTier::Expert < RankTier::Master);
        assert!(RankTier::Master < RankTier::Legend);
        assert_eq!(RankTier::Master.threshold(), 5_000);
    }

    #[test]
    fn test_add_points_recomputes_rank() {
        let mut v = Verifier::new(VerifierId(1), "ana").with_points(490);
        assert_eq!(v.rank(), RankTier::Rookie);
        assert_eq!(v.add_points(10), 500);
        assert_eq!(v.rank(), RankTier::Trusted);
    }

    #[test]
    fn test_stored_rank_recomputed_from_points() {
        let v = Verifier::new(VerifierId(4), "dee").with_points(2_500);
        let mut json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["rank"], "expert");

        json["rank"] = serde_json::json!("legend");
        let loaded: Verifier = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(loaded.rank(), RankTier::Expert);
        assert_eq!(loaded, v);

        json.as_object_mut().unwrap().remove("rank");
        let loaded: Verifier = serde_json::from_value(json).unwrap();
        assert_eq!(loaded.rank(), RankTier::Expert);
    }

    #[test]
    fn test_running_mean_response() {
        let mut v = Verifier::new(VerifierId(1), "ana");
        for latency in [10.0, 20.0, 30.0] {
            v.record_response(latency);
        }
        assert_eq!(v.completed_votes, 3);
        assert!((v.avg_response_secs - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_cooldown() {
        let mut v = Verifier::new(VerifierId(1), "ana");
        let cooldown = Duration::minutes(10);
        assert!(v.cooled_down(t0(), cooldown));

        v.last_activity = Some(t0());
        assert!(!v.cooled_down(t0() + Duration::minutes(9), cooldown));
        assert!(v.cooled_down(t0() + Duration::minutes(10), cooldown));
    }

    #[test]
    fn test_deadline_never_moves_earlier() {
        let mut alert = Alert::new(GeoPoint::new(37.0, -122.0), t0());
        let late = t0() + Duration::minutes(5);
        assert_eq!(alert.arm_deadline(late), late);
        assert_eq!(alert.arm_deadline(t0() + Duration::minutes(1)), late);

        let later = t0() + Duration::minutes(8);
        assert_eq!(alert.arm_deadline(later), later);
        assert!(alert.is_verification_expired(later + Duration::seconds(1)));
        assert!(!alert.is_verification_expired(later));
    }

    #[test]
    fn test_status_transition_is_monotonic() {
        let mut alert = Alert::new(GeoPoint::new(0.0, 0.0), t0());
        assert!(!alert.transition(AlertStatus::Pending));
        assert!(alert.transition(AlertStatus::Confirmed));
        assert!(!alert.transition(AlertStatus::FalseAlarm));
        assert_eq!(alert.status, AlertStatus::Confirmed);
    }

    #[test]
    fn test_vote_cast_once() {
        let mut record = VoteRecord::new(AlertId::new(), VerifierId(7), 1, t0());
        assert!(record.is_outstanding());
        assert!(!record.cast(VoteOutcome::Unset, t0(), 0));

        let at = t0() + Duration::milliseconds(12_700);
        assert!(record.cast(VoteOutcome::Yes, at, 27));
        assert_eq!(record.response_time_secs, Some(12.7));
        assert!(!record.cast(VoteOutcome::No, at, 0));
        assert_eq!(record.outcome, VoteOutcome::Yes);
    }

    #[test]
    fn test_expired_record_rejects_cast() {
        let mut record = VoteRecord::new(AlertId::new(), VerifierId(7), 1, t0());
        record.expired = true;
        assert!(!record.cast(VoteOutcome::No, t0(), 10));
    }

    #[test]
    fn test_vote_key_prefix() {
        let alert = AlertId::new();
        let key = vote_key(alert, VerifierId(3));
        assert_eq!(&key[..16], alert.as_bytes());
        assert_eq!(&key[16..], &3u64.to_be_bytes());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&AlertStatus::FalseAlarm).unwrap();
        assert_eq!(json, "\"false_alarm\"");
        let tier: RankTier = serde_json::from_str("\"master\"").unwrap();
        assert_eq!(tier, RankTier::Master);
    }
}
