//! # Firewatch Core
//!
//! Crowd-sourced verification of automated wildfire alerts.
//! Ties the verifier registry, the wave dispatcher and the voting council
//! together behind one orchestrator.
//!
//! ## Alert Lifecycle
//!
//! | Step | Component | Outcome |
//! |------|-----------|---------|
//! | Detection | Detector | max confidence and boxes attached to the alert |
//! | Gate | Orchestrator | at or below threshold: `not_escalated` |
//! | Wave 1, 2 | Wave Scheduler | up to 5 random rookie/trusted verifiers each |
//! | Wave 3 | Wave Scheduler | every expert and master, highest points first |
//! | Votes | Vote Ledger | points credited, verifier released |
//! | Quorum | Consensus Resolver | 3 votes in: 2 yes confirms, else false alarm |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       FIREWATCH CORE                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   detector ──▶ ┌─────────────────────┐ ◀── submit_vote          │
//! │                │  AlertOrchestrator  │                          │
//! │                └──────────┬──────────┘                          │
//! │                           │                                     │
//! │         ┌─────────────────┼──────────────────┐                  │
//! │         ▼                 ▼                  ▼                  │
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────┐           │
//! │  │    Wave     │   │    Vote     │   │  Consensus   │           │
//! │  │  Scheduler  │   │   Ledger    │──▶│  + Scorer    │           │
//! │  └──────┬──────┘   └──────┬──────┘   └──────────────┘           │
//! │         └────────┬────────┘                                     │
//! │                  ▼                                              │
//! │        ┌───────────────────┐                                    │
//! │        │ VerifierPool/sled │                                    │
//! │        └───────────────────┘                                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use firewatch_core::{AlertOrchestrator, FirewatchConfig, GeoPoint};
//!
//! let firewatch = AlertOrchestrator::new(FirewatchConfig::default())?;
//! let alert = firewatch.open_alert(GeoPoint::new(39.76, -121.62), None)?;
//!
//! let outcome = firewatch.process_image(alert.id, jpeg_bytes).await?;
//! if outcome.is_confirmed() {
//!     dispatch_crews(alert.id);
//! }
//! ```
//!
//! ## Notes
//!
//! - A vote is accepted at most once per verifier and alert
//! - Resolution is final: late votes fail with `AlertClosed`
//! - A run that exhausts every wave leaves the alert pending and flagged
//!   inconclusive; a fresh detection starts a new run
//!
//! ## References
//!
//! - Wave timing and quorum: [`FirewatchConfig`]
//! - Double-booking protection: [`VerifierPool::try_claim`]

mod config;
mod detector;
mod error;
mod orchestrator;
mod outcome;

pub use config::{
    ConsensusConfig, DetectionConfig, FirewatchConfig, ScoringConfig, StorageConfig, WaveConfig,
};
pub use detector::{max_confidence, Detection, Detector, DetectorError};
pub use error::FirewatchError;
pub use orchestrator::{AlertOrchestrator, Components};
pub use outcome::VerificationOutcome;

// Re-export component types for convenience
pub use firewatch_council::{ConsensusResolver, ReputationScorer, VoteReceipt, VoteTally};
pub use firewatch_dispatch::{ChannelNotifier, LogNotifier, Notification, Notifier, WavePlan};
pub use firewatch_registry::{
    Alert, AlertId, AlertStatus, BoundingBox, Clock, GeoPoint, ManualClock, RankTier, Storage,
    SystemClock, Verifier, VerifierId, VerifierPool, VerifierStats, VoteOutcome, VoteRecord,
};

/// Core result type for verification operations.
pub type Result<T> = std::result::Result<T, FirewatchError>;
