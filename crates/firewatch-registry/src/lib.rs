//! # Firewatch Registry
//!
//! Persistent state of the wildfire verification protocol: detection
//! alerts, the verifier pool and the vote ledger's records.
//!
//! ## Overview
//!
//! Every other crate in the workspace reads and writes protocol state
//! through this one. It owns:
//!
//! - **Models**: [`Alert`], [`Verifier`], [`VoteRecord`] and the value types
//!   around them (rank tiers, statuses, outcomes).
//! - **Storage**: a Sled database with one tree per entity and
//!   compare-and-swap updates.
//! - **Verifier Pool**: registration, lookups, activity streaks and the
//!   atomic claim/release of verifier availability.
//! - **Clock**: the injectable time source used for cooldowns and latency.
//!
//! ## Architecture
//!
//! ```text
//!    ┌──────────────┐   ┌──────────────┐
//!    │ VerifierPool │   │    Clock     │
//!    └──────┬───────┘   └──────────────┘
//!           │
//!           ▼
//!    ┌──────────────────────────────────┐
//!    │         Storage (Sled)           │
//!    │  alerts  │ verifiers │  votes    │
//!    └──────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use firewatch_registry::{RankTier, Storage, VerifierPool};
//!
//! let pool = VerifierPool::new(Storage::temporary().unwrap());
//! let verifier = pool.register_with_points("ranger_1", 2_500).unwrap();
//! assert_eq!(verifier.rank(), RankTier::Expert);
//! ```

pub mod clock;
pub mod models;
pub mod pool;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use models::{
    vote_key, Alert, AlertId, AlertStatus, BoundingBox, GeoPoint, RankTier, RegistryError,
    Result, Verifier, VerifierId, VoteOutcome, VoteRecord, RANK_THRESHOLDS,
};
pub use pool::{VerifierPool, VerifierStats};
pub use storage::Storage;
