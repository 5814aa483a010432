//! # Verification Council
//!
//! Turns individual verifier responses into a decision on an alert.
//!
//! ## Overview
//!
//! Three cooperating parts:
//!
//! - **Vote Ledger**: accepts exactly one vote per (alert, verifier)
//!   request, measures response latency and releases the verifier.
//! - **Consensus Resolver**: once 3 votes are cast, confirms the fire if 2
//!   of them are affirmative and otherwise marks a false alarm.
//! - **Reputation Scorer**: awards points for speed and rank and keeps each
//!   verifier's tier derived from their total.
//!
//! ## Architecture
//!
//! ```text
//!          verifier vote
//!               │
//!               ▼
//!        ┌─────────────┐      ┌──────────────┐
//!        │ VOTE LEDGER │─────▶│  REPUTATION  │
//!        │             │      │    SCORER    │
//!        └──────┬──────┘      └──────────────┘
//!               ▼
//!        ┌─────────────┐
//!        │  CONSENSUS  │──▶ confirmed / false_alarm
//!        │  RESOLVER   │
//!        └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use firewatch_council::{ConsensusResolver, ReputationScorer, VoteLedger};
//!
//! let ledger = VoteLedger::new(storage, ReputationScorer::new(), ConsensusResolver::new(), clock);
//!
//! match ledger.submit_vote(alert_id, verifier_id, true) {
//!     Ok(receipt) => println!("+{} points", receipt.points_awarded),
//!     Err(CouncilError::AlertClosed(_)) => println!("too late"),
//!     Err(e) => println!("rejected: {e}"),
//! }
//! ```

pub mod consensus;
pub mod error;
pub mod ledger;
pub mod scorer;

pub use consensus::{ConsensusResolver, ConsensusResult, VoteTally};
pub use error::CouncilError;
pub use ledger::{VoteLedger, VoteReceipt};
pub use scorer::ReputationScorer;

/// Result type for council operations.
pub type Result<T> = std::result::Result<T, CouncilError>;
