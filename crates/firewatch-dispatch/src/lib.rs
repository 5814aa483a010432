//! # Wave Dispatch
//!
//! Escalating solicitation of human verifiers for a detection alert.
//!
//! ## Overview
//!
//! An alert is put in front of successive pools of verifiers, one wave at
//! a time, until enough of them answer:
//!
//! | Wave | Tiers | Selection |
//! |------|-------|-----------|
//! | 1 | rookie, trusted | up to 5, random |
//! | 2 | rookie, trusted | up to 5, random, nobody asked in wave 1 |
//! | 3 | expert, master | all, highest points first |
//!
//! Each wave books the verifiers it selects (so two alerts never share a
//! busy verifier), writes one request record per verifier and fires a
//! notification.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               WaveScheduler                 │
//! │  ┌─────────────┬───────────┬─────────────┐  │
//! │  │ Eligibility │  Booking  │  Notifier   │  │
//! │  │  (WavePlan) │   (CAS)   │  (capability)│ │
//! │  └─────────────┴───────────┴─────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Utc;
//! use firewatch_dispatch::{LogNotifier, WavePlan, WaveScheduler};
//! use firewatch_registry::{Alert, GeoPoint, Storage, SystemClock, VerifierPool};
//!
//! let storage = Storage::temporary().unwrap();
//! let pool = VerifierPool::new(storage.clone());
//! for i in 0..3 {
//!     pool.register(format!("watcher_{i}")).unwrap();
//! }
//! let alert = Alert::new(GeoPoint::new(44.0, -121.3), Utc::now());
//! storage.insert_alert(&alert).unwrap();
//!
//! let scheduler = WaveScheduler::new(storage, Arc::new(LogNotifier), Arc::new(SystemClock));
//! let plan = WavePlan::standard();
//! let report = scheduler.run_wave(alert.id, &plan.waves()[0])?;
//! assert_eq!(report.requests_issued(), 3);
//!
//! # Ok::<(), firewatch_dispatch::DispatchError>(())
//! ```

pub mod eligibility;
pub mod error;
pub mod notifier;
pub mod scheduler;

pub use eligibility::{Eligibility, Selection, WavePlan, WaveSpec};
pub use error::{DispatchError, Result};
pub use notifier::{ChannelNotifier, LogNotifier, Notification, Notifier};
pub use scheduler::{WaveReport, WaveScheduler};
