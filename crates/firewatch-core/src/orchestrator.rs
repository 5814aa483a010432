//! # Alert Lifecycle Orchestrator
//!
//! Drives an alert from detection to a verdict.
//!
//! ## Escalation
//!
//! ```text
//!  detection ──▶ confidence > threshold? ──no──▶ NotEscalated
//!                        │ yes
//!                        ▼
//!                 arm deadline
//!                        │
//!                        ▼
//!   ┌──────────▶ run next wave ──── 0 issued ────┐
//!   │                    │                       │
//!   │                    ▼                       │
//!   │        ┌─── wait (select) ───┐             │
//!   │        ▼                     ▼             │
//!   │   wave timeout          status watch       │
//!   │        │              (quorum reached)     │
//!   │        ▼                     │             │
//!   │   expire requests            ▼             │
//!   └── more waves? ◀──────────────┼─────────────┘
//!            │ no                  │
//!            ▼                     ▼
//!       Inconclusive            Resolved
//! ```
//!
//! Waits are `tokio::select!` races between a timer and the alert's
//! status channel, so a run parks no thread and stops the instant the
//! deciding vote lands.
//!
//! ## Serialisation
//!
//! Each in-flight alert has a gate holding an async lock, the status
//! channel and a "run active" flag. Vote submission, wave issuance and
//! expiry for one alert all hold the lock, so consensus for an alert is
//! never evaluated twice at once. Different alerts never share a lock;
//! they only meet at the verifier pool, where claims are compare-and-swap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use firewatch_council::{VoteLedger, VoteReceipt, VoteTally};
use firewatch_dispatch::{DispatchError, LogNotifier, Notifier, WavePlan, WaveScheduler};
use firewatch_registry::{
    Alert, AlertId, AlertStatus, BoundingBox, Clock, GeoPoint, Storage, SystemClock, Verifier,
    VerifierId, VerifierPool, VerifierStats, VoteRecord,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FirewatchConfig;
use crate::detector::{max_confidence, Detector};
use crate::error::FirewatchError;
use crate::outcome::VerificationOutcome;
use crate::Result;

/// External collaborators of the orchestrator.
pub struct Components {
    pub storage: Storage,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub detector: Option<Arc<dyn Detector>>,
}

impl Components {
    /// Opens the configured database, logs notifications, reads the
    /// system clock, and has no detector.
    pub fn open(config: &FirewatchConfig) -> Result<Self> {
        Ok(Self::with_storage(Storage::open(&config.storage.db_path)?))
    }

    /// Same as [`Components::open`] over an in-memory database.
    pub fn temporary() -> Result<Self> {
        Ok(Self::with_storage(Storage::temporary()?))
    }

    fn with_storage(storage: Storage) -> Self {
        Self {
            storage,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            detector: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }
}

/// Per-alert coordination state.
struct AlertGate {
    lock: tokio::sync::Mutex<()>,
    status: watch::Sender<AlertStatus>,
    running: AtomicBool,
}

impl AlertGate {
    fn new(status: AlertStatus) -> Self {
        let (status, _) = watch::channel(status);
        Self {
            lock: tokio::sync::Mutex::new(()),
            status,
            running: AtomicBool::new(false),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn is_settled(&self) -> bool {
        !self.is_running() && self.status.borrow().is_terminal()
    }
}

/// Clears the "run active" flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AlertGate);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

struct Inner {
    config: FirewatchConfig,
    storage: Storage,
    pool: VerifierPool,
    ledger: VoteLedger,
    scheduler: WaveScheduler,
    plan: WavePlan,
    clock: Arc<dyn Clock>,
    detector: Option<Arc<dyn Detector>>,
    gates: Mutex<HashMap<AlertId, Arc<AlertGate>>>,
}

/// Entry point of the verification core.
///
/// Cheap to clone; clones share all state, so one handle can run
/// escalations in spawned tasks while another accepts votes.
///
/// # Example
///
/// ```rust,ignore
/// let firewatch = AlertOrchestrator::new(FirewatchConfig::load("firewatch.toml")?)?;
/// let alert = firewatch.open_alert(GeoPoint::new(39.76, -121.62), Some(7))?;
///
/// let run = firewatch.spawn_detection_result(alert.id, 0.82, boxes);
/// // ... verifiers answer through firewatch.submit_vote(..)
/// match run.await?? {
///     VerificationOutcome::Resolved { status, .. } => publish(alert.id, status),
///     VerificationOutcome::Inconclusive { .. } => flag_for_operator(alert.id),
///     VerificationOutcome::NotEscalated { .. } => {}
/// }
/// ```
#[derive(Clone)]
pub struct AlertOrchestrator {
    inner: Arc<Inner>,
}

impl AlertOrchestrator {
    /// Creates an orchestrator over the configured database.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub fn new(config: FirewatchConfig) -> Result<Self> {
        config.validate()?;
        let components = Components::open(&config)?;
        Self::with_components(config, components)
    }

    pub fn with_components(config: FirewatchConfig, components: Components) -> Result<Self> {
        config.validate()?;

        let Components {
            storage,
            notifier,
            clock,
            detector,
        } = components;

        let ledger = VoteLedger::new(
            storage.clone(),
            config.scorer(),
            config.resolver(),
            clock.clone(),
        );
        let scheduler = WaveScheduler::new(storage.clone(), notifier, clock.clone());
        let plan = config.wave_plan();

        info!(
            "Firewatch initialized: {} waves, {}s wave timeout, quorum {}/{}",
            plan.len(),
            config.waves.wave_timeout_secs,
            config.consensus.affirmative_required,
            config.consensus.quorum
        );

        Ok(Self {
            inner: Arc::new(Inner {
                pool: VerifierPool::new(storage.clone()),
                storage,
                ledger,
                scheduler,
                plan,
                clock,
                detector,
                config,
                gates: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &FirewatchConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &VerifierPool {
        &self.inner.pool
    }

    // =========================================================================
    // Alerts
    // =========================================================================

    /// Records a new pending alert with no detection result.
    pub fn open_alert(&self, location: GeoPoint, camera_id: Option<u64>) -> Result<Alert> {
        let mut alert = Alert::new(location, self.inner.clock.now());
        alert.camera_id = camera_id;
        self.inner.storage.insert_alert(&alert)?;
        info!("Opened alert {}", alert.id);
        Ok(alert)
    }

    /// Runs the detector on `image` and feeds the result into
    /// [`AlertOrchestrator::on_detection_result`].
    ///
    /// The strongest detection supplies the confidence; every box is kept.
    /// An image with no detections counts as confidence zero.
    ///
    /// # Errors
    ///
    /// [`FirewatchError::DetectorUnavailable`] if no detector is configured
    /// or the call fails. The alert is left untouched in that case.
    pub async fn process_image(
        &self,
        alert_id: AlertId,
        image: Vec<u8>,
    ) -> Result<VerificationOutcome> {
        let detector = self
            .inner
            .detector
            .clone()
            .ok_or_else(|| FirewatchError::DetectorUnavailable("no detector configured".into()))?;

        let alert = self.alert(alert_id)?;
        if !alert.status.is_pending() {
            return Err(FirewatchError::AlertClosed(alert_id));
        }

        let detections = tokio::task::spawn_blocking(move || detector.detect(&image))
            .await
            .map_err(|e| FirewatchError::DetectorUnavailable(e.to_string()))?
            .map_err(|e| {
                warn!("Detector failed for alert {}: {}", alert_id, e);
                FirewatchError::DetectorUnavailable(e.0)
            })?;

        let confidence = max_confidence(&detections).unwrap_or(0.0);
        let boxes = detections.iter().map(|d| d.bbox).collect();
        debug!(
            "Detector found {} regions on alert {} (max {:.2})",
            detections.len(),
            alert_id,
            confidence
        );

        self.on_detection_result(alert_id, confidence, boxes).await
    }

    /// Handles a detection result for an alert.
    ///
    /// Above the acceptance threshold this arms the verification deadline
    /// and runs the wave plan until quorum or exhaustion. At or below it
    /// the alert becomes [`AlertStatus::NotEscalated`].
    ///
    /// # Errors
    ///
    /// - [`FirewatchError::NotFound`] for an unknown alert.
    /// - [`FirewatchError::AlertClosed`] if the alert already left `pending`.
    /// - [`FirewatchError::VerificationInProgress`] if a run for the alert
    ///   is still active.
    pub async fn on_detection_result(
        &self,
        alert_id: AlertId,
        confidence: f64,
        boxes: Vec<BoundingBox>,
    ) -> Result<VerificationOutcome> {
        let gate = self.gate(alert_id)?;
        if gate.running.swap(true, Ordering::AcqRel) {
            warn!("Ignoring detection for {}: verification running", alert_id);
            return Err(FirewatchError::VerificationInProgress(alert_id));
        }

        let result = {
            let _run = RunGuard(&gate);
            self.run_detection(alert_id, &gate, confidence, boxes).await
        };
        self.retire_gate(alert_id, &gate);
        result
    }

    /// Runs [`AlertOrchestrator::on_detection_result`] on its own task.
    pub fn spawn_detection_result(
        &self,
        alert_id: AlertId,
        confidence: f64,
        boxes: Vec<BoundingBox>,
    ) -> JoinHandle<Result<VerificationOutcome>> {
        let this = self.clone();
        tokio::spawn(async move { this.on_detection_result(alert_id, confidence, boxes).await })
    }

    async fn run_detection(
        &self,
        alert_id: AlertId,
        gate: &AlertGate,
        confidence: f64,
        boxes: Vec<BoundingBox>,
    ) -> Result<VerificationOutcome> {
        let escalate = confidence > self.inner.config.detection.acceptance_threshold;

        let alert = {
            let _lock = gate.lock.lock().await;
            let deadline = self.inner.clock.now() + self.inner.config.verification_horizon();
            let updated = self.inner.storage.modify_alert(alert_id, |a| {
                if !a.status.is_pending() {
                    return false;
                }
                a.confidence = Some(confidence);
                a.boxes = boxes.clone();
                if escalate {
                    a.arm_deadline(deadline);
                    a.inconclusive = false;
                    a.waves_run = 0;
                } else {
                    a.transition(AlertStatus::NotEscalated);
                }
                true
            })?;

            match updated {
                Some(alert) => alert,
                None => {
                    warn!("Detection result for closed alert {}", alert_id);
                    return Err(FirewatchError::AlertClosed(alert_id));
                }
            }
        };

        if !escalate {
            gate.status.send_replace(alert.status);
            info!(
                "Alert {} not escalated (confidence {:.2})",
                alert_id, confidence
            );
            return Ok(VerificationOutcome::NotEscalated { confidence });
        }

        info!(
            "Alert {} armed (confidence {:.2}, deadline {:?})",
            alert_id, confidence, alert.verification_deadline
        );
        self.escalate(alert_id, gate).await
    }

    async fn escalate(&self, alert_id: AlertId, gate: &AlertGate) -> Result<VerificationOutcome> {
        let mut status_rx = gate.status.subscribe();
        let timeout = self.inner.config.wave_timeout();

        for wave in self.inner.plan.waves() {
            let issued = {
                let _lock = gate.lock.lock().await;
                if self.alert(alert_id)?.status.is_terminal() {
                    break;
                }
                self.inner.storage.modify_alert(alert_id, |a| {
                    a.waves_run = wave.number;
                    true
                })?;

                match self.inner.scheduler.run_wave(alert_id, wave) {
                    Ok(report) => report.requests_issued(),
                    Err(DispatchError::NoEligibleVerifiers { wave: number }) => {
                        info!(
                            "Wave {} for alert {} found no eligible verifiers, escalating",
                            number, alert_id
                        );
                        0
                    }
                    Err(e) => return Err(e.into()),
                }
            };

            if issued == 0 {
                continue;
            }

            let resolved = tokio::select! {
                _ = tokio::time::sleep(timeout) => false,
                _ = wait_for_resolution(&mut status_rx) => true,
            };
            if resolved {
                debug!("Alert {} resolved during wave {}", alert_id, wave.number);
                break;
            }

            let _lock = gate.lock.lock().await;
            let expired = self.inner.ledger.expire_outstanding(alert_id)?;
            debug!(
                "Wave {} for alert {} timed out, {} requests expired",
                wave.number,
                alert_id,
                expired.len()
            );
        }

        self.conclude(alert_id, gate).await
    }

    async fn conclude(&self, alert_id: AlertId, gate: &AlertGate) -> Result<VerificationOutcome> {
        let _lock = gate.lock.lock().await;
        self.inner.ledger.expire_outstanding(alert_id)?;
        let tally = self.inner.ledger.tally(alert_id)?;
        let alert = self.alert(alert_id)?;

        if alert.status.is_terminal() {
            info!(
                "Alert {} resolved {} after {} waves ({} yes, {} no)",
                alert_id, alert.status, alert.waves_run, tally.yes, tally.no
            );
            return Ok(VerificationOutcome::Resolved {
                status: alert.status,
                tally,
                waves_run: alert.waves_run,
            });
        }

        self.inner.storage.modify_alert(alert_id, |a| {
            a.inconclusive = true;
            true
        })?;
        warn!(
            "Alert {} inconclusive: {} of {} votes after {} waves",
            alert_id,
            tally.cast(),
            self.inner.config.consensus.quorum,
            alert.waves_run
        );
        Ok(VerificationOutcome::Inconclusive {
            tally,
            waves_run: alert.waves_run,
        })
    }

    // =========================================================================
    // Votes
    // =========================================================================

    /// Records a verifier's answer and wakes the alert's run if it decided
    /// the alert.
    ///
    /// # Errors
    ///
    /// - [`FirewatchError::NotFound`] if the alert is unknown or no
    ///   outstanding request exists for the pair.
    /// - [`FirewatchError::AlertClosed`] if the alert already resolved.
    pub async fn submit_vote(
        &self,
        alert_id: AlertId,
        verifier_id: VerifierId,
        affirmative: bool,
    ) -> Result<VoteReceipt> {
        let gate = self.gate(alert_id)?;
        let result = {
            let _lock = gate.lock.lock().await;
            self.record_vote(alert_id, verifier_id, affirmative, &gate)
        };
        self.retire_gate(alert_id, &gate);
        result
    }

    fn record_vote(
        &self,
        alert_id: AlertId,
        verifier_id: VerifierId,
        affirmative: bool,
        gate: &AlertGate,
    ) -> Result<VoteReceipt> {
        let receipt = self
            .inner
            .ledger
            .submit_vote(alert_id, verifier_id, affirmative)
            .map_err(|e| {
                debug!("Rejected vote from {} on {}: {}", verifier_id, alert_id, e);
                FirewatchError::from(e)
            })?;

        if receipt.resolved_alert() {
            let released = self.inner.ledger.expire_outstanding(alert_id)?;
            gate.status.send_replace(receipt.alert_status);
            info!(
                "Alert {} resolved {} by {} ({} open requests cancelled)",
                alert_id,
                receipt.alert_status,
                verifier_id,
                released.len()
            );
        }
        Ok(receipt)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn alert(&self, alert_id: AlertId) -> Result<Alert> {
        self.inner
            .storage
            .load_alert(alert_id)?
            .ok_or_else(|| FirewatchError::NotFound(format!("alert {alert_id}")))
    }

    pub fn alerts(&self) -> Result<Vec<Alert>> {
        Ok(self.inner.storage.list_alerts()?)
    }

    /// Pending alerts whose verification deadline has passed.
    pub fn overdue_alerts(&self) -> Result<Vec<Alert>> {
        let now = self.inner.clock.now();
        Ok(self
            .alerts()?
            .into_iter()
            .filter(|a| a.status.is_pending() && a.is_verification_expired(now))
            .collect())
    }

    pub fn register_verifier(&self, name: impl Into<String>) -> Result<Verifier> {
        Ok(self.inner.pool.register(name)?)
    }

    pub fn verifier(&self, verifier_id: VerifierId) -> Result<Verifier> {
        self.inner
            .storage
            .load_verifier(verifier_id)?
            .ok_or_else(|| FirewatchError::NotFound(format!("{verifier_id}")))
    }

    /// Vote count, mean response time and current daily streak, with
    /// "today" taken from the injected clock.
    pub fn verifier_stats(&self, verifier_id: VerifierId) -> Result<VerifierStats> {
        self.verifier(verifier_id)?;
        let today = self.inner.clock.now().date_naive();
        Ok(self.inner.pool.stats(verifier_id, today)?)
    }

    pub fn verifiers(&self) -> Result<Vec<Verifier>> {
        Ok(self.inner.pool.list()?)
    }

    /// Top `limit` verifiers by points.
    pub fn leaderboard(&self, limit: usize) -> Result<Vec<Verifier>> {
        Ok(self.inner.pool.leaderboard(limit)?)
    }

    /// Every request issued for an alert.
    pub fn votes(&self, alert_id: AlertId) -> Result<Vec<VoteRecord>> {
        Ok(self.inner.ledger.records(alert_id)?)
    }

    pub fn tally(&self, alert_id: AlertId) -> Result<VoteTally> {
        Ok(self.inner.ledger.tally(alert_id)?)
    }

    /// True while a wave run is active for the alert.
    pub fn is_verifying(&self, alert_id: AlertId) -> bool {
        self.gates()
            .get(&alert_id)
            .map_or(false, |g| g.is_running())
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.storage.flush()?;
        Ok(())
    }

    // =========================================================================
    // Gates
    // =========================================================================

    fn gates(&self) -> std::sync::MutexGuard<'_, HashMap<AlertId, Arc<AlertGate>>> {
        self.inner
            .gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self, alert_id: AlertId) -> Result<Arc<AlertGate>> {
        let mut gates = self.gates();
        if let Some(gate) = gates.get(&alert_id) {
            return Ok(gate.clone());
        }
        let alert = self.alert(alert_id)?;
        let gate = Arc::new(AlertGate::new(alert.status));
        gates.insert(alert_id, gate.clone());
        Ok(gate)
    }

    /// Drops a gate nobody needs: the alert is decided and no run is
    /// active, or the alert is still pending but idle and the caller holds
    /// the only handle besides the map. A later call rebuilds the gate
    /// from the stored status.
    fn retire_gate(&self, alert_id: AlertId, gate: &Arc<AlertGate>) {
        let mut gates = self.gates();
        let current = gates.get(&alert_id).map_or(false, |g| Arc::ptr_eq(g, gate));
        if !current {
            return;
        }
        let idle = !gate.is_running() && Arc::strong_count(gate) == 2;
        if gate.is_settled() || idle {
            gates.remove(&alert_id);
        }
    }
}

/// Resolves once the watched status leaves `pending`.
async fn wait_for_resolution(rx: &mut watch::Receiver<AlertStatus>) {
    loop {
        if rx.borrow_and_update().is_terminal() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use firewatch_registry::ManualClock;

    fn orchestrator() -> AlertOrchestrator {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 7, 2, 13, 0, 0).unwrap(),
        ));
        let components = Components::temporary().unwrap().with_clock(clock);
        AlertOrchestrator::with_components(FirewatchConfig::default(), components).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = FirewatchConfig::default();
        config.consensus.quorum = 0;
        let result = AlertOrchestrator::with_components(config, Components::temporary().unwrap());
        assert!(matches!(result, Err(FirewatchError::Config(_))));
    }

    #[test]
    fn test_open_alert_pending() {
        let fw = orchestrator();
        let alert = fw.open_alert(GeoPoint::new(38.9, -120.0), Some(3)).unwrap();
        let loaded = fw.alert(alert.id).unwrap();
        assert_eq!(loaded.status, AlertStatus::Pending);
        assert_eq!(loaded.camera_id, Some(3));
        assert_eq!(loaded.verification_deadline, None);
    }

    #[test]
    fn test_unknown_alert_not_found() {
        let fw = orchestrator();
        assert!(matches!(fw.alert(AlertId::new()), Err(FirewatchError::NotFound(_))));
    }

    #[test]
    fn test_gate_kept_while_running_or_shared() {
        let fw = orchestrator();
        let alert = fw.open_alert(GeoPoint::new(38.9, -120.0), None).unwrap();
        let gate = fw.gate(alert.id).unwrap();

        gate.running.store(true, Ordering::Release);
        fw.retire_gate(alert.id, &gate);
        assert!(fw.gates().contains_key(&alert.id));
        gate.running.store(false, Ordering::Release);

        let other = fw.gate(alert.id).unwrap();
        fw.retire_gate(alert.id, &gate);
        assert!(fw.gates().contains_key(&alert.id));

        drop(other);
        fw.retire_gate(alert.id, &gate);
        assert!(!fw.gates().contains_key(&alert.id));
    }

    #[test]
    fn test_decided_gate_retired_even_when_shared() {
        let fw = orchestrator();
        let alert = fw.open_alert(GeoPoint::new(38.9, -120.0), None).unwrap();
        let gate = fw.gate(alert.id).unwrap();
        let _other = fw.gate(alert.id).unwrap();

        gate.status.send_replace(AlertStatus::Confirmed);
        fw.retire_gate(alert.id, &gate);
        assert!(!fw.gates().contains_key(&alert.id));
    }

    #[tokio::test]
    async fn test_no_gates_left_after_inconclusive_runs() {
        let fw = orchestrator();
        for i in 0..20 {
            let alert = fw
                .open_alert(GeoPoint::new(38.0 + f64::from(i) / 10.0, -120.0), None)
                .unwrap();
            let outcome = fw.on_detection_result(alert.id, 0.9, vec![]).await.unwrap();
            assert!(outcome.is_inconclusive());

            let err = fw.submit_vote(alert.id, VerifierId(99), true).await.unwrap_err();
            assert!(matches!(err, FirewatchError::NotFound(_)));
            assert_eq!(fw.alert(alert.id).unwrap().status, AlertStatus::Pending);
        }
        assert!(fw.gates().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_resolution_sees_prior_update() {
        let (tx, mut rx) = watch::channel(AlertStatus::Pending);
        tx.send_replace(AlertStatus::FalseAlarm);
        wait_for_resolution(&mut rx).await;
    }

    #[tokio::test]
    async fn test_low_confidence_not_escalated() {
        let fw = orchestrator();
        let alert = fw.open_alert(GeoPoint::new(38.9, -120.0), None).unwrap();

        let outcome = fw.on_detection_result(alert.id, 0.5, vec![]).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::NotEscalated { confidence: 0.5 });

        let stored = fw.alert(alert.id).unwrap();
        assert_eq!(stored.status, AlertStatus::NotEscalated);
        assert_eq!(stored.confidence, Some(0.5));
        assert_eq!(stored.verification_deadline, None);
        assert!(!fw.gates().contains_key(&alert.id));
    }
}
