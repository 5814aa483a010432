//! # Multi-Alert Scenarios
//!
//! Several alerts competing for one verifier pool, and reputation carried
//! from one alert into the next.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use firewatch_core::{
    AlertOrchestrator, AlertStatus, ChannelNotifier, Components, FirewatchConfig, FirewatchError,
    GeoPoint, ManualClock, Notification, RankTier, VerificationOutcome, VoteOutcome,
};

fn orchestrator(
    config: FirewatchConfig,
    clock: Arc<ManualClock>,
) -> (AlertOrchestrator, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
    let (notifier, rx) = ChannelNotifier::new();
    let components = Components::temporary()
        .unwrap()
        .with_clock(clock)
        .with_notifier(Arc::new(notifier));
    (
        AlertOrchestrator::with_components(config, components).unwrap(),
        rx,
    )
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 9, 9, 17, 30, 0).unwrap(),
    ))
}

// =============================================================================
// CONTENTION
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_alerts_never_share_a_verifier() {
    let mut config = FirewatchConfig::default();
    config.waves.wave_timeout_secs = 1;
    let (fw, mut rx) = orchestrator(config, clock());

    for i in 0..7 {
        fw.register_verifier(format!("volunteer_{i}")).unwrap();
    }

    let mut runs = Vec::new();
    for i in 0..3 {
        let alert = fw
            .open_alert(GeoPoint::new(38.0 + i as f64, -120.0), Some(i))
            .unwrap();
        runs.push(fw.spawn_detection_result(alert.id, 0.9, vec![]));
    }
    for run in runs {
        assert!(run.await.unwrap().unwrap().is_inconclusive());
    }

    let mut seen = HashSet::new();
    while let Ok(n) = rx.try_recv() {
        assert!(seen.insert(n.verifier), "{} was booked twice", n.verifier);
    }
    assert_eq!(seen.len(), 7);

    for v in fw.verifiers().unwrap() {
        assert!(v.available);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_votes_resolve_alert_once() {
    let (fw, mut rx) = orchestrator(FirewatchConfig::default(), clock());
    for i in 0..5 {
        fw.register_verifier(format!("spotter_{i}")).unwrap();
    }

    let alert = fw.open_alert(GeoPoint::new(40.1, -122.3), Some(8)).unwrap();
    let run = fw.spawn_detection_result(alert.id, 0.95, vec![]);
    let mut asked = Vec::new();
    for _ in 0..5 {
        asked.push(rx.recv().await.unwrap().verifier);
    }

    let votes: Vec<_> = asked
        .iter()
        .enumerate()
        .map(|(i, &verifier)| {
            let fw = fw.clone();
            tokio::spawn(async move { fw.submit_vote(alert.id, verifier, i % 2 == 0).await })
        })
        .collect();

    let mut accepted = Vec::new();
    let mut closed = 0;
    for vote in votes {
        match vote.await.unwrap() {
            Ok(receipt) => accepted.push(receipt),
            Err(FirewatchError::AlertClosed(id)) => {
                assert_eq!(id, alert.id);
                closed += 1;
            }
            Err(e) => panic!("unexpected rejection: {e}"),
        }
    }

    assert_eq!(accepted.len(), 3);
    assert_eq!(closed, 2);
    let deciding: Vec<_> = accepted.iter().filter(|r| r.resolved_alert()).collect();
    assert_eq!(deciding.len(), 1);
    let status = deciding[0].alert_status;

    let yes = accepted.iter().filter(|r| r.outcome == VoteOutcome::Yes).count() as u32;
    let no = accepted.len() as u32 - yes;
    let expected = if yes >= 2 {
        AlertStatus::Confirmed
    } else {
        AlertStatus::FalseAlarm
    };
    assert_eq!(status, expected);

    let stored = fw.alert(alert.id).unwrap();
    assert_eq!(stored.status, status);
    assert_eq!((stored.yes_count, stored.no_count), (yes, no));

    match run.await.unwrap().unwrap() {
        VerificationOutcome::Resolved {
            status: resolved,
            tally,
            waves_run,
        } => {
            assert_eq!(resolved, status);
            assert_eq!((tally.yes, tally.no), (yes, no));
            assert_eq!((tally.outstanding, tally.expired), (0, 2));
            assert_eq!(waves_run, 1);
        }
        other => panic!("expected a resolved alert, got {other:?}"),
    }

    for &verifier in &asked {
        let err = fw.submit_vote(alert.id, verifier, true).await.unwrap_err();
        assert!(matches!(err, FirewatchError::AlertClosed(_)));
    }
    assert_eq!(fw.alert(alert.id).unwrap().status, status);
}

// =============================================================================
// REPUTATION
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_promotion_moves_verifier_to_ranked_wave() {
    let clock = clock();
    let (fw, mut rx) = orchestrator(FirewatchConfig::default(), clock.clone());

    let veteran = fw.pool().register_with_points("veteran", 1_985).unwrap();
    assert_eq!(veteran.rank(), RankTier::Trusted);
    fw.register_verifier("a").unwrap();
    fw.register_verifier("b").unwrap();

    // Alert one: everyone answers at once and confirms.
    let first = fw.open_alert(GeoPoint::new(39.1, -121.0), None).unwrap();
    let run = fw.spawn_detection_result(first.id, 0.8, vec![]);
    let mut asked = Vec::new();
    for _ in 0..3 {
        asked.push(rx.recv().await.unwrap().verifier);
    }
    for id in &asked {
        fw.submit_vote(first.id, *id, true).await.unwrap();
    }
    assert_eq!(run.await.unwrap().unwrap().status(), AlertStatus::Confirmed);

    let promoted = fw.verifier(veteran.id).unwrap();
    assert_eq!(promoted.points(), 1_985 + 40);
    assert_eq!(promoted.rank(), RankTier::Expert);
    assert_eq!(promoted.completed_votes, 1);

    // Alert two, after the cooldown: the veteran now skips the general waves.
    clock.advance(Duration::minutes(11));
    let second = fw.open_alert(GeoPoint::new(39.2, -121.1), None).unwrap();
    let run = fw.spawn_detection_result(second.id, 0.8, vec![]);

    let mut wave_one = Vec::new();
    for _ in 0..2 {
        wave_one.push(rx.recv().await.unwrap());
    }
    assert!(wave_one.iter().all(|n| n.wave == 1 && n.verifier != veteran.id));

    let ranked = rx.recv().await.unwrap();
    assert_eq!(ranked.wave, 3);
    assert_eq!(ranked.verifier, veteran.id);

    let receipt = fw.submit_vote(second.id, veteran.id, false).await.unwrap();
    assert_eq!(receipt.points_awarded, 20 + 30);
    assert!(run.await.unwrap().unwrap().is_inconclusive());

    let board = fw.leaderboard(1).unwrap();
    assert_eq!(board[0].id, veteran.id);
}
