//! Capture orchestrator scenarios under paused time.

mod common;

use common::*;
use photon_core::capture::{CaptureEvent, CaptureOrchestrator, CaptureState, FixedLocation};
use photon_core::config::{RemoteConfig, StaticConfigProvider};
use photon_core::context::PhotonContext;
use photon_core::metadata::Location;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::Instant;

const FRAME: [u8; 3] = [0x01, 0x02, 0x03];

fn orchestrator_with(
    ctx: &PhotonContext,
    frames: Arc<StaticFrames>,
    remote: RemoteConfig,
) -> CaptureOrchestrator {
    let location = FixedLocation(Location {
        latitude: 1.0,
        longitude: 2.0,
        accuracy: 5.0,
    });
    ctx.orchestrator(
        frames,
        Arc::new(location),
        Arc::new(StaticConfigProvider::new(remote)),
    )
}

fn orchestrator(ctx: &PhotonContext, frames: Arc<StaticFrames>) -> CaptureOrchestrator {
    orchestrator_with(ctx, frames, RemoteConfig::default())
}

async fn wait_for_state(orchestrator: &CaptureOrchestrator, state: CaptureState) {
    let mut rx = orchestrator.watch_state();
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

fn metadata_nonce(post: &RecordedPost) -> String {
    post.json()["metadata"]["nonce"]
        .as_str()
        .expect("nonce")
        .to_string()
}

#[tokio::test(start_paused = true)]
async fn test_successful_cycle() {
    let dir = tempdir().expect("tempdir");
    let mock = MockTransport::new(broker_ok());
    let ctx = context(dir.path(), mock.clone());
    let frames = StaticFrames::new(&FRAME);
    let orchestrator = orchestrator(&ctx, frames.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.start();
    let shown = next_matching(&mut events, |e| matches!(e, CaptureEvent::IndicatorShown(_))).await;
    assert_eq!(
        shown,
        CaptureEvent::IndicatorShown("Secure capture running every 30 s".to_string())
    );

    next_matching(&mut events, is_status("Last upload: OK (code 200)")).await;
    next_matching(&mut events, |e| *e == CaptureEvent::ProgressUpdated(100)).await;
    assert_eq!(orchestrator.state(), CaptureState::Running);

    orchestrator.stop().await;
    assert_eq!(orchestrator.state(), CaptureState::Idle);

    let puts = mock.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].body, FRAME.to_vec());

    let history = ctx.history().load();
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(frames.captures.load(Ordering::SeqCst), 1);
    assert_eq!(frames.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cycles_repeat_on_interval() {
    let dir = tempdir().expect("tempdir");
    let mock = MockTransport::new(broker_ok());
    let ctx = context(dir.path(), mock.clone());
    let remote = RemoteConfig {
        capture_interval_seconds: 10,
        uploads_enabled: true,
    };
    let orchestrator = orchestrator_with(&ctx, StaticFrames::new(&FRAME), remote);
    let mut events = orchestrator.subscribe();

    orchestrator.start();
    next_matching(&mut events, is_status("Last upload: OK")).await;
    next_matching(&mut events, is_status("Last upload: OK")).await;
    orchestrator.stop().await;

    let posts = mock.posts();
    assert_eq!(posts.len(), 2);
    let gap = posts[1].at - posts[0].at;
    assert!(gap >= Duration::from_secs(10), "gap was {:?}", gap);
    assert!(gap < Duration::from_secs(11), "gap was {:?}", gap);
}

/// Server faults back off 1s then 2s, and exhaustion leaves the session up.
#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off() {
    let dir = tempdir().expect("tempdir");
    let mock = MockTransport::new(response(500, "internal"));
    let ctx = context(dir.path(), mock.clone());
    let frames = StaticFrames::new(&FRAME);
    let orchestrator = orchestrator(&ctx, frames.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.start();
    next_matching(&mut events, is_status("Upload failed (HTTP 500), retrying in 1s")).await;
    next_matching(&mut events, is_status("Upload failed (HTTP 500), retrying in 2s")).await;
    let error = next_matching(&mut events, is_error("Upload failed after 3")).await;
    assert_eq!(
        error,
        CaptureEvent::ErrorRaised("Upload failed after 3 attempts (HTTP 500)".to_string())
    );

    let posts = mock.posts();
    assert_eq!(posts.len(), 3);
    let first_gap = posts[1].at - posts[0].at;
    let second_gap = posts[2].at - posts[1].at;
    assert!(first_gap >= Duration::from_millis(1000) && first_gap < Duration::from_millis(1100));
    assert!(second_gap >= Duration::from_millis(2000) && second_gap < Duration::from_millis(2100));

    assert!(mock.puts().is_empty());
    assert_eq!(ctx.history().load().len(), 3);
    assert!(orchestrator.is_running());

    orchestrator.stop().await;
    assert_eq!(orchestrator.state(), CaptureState::Idle);
    assert!(!orchestrator.is_running());
    assert_eq!(frames.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_security_rejection_stops_session() {
    let dir = tempdir().expect("tempdir");
    let mock = MockTransport::new(response(401, "bad signature"));
    let ctx = context(dir.path(), mock.clone());
    let frames = StaticFrames::new(&FRAME);
    let orchestrator = orchestrator(&ctx, frames.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.start();
    let error = next_matching(&mut events, is_error("Security error")).await;
    assert_eq!(
        error,
        CaptureEvent::ErrorRaised("Security error: HTTP 401".to_string())
    );

    wait_for_state(&orchestrator, CaptureState::Idle).await;
    next_matching(&mut events, |e| *e == CaptureEvent::IndicatorRetired).await;

    assert!(!orchestrator.is_running());
    assert!(orchestrator.session().is_none());
    assert_eq!(mock.posts().len(), 1);
    assert!(mock.puts().is_empty());
    assert_eq!(frames.closes.load(Ordering::SeqCst), 1);

    let history = ctx.history().load();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].code, 401);
}

/// A replayed nonce is retried at once with a new one.
#[tokio::test(start_paused = true)]
async fn test_replay_conflict_retries_with_fresh_nonce() {
    let dir = tempdir().expect("tempdir");
    let mock = MockTransport::scripted(vec![response(409, "replay")], broker_ok());
    let ctx = context(dir.path(), mock.clone());
    let orchestrator = orchestrator(&ctx, StaticFrames::new(&FRAME));
    let mut events = orchestrator.subscribe();

    orchestrator.start();
    next_matching(&mut events, is_status("Nonce conflict (409), retrying… (1/3)")).await;
    next_matching(&mut events, is_status("Last upload: OK")).await;
    orchestrator.stop().await;

    let posts = mock.posts();
    assert_eq!(posts.len(), 2);
    assert_ne!(metadata_nonce(&posts[0]), metadata_nonce(&posts[1]));
    assert_eq!(posts[0].at, posts[1].at);

    let history = ctx.history().load();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].code, 200);
    assert_eq!(history[1].code, 409);
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    let dir = tempdir().expect("tempdir");
    let ctx = context(dir.path(), MockTransport::new(broker_ok()));
    let frames = StaticFrames::new(&FRAME);
    let orchestrator = orchestrator(&ctx, frames.clone());

    orchestrator.start();
    orchestrator.start();
    wait_for_state(&orchestrator, CaptureState::Running).await;
    orchestrator.start();

    let session = orchestrator.session().expect("session");
    assert!(session.active);
    assert_eq!(session.interval_seconds, 30);
    assert_eq!(frames.opens.load(Ordering::SeqCst), 1);

    orchestrator.stop().await;
    orchestrator.stop().await;
    assert_eq!(orchestrator.state(), CaptureState::Idle);
    assert_eq!(frames.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_when_idle() {
    let dir = tempdir().expect("tempdir");
    let ctx = context(dir.path(), MockTransport::new(broker_ok()));
    let frames = StaticFrames::new(&FRAME);
    let orchestrator = orchestrator(&ctx, frames.clone());

    orchestrator.stop().await;
    assert_eq!(orchestrator.state(), CaptureState::Idle);
    assert_eq!(frames.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_uploads_disabled() {
    let dir = tempdir().expect("tempdir");
    let mock = MockTransport::new(broker_ok());
    let ctx = context(dir.path(), mock.clone());
    let frames = StaticFrames::new(&FRAME);
    let remote = RemoteConfig {
        capture_interval_seconds: 30,
        uploads_enabled: false,
    };
    let orchestrator = orchestrator_with(&ctx, frames.clone(), remote);
    let mut events = orchestrator.subscribe();

    orchestrator.start();
    next_matching(&mut events, is_status("Uploads disabled by remote config")).await;
    next_matching(&mut events, is_status("Uploads disabled by remote config")).await;
    orchestrator.stop().await;

    assert!(mock.posts().is_empty());
    assert_eq!(frames.captures.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_camera() {
    let dir = tempdir().expect("tempdir");
    let mock = MockTransport::new(broker_ok());
    let ctx = context(dir.path(), mock.clone());
    let frames = StaticFrames::broken();
    let orchestrator = orchestrator(&ctx, frames.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.start();
    let error = next_matching(&mut events, is_error("Unable to start camera")).await;
    assert!(matches!(error, CaptureEvent::ErrorRaised(ref s) if s.contains("camera in use")));
    wait_for_state(&orchestrator, CaptureState::Idle).await;
    assert!(!orchestrator.is_running());

    orchestrator.start();
    next_matching(&mut events, is_error("Unable to start camera")).await;
    assert_eq!(frames.opens.load(Ordering::SeqCst), 2);
    assert!(mock.posts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_backoff() {
    let dir = tempdir().expect("tempdir");
    let mock = MockTransport::new(response(503, "unavailable"));
    let ctx = context(dir.path(), mock.clone());
    let frames = StaticFrames::new(&FRAME);
    let orchestrator = orchestrator(&ctx, frames.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.start();
    next_matching(&mut events, is_status("Upload failed (HTTP 503), retrying in 1s")).await;

    let stopping = Instant::now();
    orchestrator.stop().await;
    assert!(stopping.elapsed() < Duration::from_millis(100));

    assert_eq!(orchestrator.state(), CaptureState::Idle);
    assert_eq!(mock.posts().len(), 1);
    assert_eq!(frames.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let dir = tempdir().expect("tempdir");
    let mock = MockTransport::new(broker_ok());
    let ctx = context(dir.path(), mock.clone());
    let frames = StaticFrames::new(&FRAME);
    let orchestrator = orchestrator(&ctx, frames.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.start();
    next_matching(&mut events, is_status("Last upload: OK")).await;
    orchestrator.stop().await;

    orchestrator.start();
    next_matching(&mut events, is_status("Last upload: OK")).await;
    orchestrator.stop().await;

    assert_eq!(frames.opens.load(Ordering::SeqCst), 2);
    assert_eq!(frames.closes.load(Ordering::SeqCst), 2);
    assert_eq!(ctx.history().load().len(), 2);
}

/// Everything still queued on `events`, without waiting.
fn drain(events: &mut tokio::sync::broadcast::Receiver<CaptureEvent>) -> Vec<CaptureEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Only lifecycle events may follow a stop that abandons an upload.
fn assert_quiet_after_stop(after_stop: &[CaptureEvent]) {
    for event in after_stop {
        assert!(
            matches!(
                event,
                CaptureEvent::StateChanged(_) | CaptureEvent::IndicatorRetired
            ),
            "unexpected event after stop: {:?}",
            event
        );
    }
    assert_eq!(
        after_stop.last(),
        Some(&CaptureEvent::StateChanged(CaptureState::Idle))
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_abandons_pending_broker_request() {
    let dir = tempdir().expect("tempdir");
    let stalled = StalledTransport::new(StallAt::Broker);
    let ctx = context(dir.path(), stalled.clone());
    let frames = StaticFrames::new(&FRAME);
    let orchestrator = orchestrator(&ctx, frames.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.start();
    next_matching(&mut events, is_status("Uploading frame")).await;
    next_matching(&mut events, |e| *e == CaptureEvent::ProgressUpdated(0)).await;
    while stalled.posts.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    let stopping = Instant::now();
    orchestrator.stop().await;
    assert!(stopping.elapsed() < Duration::from_millis(100));

    assert_eq!(orchestrator.state(), CaptureState::Idle);
    assert!(!orchestrator.is_running());
    assert!(ctx.history().load().is_empty());
    assert_eq!(frames.closes.load(Ordering::SeqCst), 1);
    assert_eq!(stalled.puts.load(Ordering::SeqCst), 0);
    assert_quiet_after_stop(&drain(&mut events));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(stalled.posts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_abandons_pending_storage_put() {
    let dir = tempdir().expect("tempdir");
    let stalled = StalledTransport::new(StallAt::Storage);
    let ctx = context(dir.path(), stalled.clone());
    let frames = StaticFrames::new(&FRAME);
    let orchestrator = orchestrator(&ctx, frames.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.start();
    next_matching(&mut events, is_status("Uploading frame")).await;
    next_matching(&mut events, |e| {
        matches!(e, CaptureEvent::ProgressUpdated(pct) if *pct > 0 && *pct < 100)
    })
    .await;

    let stopping = Instant::now();
    orchestrator.stop().await;
    assert!(stopping.elapsed() < Duration::from_millis(100));

    assert_eq!(orchestrator.state(), CaptureState::Idle);
    assert!(!orchestrator.is_running());
    assert!(ctx.history().load().is_empty());
    assert_eq!(frames.closes.load(Ordering::SeqCst), 1);
    assert_eq!(stalled.posts.load(Ordering::SeqCst), 1);
    assert_eq!(stalled.puts.load(Ordering::SeqCst), 1);
    assert_quiet_after_stop(&drain(&mut events));
}

/// The slot is free by the time `Idle` is published, even across threads.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_accepted_once_idle_is_published() {
    let dir = tempdir().expect("tempdir");
    let mock = MockTransport::new(broker_ok());
    let ctx = context(dir.path(), mock.clone());
    let frames = StaticFrames::broken();
    let orchestrator = orchestrator(&ctx, frames.clone());
    let mut events = orchestrator.subscribe();

    const ROUNDS: usize = 20;
    for _ in 0..ROUNDS {
        orchestrator.start();
        next_matching(&mut events, |e| {
            *e == CaptureEvent::StateChanged(CaptureState::Idle)
        })
        .await;
        assert!(!orchestrator.is_running());
    }

    assert_eq!(frames.opens.load(Ordering::SeqCst), ROUNDS);
    assert!(mock.posts().is_empty());
}
