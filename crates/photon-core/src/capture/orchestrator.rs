//! The capture state machine.

use super::events::{CaptureEvent, CaptureState};
use super::retry::{backoff_delay, classify, Outcome, MAX_ATTEMPTS};
use super::{FrameSource, LocationProvider};
use crate::config::ConfigProvider;
use crate::crypto::SecureBuffer;
use crate::identity::SigningKeyStore;
use crate::metadata::FrameMetadata;
use crate::net::{ProgressFn, UploadClient, UploadResult};
use crate::storage::UploadHistory;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Event channel capacity.
const EVENT_CAPACITY: usize = 256;

/// Everything the orchestrator drives.
pub struct CaptureComponents {
    /// Camera or other frame producer.
    pub frames: Arc<dyn FrameSource>,
    /// Best-effort location.
    pub location: Arc<dyn LocationProvider>,
    /// Metadata signer.
    pub signer: Arc<SigningKeyStore>,
    /// Two-phase upload client.
    pub uploader: Arc<UploadClient>,
    /// Outcome history.
    pub history: Arc<UploadHistory>,
    /// Interval and uploads switch.
    pub config: Arc<dyn ConfigProvider>,
    /// Advertiser identifier attached to metadata.
    pub advertiser_id: Option<String>,
}

/// Snapshot of the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Interval between cycles, seconds.
    pub interval_seconds: u64,
    /// Whether the session is still live.
    pub active: bool,
    /// Attempt number within the current cycle, 0 between cycles.
    pub current_attempt: u32,
}

struct Session {
    id: u64,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// How a cycle ended.
enum CycleEnd {
    Uploaded,
    Skipped,
    Exhausted,
    Halted,
    Cancelled,
}

/// How the cycle loop ended.
enum LoopEnd {
    Cancelled,
    Halted,
    Stalled,
}

struct Shared {
    parts: CaptureComponents,
    events: broadcast::Sender<CaptureEvent>,
    state: watch::Sender<CaptureState>,
    attempt: AtomicU32,
    session: Mutex<Option<Session>>,
    next_session_id: AtomicU64,
}

/// Drives periodic capture, signing and upload with bounded retries.
///
/// At most one session runs per orchestrator. [`start`](Self::start) while
/// running is a no-op and [`stop`](Self::stop) is idempotent.
pub struct CaptureOrchestrator {
    shared: Arc<Shared>,
}

impl CaptureOrchestrator {
    /// Create an idle orchestrator.
    pub fn new(parts: CaptureComponents) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(CaptureState::Idle);

        Self {
            shared: Arc::new(Shared {
                parts,
                events,
                state,
                attempt: AtomicU32::new(0),
                session: Mutex::new(None),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to capture events.
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.shared.events.subscribe()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<CaptureState> {
        self.shared.state.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> CaptureState {
        *self.shared.state.borrow()
    }

    /// Whether a session exists, including a stalled one.
    pub fn is_running(&self) -> bool {
        self.shared
            .session
            .lock()
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    /// Snapshot of the active session, if any.
    pub fn session(&self) -> Option<SessionInfo> {
        let guard = self.shared.session.lock().ok()?;
        let session = guard.as_ref()?;

        Some(SessionInfo {
            interval_seconds: self.shared.parts.config.snapshot().capture_interval().as_secs(),
            active: !session.cancel.is_cancelled(),
            current_attempt: self.shared.attempt.load(Ordering::SeqCst),
        })
    }

    /// Start a session. No-op when one is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut guard = match self.shared.session.lock() {
            Ok(guard) => guard,
            Err(_) => {
                error!("Session lock poisoned; cannot start");
                return;
            }
        };
        if guard.is_some() {
            debug!("Capture already running");
            return;
        }

        let id = self.shared.next_session_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            Shared::run(shared, id, token).await;
        });

        *guard = Some(Session {
            id,
            cancel,
            handle: Some(handle),
        });
        info!(session = id, "Capture session started");
    }

    /// Stop the session, if any, and wait for it to release its resources.
    pub async fn stop(&self) {
        let session = match self.shared.session.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(mut session) = session else {
            return;
        };

        session.cancel.cancel();
        if let Some(handle) = session.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Capture task ended abnormally");
                self.shared.set_state(CaptureState::Idle);
            }
        }
        info!(session = session.id, "Capture session stopped");
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        if let Ok(guard) = self.shared.session.lock() {
            if let Some(session) = guard.as_ref() {
                session.cancel.cancel();
            }
        }
    }
}

impl Shared {
    fn emit(&self, event: CaptureEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn status(&self, text: impl Into<String>) {
        self.emit(CaptureEvent::StatusChanged(text.into()));
    }

    fn set_state(&self, state: CaptureState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            self.emit(CaptureEvent::StateChanged(state));
        }
    }

    /// Clear the session slot if it still belongs to `id`.
    fn release_session(&self, id: u64) {
        if let Ok(mut guard) = self.session.lock() {
            if guard.as_ref().map(|s| s.id) == Some(id) {
                *guard = None;
            }
        }
    }

    async fn run(self: Arc<Self>, id: u64, cancel: CancellationToken) {
        self.set_state(CaptureState::Starting);

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.parts.frames.open() => Some(result),
        };

        match opened {
            None => {
                self.shutdown(id).await;
                return;
            }
            Some(Err(e)) => {
                warn!(error = %e, "Frame source unavailable");
                self.emit(CaptureEvent::ErrorRaised(format!("Unable to start camera: {}", e)));
                self.release_session(id);
                self.set_state(CaptureState::Idle);
                return;
            }
            Some(Ok(())) => {}
        }

        let interval = self.parts.config.snapshot().capture_interval();
        self.status("Capture running…");
        self.emit(CaptureEvent::IndicatorShown(format!(
            "Secure capture running every {} s",
            interval.as_secs()
        )));
        self.set_state(CaptureState::Running);

        match self.cycle_loop(&cancel).await {
            LoopEnd::Cancelled | LoopEnd::Halted => {}
            LoopEnd::Stalled => {
                info!(session = id, "Capture stalled until restarted");
                cancel.cancelled().await;
            }
        }

        self.shutdown(id).await;
    }

    /// Release the camera and the session slot, then publish `Idle`.
    ///
    /// The slot is freed first so a `start()` that observes `Idle` is never
    /// turned away.
    async fn shutdown(&self, id: u64) {
        self.set_state(CaptureState::Stopping);
        self.parts.frames.close().await;
        self.attempt.store(0, Ordering::SeqCst);
        self.emit(CaptureEvent::IndicatorRetired);
        self.release_session(id);
        self.set_state(CaptureState::Idle);
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn cycle_loop(&self, cancel: &CancellationToken) -> LoopEnd {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return LoopEnd::Cancelled,
                _ = self.parts.config.refresh() => {}
            }
            let remote = self.parts.config.snapshot();
            let interval = remote.capture_interval();

            if !remote.uploads_enabled {
                self.status("Uploads disabled by remote config");
                if !Self::pause(cancel, interval).await {
                    return LoopEnd::Cancelled;
                }
                continue;
            }

            let captured = tokio::select! {
                biased;
                _ = cancel.cancelled() => return LoopEnd::Cancelled,
                result = self.parts.frames.capture() => result,
            };

            let mut frame = match captured {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Frame capture failed");
                    self.status(format!("Capture failed: {}", e));
                    if !Self::pause(cancel, interval).await {
                        return LoopEnd::Cancelled;
                    }
                    continue;
                }
            };

            let end = self.upload_frame(&frame, cancel).await;

            frame.zero();
            self.attempt.store(0, Ordering::SeqCst);
            if !cancel.is_cancelled() {
                self.emit(CaptureEvent::ProgressUpdated(0));
            }

            match end {
                CycleEnd::Uploaded | CycleEnd::Skipped => {
                    if !Self::pause(cancel, interval).await {
                        return LoopEnd::Cancelled;
                    }
                }
                CycleEnd::Exhausted => return LoopEnd::Stalled,
                CycleEnd::Halted => return LoopEnd::Halted,
                CycleEnd::Cancelled => return LoopEnd::Cancelled,
            }
        }
    }

    fn progress_fn(&self, cancel: &CancellationToken) -> ProgressFn {
        let events = self.events.clone();
        let cancel = cancel.clone();
        Arc::new(move |pct| {
            if !cancel.is_cancelled() {
                let _ = events.send(CaptureEvent::ProgressUpdated(pct));
            }
        })
    }

    async fn upload_frame(&self, frame: &SecureBuffer, cancel: &CancellationToken) -> CycleEnd {
        let location = self.parts.location.last_known();
        let mut last: Option<UploadResult> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            self.attempt.store(attempt, Ordering::SeqCst);

            // A fresh nonce every attempt: the previous one may have been seen.
            let metadata =
                FrameMetadata::fresh(location.as_ref(), self.parts.advertiser_id.as_deref());
            let json = match metadata.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Metadata encoding failed");
                    self.emit(CaptureEvent::ErrorRaised(format!("Error: {}", e)));
                    return CycleEnd::Halted;
                }
            };

            let mut signed_bytes = SecureBuffer::from_slice(json.as_bytes());
            let signature = self.parts.signer.sign(signed_bytes.as_slice());
            signed_bytes.zero();

            let signature = match signature {
                Ok(signature) => signature,
                Err(e) => {
                    error!(error = %e, "Signing unavailable");
                    self.emit(CaptureEvent::ErrorRaised(format!("Signing unavailable: {}", e)));
                    return CycleEnd::Halted;
                }
            };

            self.status("Uploading frame…");
            self.emit(CaptureEvent::ProgressUpdated(0));

            let upload = self
                .parts
                .uploader
                .upload(frame, &json, &signature, self.progress_fn(cancel));
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return CycleEnd::Cancelled,
                result = upload => result,
            };
            if cancel.is_cancelled() {
                return CycleEnd::Cancelled;
            }

            if result.reached_server() {
                if let Err(e) = self.parts.history.record(&result) {
                    warn!(error = %e, "Failed to record upload history");
                }
            }

            match classify(&result) {
                Outcome::Success => {
                    self.status(format!("Last upload: OK (code {})", result.code));
                    self.emit(CaptureEvent::ProgressUpdated(100));
                    return CycleEnd::Uploaded;
                }
                Outcome::ReplayConflict => {
                    debug!(attempt, "Nonce rejected as replay");
                    self.status(format!(
                        "Nonce conflict (409), retrying… ({}/{})",
                        attempt, MAX_ATTEMPTS
                    ));
                }
                Outcome::Security => {
                    error!(code = result.code, "Upload rejected by security check");
                    self.emit(CaptureEvent::ErrorRaised(format!(
                        "Security error: HTTP {}",
                        result.code
                    )));
                    return CycleEnd::Halted;
                }
                Outcome::Misconfigured => {
                    self.status("Upload URL not configured");
                    return CycleEnd::Skipped;
                }
                Outcome::Transient => {
                    if attempt < MAX_ATTEMPTS {
                        let delay = backoff_delay(attempt);
                        self.status(format!(
                            "Upload failed (HTTP {}), retrying in {}s…",
                            result.code,
                            delay.as_secs()
                        ));
                        if !Self::pause(cancel, delay).await {
                            return CycleEnd::Cancelled;
                        }
                    } else {
                        self.status(format!("Upload failed (HTTP {})", result.code));
                    }
                }
            }

            last = Some(result);
        }

        let code = last.map(|r| r.code).unwrap_or_default();
        warn!(code, attempts = MAX_ATTEMPTS, "Upload attempts exhausted");
        self.emit(CaptureEvent::ErrorRaised(format!(
            "Upload failed after {} attempts (HTTP {})",
            MAX_ATTEMPTS, code
        )));
        CycleEnd::Exhausted
    }
}
