//! Periodic capture and upload.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start()──▶ Starting ──frame source open──▶ Running ──stop()──▶ Stopping ──▶ Idle
//!                      │                              │
//!                      └──open failed──▶ Idle          └──401/403──▶ Stopping ──▶ Idle
//! ```
//!
//! ## One Cycle
//!
//! capture frame → last known location → up to [`MAX_ATTEMPTS`] of
//! (fresh metadata + nonce → sign → two-phase upload → record) → zero frame
//! → wait the configured interval.
//!
//! The frame source and location provider are host collaborators supplied
//! as trait objects.

mod directory;
mod events;
mod orchestrator;
mod retry;

pub use directory::DirectoryFrameSource;
pub use events::{CaptureEvent, CaptureState};
pub use orchestrator::{CaptureComponents, CaptureOrchestrator, SessionInfo};
pub use retry::{backoff_delay, classify, Outcome, BASE_BACKOFF, MAX_ATTEMPTS, MAX_BACKOFF};

use crate::crypto::SecureBuffer;
use crate::error::Result;
use crate::metadata::Location;
use async_trait::async_trait;

/// Produces encoded image frames.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Acquire the underlying device.
    async fn open(&self) -> Result<()>;

    /// Capture one encoded frame.
    async fn capture(&self) -> Result<SecureBuffer>;

    /// Release the device. Safe to call when not open.
    async fn close(&self);
}

/// Best-effort geolocation.
pub trait LocationProvider: Send + Sync {
    /// Most recent fix, if any.
    fn last_known(&self) -> Option<Location>;
}

/// Provider that never has a fix.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn last_known(&self) -> Option<Location> {
        None
    }
}

/// Provider that always reports the same fix.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Location);

impl LocationProvider for FixedLocation {
    fn last_known(&self) -> Option<Location> {
        Some(self.0)
    }
}
