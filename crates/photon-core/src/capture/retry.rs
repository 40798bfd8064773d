//! Outcome classification and backoff for upload attempts.

use crate::error::Error;
use crate::net::UploadResult;
use std::time::Duration;

/// Attempts per captured frame, 409 retries included.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay before the first transient retry.
pub const BASE_BACKOFF: Duration = Duration::from_millis(1000);

/// Longest delay between attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// How the orchestrator routes an upload result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Frame stored.
    Success,
    /// Nonce rejected as a replay; retry at once with a fresh nonce.
    ReplayConflict,
    /// Credentials rejected; stop the session.
    Security,
    /// No broker configured; skip to the next cycle.
    Misconfigured,
    /// Server or network fault; back off and retry.
    Transient,
}

/// Route an upload result.
pub fn classify(result: &UploadResult) -> Outcome {
    match result.error() {
        None => Outcome::Success,
        Some(Error::ReplayConflict) => Outcome::ReplayConflict,
        Some(e) if e.is_fatal() => Outcome::Security,
        Some(Error::ConfigurationMissing(_)) => Outcome::Misconfigured,
        Some(_) => Outcome::Transient,
    }
}

/// `min(1s * 2^(attempt-1), 10s)` for a 1-based attempt number.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    BASE_BACKOFF
        .saturating_mul(1u32 << exponent)
        .min(MAX_BACKOFF)
}
