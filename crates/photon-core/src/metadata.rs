//! Frame metadata construction.
//!
//! Metadata is the signed half of an upload: where and when a frame was
//! taken, plus a per-attempt nonce the backend uses to reject replays.
//!
//! ## Wire Format
//!
//! Keys are emitted in a fixed order so the same logical record always
//! serializes to the same bytes:
//!
//! ```text
//! {"lat":1.0,"lon":2.0,"accuracy":5.0,"advertiser_id":"","timestamp":1700000000000,"nonce":"1700000000000_<32 hex>"}
//! ```
//!
//! Location keys are omitted entirely when no fix is available.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

/// A geolocation fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: f32,
}

/// Generate a fresh nonce: `<unix millis>_<random 128-bit hex>`.
pub fn nonce() -> String {
    format!("{}_{}", crate::now_millis(), Uuid::new_v4().simple())
}

/// Signed metadata record for one upload attempt. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Latitude, absent without a fix.
    #[serde(rename = "lat", skip_serializing_if = "Option::is_none", default)]
    pub latitude: Option<f64>,
    /// Longitude, absent without a fix.
    #[serde(rename = "lon", skip_serializing_if = "Option::is_none", default)]
    pub longitude: Option<f64>,
    /// Accuracy in meters, absent without a fix.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub accuracy: Option<f32>,
    /// Advertiser identifier, empty string when unknown.
    pub advertiser_id: String,
    /// Capture time in Unix milliseconds.
    pub timestamp: i64,
    /// Per-attempt replay token.
    pub nonce: String,
}

impl FrameMetadata {
    /// Assemble a record. Pure given its inputs.
    pub fn new(
        location: Option<&Location>,
        advertiser_id: Option<&str>,
        timestamp: i64,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            latitude: location.map(|l| l.latitude),
            longitude: location.map(|l| l.longitude),
            accuracy: location.map(|l| l.accuracy),
            advertiser_id: advertiser_id.unwrap_or_default().to_string(),
            timestamp,
            nonce: nonce.into(),
        }
    }

    /// Assemble a record stamped now with a fresh nonce.
    pub fn fresh(location: Option<&Location>, advertiser_id: Option<&str>) -> Self {
        Self::new(location, advertiser_id, crate::now_millis(), nonce())
    }

    /// Canonical JSON encoding, the exact bytes that get signed.
    pub fn to_json(&self) -> Result<Zeroizing<String>> {
        Ok(Zeroizing::new(serde_json::to_string(self)?))
    }
}

/// Build the canonical metadata bytes.
///
/// `nonce` defaults to a fresh [`nonce()`] when `None`.
pub fn build(
    location: Option<&Location>,
    advertiser_id: Option<&str>,
    timestamp: i64,
    nonce: Option<&str>,
) -> Result<Zeroizing<String>> {
    let nonce = nonce.map(str::to_string).unwrap_or_else(self::nonce);
    FrameMetadata::new(location, advertiser_id, timestamp, nonce).to_json()
}
