//! # Photon Core Library
//!
//! Periodically captures a sensor frame, attaches signed, replay-resistant
//! metadata, and uploads both through a pinned, mutually authenticated TLS
//! channel to a cloud ingestion endpoint.
//!
//! ## Security Model
//!
//! - Metadata is signed with a per-installation Ed25519 key kept encrypted at rest
//! - Every request carries a fresh nonce; the backend rejects replays with 409
//! - The server's leaf public key is pinned; the device presents a client certificate when it has one
//! - Frame and metadata buffers are zeroized on every exit path
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        capture (orchestrator)           │
//! ├─────────────────────────────────────────┤
//! │  metadata  │   net (upload, register)   │
//! ├─────────────────────────────────────────┤
//! │     net::transport (pinned mTLS)        │
//! ├─────────────────────────────────────────┤
//! │  crypto  │  identity  │    storage      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! [`context::PhotonContext`] wires the layers together once at startup.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod capture;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod logging;
pub mod metadata;
pub mod net;
pub mod storage;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Platform label sent at device registration.
pub const PLATFORM: &str = std::env::consts::OS;

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
