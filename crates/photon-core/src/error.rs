//! Error types for the Photon capture pipeline.
//!
//! Error messages never carry key material, signatures or pre-signed
//! destination URLs. Details that could help an observer are kept in the
//! inner string, which is only ever logged through the redaction helpers.

use thiserror::Error;

/// Core error type for Photon operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The encrypted key-value backend could not be opened, read or written.
    /// Fatal for anything that needs to sign.
    #[error("secure key storage unavailable")]
    KeyStoreUnavailable(String),

    /// No client certificate could be produced. Callers degrade to
    /// server-authenticated TLS.
    #[error("device certificate unavailable")]
    CertificateUnavailable(String),

    /// A required endpoint is blank. No network attempt is made.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Malformed or incomplete broker response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The backend rejected the nonce as a replay (HTTP 409).
    #[error("replay conflict")]
    ReplayConflict,

    /// The backend rejected our credentials (HTTP 401/403).
    #[error("security rejection (HTTP {0})")]
    SecurityRejection(u16),

    /// Server-side (5xx) or network failure worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Cryptographic operation failed.
    /// Details are intentionally vague to prevent oracle attacks.
    #[error("cryptographic operation failed")]
    Crypto(String),

    /// Key validation or decoding failed.
    #[error("invalid key material")]
    InvalidKey(String),

    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Encoding/decoding error.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The HTTP client could not be built or the exchange failed below HTTP.
    #[error("transport error: {0}")]
    Transport(String),

    /// The frame source failed.
    #[error("capture error: {0}")]
    Capture(String),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

/// Result type alias using Photon's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transient(_) | Error::Transport(_) | Error::Timeout | Error::ReplayConflict
        )
    }

    /// Whether the error ends the capture session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::KeyStoreUnavailable(_) | Error::SecurityRejection(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            // Strip the URL: pre-signed destinations carry credentials in the query.
            Error::Transport(e.without_url().to_string())
        }
    }
}
