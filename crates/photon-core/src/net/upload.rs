//! Two-phase upload: broker exchange, then object transfer.
//!
//! ```text
//! device ──POST {metadata, signature}──▶ broker
//!        ◀── {upload_url, headers?} ────
//! device ──PUT frame bytes + headers──▶ object store
//! ```
//!
//! Phase 2 never runs unless phase 1 returned a 2xx with a usable
//! `upload_url`. The result's success reflects phase 2 only.

use super::transport::{HttpTransport, ProgressFn};
use super::TransportFactory;
use crate::crypto::SecureBuffer;
use crate::error::Error;
use crate::logging::{sanitize_for_log, RedactedToken, RedactedUrl};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Content type of uploaded frames.
pub const FRAME_CONTENT_TYPE: &str = "image/jpeg";

/// Result code when the broker URL is blank.
pub const CODE_NOT_CONFIGURED: i32 = -1;

/// Result code when the broker answered 2xx with an unusable body.
pub const CODE_PROTOCOL_ERROR: i32 = -2;

/// Result code when no HTTP response was received.
pub const CODE_NO_RESPONSE: i32 = 0;

/// Outcome of one upload exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    /// Whether the object store accepted the frame.
    pub success: bool,
    /// HTTP status of the last phase reached, or a negative/zero sentinel.
    pub code: i32,
    /// Raw response body or a diagnostic message.
    pub body: Option<String>,
}

impl UploadResult {
    fn failure(code: i32, body: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            body: Some(body.into()),
        }
    }

    /// Whether an HTTP exchange actually completed.
    pub fn reached_server(&self) -> bool {
        self.code > 0
    }

    /// The error category of a failed result, `None` on success.
    pub fn error(&self) -> Option<Error> {
        if self.success {
            return None;
        }

        let detail = || self.body.as_deref().map(sanitize_for_log).unwrap_or_default();
        Some(match self.code {
            CODE_NOT_CONFIGURED => Error::ConfigurationMissing("broker URL".into()),
            CODE_PROTOCOL_ERROR => Error::Protocol(detail()),
            409 => Error::ReplayConflict,
            401 | 403 => Error::SecurityRejection(self.code as u16),
            CODE_NO_RESPONSE => Error::Transient(detail()),
            code => Error::Transient(format!("HTTP {}", code)),
        })
    }
}

#[derive(Serialize)]
struct BrokerRequest<'a> {
    metadata: &'a RawValue,
    signature: &'a str,
}

#[derive(Deserialize)]
struct BrokerResponse {
    upload_url: Option<String>,
    #[serde(default)]
    headers: Option<Map<String, Value>>,
}

/// Flatten broker-provided headers: strings verbatim, other scalars in
/// their JSON form, nulls dropped.
fn header_pairs(headers: Option<Map<String, Value>>) -> Vec<(String, String)> {
    headers
        .into_iter()
        .flatten()
        .filter_map(|(name, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((name, s)),
            other => Some((name, other.to_string())),
        })
        .collect()
}

/// Client for the broker + object store protocol.
pub struct UploadClient {
    factory: Arc<TransportFactory>,
    broker_url: String,
}

impl UploadClient {
    /// Create a client for `broker_url`.
    pub fn new(factory: Arc<TransportFactory>, broker_url: impl Into<String>) -> Self {
        Self {
            factory,
            broker_url: broker_url.into(),
        }
    }

    /// Upload one frame with its signed metadata.
    ///
    /// Never fails outright: every problem is folded into the returned
    /// [`UploadResult`]. `on_progress` receives 0–100 while bytes are
    /// written and always ends with 100 once phase 2 completes.
    pub async fn upload(
        &self,
        frame: &SecureBuffer,
        metadata_json: &str,
        signature_b64: &str,
        on_progress: ProgressFn,
    ) -> UploadResult {
        if self.broker_url.trim().is_empty() {
            return UploadResult::failure(CODE_NOT_CONFIGURED, "Upload URL not configured");
        }

        let transport = match self.factory.get_client() {
            Ok(transport) => transport,
            Err(e) => return UploadResult::failure(CODE_NO_RESPONSE, e.to_string()),
        };

        let destination = self
            .request_destination(&*transport, metadata_json, signature_b64)
            .await;
        let (upload_url, headers) = match destination {
            Ok(destination) => destination,
            Err(result) => return result,
        };

        debug!(
            destination = %RedactedUrl(&upload_url),
            bytes = frame.len(),
            headers = headers.len(),
            "Uploading frame"
        );

        let put = transport
            .put_bytes(
                &upload_url,
                FRAME_CONTENT_TYPE,
                &headers,
                frame.as_slice(),
                Arc::clone(&on_progress),
            )
            .await;
        on_progress(100);

        match put {
            Ok(response) => {
                let success = response.is_success();
                if success {
                    info!(status = response.status, "Frame uploaded");
                } else {
                    warn!(
                        status = response.status,
                        body = %sanitize_for_log(&response.body),
                        "Object store rejected frame"
                    );
                }
                UploadResult {
                    success,
                    code: i32::from(response.status),
                    body: Some(response.body),
                }
            }
            Err(e) => {
                warn!(error = %e, "Object transfer failed");
                UploadResult::failure(CODE_NO_RESPONSE, e.to_string())
            }
        }
    }

    /// Phase 1. On failure, the ready-made result to return.
    async fn request_destination(
        &self,
        transport: &dyn HttpTransport,
        metadata_json: &str,
        signature_b64: &str,
    ) -> Result<(String, Vec<(String, String)>), UploadResult> {
        let metadata: &RawValue = serde_json::from_str(metadata_json)
            .map_err(|_| UploadResult::failure(CODE_PROTOCOL_ERROR, "Metadata is not valid JSON"))?;
        let body = serde_json::to_vec(&BrokerRequest {
            metadata,
            signature: signature_b64,
        })
        .map_err(|e| UploadResult::failure(CODE_PROTOCOL_ERROR, e.to_string()))?;

        debug!(
            broker = %RedactedUrl(&self.broker_url),
            signature = %RedactedToken(signature_b64),
            "Requesting upload destination"
        );
        let response = transport.post_json(&self.broker_url, body).await.map_err(|e| {
            warn!(error = %e, "Broker request failed");
            UploadResult::failure(CODE_NO_RESPONSE, e.to_string())
        })?;
        let code = i32::from(response.status);

        if !response.is_success() {
            warn!(status = response.status, "Broker rejected upload");
            return Err(UploadResult {
                success: false,
                code,
                body: Some(response.body),
            });
        }

        if response.body.trim().is_empty() {
            return Err(UploadResult::failure(code, "Empty broker response"));
        }

        let parsed: BrokerResponse = serde_json::from_str(&response.body).map_err(|_| {
            warn!(status = response.status, "Broker response is not JSON");
            UploadResult::failure(CODE_PROTOCOL_ERROR, "Malformed broker response")
        })?;

        let upload_url = parsed
            .upload_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                warn!(status = response.status, "Broker response missing upload_url");
                UploadResult::failure(CODE_PROTOCOL_ERROR, "Broker response missing upload_url")
            })?;

        Ok((upload_url, header_pairs(parsed.headers)))
    }
}
