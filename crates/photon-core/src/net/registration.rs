//! One-time device registration.

use super::TransportFactory;
use crate::logging::{Redacted, RedactedUrl};
use crate::storage::PlainPrefs;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const KEY_REGISTERED: &str = "device_registered";
const KEY_DEVICE_ID: &str = "device_id";

#[derive(Serialize)]
struct RegistrationPayload<'a> {
    device_id: &'a str,
    platform: &'a str,
    env: &'a str,
    ed25519_pub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mtls_cert_der: Option<String>,
}

/// Registers the device's public signing key with the backend, once.
///
/// The registered flag only ever goes from `false` to `true`.
pub struct DeviceRegistrationClient {
    factory: Arc<TransportFactory>,
    prefs: Arc<PlainPrefs>,
    register_url: String,
    env: String,
}

impl DeviceRegistrationClient {
    /// Create a client posting to `register_url`.
    pub fn new(
        factory: Arc<TransportFactory>,
        prefs: Arc<PlainPrefs>,
        register_url: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        Self {
            factory,
            prefs,
            register_url: register_url.into(),
            env: env.into(),
        }
    }

    /// Whether registration already succeeded on this installation.
    pub fn is_registered(&self) -> bool {
        self.prefs.get_bool(KEY_REGISTERED)
    }

    /// Stable identifier for this installation, created on first use.
    ///
    /// Creation happens under the preferences lock, which every client of
    /// the same store shares, so concurrent first calls agree on one id.
    pub fn device_id(&self) -> String {
        match self
            .prefs
            .get_or_insert_string(KEY_DEVICE_ID, || Uuid::new_v4().to_string())
        {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Device id store unavailable");
                Uuid::new_v4().to_string()
            }
        }
    }

    /// Register unless already registered.
    ///
    /// Returns `true` when registered (now or before), `false` when no
    /// endpoint is configured or the attempt failed. Failures leave the flag
    /// untouched so a later run can retry.
    pub async fn register_if_needed(&self, public_key: &[u8], cert_der: Option<&[u8]>) -> bool {
        if self.is_registered() {
            return true;
        }
        if self.register_url.trim().is_empty() {
            debug!("Registration endpoint not configured");
            return false;
        }

        let device_id = self.device_id();
        debug!(device_id = %Redacted(&device_id), env = %self.env, "Registering device");
        let payload = RegistrationPayload {
            device_id: &device_id,
            platform: crate::PLATFORM,
            env: &self.env,
            ed25519_pub: STANDARD.encode(public_key),
            mtls_cert_der: cert_der.map(|der| STANDARD.encode(der)),
        };

        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to encode registration payload");
                return false;
            }
        };

        let transport = match self.factory.get_client() {
            Ok(transport) => transport,
            Err(e) => {
                warn!(error = %e, "Transport unavailable for registration");
                return false;
            }
        };

        match transport.post_json(&self.register_url, body).await {
            Ok(response) if response.is_success() => {
                if let Err(e) = self.prefs.put_bool(KEY_REGISTERED, true) {
                    warn!(error = %e, "Registered but failed to persist flag");
                }
                info!(url = %RedactedUrl(&self.register_url), "Device registered");
                true
            }
            Ok(response) => {
                warn!(status = response.status, "Registration rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "Registration failed");
                false
            }
        }
    }
}
