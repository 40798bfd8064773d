//! Network layer: the pinned transport and the clients built on it.
//!
//! [`TransportFactory`] is the only trust boundary. The registration and
//! upload clients receive it by `Arc` and never construct an HTTP client
//! themselves.

mod factory;
mod pinning;
mod registration;
mod transport;
mod upload;

pub use factory::{build_tls_config, TransportFactory, TransportSettings};
pub use pinning::{check_pins, spki_sha256, CertificatePin, PinnedServerVerifier};
pub use registration::DeviceRegistrationClient;
pub use transport::{
    progress_percent, HttpResponse, HttpTransport, PinnedHttpClient, ProgressFn, UPLOAD_CHUNK_SIZE,
};
pub use upload::{
    UploadClient, UploadResult, CODE_NOT_CONFIGURED, CODE_NO_RESPONSE, CODE_PROTOCOL_ERROR,
    FRAME_CONTENT_TYPE,
};
