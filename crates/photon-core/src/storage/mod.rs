//! Local persistence for Photon.
//!
//! ## Storage Rules
//!
//! - Key material lives only in [`SecurePrefs`] (sealed at rest)
//! - The registration flag and upload history are plaintext and carry no secrets
//! - Every write goes through a temp file and rename, mode 0600
//!
//! ## Files
//!
//! | File                    | Store          | Contents                        |
//! |-------------------------|----------------|---------------------------------|
//! | `signing.prefs`         | `SecurePrefs`  | Ed25519 keypair (base64)        |
//! | `device_cert.prefs`     | `SecurePrefs`  | mTLS key and certificate        |
//! | `registration.json`     | `PlainPrefs`   | `device_registered`, `device_id`|
//! | `upload_history.json`   | `PlainPrefs`   | last 50 upload outcomes         |

mod history;
mod prefs;
mod secure_prefs;

pub use history::{HistoryEntry, UploadHistory, MAX_HISTORY_ENTRIES};
pub use prefs::PlainPrefs;
pub use secure_prefs::{device_storage_key, SecurePrefs};

/// Sealed store holding the signing keypair.
pub const SIGNING_PREFS_FILE: &str = "signing.prefs";

/// Sealed store holding the software mTLS identity.
pub const DEVICE_CERT_PREFS_FILE: &str = "device_cert.prefs";

/// Plain store holding registration state.
pub const REGISTRATION_FILE: &str = "registration.json";

/// Plain store holding upload history.
pub const HISTORY_FILE: &str = "upload_history.json";
