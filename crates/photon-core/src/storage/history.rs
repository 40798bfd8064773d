//! Bounded upload history for diagnostics.
//!
//! Only `{timestamp, code, success}` is kept; no payload content ever lands
//! here.

use super::PlainPrefs;
use crate::error::Result;
use crate::net::UploadResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Maximum number of entries kept.
pub const MAX_HISTORY_ENTRIES: usize = 50;

const KEY_HISTORY: &str = "history";

/// One recorded upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the attempt finished (Unix milliseconds).
    #[serde(rename = "ts")]
    pub timestamp: i64,
    /// HTTP status code of the final phase.
    pub code: i32,
    /// Whether the upload succeeded.
    pub success: bool,
}

/// Newest-first ring of the last [`MAX_HISTORY_ENTRIES`] upload results.
pub struct UploadHistory {
    prefs: PlainPrefs,
}

impl UploadHistory {
    /// Open the history file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            prefs: PlainPrefs::open(path),
        }
    }

    /// Prepend a result, dropping the oldest entries past the cap.
    pub fn record(&self, result: &UploadResult) -> Result<()> {
        self.record_at(result, crate::now_millis())
    }

    /// Prepend a result with an explicit timestamp.
    pub fn record_at(&self, result: &UploadResult, timestamp: i64) -> Result<()> {
        let entry = HistoryEntry {
            timestamp,
            code: result.code,
            success: result.success,
        };

        let mut entries = Vec::with_capacity(MAX_HISTORY_ENTRIES);
        entries.push(entry);
        entries.extend(self.load().into_iter().take(MAX_HISTORY_ENTRIES - 1));

        self.prefs.put(KEY_HISTORY, serde_json::to_value(&entries)?)
    }

    /// All stored entries, newest first. A corrupt file reads as empty.
    pub fn load(&self) -> Vec<HistoryEntry> {
        self.prefs
            .get(KEY_HISTORY)
            .and_then(|v| serde_json::from_value::<Vec<HistoryEntry>>(v).ok())
            .unwrap_or_default()
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<()> {
        self.prefs.put(KEY_HISTORY, Value::Array(Vec::new()))
    }
}
