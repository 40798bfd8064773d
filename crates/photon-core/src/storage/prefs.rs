//! Plaintext JSON key-value store for non-secret flags.

use super::secure_prefs::write_private_file;
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// A small JSON object on disk, cached after first read.
///
/// A missing or unreadable file reads as empty; writes are atomic.
pub struct PlainPrefs {
    path: PathBuf,
    entries: Mutex<Option<Map<String, Value>>>,
}

impl PlainPrefs {
    /// Create a store at `path`. Nothing is read until first access.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a raw JSON value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.with_entries(|entries| Ok(entries.get(key).cloned()))
            .ok()
            .flatten()
    }

    /// Read a boolean, `false` when absent or not a boolean.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Read a string.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    /// Write a raw JSON value.
    pub fn put(&self, key: &str, value: Value) -> Result<()> {
        self.with_entries(|entries| {
            let mut next = entries.clone();
            next.insert(key.to_string(), value);
            self.persist(&next)?;
            *entries = next;
            Ok(())
        })
    }

    /// Write a boolean.
    pub fn put_bool(&self, key: &str, value: bool) -> Result<()> {
        self.put(key, Value::Bool(value))
    }

    /// Write a string.
    pub fn put_string(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, Value::String(value.to_string()))
    }

    /// Read a string, or create and persist it under the same lock.
    ///
    /// Concurrent first callers all get the value the winner stored. A
    /// failed write still returns the new value, which stays cached.
    pub fn get_or_insert_string(
        &self,
        key: &str,
        create: impl FnOnce() -> String,
    ) -> Result<String> {
        self.with_entries(|entries| {
            if let Some(existing) = entries.get(key).and_then(Value::as_str) {
                return Ok(existing.to_string());
            }

            let value = create();
            entries.insert(key.to_string(), Value::String(value.clone()));
            if let Err(e) = self.persist(entries) {
                warn!(error = %e, key, "Failed to persist preference");
            }
            Ok(value)
        })
    }

    fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut Map<String, Value>) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("lock poisoned".into()))?;

        let entries = guard.get_or_insert_with(|| self.load());
        f(entries)
    }

    fn load(&self) -> Map<String, Value> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Map::new(),
        };

        match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "Ignoring unreadable preferences file");
                Map::new()
            }
        }
    }

    fn persist(&self, entries: &Map<String, Value>) -> Result<()> {
        let data = serde_json::to_vec_pretty(entries)?;
        write_private_file(&self.path, &data)
            .map_err(|e| Error::Storage(format!("failed to write preferences: {}", e)))
    }
}
