//! Frame source replaying JPEG files from a directory.

use super::FrameSource;
use crate::crypto::SecureBuffer;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

struct Cursor {
    files: Vec<PathBuf>,
    next: usize,
}

/// Cycles through the `*.jpg`/`*.jpeg` files of a directory in name order.
pub struct DirectoryFrameSource {
    dir: PathBuf,
    cursor: Mutex<Option<Cursor>>,
}

impl DirectoryFrameSource {
    /// Source over `dir`. Nothing is read until [`open`](FrameSource::open).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cursor: Mutex::new(None),
        }
    }

    fn is_jpeg(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
            .unwrap_or(false)
    }

    fn next_path(&self) -> Result<PathBuf> {
        let mut guard = self
            .cursor
            .lock()
            .map_err(|_| Error::Capture("frame source lock poisoned".into()))?;
        let cursor = guard
            .as_mut()
            .ok_or_else(|| Error::Capture("frame source not open".into()))?;

        let path = cursor.files[cursor.next % cursor.files.len()].clone();
        cursor.next = (cursor.next + 1) % cursor.files.len();
        Ok(path)
    }
}

#[async_trait]
impl FrameSource for DirectoryFrameSource {
    async fn open(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::Capture(format!("cannot read {}: {}", self.dir.display(), e)))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if Self::is_jpeg(&path) {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(Error::Capture(format!(
                "no JPEG frames in {}",
                self.dir.display()
            )));
        }

        debug!(dir = %self.dir.display(), frames = files.len(), "Frame source opened");
        let mut guard = self
            .cursor
            .lock()
            .map_err(|_| Error::Capture("frame source lock poisoned".into()))?;
        *guard = Some(Cursor { files, next: 0 });
        Ok(())
    }

    async fn capture(&self) -> Result<SecureBuffer> {
        let path = self.next_path()?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Capture(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(SecureBuffer::new(bytes))
    }

    async fn close(&self) {
        if let Ok(mut guard) = self.cursor.lock() {
            *guard = None;
        }
    }
}
