use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::UNIX_EPOCH;

use parking_lot::RwLock;

use crate::error::{EngineError, Result};

/// A script source with a stable identity and a modification stamp.
///
/// Two sources are the same source if and only if their ids are equal.
/// The stamp is opaque; consumers must treat the source as changed whenever
/// the stamp differs from a previously observed value, without assuming
/// any ordering between values.
pub trait Source: fmt::Debug + Send + Sync {
    fn id(&self) -> &str;

    fn modification_stamp(&self) -> i64;
}

/// In-memory source, stamped by an update counter.
#[derive(Debug)]
pub struct MemorySource {
    id: String,
    text: RwLock<String>,
    stamp: AtomicI64,
}

impl MemorySource {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(EngineError::invalid_argument("Source id is empty."));
        }
        Ok(Self {
            id,
            text: RwLock::new(text.into()),
            stamp: AtomicI64::new(0),
        })
    }

    pub fn text(&self) -> String {
        self.text.read().clone()
    }

    /// Replaces the text and bumps the modification stamp.
    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.write() = text.into();
        self.touch();
    }

    /// Bumps the modification stamp without changing the text.
    pub fn touch(&self) {
        self.stamp.fetch_add(1, Ordering::SeqCst);
    }
}

impl Source for MemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn modification_stamp(&self) -> i64 {
        self.stamp.load(Ordering::SeqCst)
    }
}

/// Source backed by a file, stamped by the file's mtime in milliseconds.
/// An unreadable file stamps as zero.
#[derive(Debug)]
pub struct FileSource {
    id: String,
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let id = path.to_string_lossy().into_owned();
        if id.is_empty() {
            return Err(EngineError::invalid_argument("Source path is empty."));
        }
        Ok(Self { id, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for FileSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn modification_stamp(&self) -> i64 {
        fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}
