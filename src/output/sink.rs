//! Content sinks: where fetched bytes end up
//!
//! The crawler computes a relative local path for every item and hands the
//! bytes to a [`ContentSink`]. Directory creation and the actual writes are the
//! sink's business.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Errors returned by content sinks
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid local path: {0}")]
    InvalidPath(String),
}

/// Persists bytes under a logical, relative path
///
/// Implementations must be thread-safe; workers store concurrently.
pub trait ContentSink: Send + Sync {
    /// Stores `bytes` at `local_path`, replacing any previous content
    fn store(&self, local_path: &str, bytes: &[u8]) -> Result<(), SinkError>;
}

/// Rejects absolute paths and anything that would escape the sink's root
pub fn validate_local_path(local_path: &str) -> Result<(), SinkError> {
    if local_path.is_empty() {
        return Err(SinkError::InvalidPath("empty path".to_string()));
    }

    let path = Path::new(local_path);
    let all_normal = path
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if !all_normal || local_path.contains('\\') {
        return Err(SinkError::InvalidPath(local_path.to_string()));
    }

    Ok(())
}

/// Writes content to files below a root directory
#[derive(Debug, Clone)]
pub struct FsSink {
    root: PathBuf,
}

impl FsSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ContentSink for FsSink {
    fn store(&self, local_path: &str, bytes: &[u8]) -> Result<(), SinkError> {
        validate_local_path(local_path)?;
        let target = self.root.join(local_path);

        let io_error = |source| SinkError::Io {
            path: target.display().to_string(),
            source,
        };

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(&target, bytes).map_err(io_error)?;

        tracing::trace!("Stored {} bytes at {}", bytes.len(), target.display());
        Ok(())
    }
}

/// Keeps stored content in memory (tests, dry runs)
#[derive(Debug, Default)]
pub struct MemorySink {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the content stored at `local_path`
    pub fn get(&self, local_path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(local_path)
            .cloned()
    }

    /// All stored paths, sorted
    pub fn paths(&self) -> Vec<String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentSink for MemorySink {
    fn store(&self, local_path: &str, bytes: &[u8]) -> Result<(), SinkError> {
        validate_local_path(local_path)?;
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(local_path.to_string(), bytes.to_vec());
        Ok(())
    }
}
