use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::write_atomic;
use crate::domain::ControlRecord;
use crate::error::{FleetError, Result};

/// Shared, externally writable control record.
///
/// Any medium works as long as the record fields and their meaning are kept.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Current record, or `None` when nothing was ever written.
    /// Unreadable or malformed records are errors.
    async fn read(&self) -> Result<Option<ControlRecord>>;

    async fn write(&self, record: &ControlRecord) -> Result<()>;
}

/// Control record stored as a JSON file
pub struct FileControlChannel {
    path: PathBuf,
}

impl FileControlChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ControlChannel for FileControlChannel {
    async fn read(&self) -> Result<Option<ControlRecord>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn write(&self, record: &ControlRecord) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|e| FleetError::Persistence(format!("{}: {}", self.path.display(), e)))
    }
}

/// In-process control record, for embedding and tests
#[derive(Default)]
pub struct MemoryControlChannel {
    record: Mutex<Option<ControlRecord>>,
}

impl MemoryControlChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record without going through the async API
    pub fn set(&self, record: ControlRecord) {
        *self
            .record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(record);
    }
}

#[async_trait]
impl ControlChannel for MemoryControlChannel {
    async fn read(&self) -> Result<Option<ControlRecord>> {
        Ok(self
            .record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    async fn write(&self, record: &ControlRecord) -> Result<()> {
        self.set(record.clone());
        Ok(())
    }
}
