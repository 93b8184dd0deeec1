use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

use super::write_atomic;
use crate::config::WorkerSet;
use crate::error::{FleetError, Result};

/// Per-worker configuration storage.
///
/// Read by the coordinator on boot and on every start/restart; written back
/// when allocation or enabled flags change.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load and validate the worker set
    async fn load(&self) -> Result<WorkerSet>;

    async fn save(&self, workers: &WorkerSet) -> Result<()>;
}

fn validated(workers: WorkerSet) -> Result<WorkerSet> {
    workers
        .validate()
        .map_err(|errors| FleetError::InvalidConfig(errors.join("; ")))?;
    Ok(workers)
}

/// TOML file configuration store
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> Result<WorkerSet> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| FleetError::InvalidConfig(format!("{}: {}", self.path.display(), e)))?;
        validated(toml::from_str(&raw)?)
    }

    async fn save(&self, workers: &WorkerSet) -> Result<()> {
        let raw = toml::to_string_pretty(workers)?;
        write_atomic(&self.path, raw.as_bytes())
            .await
            .map_err(|e| FleetError::Persistence(format!("{}: {}", self.path.display(), e)))?;
        info!(path = %self.path.display(), workers = workers.workers.len(), "Worker configuration saved");
        Ok(())
    }
}

/// In-process configuration store
#[derive(Default)]
pub struct MemoryConfigStore {
    workers: Mutex<WorkerSet>,
}

impl MemoryConfigStore {
    pub fn new(workers: WorkerSet) -> Self {
        Self {
            workers: Mutex::new(workers),
        }
    }

    /// Current contents, bypassing validation
    pub fn snapshot(&self) -> WorkerSet {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<WorkerSet> {
        validated(self.snapshot())
    }

    async fn save(&self, workers: &WorkerSet) -> Result<()> {
        *self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = workers.clone();
        Ok(())
    }
}
