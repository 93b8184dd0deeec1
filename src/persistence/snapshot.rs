//! Fleet snapshots for surviving restarts.
//!
//! A snapshot is taken:
//! - Before every stop/restart of a worker
//! - After every membership change
//! - On shutdown

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::write_atomic;
use crate::domain::WorkerSnapshot;
use crate::error::{FleetError, Result};

const SNAPSHOT_VERSION: u32 = 1;

/// Positions and stats for every worker, keyed by worker name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub workers: BTreeMap<String, WorkerSnapshot>,
}

impl FleetSnapshot {
    pub fn new(workers: BTreeMap<String, WorkerSnapshot>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            taken_at: Utc::now(),
            workers,
        }
    }

    pub fn open_positions(&self) -> usize {
        self.workers.values().map(|w| w.positions.len()).sum()
    }
}

/// Durable storage for fleet snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &FleetSnapshot) -> Result<()>;

    /// Latest snapshot, or `None` if none was ever written
    async fn load(&self) -> Result<Option<FleetSnapshot>>;
}

/// JSON file snapshot store with write-then-rename replacement
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &FleetSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|e| FleetError::Persistence(format!("{}: {}", self.path.display(), e)))?;
        debug!(
            path = %self.path.display(),
            workers = snapshot.workers.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<FleetSnapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(FleetError::Persistence(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            FleetError::Persistence(format!("corrupt snapshot {}: {}", self.path.display(), e))
        })
    }
}

/// In-process snapshot store
#[derive(Default)]
pub struct MemorySnapshotStore {
    latest: Mutex<Option<FleetSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: FleetSnapshot) -> Self {
        Self {
            latest: Mutex::new(Some(snapshot)),
        }
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &FleetSnapshot) -> Result<()> {
        *self
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<FleetSnapshot>> {
        Ok(self
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Position, Side};
    use rust_decimal_macros::dec;

    fn sample() -> FleetSnapshot {
        let mut worker = WorkerSnapshot::default();
        worker.positions.insert(
            "BTC/USDT".into(),
            Position::open("BTC/USDT", Side::Long, dec!(42000), dec!(0.01)),
        );
        worker.stats.record_close(dec!(3.5));

        let mut workers = BTreeMap::new();
        workers.insert("bot_a".to_string(), worker);
        workers.insert("bot_b".to_string(), WorkerSnapshot::default());
        FleetSnapshot::new(workers)
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("state/snapshot.json"));
        assert!(store.load().await.unwrap().is_none());

        let snapshot = sample();
        store.save(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.open_positions(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, b"{\"workers\": [").unwrap();

        let err = FileSnapshotStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, FleetError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_memory_store_keeps_latest() {
        let store = MemorySnapshotStore::new();
        store.save(&sample()).await.unwrap();
        let empty = FleetSnapshot::new(BTreeMap::new());
        store.save(&empty).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().workers.len(), 0);
    }
}
