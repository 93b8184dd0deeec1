//! Durable stores used by the coordinator and the watcher:
//! - Snapshot store for worker positions and stats across restarts
//! - Shared control record written by external actors
//! - Worker configuration store

pub mod config_store;
pub mod control_record;
pub mod snapshot;

pub use config_store::{ConfigStore, FileConfigStore, MemoryConfigStore};
pub use control_record::{ControlChannel, FileControlChannel, MemoryControlChannel};
pub use snapshot::{FileSnapshotStore, FleetSnapshot, MemorySnapshotStore, SnapshotStore};

use std::path::Path;

/// Replace `path` with `bytes` via a sibling temp file and rename, creating
/// the parent directory if needed.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
