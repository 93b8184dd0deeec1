//! Control-channel supervision
//!
//! - Watcher polling the shared control record
//! - Debounce policy coalescing repeated commands

pub mod debounce;
pub mod watcher;

pub use debounce::{Debouncer, Decision};
pub use watcher::{ControlWatcher, PollOutcome};
