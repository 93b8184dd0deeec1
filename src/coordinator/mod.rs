//! Fleet Coordinator
//!
//! Owns the worker registry and every lifecycle transition. Consults the
//! safety supervisor before resuming workers, re-runs the capital allocator
//! when the active set changes, snapshots state and audits each step.

pub mod bootstrap;
pub mod command;
pub mod context;
pub mod coordinator;
pub mod state;

pub use bootstrap::{start_fleet, FleetBootstrapConfig};
pub use command::CommandExecutor;
pub use context::FleetContext;
pub use coordinator::{BootReport, Coordinator};
pub use state::{FleetStatus, WorkerView};

#[cfg(test)]
pub use command::MockCommandExecutor;
