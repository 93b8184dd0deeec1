pub mod allocator;
pub mod audit;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod safety;
pub mod services;
pub mod supervisor;
pub mod worker;

pub use allocator::{allocate, AllocationInput, CapitalAllocation};
pub use audit::{AuditEvent, AuditTrail, EventFilter, EventType, Severity, Source};
pub use config::{AppConfig, WorkerConfig, WorkerSet};
pub use coordinator::{Coordinator, FleetContext, FleetStatus};
pub use domain::{ControlAction, ControlCommand, ControlRecord, Issuer, Target};
pub use error::{FleetError, Result};
pub use safety::{KillSwitch, SafetySupervisor};
pub use supervisor::ControlWatcher;
