//! Audit trail: durable, queryable record of control actions, configuration
//! changes, trades and errors.

mod event;
mod journal;
mod trail;

pub use event::{AuditEvent, EventFilter, EventType, Severity, Source};
pub use journal::{journal_files, read_journal, AuditJournal};
pub use trail::AuditTrail;
