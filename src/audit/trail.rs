use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{AuditEvent, AuditJournal, EventFilter, EventType, Severity, Source};
use crate::config::AuditConfig;
use crate::domain::{Issuer, Position, Target};
use crate::error::Result;

struct TrailState {
    recent: VecDeque<AuditEvent>,
    journal: Option<AuditJournal>,
}

/// Append-only audit sink: bounded recent-events cache plus durable journal.
///
/// One lock guards both, independent of any worker or coordinator lock.
pub struct AuditTrail {
    capacity: usize,
    state: Mutex<TrailState>,
}

impl AuditTrail {
    /// Memory-only trail (no journal)
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(TrailState {
                recent: VecDeque::with_capacity(capacity.max(1)),
                journal: None,
            }),
        }
    }

    /// Trail backed by a JSONL journal under `dir`
    pub fn with_journal(dir: &Path, capacity: usize) -> Result<Self> {
        let journal = AuditJournal::open(dir)?;
        let trail = Self::in_memory(capacity);
        trail.lock().journal = Some(journal);
        Ok(trail)
    }

    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        Self::with_journal(&config.dir, config.capacity)
    }

    fn lock(&self) -> MutexGuard<'_, TrailState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn journal_path(&self) -> Option<PathBuf> {
        self.lock().journal.as_ref().map(|j| j.path().to_path_buf())
    }

    /// Append an event to the journal and the recent cache.
    ///
    /// Journal write failures are logged and never fail the caller. The lock
    /// is held for one JSONL line append and flush and never across an
    /// `.await`, so calling this from async tasks is safe.
    pub fn log_event(&self, event: AuditEvent) {
        debug!(
            event_type = %event.event_type,
            severity = %event.severity,
            event_target = %event.target,
            action = %event.action,
            "audit"
        );

        let mut state = self.lock();
        if let Some(journal) = state.journal.as_mut() {
            if let Err(e) = journal.append(&event) {
                warn!(error = %e, "Failed to append audit event to journal");
            }
        }
        if state.recent.len() >= self.capacity {
            state.recent.pop_front();
        }
        state.recent.push_back(event);
    }

    /// Most-recent-first events matching `filter`, at most `limit` of them
    pub fn get_recent_events(&self, limit: usize, filter: &EventFilter) -> Vec<AuditEvent> {
        self.lock()
            .recent
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write cached events matching `filter` (oldest first) to `path` as a
    /// JSON array. Returns the number of events exported.
    pub fn export(&self, path: &Path, filter: &EventFilter) -> Result<usize> {
        let events: Vec<AuditEvent> = self
            .lock()
            .recent
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_vec_pretty(&events)?)?;
        Ok(events.len())
    }

    fn record(&self, event: AuditEvent) -> AuditEvent {
        self.log_event(event.clone());
        event
    }

    /// Record a configuration change, keeping only keys whose value changed.
    /// Returns `None` when nothing changed.
    pub fn log_config_change<T: Serialize>(
        &self,
        target: &str,
        old: &T,
        new: &T,
        issuer: &Issuer,
    ) -> Option<AuditEvent> {
        let changed = diff_fields(&to_object(old), &to_object(new));
        if changed.is_empty() {
            return None;
        }

        let num_changes = changed.len();
        let event = AuditEvent::new(
            EventType::ConfigChange,
            Severity::Critical,
            issuer.source,
            target,
            "config_updated",
        )
        .with_detail("changed_fields", Value::Object(changed))
        .with_detail("num_changes", num_changes)
        .with_issuer(issuer.user.clone());
        Some(self.record(event))
    }

    pub fn log_start(&self, target: &Target, started: &[String], issuer: &Issuer) -> AuditEvent {
        self.record(
            AuditEvent::new(
                EventType::Restart,
                Severity::Warning,
                issuer.source,
                target.as_str(),
                "start_initiated",
            )
            .with_detail("started", started.to_vec())
            .with_issuer(issuer.user.clone()),
        )
    }

    pub fn log_restart(&self, target: &Target, reason: &str, issuer: &Issuer) -> AuditEvent {
        self.record(
            AuditEvent::new(
                EventType::Restart,
                Severity::Warning,
                issuer.source,
                target.as_str(),
                "restart_initiated",
            )
            .with_detail("reason", reason)
            .with_issuer(issuer.user.clone()),
        )
    }

    pub fn log_stop(&self, target: &Target, reason: &str, issuer: &Issuer) -> AuditEvent {
        self.record(
            AuditEvent::new(
                EventType::Stop,
                Severity::Warning,
                issuer.source,
                target.as_str(),
                "stop_initiated",
            )
            .with_detail("reason", reason)
            .with_issuer(issuer.user.clone()),
        )
    }

    pub fn log_trade(
        &self,
        worker: &str,
        instrument: &str,
        action: &str,
        price: Decimal,
        quantity: Decimal,
        pnl: Option<Decimal>,
    ) -> AuditEvent {
        self.record(
            AuditEvent::new(EventType::Trade, Severity::Info, Source::Bot, instrument, action)
                .with_detail("worker", worker)
                .with_detail("price", decimal(price))
                .with_detail("quantity", decimal(quantity))
                .with_detail("pnl", pnl.map(decimal).unwrap_or(Value::Null)),
        )
    }

    pub fn log_error(
        &self,
        target: Option<&str>,
        error_type: &str,
        message: &str,
        source: Source,
    ) -> AuditEvent {
        self.record(
            AuditEvent::new(
                EventType::Error,
                Severity::Critical,
                source,
                target.unwrap_or("system"),
                error_type,
            )
            .with_detail("message", message),
        )
    }

    pub fn log_position_change(&self, worker: &str, position: &Position, action: &str) -> AuditEvent {
        self.record(
            AuditEvent::new(
                EventType::PositionChange,
                Severity::Info,
                Source::Bot,
                position.instrument.as_str(),
                action,
            )
            .with_detail("worker", worker)
            .with_detail("side", position.side.to_string())
            .with_detail("position_size", decimal(position.quantity))
            .with_detail("entry_price", decimal(position.entry_price)),
        )
    }
}

fn decimal(value: Decimal) -> Value {
    Value::String(value.normalize().to_string())
}

fn to_object<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
        Err(e) => {
            warn!(error = %e, "Config not serializable for audit diff");
            Map::new()
        }
    }
}

fn diff_fields(old: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let mut changed = Map::new();
    for key in keys {
        let before = old.get(key).unwrap_or(&Value::Null);
        let after = new.get(key).unwrap_or(&Value::Null);
        if before != after {
            changed.insert(key.clone(), json!({ "old": before, "new": after }));
        }
    }
    changed
}
