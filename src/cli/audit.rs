//! Audit journal queries
//!
//! botfleet audit --severity critical --limit 20
//! botfleet audit --type restart --export restarts.json

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use super::output::{print_items, truncate, OutputMode};
use crate::audit::{read_journal, AuditEvent, EventFilter, EventType, Severity, Source};
use crate::config::AppConfig;

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Maximum events to show, newest first
    #[arg(short = 'n', long, default_value = "50")]
    pub limit: usize,

    #[arg(long = "type")]
    pub event_type: Option<EventType>,

    #[arg(long)]
    pub source: Option<Source>,

    #[arg(long)]
    pub severity: Option<Severity>,

    #[arg(long)]
    pub target: Option<String>,

    /// Write every matching event to this file as a JSON array
    #[arg(long)]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Serialize, Tabled)]
struct EventRow {
    time: String,
    #[tabled(rename = "type")]
    event_type: String,
    severity: String,
    source: String,
    target: String,
    action: String,
    issuer: String,
    details: String,
}

impl From<&AuditEvent> for EventRow {
    fn from(event: &AuditEvent) -> Self {
        Self {
            time: event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            event_type: event.event_type.to_string(),
            severity: event.severity.to_string(),
            source: event.source.to_string(),
            target: event.target.clone(),
            action: event.action.clone(),
            issuer: event.issuer.clone().unwrap_or_default(),
            details: truncate(&serde_json::Value::Object(event.details.clone()).to_string(), 60),
        }
    }
}

impl AuditArgs {
    pub fn run(self, config: &AppConfig, mode: OutputMode) -> Result<()> {
        let filter = EventFilter {
            event_type: self.event_type,
            source: self.source,
            severity: self.severity,
            target: self.target,
        };

        let matching: Vec<AuditEvent> = read_journal(&config.audit.dir)?
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect();

        if let Some(path) = self.export {
            std::fs::write(&path, serde_json::to_vec_pretty(&matching)?)?;
            println!(
                "\x1b[32m✓ exported {} events to {}\x1b[0m",
                matching.len(),
                path.display()
            );
            return Ok(());
        }

        let rows: Vec<EventRow> = matching
            .iter()
            .rev()
            .take(self.limit)
            .map(EventRow::from)
            .collect();
        print_items(&rows, mode)
    }
}
