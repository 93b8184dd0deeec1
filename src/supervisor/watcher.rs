//! Control-channel watcher
//!
//! Polls the shared control record and turns newly written commands into
//! coordinator calls. Errors from the record or the coordinator are logged
//! and contained; the loop only exits on shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::debounce::{Debouncer, Decision};
use crate::audit::Source;
use crate::config::WatcherConfig;
use crate::coordinator::CommandExecutor;
use crate::domain::{ControlAction, ControlCommand, ControlRecord, Issuer, Target};
use crate::persistence::ControlChannel;

/// Result of a single poll, mainly for tests and debug logs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub executed: Vec<ControlAction>,
    pub coalesced: bool,
    pub read_failed: bool,
}

pub struct ControlWatcher {
    channel: Arc<dyn ControlChannel>,
    executor: Arc<dyn CommandExecutor>,
    poll_interval: Duration,
    debouncer: Debouncer,
    emergency_seen: bool,
}

impl ControlWatcher {
    pub fn new(
        channel: Arc<dyn ControlChannel>,
        executor: Arc<dyn CommandExecutor>,
        config: &WatcherConfig,
    ) -> Self {
        Self {
            channel,
            executor,
            poll_interval: config.poll_interval(),
            debouncer: Debouncer::new(config.debounce_window()),
            emergency_seen: false,
        }
    }

    /// Poll until `shutdown` fires.
    ///
    /// The command present at startup is treated as already handled; only an
    /// already-raised emergency flag is acted on.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            debounce_ms = self.debouncer.window().as_millis() as u64,
            "Control watcher started"
        );
        self.prime().await;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Control watcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.poll().await;
                    if !outcome.executed.is_empty() {
                        debug!(?outcome, "Control poll acted");
                    }
                }
            }
        }
    }

    /// Seed duplicate detection from the record as it stands now
    pub async fn prime(&mut self) {
        match self.channel.read().await {
            Ok(Some(record)) => {
                if let Some(command) = record.command() {
                    self.debouncer.prime(&command);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Control record unreadable at startup"),
        }
    }

    /// Read the record once and execute whatever it newly asks for
    pub async fn poll(&mut self) -> PollOutcome {
        let mut outcome = PollOutcome::default();
        let record = match self.channel.read().await {
            Ok(Some(record)) => record,
            Ok(None) => return outcome,
            Err(e) => {
                warn!(error = %e, "Control record unreadable, skipping poll");
                outcome.read_failed = true;
                return outcome;
            }
        };

        if let Some(command) = record.command() {
            match self.debouncer.observe(&command, Instant::now()) {
                Decision::Execute => {
                    self.execute(&command).await;
                    outcome.executed.push(command.action);
                }
                Decision::Coalesced => {
                    debug!(
                        action = %command.action,
                        command_target = %command.target,
                        "Command coalesced"
                    );
                    outcome.coalesced = true;
                }
                Decision::AlreadySeen => {}
            }
        }

        let emergency_executed = outcome.executed.contains(&ControlAction::EmergencyStop);
        if self.emergency_raised(&record) && !emergency_executed {
            let command = ControlCommand {
                action: ControlAction::EmergencyStop,
                target: Target::All,
                issuer: record.last_action_by.clone(),
                issued_at: record.last_action_at.unwrap_or_else(chrono::Utc::now),
            };
            self.execute(&command).await;
            outcome.executed.push(ControlAction::EmergencyStop);
        }

        outcome
    }

    /// True on the poll where the emergency flag goes from clear to set
    fn emergency_raised(&mut self, record: &ControlRecord) -> bool {
        let raised = record.emergency_stop && !self.emergency_seen;
        self.emergency_seen = record.emergency_stop;
        raised
    }

    async fn execute(&self, command: &ControlCommand) {
        let issuer = Issuer::new(Source::Watcher, command.issuer.as_deref());
        info!(
            action = %command.action,
            command_target = %command.target,
            by = ?command.issuer,
            "Executing control command"
        );
        if let Err(e) = self.executor.execute(command, &issuer).await {
            if e.is_rejection() {
                warn!(action = %command.action, error = %e, "Control command rejected");
            } else {
                error!(action = %command.action, error = %e, "Control command failed");
            }
        }
    }
}
