//! Command debounce policy keyed by `(action, target)`

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::{ControlAction, ControlCommand, Target};

/// What to do with a command read from the control record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// New command, outside the window for its `(action, target)`
    Execute,
    /// Same identity as the last command seen
    AlreadySeen,
    /// New identity, but an identical `(action, target)` ran inside the window
    Coalesced,
}

impl Decision {
    pub fn should_execute(&self) -> bool {
        matches!(self, Decision::Execute)
    }
}

/// Coalesces bursts of identical commands.
///
/// A change of action is never suppressed; only repeats of the same
/// `(action, target)` within `window` of the last execution are.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_seen: Option<(ControlAction, Target, chrono::DateTime<chrono::Utc>)>,
    last_executed: HashMap<(ControlAction, Target), Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: None,
            last_executed: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Mark a command as seen without executing it
    pub fn prime(&mut self, command: &ControlCommand) {
        self.last_seen = Some(command.identity());
    }

    pub fn observe(&mut self, command: &ControlCommand, now: Instant) -> Decision {
        let identity = command.identity();
        if self.last_seen.as_ref() == Some(&identity) {
            return Decision::AlreadySeen;
        }
        self.last_seen = Some(identity);

        let key = (command.action, command.target.clone());
        if let Some(last) = self.last_executed.get(&key) {
            if now.saturating_duration_since(*last) < self.window {
                return Decision::Coalesced;
            }
        }
        self.last_executed.insert(key, now);
        Decision::Execute
    }
}
