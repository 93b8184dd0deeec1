//! Control commands
//!
//! botfleet control restart bot_meme --by alice
//! botfleet control emergency-stop
//!
//! Writes the shared control record; a running fleet picks it up on its
//! next watcher poll.

use anyhow::{Context, Result};
use clap::Args;

use crate::config::AppConfig;
use crate::domain::{ControlAction, ControlRecord};
use crate::persistence::{ControlChannel, FileControlChannel};

#[derive(Args, Debug)]
pub struct ControlArgs {
    /// start | stop | restart | emergency_stop | clear_emergency
    pub action: ControlAction,

    /// Worker name; omit or pass "all" for the whole fleet
    pub target: Option<String>,

    /// Operator recorded as the issuer
    #[arg(long, env = "USER", default_value = "cli")]
    pub by: String,
}

impl ControlArgs {
    pub async fn run(self, config: &AppConfig) -> Result<()> {
        let channel = FileControlChannel::new(&config.watcher.control_path);

        // Keep the emergency flag latched until explicitly cleared
        let previous = channel.read().await.ok().flatten().unwrap_or_default();
        let mut record = ControlRecord::issue(self.action, self.target.as_deref(), &self.by);
        if previous.emergency_stop && self.action != ControlAction::ClearEmergency {
            record.emergency_stop = true;
        }

        channel
            .write(&record)
            .await
            .with_context(|| format!("writing {}", channel.path().display()))?;

        println!(
            "\x1b[32m✓ {} {} issued by {}\x1b[0m",
            self.action,
            self.target.as_deref().unwrap_or("all"),
            self.by
        );
        if !config.watcher.enabled {
            println!("  \x1b[33mwatcher is disabled in config; no running fleet will act on it\x1b[0m");
        }
        Ok(())
    }
}
