//! Fleet bootstrap: wires stores, safety, the coordinator and the watcher
//! from [`AppConfig`] and runs until shutdown.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::{Coordinator, FleetContext};
use crate::config::AppConfig;
use crate::domain::{Issuer, Target};
use crate::error::Result;
use crate::persistence::{FileConfigStore, FileControlChannel, FileSnapshotStore};
use crate::supervisor::ControlWatcher;
use crate::worker::PaperExchange;

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);
const WATCHER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime switches layered over the file configuration by the CLI
#[derive(Debug, Clone)]
pub struct FleetBootstrapConfig {
    pub autostart: bool,
    pub watcher: bool,
    pub paper_balance: Decimal,
}

impl From<&AppConfig> for FleetBootstrapConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            autostart: config.fleet.autostart,
            watcher: config.watcher.enabled,
            paper_balance: config.fleet.paper_balance,
        }
    }
}

/// Start the fleet and block until Ctrl+C.
pub async fn start_fleet(config: FleetBootstrapConfig, app_config: &AppConfig) -> Result<()> {
    info!(
        workers_path = %app_config.fleet.workers_path.display(),
        autostart = config.autostart,
        watcher = config.watcher,
        balance = %config.paper_balance,
        "starting bot fleet"
    );

    // 1. Shared collaborators
    let ctx = FleetContext::from_config(app_config)?;
    ctx.safety
        .kill_switch()
        .set_peak_balance(config.paper_balance);
    if let Some(journal) = ctx.audit.journal_path() {
        info!(journal = %journal.display(), "audit journal opened");
    }

    // 2. Coordinator
    let coordinator = Arc::new(
        Coordinator::new(
            ctx.clone(),
            Arc::new(FileConfigStore::new(&app_config.fleet.workers_path)),
            Arc::new(FileSnapshotStore::new(&app_config.snapshot.path)),
            Arc::new(PaperExchange::new(config.paper_balance)),
        )
        .with_stop_timeout(Duration::from_millis(app_config.fleet.stop_timeout_ms)),
    );
    let report = coordinator.bootstrap().await?;
    info!(?report, "coordinator ready");

    // 3. Autostart
    if config.autostart {
        match coordinator.start(&Target::All, &Issuer::coordinator()).await {
            Ok(started) => info!(started = ?started, "workers autostarted"),
            Err(e) => warn!(error = %e, "autostart refused"),
        }
    }

    // 4. Watcher, status logging and the metrics file
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let watcher_handle = if config.watcher {
        let watcher = ControlWatcher::new(
            Arc::new(FileControlChannel::new(&app_config.watcher.control_path)),
            coordinator.clone(),
            &app_config.watcher,
        );
        Some(tokio::spawn(watcher.run(shutdown_tx.subscribe())))
    } else {
        info!("control watcher disabled");
        None
    };

    let metrics_path = app_config.fleet.metrics_path();
    let status_metrics = ctx.metrics.clone();
    let status_path = metrics_path.clone();
    let mut status_shutdown = shutdown_tx.subscribe();
    let status_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATUS_LOG_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = status_shutdown.recv() => break,
                _ = ticker.tick() => {
                    status_metrics.log_status().await;
                    if let Err(e) = status_metrics.write_prometheus(&status_path).await {
                        warn!(error = %e, "failed to write metrics file");
                    }
                }
            }
        }
    });

    // 5. Block until Ctrl+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, initiating shutdown"),
        Err(e) => warn!(error = %e, "failed to listen for Ctrl+C, shutting down"),
    }
    let _ = shutdown_tx.send(());

    // 6. Drain
    if let Some(handle) = watcher_handle {
        let _ = tokio::time::timeout(WATCHER_JOIN_TIMEOUT, handle).await;
    }
    let _ = status_handle.await;
    coordinator.shutdown().await;
    ctx.metrics.log_status().await;
    if let Err(e) = ctx.metrics.write_prometheus(&metrics_path).await {
        warn!(error = %e, "failed to write metrics file");
    }

    info!("fleet shutdown complete");
    Ok(())
}
