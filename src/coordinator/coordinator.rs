//! Lifecycle coordinator: single source of truth for which workers exist,
//! their configuration and their run state.
//!
//! Every start/stop/restart/allocate sequence runs under one coordinator
//! lock so the allocator always sees a consistent active set. Per-worker
//! positions and stats sit behind their own lock, shared with the worker's
//! trading loop.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::{CommandExecutor, FleetContext, FleetStatus, WorkerView};
use crate::allocator::{allocate, AllocationInput, CapitalAllocation};
use crate::audit::{AuditEvent, EventType, Severity, Source};
use crate::config::{WorkerConfig, WorkerSet};
use crate::domain::{
    ControlAction, ControlCommand, Issuer, Target, WorkerInstance, WorkerSnapshot, WorkerStatus,
};
use crate::error::{FleetError, Result};
use crate::persistence::{ConfigStore, FleetSnapshot, SnapshotStore};
use crate::worker::{ExchangeClient, RiskExitFactory, StrategyFactory, WorkerHandle, WorkerRuntime};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct WorkerSlot {
    instance: Arc<Mutex<WorkerInstance>>,
    handle: Option<WorkerHandle>,
}

#[derive(Default)]
struct FleetState {
    workers: BTreeMap<String, WorkerSlot>,
    allocation: CapitalAllocation,
}

/// Outcome of [`Coordinator::bootstrap`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootReport {
    pub workers: usize,
    pub restored_workers: usize,
    pub restored_positions: usize,
    pub restore_failed: bool,
}

pub struct Coordinator {
    ctx: FleetContext,
    config_store: Arc<dyn ConfigStore>,
    snapshot_store: Arc<dyn SnapshotStore>,
    exchange: Arc<dyn ExchangeClient>,
    strategies: Arc<dyn StrategyFactory>,
    stop_timeout: Duration,
    emergency: AtomicBool,
    state: Mutex<FleetState>,
}

impl Coordinator {
    pub fn new(
        ctx: FleetContext,
        config_store: Arc<dyn ConfigStore>,
        snapshot_store: Arc<dyn SnapshotStore>,
        exchange: Arc<dyn ExchangeClient>,
    ) -> Self {
        Self {
            ctx,
            config_store,
            snapshot_store,
            exchange,
            strategies: Arc::new(RiskExitFactory),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            emergency: AtomicBool::new(false),
            state: Mutex::new(FleetState::default()),
        }
    }

    pub fn with_strategy_factory(mut self, strategies: Arc<dyn StrategyFactory>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn context(&self) -> &FleetContext {
        &self.ctx
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    // ==================== Boot ====================

    /// Load every configured worker and restore positions from the last
    /// snapshot. A failed restore starts workers empty and is audited as
    /// critical.
    pub async fn bootstrap(&self) -> Result<BootReport> {
        let set = self.config_store.load().await?;
        let mut state = self.state.lock().await;

        for (name, config) in &set.workers {
            state.workers.entry(name.clone()).or_insert_with(|| WorkerSlot {
                instance: Arc::new(Mutex::new(WorkerInstance::new(name, config.clone()))),
                handle: None,
            });
        }
        state.allocation = current_allocation(&set);

        let mut report = BootReport {
            workers: state.workers.len(),
            restored_workers: 0,
            restored_positions: 0,
            restore_failed: false,
        };

        match self.snapshot_store.load().await {
            Ok(Some(snapshot)) => {
                for (name, saved) in snapshot.workers {
                    let Some(slot) = state.workers.get(&name) else {
                        warn!(worker = %name, "Snapshot entry for unconfigured worker ignored");
                        continue;
                    };
                    report.restored_positions += saved.positions.len();
                    report.restored_workers += 1;
                    slot.instance.lock().await.restore(saved);
                }
                info!(
                    workers = report.restored_workers,
                    positions = report.restored_positions,
                    taken_at = %snapshot.taken_at,
                    "Fleet state restored"
                );
            }
            Ok(None) => info!("No fleet snapshot found, starting fresh"),
            Err(e) => {
                error!(error = %e, "Fleet snapshot restore failed, starting with empty positions");
                report.restore_failed = true;
                self.ctx.metrics.record_error(e.kind());
                self.ctx.audit.log_error(
                    None,
                    "snapshot_restore_failed",
                    &format!("starting with empty positions: {}", e),
                    Source::Coordinator,
                );
            }
        }

        info!(workers = report.workers, "Coordinator bootstrapped");
        Ok(report)
    }

    // ==================== Lifecycle ====================

    fn ensure_can_start(&self) -> Result<()> {
        if self.is_emergency() {
            return Err(FleetError::EmergencyActive);
        }
        if self.ctx.safety.is_tripped() {
            let reason = self
                .ctx
                .safety
                .kill_switch()
                .status()
                .reason
                .unwrap_or_else(|| "kill switch tripped".to_string());
            return Err(FleetError::SafetyTripped(reason));
        }
        Ok(())
    }

    fn resolve(state: &FleetState, target: &Target) -> Result<Vec<String>> {
        match target {
            Target::All => Ok(state.workers.keys().cloned().collect()),
            Target::Worker(name) if state.workers.contains_key(name) => Ok(vec![name.clone()]),
            Target::Worker(name) => Err(FleetError::UnknownWorker(name.clone())),
        }
    }

    /// Start the target workers with their current stored configuration.
    /// Returns the names actually started.
    pub async fn start(&self, target: &Target, issuer: &Issuer) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        // Checked under the lock: emergency_stop halts under the same lock
        self.ensure_can_start()?;
        let names = Self::resolve(&state, target)?;
        let fresh = self.reload_configs().await;

        let mut started = Vec::new();
        for name in &names {
            let config = fresh.as_ref().and_then(|set| set.workers.get(name).cloned());
            if self.start_locked(&mut state, name, config).await? {
                started.push(name.clone());
            }
        }

        self.ctx.audit.log_start(target, &started, issuer);

        if !started.is_empty() {
            self.reallocate_locked(&mut state, issuer).await;
            self.persist_snapshot_locked(&state).await;
        }
        Ok(started)
    }

    /// Start one worker if enabled and not already running
    async fn start_locked(
        &self,
        state: &mut FleetState,
        name: &str,
        config: Option<WorkerConfig>,
    ) -> Result<bool> {
        let Some(slot) = state.workers.get_mut(name) else {
            return Err(FleetError::UnknownWorker(name.to_string()));
        };
        if slot.handle.as_ref().map_or(false, |h| !h.is_finished()) {
            return Ok(false);
        }

        let config = {
            let mut instance = slot.instance.lock().await;
            if let Some(config) = config {
                instance.config = config;
            }
            if !instance.config.enabled {
                warn!(worker = %name, "Worker is disabled, not starting");
                return Ok(false);
            }
            instance.status = WorkerStatus::Running;
            instance.started_at = Some(Utc::now());
            instance.last_error = None;
            instance.config.clone()
        };

        let runtime = WorkerRuntime::new(
            name,
            slot.instance.clone(),
            self.exchange.clone(),
            self.strategies.build(name, &config),
            self.ctx.clone(),
        );
        slot.handle = Some(runtime.spawn(config.cycle_interval()));
        info!(worker = %name, instruments = ?config.instruments, "Worker started");
        Ok(true)
    }

    /// Stop the target workers after their current cycle. Returns the names
    /// that were running.
    pub async fn stop(&self, target: &Target, issuer: &Issuer) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let names = Self::resolve(&state, target)?;

        self.ctx
            .audit
            .log_stop(target, "stop requested", issuer);
        self.persist_snapshot_locked(&state).await;

        let mut stopped = Vec::new();
        for name in &names {
            if let Some(clean) = self.stop_locked(&mut state, name).await {
                self.ctx.metrics.record_stop(name, clean);
                stopped.push(name.clone());
            }
        }

        if !stopped.is_empty() {
            self.reallocate_locked(&mut state, issuer).await;
            self.persist_snapshot_locked(&state).await;
        }
        Ok(stopped)
    }

    /// Stop one worker. `None` if it was not running, otherwise whether it
    /// exited cleanly.
    async fn stop_locked(&self, state: &mut FleetState, name: &str) -> Option<bool> {
        let slot = state.workers.get_mut(name)?;
        let handle = slot.handle.take()?;
        let clean = handle.stop(self.stop_timeout).await;

        let mut instance = slot.instance.lock().await;
        instance.status = WorkerStatus::Stopped;
        info!(worker = %name, clean, "Worker stopped");
        Some(clean)
    }

    /// Stop then start the target workers with freshly loaded configuration,
    /// carrying positions and stats across.
    pub async fn restart(&self, target: &Target, issuer: &Issuer) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        self.ensure_can_start()?;
        let names = Self::resolve(&state, target)?;

        self.ctx.audit.log_restart(target, "restart requested", issuer);

        // Snapshot before stop. The in-memory copy is authoritative: the
        // durable write is best effort and may have failed.
        let carried = self.collect_snapshots(&state).await;
        self.persist(&FleetSnapshot::new(carried.clone())).await;
        let fresh = self.reload_configs().await;

        let mut restarted = Vec::new();
        for name in &names {
            if let Some(clean) = self.stop_locked(&mut state, name).await {
                self.ctx.metrics.record_stop(name, clean);
            }

            let Some(slot) = state.workers.get(name) else {
                continue;
            };
            {
                let mut instance = slot.instance.lock().await;
                let config = fresh
                    .as_ref()
                    .and_then(|set| set.workers.get(name).cloned())
                    .unwrap_or_else(|| instance.config.clone());
                let mut next = instance.successor(config);
                next.status = WorkerStatus::Stopped;
                if let Some(saved) = carried.get(name) {
                    next.restore(saved.clone());
                }
                *instance = next;
            }

            match self.start_locked(&mut state, name, None).await {
                Ok(true) => {
                    self.ctx.metrics.record_restart(name, true);
                    restarted.push(name.clone());
                }
                Ok(false) => self.ctx.metrics.record_restart(name, false),
                Err(e) => {
                    self.ctx.metrics.record_restart(name, false);
                    return Err(e);
                }
            }
        }

        self.reallocate_locked(&mut state, issuer).await;
        self.persist_snapshot_locked(&state).await;
        info!(command_target = %target, restarted = ?restarted, "Restart complete");
        Ok(restarted)
    }

    /// Halt every worker immediately and block further starts until
    /// [`Coordinator::clear_emergency`].
    pub async fn emergency_stop(&self, reason: &str, issuer: &Issuer) -> Result<()> {
        self.emergency.store(true, Ordering::SeqCst);
        // Trip first: running loops observe it on their next order intent
        self.ctx.safety.trip(reason, issuer);
        error!(reason, "EMERGENCY STOP");

        let mut state = self.state.lock().await;
        let mut halted = Vec::new();
        for (name, slot) in state.workers.iter_mut() {
            if let Some(handle) = slot.handle.take() {
                handle.abort();
                halted.push(name.clone());
            }
            let mut instance = slot.instance.lock().await;
            if instance.status.is_running() {
                instance.status = WorkerStatus::Stopped;
            }
        }
        for name in &halted {
            self.ctx.metrics.record_stop(name, true);
        }

        self.ctx.audit.log_event(
            AuditEvent::new(
                EventType::Stop,
                Severity::Critical,
                issuer.source,
                Target::All.as_str(),
                "emergency_stop",
            )
            .with_detail("reason", reason)
            .with_detail("halted", halted)
            .with_issuer(issuer.user.clone()),
        );

        self.reallocate_locked(&mut state, issuer).await;
        self.persist_snapshot_locked(&state).await;
        Ok(())
    }

    /// Lift the emergency stop. Workers stay stopped until started again.
    pub async fn clear_emergency(&self, issuer: &Issuer) -> Result<()> {
        self.ctx.safety.clear(issuer)?;
        if self.emergency.swap(false, Ordering::SeqCst) {
            info!(by = ?issuer.user, "Emergency stop cleared");
        }
        Ok(())
    }

    // ==================== Snapshots ====================

    async fn collect_snapshots(&self, state: &FleetState) -> BTreeMap<String, WorkerSnapshot> {
        let mut workers = BTreeMap::new();
        for (name, slot) in &state.workers {
            workers.insert(name.clone(), slot.instance.lock().await.snapshot());
        }
        workers
    }

    /// Serialize every worker's positions and stats to the snapshot store
    pub async fn snapshot_state(&self) -> Result<FleetSnapshot> {
        let state = self.state.lock().await;
        let snapshot = FleetSnapshot::new(self.collect_snapshots(&state).await);
        self.snapshot_store.save(&snapshot).await?;
        Ok(snapshot)
    }

    /// Replace every worker's positions and stats from the snapshot store.
    /// Returns the number of workers restored.
    pub async fn restore_state(&self) -> Result<usize> {
        let state = self.state.lock().await;
        let Some(snapshot) = self.snapshot_store.load().await? else {
            return Ok(0);
        };
        let mut restored = 0;
        for (name, saved) in snapshot.workers {
            if let Some(slot) = state.workers.get(&name) {
                slot.instance.lock().await.restore(saved);
                restored += 1;
            }
        }
        Ok(restored)
    }

    async fn persist_snapshot_locked(&self, state: &FleetState) {
        let snapshot = FleetSnapshot::new(self.collect_snapshots(state).await);
        self.persist(&snapshot).await;
    }

    /// Best-effort snapshot write: failures are logged and audited only
    async fn persist(&self, snapshot: &FleetSnapshot) {
        if let Err(e) = self.snapshot_store.save(snapshot).await {
            self.record_persistence_failure("snapshot_write_failed", &e);
        }
    }

    fn record_persistence_failure(&self, action: &str, error: &FleetError) {
        warn!(action, error = %error, "Persistence failure, continuing");
        self.ctx.metrics.record_error(error.kind());
        self.ctx.audit.log_event(
            AuditEvent::new(
                EventType::Error,
                Severity::Warning,
                Source::Coordinator,
                "system",
                action,
            )
            .with_detail("message", error.to_string()),
        );
    }

    // ==================== Configuration & allocation ====================

    async fn reload_configs(&self) -> Option<WorkerSet> {
        match self.config_store.load().await {
            Ok(set) => Some(set),
            Err(e) => {
                self.record_persistence_failure("config_reload_failed", &e);
                None
            }
        }
    }

    /// Recompute allocation over running workers and write it back into
    /// each worker's configuration and the store when it changed.
    async fn reallocate_locked(&self, state: &mut FleetState, issuer: &Issuer) -> CapitalAllocation {
        let mut inputs = Vec::with_capacity(state.workers.len());
        for (name, slot) in &state.workers {
            let instance = slot.instance.lock().await;
            inputs.push(AllocationInput::new(
                name,
                instance.is_running(),
                instance.config.weight,
            ));
        }
        let allocation = allocate(&inputs);
        if allocation == state.allocation {
            return allocation;
        }

        for (name, slot) in &state.workers {
            slot.instance.lock().await.config.capital_percent = allocation.get(name);
        }

        match self.config_store.load().await {
            Ok(mut set) => {
                let before = set.clone();
                if !allocation.apply_to(&mut set).is_empty() {
                    if let Err(e) = self.config_store.save(&set).await {
                        self.record_persistence_failure("allocation_write_failed", &e);
                    } else {
                        self.ctx.audit.log_config_change(
                            "allocation",
                            &allocation_view(&before),
                            &allocation_view(&set),
                            issuer,
                        );
                    }
                }
            }
            Err(e) => self.record_persistence_failure("allocation_write_failed", &e),
        }

        info!(allocation = ?allocation, "Capital reallocated");
        state.allocation = allocation.clone();
        allocation
    }

    /// Re-run the allocator over the current active set
    pub async fn redistribute_capital(&self, issuer: &Issuer) -> CapitalAllocation {
        let mut state = self.state.lock().await;
        state.allocation = CapitalAllocation::default();
        self.reallocate_locked(&mut state, issuer).await
    }

    pub async fn allocation(&self) -> CapitalAllocation {
        self.state.lock().await.allocation.clone()
    }

    /// Toggle a worker's enabled flag, starting or stopping it accordingly
    pub async fn set_enabled(&self, name: &str, enabled: bool, issuer: &Issuer) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.workers.contains_key(name) {
            return Err(FleetError::UnknownWorker(name.to_string()));
        }

        let mut set = self.config_store.load().await?;
        let Some(stored) = set.workers.get_mut(name) else {
            return Err(FleetError::UnknownWorker(name.to_string()));
        };
        let old = stored.clone();
        stored.enabled = enabled;
        let new = stored.clone();
        self.config_store.save(&set).await?;
        self.ctx.audit.log_config_change(name, &old, &new, issuer);

        if enabled {
            if self.ensure_can_start().is_ok() {
                self.start_locked(&mut state, name, Some(new)).await?;
            } else {
                if let Some(slot) = state.workers.get(name) {
                    slot.instance.lock().await.config = new;
                }
                warn!(worker = %name, "Enabled but not started: fleet is halted");
            }
        } else {
            if let Some(clean) = self.stop_locked(&mut state, name).await {
                self.ctx.metrics.record_stop(name, clean);
            }
            if let Some(slot) = state.workers.get(name) {
                slot.instance.lock().await.config = new;
            }
        }

        self.reallocate_locked(&mut state, issuer).await;
        self.persist_snapshot_locked(&state).await;
        Ok(())
    }

    /// Validate and store a worker's configuration. Takes effect on the next
    /// restart. `capital_percent` stays owned by the allocator.
    pub async fn update_worker_config(
        &self,
        name: &str,
        config: WorkerConfig,
        issuer: &Issuer,
    ) -> Result<()> {
        config
            .validate()
            .map_err(|errors| FleetError::InvalidConfig(errors.join("; ")))?;

        let _state = self.state.lock().await;
        let mut set = self.config_store.load().await?;
        let Some(stored) = set.workers.get_mut(name) else {
            return Err(FleetError::UnknownWorker(name.to_string()));
        };

        let old = stored.clone();
        let mut new = config;
        new.capital_percent = old.capital_percent;
        *stored = new.clone();
        self.config_store.save(&set).await?;
        self.ctx.audit.log_config_change(name, &old, &new, issuer);
        info!(worker = %name, "Worker configuration updated, applies on next restart");
        Ok(())
    }

    /// Zero every worker's daily PnL and the fleet daily figure
    pub async fn reset_daily_stats(&self) {
        let state = self.state.lock().await;
        for slot in state.workers.values() {
            slot.instance.lock().await.stats.daily_pnl = rust_decimal::Decimal::ZERO;
        }
        self.ctx.safety.reset_daily();
        info!("Daily statistics reset");
    }

    // ==================== Views & shutdown ====================

    pub async fn status(&self) -> FleetStatus {
        let state = self.state.lock().await;
        let mut workers = Vec::with_capacity(state.workers.len());
        for slot in state.workers.values() {
            workers.push(WorkerView::from(&*slot.instance.lock().await));
        }
        FleetStatus::new(
            workers,
            self.is_emergency(),
            self.ctx.safety.kill_switch().state(),
        )
    }

    /// Copy of one worker's instance
    pub async fn worker(&self, name: &str) -> Result<WorkerInstance> {
        let state = self.state.lock().await;
        let slot = state
            .workers
            .get(name)
            .ok_or_else(|| FleetError::UnknownWorker(name.to_string()))?;
        let instance = slot.instance.lock().await.clone();
        Ok(instance)
    }

    /// Stop every worker and write a final snapshot
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let names: Vec<String> = state.workers.keys().cloned().collect();
        for name in &names {
            self.stop_locked(&mut state, name).await;
        }
        self.persist_snapshot_locked(&state).await;
        info!("Coordinator shut down");
    }
}

/// Allocation-only view of a worker set, for audit diffs
fn allocation_view(set: &WorkerSet) -> BTreeMap<String, String> {
    set.workers
        .iter()
        .map(|(name, config)| (name.clone(), config.capital_percent.to_string()))
        .collect()
}

fn current_allocation(set: &WorkerSet) -> CapitalAllocation {
    // Nothing runs at boot; the stored split is only informational until the
    // first membership change.
    let inputs: Vec<AllocationInput> = set
        .workers
        .keys()
        .map(|name| AllocationInput::new(name, false, None))
        .collect();
    allocate(&inputs)
}

#[async_trait]
impl CommandExecutor for Coordinator {
    async fn execute(&self, command: &ControlCommand, issuer: &Issuer) -> Result<()> {
        match command.action {
            ControlAction::Start => self.start(&command.target, issuer).await.map(|_| ()),
            ControlAction::Stop => self.stop(&command.target, issuer).await.map(|_| ()),
            ControlAction::Restart => self.restart(&command.target, issuer).await.map(|_| ()),
            ControlAction::EmergencyStop => {
                self.emergency_stop("control record emergency stop", issuer)
                    .await
            }
            ControlAction::ClearEmergency => self.clear_emergency(issuer).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::EventFilter;
    use crate::config::SafetyConfig;
    use crate::domain::{Position, Side};
    use crate::persistence::{MemoryConfigStore, MemorySnapshotStore};
    use crate::worker::PaperExchange;
    use rust_decimal_macros::dec;

    fn worker_set(names: &[(&str, bool)]) -> WorkerSet {
        let mut set = WorkerSet::default();
        for (name, enabled) in names {
            set.workers.insert(
                name.to_string(),
                WorkerConfig {
                    enabled: *enabled,
                    cycle_interval_secs: 3600,
                    ..Default::default()
                },
            );
        }
        set
    }

    async fn coordinator(names: &[(&str, bool)]) -> (Coordinator, Arc<MemoryConfigStore>) {
        let store = Arc::new(MemoryConfigStore::new(worker_set(names)));
        let coordinator = Coordinator::new(
            FleetContext::in_memory(SafetyConfig::default()),
            store.clone(),
            Arc::new(MemorySnapshotStore::new()),
            Arc::new(PaperExchange::new(dec!(1000))),
        )
        .with_stop_timeout(Duration::from_secs(1));
        coordinator.bootstrap().await.unwrap();
        (coordinator, store)
    }

    #[tokio::test]
    async fn test_unknown_worker_rejected_without_mutation() {
        let (c, _) = coordinator(&[("bot_a", true)]).await;
        let err = c
            .start(&Target::worker("bot_x"), &Issuer::coordinator())
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::UnknownWorker(_)));
        assert_eq!(c.status().await.active_workers, 0);
    }

    #[tokio::test]
    async fn test_start_skips_disabled_and_allocates() {
        let (c, store) = coordinator(&[("bot_a", true), ("bot_b", true), ("bot_c", false)]).await;
        let started = c.start(&Target::All, &Issuer::coordinator()).await.unwrap();
        assert_eq!(started, vec!["bot_a".to_string(), "bot_b".to_string()]);

        let allocation = c.allocation().await;
        assert_eq!(allocation.get("bot_a"), dec!(50));
        assert_eq!(allocation.get("bot_c"), dec!(0));
        assert_eq!(store.snapshot().workers["bot_b"].capital_percent, dec!(50));

        c.stop(&Target::worker("bot_b"), &Issuer::coordinator()).await.unwrap();
        assert_eq!(c.allocation().await.get("bot_a"), dec!(100));
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_preserves_positions_and_picks_up_config() {
        let (c, store) = coordinator(&[("bot_a", true)]).await;
        c.start(&Target::All, &Issuer::coordinator()).await.unwrap();
        {
            let state = c.state.lock().await;
            let mut instance = state.workers["bot_a"].instance.lock().await;
            instance.open_position(Position::open("BTC/USDT", Side::Long, dec!(100), dec!(1)));
            instance.open_position(Position::open("ETH/USDT", Side::Short, dec!(100), dec!(2)));
        }

        let mut set = store.snapshot();
        set.workers.get_mut("bot_a").unwrap().take_profit_pct = dec!(4);
        store.save(&set).await.unwrap();

        c.restart(&Target::worker("bot_a"), &Issuer::user("ops")).await.unwrap();

        let after = c.worker("bot_a").await.unwrap();
        assert_eq!(after.positions.len(), 2);
        assert_eq!(after.positions["ETH/USDT"].quantity, dec!(2));
        assert_eq!(after.config.take_profit_pct, dec!(4));
        assert_eq!(after.restart_count, 1);
        assert!(after.is_running());

        let restarts = c
            .context()
            .audit
            .get_recent_events(10, &EventFilter::event_type(EventType::Restart));
        assert!(restarts.iter().any(|e| e.action == "restart_initiated"
            && e.severity == Severity::Warning
            && e.issuer.as_deref() == Some("ops")));
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_emergency_blocks_start_until_cleared() {
        let (c, _) = coordinator(&[("bot_a", true)]).await;
        c.start(&Target::All, &Issuer::coordinator()).await.unwrap();

        c.emergency_stop("operator", &Issuer::user("ops")).await.unwrap();
        assert!(c.context().safety.is_tripped());
        assert_eq!(c.status().await.active_workers, 0);
        assert!(matches!(
            c.start(&Target::All, &Issuer::coordinator()).await,
            Err(FleetError::EmergencyActive)
        ));

        c.clear_emergency(&Issuer::user("ops")).await.unwrap();
        assert_eq!(
            c.start(&Target::All, &Issuer::coordinator()).await.unwrap(),
            vec!["bot_a".to_string()]
        );
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_enabled_toggles_and_audits() {
        let (c, store) = coordinator(&[("bot_a", true), ("bot_b", true)]).await;
        c.start(&Target::All, &Issuer::coordinator()).await.unwrap();

        c.set_enabled("bot_b", false, &Issuer::user("ops")).await.unwrap();
        assert!(!store.snapshot().workers["bot_b"].enabled);
        assert_eq!(c.allocation().await.get("bot_a"), dec!(100));
        assert!(!c.worker("bot_b").await.unwrap().is_running());

        let changes = c
            .context()
            .audit
            .get_recent_events(10, &EventFilter::event_type(EventType::ConfigChange));
        assert!(changes.iter().any(|e| e.target == "bot_b"));
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_worker_config_keeps_allocation() {
        let (c, store) = coordinator(&[("bot_a", true)]).await;
        c.start(&Target::All, &Issuer::coordinator()).await.unwrap();

        let config = WorkerConfig {
            stop_loss_pct: dec!(-3),
            capital_percent: dec!(5),
            ..Default::default()
        };
        c.update_worker_config("bot_a", config, &Issuer::user("ops")).await.unwrap();
        let stored = &store.snapshot().workers["bot_a"];
        assert_eq!(stored.stop_loss_pct, dec!(-3));
        assert_eq!(stored.capital_percent, dec!(100));

        let invalid = WorkerConfig {
            instruments: vec![],
            ..Default::default()
        };
        assert!(matches!(
            c.update_worker_config("bot_a", invalid, &Issuer::user("ops")).await,
            Err(FleetError::InvalidConfig(_))
        ));
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_on_boot_is_critical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, b"not json").unwrap();

        let c = Coordinator::new(
            FleetContext::in_memory(SafetyConfig::default()),
            Arc::new(MemoryConfigStore::new(worker_set(&[("bot_a", true)]))),
            Arc::new(crate::persistence::FileSnapshotStore::new(&path)),
            Arc::new(PaperExchange::new(dec!(1000))),
        );
        let report = c.bootstrap().await.unwrap();
        assert!(report.restore_failed);
        assert!(c.worker("bot_a").await.unwrap().positions.is_empty());

        let critical = c
            .context()
            .audit
            .get_recent_events(10, &EventFilter::severity(Severity::Critical));
        assert_eq!(critical[0].action, "snapshot_restore_failed");
    }

    /// Store whose writes always fail and whose reads return an older state
    struct StaleSnapshotStore {
        stale: FleetSnapshot,
    }

    #[async_trait]
    impl SnapshotStore for StaleSnapshotStore {
        async fn save(&self, _snapshot: &FleetSnapshot) -> Result<()> {
            Err(FleetError::Persistence("disk full".into()))
        }

        async fn load(&self) -> Result<Option<FleetSnapshot>> {
            Ok(Some(self.stale.clone()))
        }
    }

    #[tokio::test]
    async fn test_snapshot_write_failure_keeps_positions_across_restart() {
        let mut stale = BTreeMap::new();
        stale.insert("bot_a".to_string(), WorkerSnapshot::default());
        let c = Coordinator::new(
            FleetContext::in_memory(SafetyConfig::default()),
            Arc::new(MemoryConfigStore::new(worker_set(&[("bot_a", true)]))),
            Arc::new(StaleSnapshotStore {
                stale: FleetSnapshot::new(stale),
            }),
            Arc::new(PaperExchange::new(dec!(1000))),
        )
        .with_stop_timeout(Duration::from_secs(1));
        c.bootstrap().await.unwrap();

        c.start(&Target::All, &Issuer::coordinator()).await.unwrap();
        {
            let state = c.state.lock().await;
            let mut instance = state.workers["bot_a"].instance.lock().await;
            instance.open_position(Position::open("BTC/USDT", Side::Long, dec!(100), dec!(1)));
        }

        let restarted = c
            .restart(&Target::worker("bot_a"), &Issuer::user("ops"))
            .await
            .unwrap();
        assert_eq!(restarted, vec!["bot_a".to_string()]);

        let after = c.worker("bot_a").await.unwrap();
        assert!(after.is_running());
        assert_eq!(after.positions.len(), 1);
        assert_eq!(after.positions["BTC/USDT"].quantity, dec!(1));

        let stopped = c.stop(&Target::All, &Issuer::coordinator()).await.unwrap();
        assert_eq!(stopped, vec!["bot_a".to_string()]);

        let failures = c
            .context()
            .audit
            .get_recent_events(100, &EventFilter::event_type(EventType::Error));
        assert!(failures
            .iter()
            .any(|e| e.action == "snapshot_write_failed" && e.severity == Severity::Warning));
        assert!(c.context().metrics.errors_by_type()["persistence_error"] >= 3);
    }

    #[tokio::test]
    async fn test_start_waiting_on_lock_sees_emergency() {
        let (c, _) = coordinator(&[("bot_a", true)]).await;
        let c = Arc::new(c);

        let guard = c.state.lock().await;
        let pending = {
            let c = c.clone();
            tokio::spawn(async move { c.start(&Target::All, &Issuer::coordinator()).await })
        };
        tokio::task::yield_now().await;

        // Flag raised while the start is queued behind the coordinator lock
        c.emergency.store(true, Ordering::SeqCst);
        drop(guard);

        assert!(matches!(
            pending.await.unwrap(),
            Err(FleetError::EmergencyActive)
        ));
        assert_eq!(c.status().await.active_workers, 0);
    }

    #[tokio::test]
    async fn test_reset_daily_stats() {
        let (c, _) = coordinator(&[("bot_a", true)]).await;
        {
            let state = c.state.lock().await;
            state.workers["bot_a"].instance.lock().await.stats.record_close(dec!(-20));
        }
        c.context().safety.record_pnl(dec!(-20));

        c.reset_daily_stats().await;
        let worker = c.worker("bot_a").await.unwrap();
        assert_eq!(worker.stats.daily_pnl, dec!(0));
        assert_eq!(worker.stats.total_pnl, dec!(-20));
        assert_eq!(c.context().safety.daily_pnl(), dec!(0));
    }
}
