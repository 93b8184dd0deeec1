use botfleet::audit::{EventFilter, EventType, Severity};
use botfleet::config::{SafetyConfig, WorkerConfig, WorkerSet};
use botfleet::domain::{Issuer, Position, Side, Target, WorkerSnapshot, WorkerStats};
use botfleet::error::FleetError;
use botfleet::persistence::{
    FileSnapshotStore, FleetSnapshot, MemoryConfigStore, MemorySnapshotStore, SnapshotStore,
};
use botfleet::safety::KillSwitchState;
use botfleet::worker::PaperExchange;
use botfleet::{Coordinator, FleetContext};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn workers(names: &[&str]) -> WorkerSet {
    let mut set = WorkerSet::default();
    for name in names {
        set.workers.insert(
            name.to_string(),
            WorkerConfig {
                instruments: vec!["BTC/USDT".into(), "ETH/USDT".into()],
                cycle_interval_secs: 3600,
                ..Default::default()
            },
        );
    }
    set
}

fn exchange() -> Arc<PaperExchange> {
    Arc::new(PaperExchange::new(dec!(1000)).with_step_pct(0.0))
}

fn coordinator_with(
    set: WorkerSet,
    safety: SafetyConfig,
    snapshots: Arc<dyn SnapshotStore>,
) -> (Coordinator, Arc<MemoryConfigStore>) {
    let store = Arc::new(MemoryConfigStore::new(set));
    let coordinator = Coordinator::new(
        FleetContext::in_memory(safety),
        store.clone(),
        snapshots,
        exchange(),
    )
    .with_stop_timeout(Duration::from_secs(1));
    (coordinator, store)
}

fn seeded_snapshot() -> FleetSnapshot {
    let mut positions = BTreeMap::new();
    positions.insert(
        "BTC/USDT".to_string(),
        Position::open("BTC/USDT", Side::Long, dec!(100), dec!(0.5)),
    );
    positions.insert(
        "ETH/USDT".to_string(),
        Position::open("ETH/USDT", Side::Long, dec!(100), dec!(1.2)),
    );
    let mut stats = WorkerStats::default();
    stats.record_close(dec!(12));

    let mut workers = BTreeMap::new();
    workers.insert("bot_a".to_string(), WorkerSnapshot { positions, stats });
    FleetSnapshot::new(workers)
}

#[tokio::test]
async fn restart_preserves_positions_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let snapshots = Arc::new(FileSnapshotStore::new(dir.path().join("fleet_snapshot.json")));
    snapshots.save(&seeded_snapshot()).await.unwrap();

    let (coordinator, _) = coordinator_with(workers(&["bot_a"]), SafetyConfig::default(), snapshots.clone());
    let report = coordinator.bootstrap().await.unwrap();
    assert_eq!(report.restored_positions, 2);

    coordinator.start(&Target::All, &Issuer::coordinator()).await.unwrap();
    coordinator
        .restart(&Target::worker("bot_a"), &Issuer::user("ops"))
        .await
        .unwrap();

    let worker = coordinator.worker("bot_a").await.unwrap();
    assert!(worker.is_running());
    assert_eq!(worker.restart_count, 1);
    assert_eq!(worker.positions.len(), 2);
    assert_eq!(worker.positions["ETH/USDT"].quantity, dec!(1.2));
    assert_eq!(worker.stats.total_pnl, dec!(12));

    let persisted = snapshots.load().await.unwrap().unwrap();
    assert_eq!(persisted.open_positions(), 2);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn allocation_always_sums_to_one_hundred() {
    let (coordinator, store) = coordinator_with(
        workers(&["bot_a", "bot_b", "bot_c"]),
        SafetyConfig::default(),
        Arc::new(MemorySnapshotStore::new()),
    );
    coordinator.bootstrap().await.unwrap();
    coordinator.start(&Target::All, &Issuer::coordinator()).await.unwrap();

    let allocation = coordinator.allocation().await;
    assert_eq!(allocation.total(), dec!(100));
    assert_eq!(allocation.get("bot_a"), dec!(33.4));
    assert_eq!(allocation.get("bot_b"), dec!(33.3));

    coordinator
        .stop(&Target::worker("bot_c"), &Issuer::coordinator())
        .await
        .unwrap();
    let allocation = coordinator.allocation().await;
    assert_eq!(allocation.total(), dec!(100));
    assert_eq!(allocation.get("bot_c"), Decimal::ZERO);
    assert_eq!(allocation.get("bot_a"), dec!(50));

    let stored: Decimal = store
        .snapshot()
        .workers
        .values()
        .map(|w| w.capital_percent)
        .sum();
    assert_eq!(stored, dec!(100));

    let status = coordinator.status().await;
    assert_eq!(status.active_workers, 2);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn emergency_stop_blocks_starts_until_privileged_clear() {
    let safety = SafetyConfig {
        privileged_operators: vec!["alice".to_string()],
        ..Default::default()
    };
    let (coordinator, _) = coordinator_with(
        workers(&["bot_a", "bot_b"]),
        safety,
        Arc::new(MemorySnapshotStore::new()),
    );
    coordinator.bootstrap().await.unwrap();
    coordinator.start(&Target::All, &Issuer::coordinator()).await.unwrap();

    coordinator
        .emergency_stop("exchange outage", &Issuer::user("bob"))
        .await
        .unwrap();
    let status = coordinator.status().await;
    assert!(status.emergency);
    assert_eq!(status.kill_switch, KillSwitchState::Tripped);
    assert_eq!(status.active_workers, 0);

    assert!(matches!(
        coordinator.start(&Target::worker("bot_a"), &Issuer::coordinator()).await,
        Err(FleetError::EmergencyActive)
    ));
    assert!(matches!(
        coordinator.restart(&Target::All, &Issuer::coordinator()).await,
        Err(FleetError::EmergencyActive)
    ));

    assert!(matches!(
        coordinator.clear_emergency(&Issuer::user("bob")).await,
        Err(FleetError::Unauthorized(_))
    ));
    assert!(coordinator.is_emergency());

    coordinator.clear_emergency(&Issuer::user("alice")).await.unwrap();
    assert_eq!(coordinator.status().await.active_workers, 0);
    let started = coordinator.start(&Target::All, &Issuer::coordinator()).await.unwrap();
    assert_eq!(started.len(), 2);

    let critical = coordinator
        .context()
        .audit
        .get_recent_events(50, &EventFilter::severity(Severity::Critical));
    assert!(critical.iter().any(|e| e.action == "emergency_stop"));
    coordinator.shutdown().await;
}

#[tokio::test]
async fn unknown_target_is_rejected_and_nothing_changes() {
    let (coordinator, _) = coordinator_with(
        workers(&["bot_a"]),
        SafetyConfig::default(),
        Arc::new(MemorySnapshotStore::new()),
    );
    coordinator.bootstrap().await.unwrap();

    let err = coordinator
        .restart(&Target::worker("bot_missing"), &Issuer::coordinator())
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::UnknownWorker(name) if name == "bot_missing"));
    assert_eq!(coordinator.worker("bot_a").await.unwrap().restart_count, 0);
    assert!(coordinator
        .context()
        .audit
        .get_recent_events(10, &EventFilter::event_type(EventType::Restart))
        .is_empty());
}
