//! End-to-end migration scenarios against the in-memory backend
//!
//! Covers forward and backward runs, failure halting with decoded
//! diagnostics, redo/reset, rollback failures and stop signals.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use elif_migrate::{
    BackendRegistry, Direction, DirectorySource, InterruptionMode, Interrupts, MemoryStore,
    MigrateError, Migration, MigrationSet, Migrator, MigratorConfig, MigratorConfigBuilder,
    VersionStore,
};
use tempfile::TempDir;

const MALFORMED: &str = "CREATE TABLE comments;\nCREATE TABEL broken;\n";

/// v1 creates T, v1 down drops it, v2 is broken
fn scenario_set() -> MigrationSet {
    MigrationSet::new(vec![
        Migration::new(1, "create_t", Direction::Up, "CREATE TABLE t;"),
        Migration::new(1, "create_t", Direction::Down, "DROP TABLE t;"),
        Migration::new(2, "broken", Direction::Up, MALFORMED),
    ])
    .unwrap()
}

fn healthy_set(count: u64) -> MigrationSet {
    let migrations = (1..=count)
        .flat_map(|version| {
            let name = format!("table_{}", version);
            [
                Migration::new(
                    version,
                    name.clone(),
                    Direction::Up,
                    format!("CREATE TABLE {};", name),
                ),
                Migration::new(
                    version,
                    name.clone(),
                    Direction::Down,
                    format!("DROP TABLE {};", name),
                ),
            ]
        })
        .collect();
    MigrationSet::new(migrations).unwrap()
}

async fn setup(set: MigrationSet, store: MemoryStore, config: MigratorConfig) -> Migrator {
    let mut boxed = store;
    boxed.initialize("memory://integration").await.unwrap();
    Migrator::new(Box::new(boxed), Arc::new(set), config)
}

#[tokio::test]
async fn test_up_halts_on_malformed_script() {
    let store = MemoryStore::new();
    let mut migrator = setup(scenario_set(), store.clone(), MigratorConfig::default()).await;

    let err = migrator.up().await.unwrap_err();

    match &err {
        MigrateError::Execution {
            version,
            direction,
            name,
            message,
        } => {
            assert_eq!(*version, 2);
            assert_eq!(*direction, Direction::Up);
            assert_eq!(name, "broken");
            assert_eq!(
                message,
                "ERROR 42601: syntax error at or near \"TABEL\" in line 2, column 8:\n\n\
                 1: CREATE TABLE comments;\n\
                 2: CREATE TABEL broken;\n"
            );
        }
        other => panic!("Expected execution error, got {:?}", other),
    }

    // v1 stays committed, v2 left no trace
    assert_eq!(migrator.version().await.unwrap(), 1);
    assert_eq!(store.tables(), vec!["t"]);
    assert_eq!(store.applied_versions(), vec![1]);
}

#[tokio::test]
async fn test_down_after_failed_up_reaches_zero() {
    let store = MemoryStore::new();
    let mut migrator = setup(scenario_set(), store.clone(), MigratorConfig::default()).await;
    assert!(migrator.up().await.is_err());

    let report = migrator.down().await.unwrap();

    assert_eq!(report.from_version, 1);
    assert_eq!(report.to_version, 0);
    assert_eq!(report.applied.len(), 1);
    assert_eq!(migrator.version().await.unwrap(), 0);
    assert!(store.tables().is_empty());
}

#[tokio::test]
async fn test_migrate_zero_changes_nothing() {
    let store = MemoryStore::new();
    let mut migrator = setup(healthy_set(3), store.clone(), MigratorConfig::default()).await;
    migrator.migrate(2).await.unwrap();

    let report = migrator.migrate(0).await.unwrap();

    assert!(report.is_empty());
    assert_eq!(report.from_version, 2);
    assert_eq!(report.to_version, 2);
    assert_eq!(store.journal().len(), 2);
}

#[tokio::test]
async fn test_redo_with_nothing_applied_does_not_reapply() {
    let store = MemoryStore::new();
    let mut migrator = setup(healthy_set(2), store.clone(), MigratorConfig::default()).await;

    let err = migrator.redo().await.unwrap_err();

    assert!(matches!(err, MigrateError::Sequencing(_)));
    assert_eq!(migrator.version().await.unwrap(), 0);
    assert!(store.journal().is_empty());
}

#[tokio::test]
async fn test_redo_stops_when_rollback_step_fails() {
    let set = MigrationSet::new(vec![
        Migration::new(1, "a", Direction::Up, "CREATE TABLE a;"),
        Migration::new(1, "a", Direction::Down, "DROP TABLE missing;"),
    ])
    .unwrap();
    let store = MemoryStore::new();
    let mut migrator = setup(set, store.clone(), MigratorConfig::default()).await;
    migrator.up().await.unwrap();

    let err = migrator.redo().await.unwrap_err();

    assert!(matches!(err, MigrateError::Execution { direction: Direction::Down, .. }));
    assert_eq!(migrator.version().await.unwrap(), 1);
    assert_eq!(store.journal(), vec![(1, Direction::Up)]);
}

#[tokio::test]
async fn test_up_then_down_is_reversible() {
    let store = MemoryStore::new();
    let mut migrator = setup(healthy_set(3), store.clone(), MigratorConfig::default()).await;
    migrator.migrate(1).await.unwrap();
    let before = migrator.version().await.unwrap();

    migrator.migrate(1).await.unwrap();
    migrator.migrate(-1).await.unwrap();

    assert_eq!(migrator.version().await.unwrap(), before);
    assert_eq!(store.tables(), vec!["table_1"]);
}

#[tokio::test]
async fn test_reset_rebuilds_everything() {
    let store = MemoryStore::new();
    let mut migrator = setup(healthy_set(3), store.clone(), MigratorConfig::default()).await;
    migrator.up().await.unwrap();

    let report = migrator.reset().await.unwrap();

    let steps: Vec<(u64, Direction)> = report
        .applied
        .iter()
        .map(|m| (m.version, m.direction))
        .collect();
    assert_eq!(
        steps,
        vec![
            (3, Direction::Down),
            (2, Direction::Down),
            (1, Direction::Down),
            (1, Direction::Up),
            (2, Direction::Up),
            (3, Direction::Up),
        ]
    );
    assert_eq!(report.to_version, 3);
}

#[tokio::test]
async fn test_rollback_failure_is_distinct() {
    let store = MemoryStore::new();
    let mut migrator = setup(scenario_set(), store.clone(), MigratorConfig::default()).await;
    store.fail_next_rollback();

    let err = migrator.up().await.unwrap_err();

    assert!(err.is_execution_failure());
    assert_eq!(err.rollback_failure(), Some("simulated rollback failure"));
    assert!(err.to_string().contains("syntax error at or near \"TABEL\""));
    // The inconsistent state is visible to the caller
    assert!(store.has_table("comments"));
}

#[tokio::test]
async fn test_graceful_interrupt_finishes_current_migration() {
    let store = MemoryStore::new().with_latency(Duration::from_millis(150));
    let (handle, interrupts) = Interrupts::channel();
    let mut migrator = setup(healthy_set(3), store.clone(), MigratorConfig::default())
        .await
        .with_interrupts(interrupts);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.interrupt();
        // Keep the channel open until the run is over
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let err = migrator.up().await.unwrap_err();

    assert!(matches!(err, MigrateError::Interrupted { completed } if completed == vec![1]));
    assert_eq!(migrator.version().await.unwrap(), 1);
    assert_eq!(store.tables(), vec!["table_1"]);
}

#[tokio::test]
async fn test_second_graceful_interrupt_halts_immediately() {
    let store = MemoryStore::new().with_latency(Duration::from_millis(300));
    let (handle, interrupts) = Interrupts::channel();
    let mut migrator = setup(healthy_set(3), store.clone(), MigratorConfig::default())
        .await
        .with_interrupts(interrupts);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.interrupt();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.interrupt();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let err = migrator.up().await.unwrap_err();

    assert!(matches!(err, MigrateError::Interrupted { completed } if completed.is_empty()));
    assert_eq!(migrator.version().await.unwrap(), 0);
    assert!(store.tables().is_empty());
}

#[tokio::test]
async fn test_non_graceful_interrupt_halts_immediately() {
    let store = MemoryStore::new().with_latency(Duration::from_millis(300));
    let (handle, interrupts) = Interrupts::channel();
    let config = MigratorConfigBuilder::unattended().build().unwrap();
    assert_eq!(config.interruption_mode, InterruptionMode::NonGraceful);

    let mut migrator = setup(healthy_set(3), store.clone(), config)
        .await
        .with_interrupts(interrupts);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.interrupt();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let err = migrator.up().await.unwrap_err();

    assert!(matches!(err, MigrateError::Interrupted { completed } if completed.is_empty()));
    assert_eq!(migrator.version().await.unwrap(), 0);
    assert!(store.journal().is_empty());
}

#[tokio::test]
async fn test_graceful_interrupt_during_redo_rollback_skips_reapply() {
    let store = MemoryStore::new().with_latency(Duration::from_millis(200));
    let (handle, interrupts) = Interrupts::channel();
    let mut migrator = setup(healthy_set(1), store.clone(), MigratorConfig::default())
        .await
        .with_interrupts(interrupts);
    migrator.up().await.unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.interrupt();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let err = migrator.redo().await.unwrap_err();

    assert!(matches!(err, MigrateError::Interrupted { completed } if completed == vec![1]));
    assert_eq!(
        store.journal(),
        vec![(1, Direction::Up), (1, Direction::Down)]
    );
    assert_eq!(migrator.version().await.unwrap(), 0);
    assert!(store.tables().is_empty());
}

#[tokio::test]
async fn test_graceful_interrupt_during_last_reset_down_skips_up() {
    let store = MemoryStore::new().with_latency(Duration::from_millis(200));
    let (handle, interrupts) = Interrupts::channel();
    let mut migrator = setup(healthy_set(2), store.clone(), MigratorConfig::default())
        .await
        .with_interrupts(interrupts);
    migrator.up().await.unwrap();

    tokio::spawn(async move {
        // The second down runs from roughly 200ms to 400ms
        tokio::time::sleep(Duration::from_millis(270)).await;
        handle.interrupt();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let err = migrator.reset().await.unwrap_err();

    assert!(matches!(err, MigrateError::Interrupted { completed } if completed == vec![2, 1]));
    assert_eq!(
        store.journal(),
        vec![
            (1, Direction::Up),
            (2, Direction::Up),
            (2, Direction::Down),
            (1, Direction::Down),
        ]
    );
    assert_eq!(migrator.version().await.unwrap(), 0);
}

#[tokio::test]
async fn test_graceful_interrupt_during_last_record_is_reported() {
    let store = MemoryStore::new().with_latency(Duration::from_millis(200));
    let (handle, interrupts) = Interrupts::channel();
    let mut migrator = setup(healthy_set(1), store.clone(), MigratorConfig::default())
        .await
        .with_interrupts(interrupts);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.interrupt();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let err = migrator.up().await.unwrap_err();

    // The record committed, but the caller still learns the run was stopped
    assert!(matches!(err, MigrateError::Interrupted { completed } if completed == vec![1]));
    assert_eq!(migrator.version().await.unwrap(), 1);
}

#[tokio::test]
async fn test_leftover_signal_stops_next_operation() {
    let store = MemoryStore::new();
    let (handle, interrupts) = Interrupts::channel();
    let mut migrator = setup(healthy_set(2), store.clone(), MigratorConfig::default())
        .await
        .with_interrupts(interrupts);
    migrator.migrate(1).await.unwrap();

    handle.interrupt();
    let err = migrator.migrate(1).await.unwrap_err();

    assert!(matches!(err, MigrateError::Interrupted { completed } if completed.is_empty()));
    assert_eq!(store.journal(), vec![(1, Direction::Up)]);
}

#[tokio::test]
async fn test_connect_through_registry_with_directory_source() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("0001_users.up.sql"), "CREATE TABLE users;").unwrap();
    fs::write(dir.path().join("0001_users.down.sql"), "DROP TABLE users;").unwrap();
    fs::write(dir.path().join("0002_posts.up.sql"), "CREATE TABLE posts;").unwrap();
    fs::write(dir.path().join("0002_posts.down.sql"), "DROP TABLE posts;").unwrap();

    let shared = MemoryStore::new();
    let observer = shared.clone();
    let mut registry = BackendRegistry::new();
    registry.register("memory", move |_: &MigratorConfig| {
        Box::new(shared.clone()) as Box<dyn VersionStore>
    });

    let mut migrator = Migrator::connect(
        &registry,
        "memory://app",
        Arc::new(DirectorySource::new(dir.path())),
        MigratorConfig::default(),
    )
    .await
    .unwrap();

    let report = migrator.up().await.unwrap();
    assert_eq!(report.to_version, 2);
    assert_eq!(observer.tables(), vec!["posts", "users"]);

    migrator.close().await.unwrap();
    assert!(matches!(
        migrator.close().await,
        Err(MigrateError::Connection(_))
    ));
}

#[tokio::test]
async fn test_connect_unknown_scheme() {
    let result = Migrator::connect(
        &BackendRegistry::new(),
        "cassandra://localhost/app",
        Arc::new(healthy_set(1)),
        MigratorConfig::default(),
    )
    .await;

    assert!(matches!(result, Err(MigrateError::UnknownBackend(_))));
}
