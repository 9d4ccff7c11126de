//! High-level migration operations
//!
//! [`Migrator`] drives the sequencer and the executor: every operation reads
//! the current version and the full migration set fresh, picks the ordered
//! subset to run and applies it one record at a time, stopping on the first
//! failure. Stop signals are honoured between records, or by abandoning the
//! in-flight transaction when an immediate halt is requested.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    AppliedMigration, BackendRegistry, Executor, InterruptionMode, Interrupts, MigrateError,
    MigrateResult, Migration, MigrationSet, MigrationSource, MigratorConfig, VersionStore,
};

/// Outcome of a successful operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Version before the operation started
    pub from_version: u64,
    /// Version after the operation finished
    pub to_version: u64,
    /// Migrations committed, in order
    pub applied: Vec<AppliedMigration>,
}

impl MigrationReport {
    /// True when nothing was applied
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Chain a report for an operation that ran right after this one
    pub fn merge(mut self, next: MigrationReport) -> Self {
        self.to_version = next.to_version;
        self.applied.extend(next.applied);
        self
    }
}

/// Which records an operation selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Movement {
    ToLatest,
    ToZero,
    Relative(i64),
}

impl Movement {
    fn select<'s>(&self, set: &'s MigrationSet, current: u64) -> Vec<&'s Migration> {
        match *self {
            Movement::ToLatest => set.to_latest(current),
            Movement::ToZero => set.to_zero(current),
            Movement::Relative(n) => set.by_relative_count(current, n),
        }
    }
}

/// How one supervised apply ended
enum Supervised {
    Finished {
        result: MigrateResult<AppliedMigration>,
        stop_requested: bool,
    },
    Abandoned,
}

/// Runs migrations from a source against a version store
pub struct Migrator {
    store: Box<dyn VersionStore>,
    source: Arc<dyn MigrationSource>,
    config: MigratorConfig,
    interrupts: Option<Interrupts>,
}

impl Migrator {
    /// Wrap an already initialized store
    pub fn new(
        store: Box<dyn VersionStore>,
        source: Arc<dyn MigrationSource>,
        config: MigratorConfig,
    ) -> Self {
        Self {
            store,
            source,
            config,
            interrupts: None,
        }
    }

    /// Create and initialize the store for `url` from the registry
    pub async fn connect(
        registry: &BackendRegistry,
        url: &str,
        source: Arc<dyn MigrationSource>,
        config: MigratorConfig,
    ) -> MigrateResult<Self> {
        let store = registry.create(url, &config).await?;
        Ok(Self::new(store, source, config))
    }

    /// Listen for stop signals during operations.
    ///
    /// A signal that arrives after an operation's last record has been
    /// supervised stays queued and stops the next operation before its
    /// first record.
    pub fn with_interrupts(mut self, interrupts: Interrupts) -> Self {
        self.interrupts = Some(interrupts);
        self
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Currently applied version, `0` when nothing is applied
    pub async fn version(&self) -> MigrateResult<u64> {
        self.store.current_version().await
    }

    /// Apply every pending up migration
    pub async fn up(&mut self) -> MigrateResult<MigrationReport> {
        self.run(Movement::ToLatest).await
    }

    /// Roll back every applied migration
    pub async fn down(&mut self) -> MigrateResult<MigrationReport> {
        self.run(Movement::ToZero).await
    }

    /// Apply the next `n` migrations (`n > 0`) or roll back the last `|n|` (`n < 0`)
    pub async fn migrate(&mut self, n: i64) -> MigrateResult<MigrationReport> {
        if n == 0 {
            let version = self.store.current_version().await?;
            debug!("Nothing to migrate for a relative count of 0");
            return Ok(MigrationReport {
                from_version: version,
                to_version: version,
                applied: Vec::new(),
            });
        }
        self.run(Movement::Relative(n)).await
    }

    /// Roll back the most recent migration and apply it again
    pub async fn redo(&mut self) -> MigrateResult<MigrationReport> {
        let current = self.store.current_version().await?;
        let set = self.load().await?;
        if set.by_relative_count(current, -1).is_empty() {
            return Err(MigrateError::Sequencing(format!(
                "Nothing to redo: no down migration at or below version {}",
                current
            )));
        }

        let rolled_back = self.migrate(-1).await?;
        let reapplied = self.migrate(1).await?;
        Ok(rolled_back.merge(reapplied))
    }

    /// Roll back everything, then apply everything
    pub async fn reset(&mut self) -> MigrateResult<MigrationReport> {
        let rolled_back = self.down().await?;
        let reapplied = self.up().await?;
        Ok(rolled_back.merge(reapplied))
    }

    /// Release the store's connection
    pub async fn close(&mut self) -> MigrateResult<()> {
        self.store.close().await
    }

    async fn load(&self) -> MigrateResult<MigrationSet> {
        self.source.load(self.store.filename_extension()).await
    }

    async fn run(&mut self, movement: Movement) -> MigrateResult<MigrationReport> {
        let mode = self.config.interruption_mode;
        let from_version = self.store.current_version().await?;
        let set = self.load().await?;
        let plan = movement.select(&set, from_version);

        info!(
            "Migrating from version {}: {} migration(s) to apply",
            from_version,
            plan.len()
        );

        let mut applied: Vec<AppliedMigration> = Vec::new();
        let mut stop_requested = false;

        for migration in plan {
            let signalled = self
                .interrupts
                .as_mut()
                .map_or(false, Interrupts::take_pending);
            if signalled || stop_requested {
                return Err(interrupted(&applied));
            }

            let mut executor = Executor::new(self.store.as_mut());
            let result = match self.interrupts.as_mut() {
                None => executor.apply(migration).await,
                Some(interrupts) => {
                    match supervise(executor.apply(migration), interrupts, mode).await {
                        Supervised::Finished {
                            result,
                            stop_requested: requested,
                        } => {
                            stop_requested = requested;
                            result
                        }
                        Supervised::Abandoned => {
                            warn!(
                                "Abandoned migration {} ({}) mid-flight",
                                migration.version, migration.direction
                            );
                            return Err(interrupted(&applied));
                        }
                    }
                }
            };

            match result {
                Ok(done) => applied.push(done),
                Err(e) => {
                    warn!(
                        "Halting after {} applied migration(s): {}",
                        applied.len(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        // A stop requested during the last record still ends the operation,
        // so composite operations never start their next phase
        if stop_requested {
            return Err(interrupted(&applied));
        }

        let to_version = self.store.current_version().await?;
        info!("Now at version {}", to_version);
        Ok(MigrationReport {
            from_version,
            to_version,
            applied,
        })
    }
}

fn interrupted(applied: &[AppliedMigration]) -> MigrateError {
    let completed: Vec<u64> = applied.iter().map(|m| m.version).collect();
    warn!("Interrupted after {} migration(s)", completed.len());
    MigrateError::Interrupted { completed }
}

/// Await `apply` while watching for stop signals.
///
/// A graceful first signal lets `apply` finish and asks the caller to stop
/// afterwards; a second signal, or any signal in non-graceful mode, drops the
/// future so its transaction never commits.
async fn supervise<F>(apply: F, interrupts: &mut Interrupts, mode: InterruptionMode) -> Supervised
where
    F: Future<Output = MigrateResult<AppliedMigration>>,
{
    tokio::pin!(apply);
    let mut stop_requested = false;
    let mut listening = true;

    loop {
        tokio::select! {
            biased;

            result = &mut apply => {
                return Supervised::Finished { result, stop_requested };
            }
            signal = interrupts.recv(), if listening => {
                if !signal {
                    listening = false;
                } else if mode == InterruptionMode::NonGraceful || stop_requested {
                    return Supervised::Abandoned;
                } else {
                    info!("Stop requested; finishing the migration in progress");
                    stop_requested = true;
                }
            }
        }
    }
}
