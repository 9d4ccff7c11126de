//! Single-migration execution
//!
//! The executor is the seam between the orchestrator and a [`VersionStore`]:
//! it hands one record to the store's atomic `apply`, times it and logs the
//! outcome. Retry or dry-run policies would slot in here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::{Direction, MigrateResult, Migration, VersionStore};

/// A migration that was committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: u64,
    pub name: String,
    pub direction: Direction,
    /// Wall time spent inside the store's transaction
    pub elapsed: Duration,
    pub applied_at: DateTime<Utc>,
}

/// Applies migrations one at a time through a store
pub struct Executor<'a> {
    store: &'a mut dyn VersionStore,
}

impl<'a> Executor<'a> {
    pub fn new(store: &'a mut dyn VersionStore) -> Self {
        Self { store }
    }

    /// Apply one migration atomically
    pub async fn apply(&mut self, migration: &Migration) -> MigrateResult<AppliedMigration> {
        let started = Instant::now();

        match self.store.apply(migration).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                info!(
                    "Applied migration {} ({}) '{}' in {:?}",
                    migration.version, migration.direction, migration.name, elapsed
                );
                Ok(AppliedMigration {
                    version: migration.version,
                    name: migration.name.clone(),
                    direction: migration.direction,
                    elapsed,
                    applied_at: Utc::now(),
                })
            }
            Err(e) => {
                error!(
                    "Migration {} ({}) '{}' failed",
                    migration.version, migration.direction, migration.name
                );
                Err(e)
            }
        }
    }
}
