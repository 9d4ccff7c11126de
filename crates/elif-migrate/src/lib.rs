//! # elif-migrate
//!
//! Versioned schema migrations for the elif.rs framework.
//!
//! ## Features
//!
//! - **Linear versioning**: ordered up/down SQL scripts tracked by a single applied-version marker
//! - **Atomic scripts**: each script and its marker update run in one transaction
//! - **Readable failures**: backend error positions are decoded into line, column and surrounding script text
//! - **Pluggable backends**: PostgreSQL and in-memory stores behind one [`VersionStore`] trait
//! - **Cooperative interrupts**: graceful or immediate halting between scripts
//!
//! ## Quick Start
//!
//! ```rust
//! use elif_migrate::{
//!     Direction, MemoryStore, Migration, MigrationSet, Migrator, MigratorConfig, VersionStore,
//! };
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let migrations = MigrationSet::new(vec![
//!     Migration::new(1, "create_users", Direction::Up, "CREATE TABLE users;"),
//!     Migration::new(1, "create_users", Direction::Down, "DROP TABLE users;"),
//! ])
//! .unwrap();
//!
//! let mut store = MemoryStore::new();
//! store.initialize("memory://quickstart").await.unwrap();
//!
//! let mut migrator = Migrator::new(
//!     Box::new(store),
//!     Arc::new(migrations),
//!     MigratorConfig::default(),
//! );
//!
//! let report = migrator.up().await.unwrap();
//! assert_eq!(report.to_version, 1);
//! assert_eq!(migrator.version().await.unwrap(), 1);
//! # });
//! ```

use async_trait::async_trait;
use thiserror::Error;

pub mod backends;
pub mod config;
pub mod executor;
pub mod interrupt;
pub mod migration;
pub mod migrator;
pub mod position;
pub mod registry;
pub mod source;

pub use backends::*;
pub use config::*;
pub use executor::*;
pub use interrupt::*;
pub use migration::*;
pub use migrator::*;
pub use position::*;
pub use registry::*;
pub use source::*;

/// Migration engine errors
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Version store error: {0}")]
    Store(String),

    #[error("Sequencing error: {0}")]
    Sequencing(String),

    #[error("Migration {version} ({direction}) '{name}' failed: {message}")]
    Execution {
        version: u64,
        direction: Direction,
        name: String,
        message: String,
    },

    #[error("Migration {version} ({direction}) failed: {message}; rolling back the transaction also failed: {rollback}")]
    Rollback {
        version: u64,
        direction: Direction,
        message: String,
        rollback: String,
    },

    #[error("Migration source error: {0}")]
    Source(String),

    #[error("No backend registered for scheme '{0}'")]
    UnknownBackend(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Interrupted after applying {} migration(s)", .completed.len())]
    Interrupted { completed: Vec<u64> },
}

impl MigrateError {
    /// True when a script failed inside `apply`, whether or not its rollback succeeded
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            MigrateError::Execution { .. } | MigrateError::Rollback { .. }
        )
    }

    /// The rollback failure text, when undoing a failed script also failed
    pub fn rollback_failure(&self) -> Option<&str> {
        match self {
            MigrateError::Rollback { rollback, .. } => Some(rollback),
            _ => None,
        }
    }

    /// Build the error for a failed script, folding in a rollback failure if one happened
    pub fn script_failed(migration: &Migration, message: String, rollback: Option<String>) -> Self {
        match rollback {
            Some(rollback) => MigrateError::Rollback {
                version: migration.version,
                direction: migration.direction,
                message,
                rollback,
            },
            None => MigrateError::Execution {
                version: migration.version,
                direction: migration.direction,
                name: migration.name.clone(),
                message,
            },
        }
    }
}

/// Result type for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Contract every database backend implements.
///
/// A store owns the connection, the applied-version marker and the
/// transaction used to apply a single script. The sequencer and the
/// [`Migrator`] never look past this trait.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Connect and create the marker table if it does not exist yet
    async fn initialize(&mut self, url: &str) -> MigrateResult<()>;

    /// Release the connection
    async fn close(&mut self) -> MigrateResult<()>;

    /// Highest applied version, `0` when nothing has been applied
    async fn current_version(&self) -> MigrateResult<u64>;

    /// Apply one migration atomically.
    ///
    /// The marker is written (inserted for up, deleted for down) before the
    /// script body runs, both inside the same transaction. Any failure rolls
    /// the whole transaction back and surfaces as [`MigrateError::Execution`]
    /// or, if the rollback itself failed, [`MigrateError::Rollback`].
    async fn apply(&mut self, migration: &Migration) -> MigrateResult<()>;

    /// Script file extension this backend consumes
    fn filename_extension(&self) -> &'static str;
}
