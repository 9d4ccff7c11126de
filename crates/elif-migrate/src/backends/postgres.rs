//! PostgreSQL version store
//!
//! Uses sqlx as the underlying driver. Each migration runs in its own
//! transaction together with the `schema_migrations` marker update.

use async_trait::async_trait;
use sqlx::postgres::{PgDatabaseError, PgErrorPosition, PgPool, PgPoolOptions};
use sqlx::Executor as _;
use tracing::{debug, error, info};

use super::VERSION_TABLE;
use crate::{
    Direction, ErrorContext, MigrateError, MigrateResult, Migration, PositionedError, VersionStore,
};

/// PostgreSQL-backed [`VersionStore`]
#[derive(Debug, Default)]
pub struct PostgresStore {
    pool: Option<PgPool>,
    context: ErrorContext,
}

impl PostgresStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom context window when decoding script errors
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    fn pool(&self) -> MigrateResult<&PgPool> {
        self.pool.as_ref().ok_or_else(|| {
            MigrateError::Connection("PostgreSQL store is not connected".to_string())
        })
    }

    /// Decode a failed statement; positions only count when they point into the script
    fn describe(&self, err: &sqlx::Error, script: &str, in_script: bool) -> String {
        match positioned(err) {
            Some(mut error) => {
                if !in_script {
                    error.position = None;
                }
                self.context.decode(&error, script)
            }
            None => err.to_string(),
        }
    }
}

#[async_trait]
impl VersionStore for PostgresStore {
    async fn initialize(&mut self, url: &str) -> MigrateResult<()> {
        // One connection: migrations are strictly sequential
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(|e| {
                MigrateError::Connection(format!("Failed to connect to PostgreSQL: {}", e))
            })?;

        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (version BIGINT NOT NULL PRIMARY KEY)",
            VERSION_TABLE
        );
        sqlx::query(&create).execute(&pool).await.map_err(|e| {
            MigrateError::Connection(format!(
                "Failed to create {} table: {}",
                VERSION_TABLE, e
            ))
        })?;

        info!("Connected to PostgreSQL version store");
        self.pool = Some(pool);
        Ok(())
    }

    async fn close(&mut self) -> MigrateResult<()> {
        let pool = self.pool.take().ok_or_else(|| {
            MigrateError::Connection("PostgreSQL store is already closed".to_string())
        })?;
        pool.close().await;
        debug!("Closed PostgreSQL version store");
        Ok(())
    }

    async fn current_version(&self) -> MigrateResult<u64> {
        let query = format!(
            "SELECT version FROM {} ORDER BY version DESC LIMIT 1",
            VERSION_TABLE
        );
        let row: Option<(i64,)> = sqlx::query_as(&query)
            .fetch_optional(self.pool()?)
            .await
            .map_err(|e| MigrateError::Store(format!("Failed to read current version: {}", e)))?;

        match row {
            Some((version,)) => u64::try_from(version).map_err(|_| {
                MigrateError::Store(format!("Invalid version {} in {}", version, VERSION_TABLE))
            }),
            None => Ok(0),
        }
    }

    async fn apply(&mut self, migration: &Migration) -> MigrateResult<()> {
        let script = migration.script()?;
        let version = i64::try_from(migration.version).map_err(|_| {
            MigrateError::script_failed(
                migration,
                format!("Version {} does not fit a BIGINT", migration.version),
                None,
            )
        })?;

        let mut tx = self.pool()?.begin().await.map_err(|e| {
            MigrateError::Store(format!("Failed to begin transaction: {}", e))
        })?;

        let marker = match migration.direction {
            Direction::Up => format!("INSERT INTO {} (version) VALUES ($1)", VERSION_TABLE),
            Direction::Down => format!("DELETE FROM {} WHERE version = $1", VERSION_TABLE),
        };

        let failure = match sqlx::query(&marker).bind(version).execute(&mut *tx).await {
            // A position here points into the marker statement, not the script
            Err(e) => Some(self.describe(&e, script, false)),
            Ok(_) => match (&mut *tx).execute(script).await {
                Err(e) => Some(self.describe(&e, script, true)),
                Ok(_) => None,
            },
        };

        match failure {
            None => tx.commit().await.map_err(|e| {
                MigrateError::script_failed(
                    migration,
                    format!("Failed to commit transaction: {}", e),
                    None,
                )
            }),
            Some(message) => {
                let rollback = tx.rollback().await.err().map(|e| e.to_string());
                if let Some(rollback) = &rollback {
                    error!(
                        "Rollback of migration {} ({}) failed: {}",
                        migration.version, migration.direction, rollback
                    );
                }
                Err(MigrateError::script_failed(migration, message, rollback))
            }
        }
    }

    fn filename_extension(&self) -> &'static str {
        "sql"
    }
}

/// Map a PostgreSQL server error into the backend-neutral positioned shape
fn positioned(err: &sqlx::Error) -> Option<PositionedError> {
    let pg = err
        .as_database_error()?
        .try_downcast_ref::<PgDatabaseError>()?;

    let error = PositionedError::new(
        format!("{:?}", pg.severity()).to_uppercase(),
        pg.code(),
        pg.message(),
    );
    Some(match pg.position() {
        Some(PgErrorPosition::Original(position)) => error.at(position as i64),
        _ => error,
    })
}
