//! Where migration records come from

use async_trait::async_trait;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::{Direction, MigrateError, MigrateResult, Migration, MigrationSet};

/// Produces the full migration collection for one operation
#[async_trait]
pub trait MigrationSource: Send + Sync {
    /// Load every migration whose script uses `extension`
    async fn load(&self, extension: &str) -> MigrateResult<MigrationSet>;
}

/// An in-memory set is its own source
#[async_trait]
impl MigrationSource for MigrationSet {
    async fn load(&self, _extension: &str) -> MigrateResult<MigrationSet> {
        Ok(self.clone())
    }
}

/// Loads `<version>_<name>.<up|down>.<extension>` files from one directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    path: PathBuf,
}

impl DirectorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_pattern(extension: &str) -> MigrateResult<Regex> {
        Regex::new(&format!(
            r"^(\d+)_(.*)\.(up|down)\.{}$",
            regex::escape(extension)
        ))
        .map_err(|e| MigrateError::Source(format!("Invalid file pattern: {}", e)))
    }

    fn read_migrations(&self, extension: &str) -> MigrateResult<Vec<Migration>> {
        let pattern = Self::file_pattern(extension)?;
        let entries = fs::read_dir(&self.path).map_err(|e| {
            MigrateError::Source(format!(
                "Failed to read migrations directory {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let mut migrations = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                MigrateError::Source(format!("Failed to read directory entry: {}", e))
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                warn!("Skipping non UTF-8 file name in {}", self.path.display());
                continue;
            };
            let Some(captures) = pattern.captures(file_name) else {
                debug!("Ignoring {}", file_name);
                continue;
            };

            let version: u64 = captures[1].parse().map_err(|e| {
                MigrateError::Source(format!("Invalid version in {}: {}", file_name, e))
            })?;
            let direction: Direction = captures[3].parse()?;
            let content = fs::read(&path).map_err(|e| {
                MigrateError::Source(format!("Failed to read {}: {}", path.display(), e))
            })?;

            migrations.push(
                Migration::new(version, &captures[2], direction, content)
                    .with_origin(path.display().to_string()),
            );
        }

        Ok(migrations)
    }
}

#[async_trait]
impl MigrationSource for DirectorySource {
    async fn load(&self, extension: &str) -> MigrateResult<MigrationSet> {
        let migrations = self.read_migrations(extension)?;
        debug!(
            "Loaded {} migration file(s) from {}",
            migrations.len(),
            self.path.display()
        );
        MigrationSet::new(migrations)
    }
}
