//! Migration records and the sequencer
//!
//! A [`MigrationSet`] is the version-ordered collection produced by a
//! [`MigrationSource`](crate::MigrationSource). The sequencer methods on it
//! pick the exact, ordered subset of records to apply for a movement from the
//! current version.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::{MigrateError, MigrateResult};

/// Number of digits a version is padded to in file names (or a multiple of it)
pub const VERSION_PAD_WIDTH: usize = 4;

/// Migration direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the change
    Up,
    /// Revert the change
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

impl FromStr for Direction {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            _ => Err(MigrateError::Source(format!(
                "Invalid migration direction '{}', expected 'up' or 'down'",
                s
            ))),
        }
    }
}

/// One versioned, directional change script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Positive version number shared by an up/down pair
    pub version: u64,
    /// Human-readable name
    pub name: String,
    /// Whether this script applies or reverts the version
    pub direction: Direction,
    /// Raw script text
    pub content: Vec<u8>,
    /// Where the script came from (a file path for directory sources)
    pub origin: String,
}

impl Migration {
    /// Create a migration with an empty origin
    pub fn new(
        version: u64,
        name: impl Into<String>,
        direction: Direction,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            direction,
            content: content.into(),
            origin: String::new(),
        }
    }

    /// Set the origin identifier
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Script content as UTF-8 text
    pub fn script(&self) -> MigrateResult<&str> {
        std::str::from_utf8(&self.content).map_err(|e| {
            MigrateError::script_failed(
                self,
                format!("Migration script is not valid UTF-8: {}", e),
                None,
            )
        })
    }

    /// Canonical file name, e.g. `0001_create_users.up.sql`
    pub fn file_name(&self, extension: &str) -> String {
        format!(
            "{}_{}.{}.{}",
            format_version(self.version),
            self.name.replace(' ', "_"),
            self.direction,
            extension
        )
    }
}

/// Left-pad a version with zeros to a multiple of [`VERSION_PAD_WIDTH`] digits
pub fn format_version(version: u64) -> String {
    let digits = version.to_string();
    let remainder = digits.len() % VERSION_PAD_WIDTH;
    if remainder == 0 {
        digits
    } else {
        format!("{}{}", "0".repeat(VERSION_PAD_WIDTH - remainder), digits)
    }
}

/// Version-ordered collection of migrations
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Build a set, sorting by version.
    ///
    /// Rejects version `0` (reserved for "nothing applied") and more than one
    /// record for the same version and direction.
    pub fn new(mut migrations: Vec<Migration>) -> MigrateResult<Self> {
        let mut seen = HashSet::new();
        for migration in &migrations {
            if migration.version == 0 {
                return Err(MigrateError::Sequencing(format!(
                    "Migration '{}' has version 0; versions must be positive",
                    migration.name
                )));
            }
            if !seen.insert((migration.version, migration.direction)) {
                return Err(MigrateError::Sequencing(format!(
                    "Duplicate {} migration for version {}",
                    migration.direction, migration.version
                )));
            }
        }

        migrations.sort_by_key(|m| m.version);
        Ok(Self { migrations })
    }

    /// Number of records (up and down counted separately)
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Highest version in the set, `0` when empty
    pub fn latest_version(&self) -> u64 {
        self.migrations.last().map_or(0, |m| m.version)
    }

    /// Look up one record
    pub fn get(&self, version: u64, direction: Direction) -> Option<&Migration> {
        self.migrations
            .iter()
            .find(|m| m.version == version && m.direction == direction)
    }

    /// All records in ascending version order
    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    /// Every up migration above `current`, ascending
    pub fn to_latest(&self, current: u64) -> Vec<&Migration> {
        self.ups_after(current).collect()
    }

    /// Every down migration at or below `current`, most recent first
    pub fn to_zero(&self, current: u64) -> Vec<&Migration> {
        self.downs_from(current).collect()
    }

    /// The next `n` ups (`n > 0`) or the last `|n|` downs (`n < 0`).
    ///
    /// Asking for more than exists returns everything available.
    pub fn by_relative_count(&self, current: u64, n: i64) -> Vec<&Migration> {
        let count = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX);
        match n {
            0 => Vec::new(),
            n if n > 0 => self.ups_after(current).take(count).collect(),
            _ => self.downs_from(current).take(count).collect(),
        }
    }

    fn ups_after(&self, current: u64) -> impl Iterator<Item = &Migration> {
        self.migrations
            .iter()
            .filter(move |m| m.direction == Direction::Up && m.version > current)
    }

    fn downs_from(&self, current: u64) -> impl Iterator<Item = &Migration> {
        self.migrations
            .iter()
            .rev()
            .filter(move |m| m.direction == Direction::Down && m.version <= current)
    }
}

impl TryFrom<Vec<Migration>> for MigrationSet {
    type Error = MigrateError;

    fn try_from(migrations: Vec<Migration>) -> MigrateResult<Self> {
        Self::new(migrations)
    }
}
