//! Migrator configuration types and builders

use serde::{Deserialize, Serialize};
use service_builder::builder;
use std::env;
use std::fmt;
use std::str::FromStr;

use crate::{ErrorContext, MigrateError, MigrateResult};

/// Environment variable selecting the [`InterruptionMode`]
pub const ENV_INTERRUPTION_MODE: &str = "MIGRATE_INTERRUPTION_MODE";
/// Environment variable for lines of script shown before a failing line
pub const ENV_CONTEXT_BEFORE: &str = "MIGRATE_CONTEXT_BEFORE";
/// Environment variable for lines of script shown after a failing line
pub const ENV_CONTEXT_AFTER: &str = "MIGRATE_CONTEXT_AFTER";

/// How a stop signal affects a running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InterruptionMode {
    /// First signal lets the current script finish and stops before the next;
    /// a second signal stops immediately
    #[default]
    Graceful,
    /// First signal stops immediately
    NonGraceful,
}

impl fmt::Display for InterruptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptionMode::Graceful => write!(f, "graceful"),
            InterruptionMode::NonGraceful => write!(f, "non-graceful"),
        }
    }
}

impl FromStr for InterruptionMode {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "graceful" => Ok(InterruptionMode::Graceful),
            "non-graceful" | "nongraceful" | "immediate" => Ok(InterruptionMode::NonGraceful),
            _ => Err(MigrateError::Configuration(format!(
                "Invalid interruption mode '{}', expected graceful or non-graceful",
                s
            ))),
        }
    }
}

/// Configuration for a [`Migrator`](crate::Migrator) and the stores it creates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct MigratorConfig {
    /// Reaction to stop signals, read once per operation
    #[builder(default = "InterruptionMode::Graceful", getter)]
    pub interruption_mode: InterruptionMode,

    /// Script lines quoted before a failing line
    #[builder(default = "5", getter)]
    pub context_lines_before: usize,

    /// Script lines quoted after a failing line
    #[builder(default = "5", getter)]
    pub context_lines_after: usize,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            interruption_mode: InterruptionMode::Graceful,
            context_lines_before: 5,
            context_lines_after: 5,
        }
    }
}

impl MigratorConfig {
    /// Load overrides from `MIGRATE_*` environment variables
    pub fn from_env() -> MigrateResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load overrides through an arbitrary key lookup; unset keys keep defaults
    pub fn from_lookup<F>(lookup: F) -> MigrateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = lookup(ENV_INTERRUPTION_MODE) {
            config.interruption_mode = mode.parse()?;
        }
        if let Some(before) = lookup(ENV_CONTEXT_BEFORE) {
            config.context_lines_before = parse_lines(ENV_CONTEXT_BEFORE, &before)?;
        }
        if let Some(after) = lookup(ENV_CONTEXT_AFTER) {
            config.context_lines_after = parse_lines(ENV_CONTEXT_AFTER, &after)?;
        }

        Ok(config)
    }

    /// Context window handed to stores for error decoding
    pub fn error_context(&self) -> ErrorContext {
        ErrorContext {
            before: self.context_lines_before,
            after: self.context_lines_after,
        }
    }
}

fn parse_lines(key: &str, value: &str) -> MigrateResult<usize> {
    value.trim().parse().map_err(|_| {
        MigrateError::Configuration(format!(
            "{} must be a non-negative integer, got '{}'",
            key, value
        ))
    })
}

impl MigratorConfigBuilder {
    /// Configuration for unattended runs (CI, deploy hooks): stop at once on a signal
    pub fn unattended() -> Self {
        MigratorConfigBuilder::new().interruption_mode(InterruptionMode::NonGraceful)
    }
}
