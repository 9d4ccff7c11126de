//! In-memory version store for development and testing
//!
//! Understands a deliberately tiny DDL dialect: `CREATE TABLE <name>` and
//! `DROP TABLE <name>`, separated by `;`, with `--` line comments. Failures
//! are reported the way PostgreSQL reports them (severity, SQLSTATE, message
//! and a 1-based character position) so error decoding behaves identically.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use super::VERSION_TABLE;
use crate::{
    Direction, ErrorContext, MigrateError, MigrateResult, Migration, PositionedError, VersionStore,
};

#[derive(Debug, Clone, Default)]
struct Schema {
    versions: BTreeSet<u64>,
    tables: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct MemoryDatabase {
    schema: Schema,
    journal: Vec<(u64, Direction)>,
    fail_next_rollback: bool,
}

/// In-memory store. Clones share the same database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    database: Arc<Mutex<MemoryDatabase>>,
    context: ErrorContext,
    latency: Option<Duration>,
    connected: bool,
}

impl MemoryStore {
    /// Create a store over a fresh, empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom context window when decoding script errors
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    /// Delay every `apply` before it touches the database
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the rollback of the next failed script fail too, leaving its
    /// partial effects in place
    pub fn fail_next_rollback(&self) {
        self.database.lock().fail_next_rollback = true;
    }

    /// Tables currently present
    pub fn tables(&self) -> Vec<String> {
        self.database.lock().schema.tables.iter().cloned().collect()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.database.lock().schema.tables.contains(&name.to_lowercase())
    }

    /// Versions currently recorded as applied, ascending
    pub fn applied_versions(&self) -> Vec<u64> {
        self.database.lock().schema.versions.iter().copied().collect()
    }

    /// Every successfully committed migration, in order
    pub fn journal(&self) -> Vec<(u64, Direction)> {
        self.database.lock().journal.clone()
    }

    fn ensure_connected(&self) -> MigrateResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(MigrateError::Store(
                "Memory store is not initialized".to_string(),
            ))
        }
    }
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn initialize(&mut self, url: &str) -> MigrateResult<()> {
        debug!("Opening in-memory version store for {}", url);
        self.connected = true;
        Ok(())
    }

    async fn close(&mut self) -> MigrateResult<()> {
        if !self.connected {
            return Err(MigrateError::Connection(
                "Memory store is already closed".to_string(),
            ));
        }
        self.connected = false;
        Ok(())
    }

    async fn current_version(&self) -> MigrateResult<u64> {
        self.ensure_connected()?;
        Ok(self
            .database
            .lock()
            .schema
            .versions
            .iter()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    async fn apply(&mut self, migration: &Migration) -> MigrateResult<()> {
        self.ensure_connected()?;
        let script = migration.script()?;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut database = self.database.lock();
        let snapshot = database.schema.clone();

        let result = record_marker(&mut database.schema, migration)
            .and_then(|_| execute_script(&mut database.schema.tables, script));

        match result {
            Ok(()) => {
                database.journal.push((migration.version, migration.direction));
                Ok(())
            }
            Err(failure) => {
                let message = self.context.decode(&failure, script);
                let rollback = if std::mem::take(&mut database.fail_next_rollback) {
                    error!(
                        "Rollback of migration {} ({}) failed",
                        migration.version, migration.direction
                    );
                    Some("simulated rollback failure".to_string())
                } else {
                    database.schema = snapshot;
                    None
                };
                Err(MigrateError::script_failed(migration, message, rollback))
            }
        }
    }

    fn filename_extension(&self) -> &'static str {
        "sql"
    }
}

fn record_marker(schema: &mut Schema, migration: &Migration) -> Result<(), PositionedError> {
    match migration.direction {
        Direction::Up => {
            if !schema.versions.insert(migration.version) {
                return Err(PositionedError::new(
                    "ERROR",
                    "23505",
                    format!(
                        "duplicate key value violates unique constraint \"{}_pkey\"",
                        VERSION_TABLE
                    ),
                ));
            }
        }
        Direction::Down => {
            schema.versions.remove(&migration.version);
        }
    }
    Ok(())
}

/// A word of the script and the 0-based character index it starts at
struct Token {
    start: usize,
    text: String,
}

fn execute_script(tables: &mut BTreeSet<String>, script: &str) -> Result<(), PositionedError> {
    let end_of_input = script.chars().count();

    for statement in tokenize(script) {
        let mut words = statement.iter();
        let Some(verb) = words.next() else {
            continue;
        };

        let create = match verb.text.to_uppercase().as_str() {
            "CREATE" => true,
            "DROP" => false,
            _ => return Err(syntax_error(Some(verb), end_of_input)),
        };

        match words.next() {
            Some(word) if word.text.eq_ignore_ascii_case("TABLE") => {}
            other => return Err(syntax_error(other, end_of_input)),
        }

        let name = match words.next() {
            Some(word) if is_identifier(&word.text) => word,
            other => return Err(syntax_error(other, end_of_input)),
        };

        if let Some(extra) = words.next() {
            return Err(syntax_error(Some(extra), end_of_input));
        }

        let table = name.text.to_lowercase();
        let position = (name.start + 1) as i64;
        if create {
            if !tables.insert(table.clone()) {
                return Err(PositionedError::new(
                    "ERROR",
                    "42P07",
                    format!("relation \"{}\" already exists", table),
                )
                .at(position));
            }
        } else if !tables.remove(&table) {
            return Err(PositionedError::new(
                "ERROR",
                "42P01",
                format!("table \"{}\" does not exist", table),
            )
            .at(position));
        }
    }

    Ok(())
}

/// Split a script into statements of words, dropping `--` comments
fn tokenize(script: &str) -> Vec<Vec<Token>> {
    let mut statements = vec![Vec::new()];
    let mut current: Option<Token> = None;
    let mut in_comment = false;
    let mut previous = '\0';

    for (index, ch) in script.chars().enumerate() {
        if in_comment {
            if ch == '\n' {
                in_comment = false;
            }
            previous = ch;
            continue;
        }

        if ch == '-' && previous == '-' {
            // Drop the first '-' already pushed into the current word
            if let Some(mut token) = current.take() {
                token.text.pop();
                if !token.text.is_empty() {
                    push_token(&mut statements, token);
                }
            }
            in_comment = true;
            previous = ch;
            continue;
        }

        if ch.is_whitespace() || ch == ';' {
            if let Some(token) = current.take() {
                push_token(&mut statements, token);
            }
            if ch == ';' {
                statements.push(Vec::new());
            }
        } else {
            current
                .get_or_insert_with(|| Token {
                    start: index,
                    text: String::new(),
                })
                .text
                .push(ch);
        }
        previous = ch;
    }

    if let Some(token) = current.take() {
        push_token(&mut statements, token);
    }

    statements.retain(|statement| !statement.is_empty());
    statements
}

fn push_token(statements: &mut [Vec<Token>], token: Token) {
    if let Some(statement) = statements.last_mut() {
        statement.push(token);
    }
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn syntax_error(near: Option<&Token>, end_of_input: usize) -> PositionedError {
    match near {
        Some(token) => PositionedError::new(
            "ERROR",
            "42601",
            format!("syntax error at or near \"{}\"", token.text),
        )
        .at((token.start + 1) as i64),
        None => PositionedError::new("ERROR", "42601", "syntax error at end of input")
            .at((end_of_input + 1) as i64),
    }
}
