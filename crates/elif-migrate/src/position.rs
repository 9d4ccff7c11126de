//! Positioned backend errors and their decoding into readable diagnostics

use serde::{Deserialize, Serialize};

/// Backend-neutral view of a failed statement.
///
/// Each backend maps its native error into this shape, so decoding never
/// has to know which database produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionedError {
    /// Severity or class, e.g. `ERROR`
    pub severity: String,
    /// Backend-specific code, e.g. a SQLSTATE
    pub code: String,
    /// Primary message text
    pub message: String,
    /// 1-based character position inside the script, if reported
    pub position: Option<i64>,
}

impl PositionedError {
    pub fn new(
        severity: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: severity.into(),
            code: code.into(),
            message: message.into(),
            position: None,
        }
    }

    pub fn at(mut self, position: i64) -> Self {
        self.position = Some(position);
        self
    }
}

/// How many script lines to show around a failing line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub before: usize,
    pub after: usize,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            before: 5,
            after: 5,
        }
    }
}

impl ErrorContext {
    /// Render `error` against the script it came from.
    ///
    /// With a usable position the message names the line and column and
    /// quotes the surrounding lines; otherwise it is just
    /// `severity code: message`.
    pub fn decode(&self, error: &PositionedError, script: &str) -> String {
        let located = error
            .position
            .and_then(|position| usize::try_from(position).ok())
            .and_then(|position| position.checked_sub(1))
            .and_then(|offset| line_column_from_offset(script, offset));

        match located {
            Some((line, column)) => format!(
                "{} {}: {} in line {}, column {}:\n\n{}",
                error.severity,
                error.code,
                error.message,
                line,
                column,
                lines_around(script, line, self.before, self.after)
            ),
            None => format!("{} {}: {}", error.severity, error.code, error.message),
        }
    }
}

/// Convert a 0-based character offset into a 1-based `(line, column)`.
///
/// An offset equal to the text length points just past the last character
/// (errors "at end of input"); anything beyond that returns `None`.
pub fn line_column_from_offset(text: &str, offset: usize) -> Option<(usize, usize)> {
    let mut line = 1;
    let mut column = 1;
    let mut length = 0;

    for (index, ch) in text.chars().enumerate() {
        if index == offset {
            return Some((line, column));
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
        length = index + 1;
    }

    (offset == length).then_some((line, column))
}

/// Lines `line - before ..= line + after` of `text`, each prefixed with its
/// right-aligned 1-based number.
pub fn lines_around(text: &str, line: usize, before: usize, after: usize) -> String {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    if lines.is_empty() || line == 0 {
        return String::new();
    }

    let first = line.saturating_sub(before).max(1);
    let last = line.saturating_add(after).min(lines.len());
    if first > last {
        return String::new();
    }
    let width = last.to_string().len();

    lines[first - 1..last]
        .iter()
        .zip(first..)
        .map(|(content, number)| format!("{:>width$}: {}", number, content, width = width))
        .collect()
}
