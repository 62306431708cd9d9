//! Engine drivers

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::time::Duration;

use crate::engine::error::EngineError;
use crate::engine::types::IndexInfo;

/// Pool size of a session handle
pub(crate) const MAX_CONNECTIONS: u32 = 5;

pub(crate) const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// True when the statement produces a result set rather than a row count.
///
/// Leading comments are skipped; writes with a `RETURNING` clause count as
/// row-returning.
pub(crate) fn returns_rows(sql: &str) -> bool {
    let upper = skip_leading_comments(sql).to_ascii_uppercase();
    let leading = ["SELECT", "WITH", "SHOW", "EXPLAIN", "DESCRIBE", "PRAGMA", "VALUES"]
        .iter()
        .any(|keyword| upper.starts_with(keyword));

    leading
        || upper
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .any(|word| word == "RETURNING")
}

fn skip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--").or_else(|| rest.strip_prefix('#')) {
            rest = after.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            return rest;
        }
        rest = rest.trim_start();
    }
}

/// Maps a statement failure to a syntax or execution error
pub(crate) fn statement_error(err: sqlx::Error, syntax_marker: &str) -> EngineError {
    let msg = err.to_string();
    if msg.contains(syntax_marker) {
        EngineError::syntax_error(msg)
    } else {
        EngineError::execution_error(msg)
    }
}

/// Accumulates `(index, column, unique)` rows, ordered by index then by
/// position inside the index, into one entry per index
#[derive(Default)]
pub(crate) struct IndexCollector {
    indexes: Vec<IndexInfo>,
}

impl IndexCollector {
    pub(crate) fn push(&mut self, index: String, column: Option<String>, unique: bool) {
        let same_index = self
            .indexes
            .last()
            .map(|last| last.name == index)
            .unwrap_or(false);

        if !same_index {
            self.indexes.push(IndexInfo {
                name: index,
                columns: Vec::new(),
                unique,
            });
        }

        // Expression index parts have no column name
        if let (Some(column), Some(last)) = (column, self.indexes.last_mut()) {
            last.columns.push(column);
        }
    }

    pub(crate) fn finish(self) -> Vec<IndexInfo> {
        self.indexes
    }
}
