//! DataEngine trait definition
//!
//! This is the core abstraction that all database drivers implement. A
//! driver is stateless: it opens a [`ConnectionHandle`] in `connect`, hands it
//! to the caller, and receives it back on every call. It never stores it.
//!
//! ## Trust boundary
//!
//! Every table and column name interpolated into generated SQL goes through
//! [`DataEngine::quote_identifier`]. Raw filter fragments (`filters` in
//! [`DataEngine::build_count_query`] and [`TableDataRequest::filters`]) and
//! declared column types are caller-supplied SQL and pass through verbatim.
//! An admin tool needs arbitrary predicates there; escaping them would break
//! legitimate expressions.

use async_trait::async_trait;

use crate::engine::error::EngineResult;
use crate::engine::handle::ConnectionHandle;
use crate::engine::sql::{
    order_column, order_direction, page_window, where_clause, Placeholder, DISTINCT_VALUES_LIMIT,
};
use crate::engine::types::{
    ColumnInfo, ConnectionConfig, IndexInfo, QueryResult, TableAlteration, TableDataRequest,
    TableInfo, Value,
};

/// Core trait that all database drivers must implement
///
/// Builders that only assemble strings are infallible, with the exception of
/// `build_alter_table_query`. Functions touching the handle fail with a
/// connection or query error and never panic on well-formed input.
#[async_trait]
pub trait DataEngine: Send + Sync {
    /// Returns the unique identifier for this driver (e.g., "postgres", "mysql", "sqlite")
    fn driver_id(&self) -> &'static str;

    /// Returns a human-readable name for this driver
    fn driver_name(&self) -> &'static str;

    /// Opens a handle and probes it. A handle whose probe fails is closed
    /// before the error is returned.
    async fn connect(&self, config: &ConnectionConfig) -> EngineResult<ConnectionHandle>;

    /// Lists user databases (templates and system schemas excluded)
    async fn get_databases(&self, handle: &ConnectionHandle) -> EngineResult<Vec<String>>;

    /// Lists user tables of `database`
    async fn get_tables(
        &self,
        handle: &ConnectionHandle,
        database: &str,
    ) -> EngineResult<Vec<TableInfo>>;

    /// Lists the columns of a table in ordinal order
    async fn get_columns(
        &self,
        handle: &ConnectionHandle,
        database: &str,
        table: &str,
    ) -> EngineResult<Vec<ColumnInfo>>;

    /// Lists the indexes of a table. An empty list is a valid answer.
    async fn get_indexes(
        &self,
        handle: &ConnectionHandle,
        database: &str,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>>;

    /// Runs one statement with positional parameters bound in order
    async fn execute(
        &self,
        handle: &ConnectionHandle,
        sql: &str,
        params: &[Value],
    ) -> EngineResult<QueryResult>;

    /// Wraps `name` in the engine's identifier quotes
    fn quote_identifier(&self, name: &str) -> String;

    /// Placeholder syntax of the engine
    fn placeholder_style(&self) -> Placeholder;

    /// Quoted reference to `table`, qualified by `database` where the engine
    /// addresses tables across databases
    fn table_ref(&self, database: &str, table: &str) -> String {
        let _ = database;
        self.quote_identifier(table)
    }

    /// Paged, ordered `SELECT *` for a table browsing request.
    ///
    /// Orders by the request's column or else `primary_key`, `DESC` only when
    /// asked for. The request's raw filter is not part of this statement; the
    /// caller incorporates it.
    fn build_table_data_query(&self, request: &TableDataRequest, primary_key: &str) -> String {
        let (limit, offset) = page_window(request.page, request.page_size);
        let mut query = format!("SELECT * FROM {}", self.quote_identifier(&request.table));
        if let Some(column) = order_column(&request.order_by, primary_key) {
            query.push_str(&format!(
                " ORDER BY {} {}",
                self.quote_identifier(column),
                order_direction(&request.order_dir)
            ));
        }
        query.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
        query
    }

    /// Ordered DDL statements for an alteration
    fn build_alter_table_query(
        &self,
        database: &str,
        table: &str,
        alteration: &TableAlteration,
    ) -> EngineResult<Vec<String>>;

    fn build_count_query(&self, database: &str, table: &str, filters: &str) -> String {
        format!(
            "SELECT COUNT(*) FROM {}{}",
            self.table_ref(database, table),
            where_clause(filters)
        )
    }

    fn build_truncate_table_query(&self, database: &str, table: &str) -> String {
        format!("TRUNCATE TABLE {}", self.table_ref(database, table))
    }

    fn build_drop_table_query(&self, database: &str, table: &str) -> String {
        format!("DROP TABLE {}", self.table_ref(database, table))
    }

    fn build_insert_query(&self, database: &str, table: &str, columns: &[String]) -> String {
        let quoted = columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table_ref(database, table),
            quoted,
            self.placeholder_style().list(1, columns.len())
        )
    }

    /// `UPDATE .. SET` with one placeholder per column, then the primary key
    /// placeholder at position `columns.len() + 1`
    fn build_update_query(
        &self,
        database: &str,
        table: &str,
        primary_key: &str,
        columns: &[String],
    ) -> String {
        let style = self.placeholder_style();
        let set_clauses = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", self.quote_identifier(c), style.render(i + 1)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.table_ref(database, table),
            set_clauses,
            self.quote_identifier(primary_key),
            style.render(columns.len() + 1)
        )
    }

    fn build_delete_query(&self, database: &str, table: &str, primary_key: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {}",
            self.table_ref(database, table),
            self.quote_identifier(primary_key),
            self.placeholder_style().render(1)
        )
    }

    fn build_batch_delete_query(
        &self,
        database: &str,
        table: &str,
        primary_key: &str,
        count: usize,
    ) -> String {
        format!(
            "DELETE FROM {} WHERE {} IN ({})",
            self.table_ref(database, table),
            self.quote_identifier(primary_key),
            self.placeholder_style().list(1, count)
        )
    }

    /// Distinct values of one column, ordered, capped at 100 rows
    fn build_distinct_values_query(&self, database: &str, table: &str, column: &str) -> String {
        let quoted = self.quote_identifier(column);
        format!(
            "SELECT DISTINCT {} FROM {} ORDER BY {} LIMIT {}",
            quoted,
            self.table_ref(database, table),
            quoted,
            DISTINCT_VALUES_LIMIT
        )
    }
}
