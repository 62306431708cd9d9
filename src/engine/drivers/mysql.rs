//! MySQL Driver
//!
//! Implements the DataEngine trait for MySQL/MariaDB databases using SQLx.
//!
//! A MySQL handle can address every schema on the server, so builders
//! qualify tables as `` `db`.`table` `` whenever a database name is given.
//! Introspection falls back to the handle's current database (`DATABASE()`)
//! when the name is empty.

use std::time::Instant;

use async_trait::async_trait;
use futures::TryStreamExt;
use rust_decimal::Decimal;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Row, TypeInfo};
use tracing::debug;

use crate::engine::drivers::{
    returns_rows, statement_error, IndexCollector, ACQUIRE_TIMEOUT, MAX_CONNECTIONS,
};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::handle::ConnectionHandle;
use crate::engine::sql::{quote_literal, quote_with, Placeholder};
use crate::engine::traits::DataEngine;
use crate::engine::types::{
    is_nullable_flag, ColumnInfo, ConnectionConfig, IndexInfo, QueryResult, ResultColumn,
    Row as QRow, TableAlteration, TableInfo, Value,
};

/// MySQL driver implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlDriver;

impl MySqlDriver {
    pub fn new() -> Self {
        Self
    }

    fn pool(handle: &ConnectionHandle) -> EngineResult<&MySqlPool> {
        match handle {
            ConnectionHandle::MySql(pool) => Ok(pool),
            other => Err(EngineError::handle_mismatch("mysql", other.driver_id())),
        }
    }

    fn build_connect_options(config: &ConnectionConfig) -> MySqlConnectOptions {
        let mut opts = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .ssl_mode(if config.ssl {
                MySqlSslMode::Required
            } else {
                MySqlSslMode::Disabled
            });

        if let Some(db) = config.database_name() {
            opts = opts.database(db);
        }

        opts
    }

    fn connect_error(err: sqlx::Error) -> EngineError {
        let msg = err.to_string();
        if msg.contains("Access denied") {
            EngineError::auth_failed(msg)
        } else {
            EngineError::connection_failed(format!("failed to ping mysql: {}", msg))
        }
    }

    /// Helper to bind a Value to a MySQL query
    fn bind_param<'q>(
        query: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
        value: &'q Value,
    ) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(b),
            Value::Int(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s),
            Value::Bytes(b) => query.bind(b),
            Value::Json(j) => query.bind(j),
            Value::Array(items) => query.bind(Value::array_json(items)),
        }
    }

    fn convert_row(mysql_row: &MySqlRow) -> QRow {
        let values = mysql_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(mysql_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Extracts a value from a MySqlRow at the given index
    fn extract_value(row: &MySqlRow, idx: usize) -> Value {
        // u64 first for BIGINT UNSIGNED columns
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u16>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u8>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
            return v.map(|d| Value::Text(d.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return v
                .map(|t| Value::Text(t.format("%H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }

        Value::Null
    }

    fn result_columns(row: &MySqlRow) -> Vec<ResultColumn> {
        row.columns()
            .iter()
            .map(|col| ResultColumn {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
            })
            .collect()
    }

    /// `NULL` or `NOT NULL` suffix of a column definition
    fn nullability(column: &ColumnInfo) -> &'static str {
        if column.nullable {
            "NULL"
        } else {
            "NOT NULL"
        }
    }
}

#[async_trait]
impl DataEngine for MySqlDriver {
    fn driver_id(&self) -> &'static str {
        "mysql"
    }

    fn driver_name(&self) -> &'static str {
        "MySQL / MariaDB"
    }

    async fn connect(&self, config: &ConnectionConfig) -> EngineResult<ConnectionHandle> {
        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(Self::build_connect_options(config));

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(Self::connect_error(e));
        }

        debug!(host = %config.host, port = config.port, "mysql handle opened");
        Ok(ConnectionHandle::MySql(pool))
    }

    async fn get_databases(&self, handle: &ConnectionHandle) -> EngineResult<Vec<String>> {
        let pool = Self::pool(handle)?;

        // Cast to CHAR to avoid BINARY type mismatch with Rust String
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT CAST(SCHEMA_NAME AS CHAR)
            FROM information_schema.SCHEMATA
            WHERE SCHEMA_NAME NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys')
            ORDER BY SCHEMA_NAME
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(|e| EngineError::query_failed("get_databases", e.to_string()))?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn get_tables(
        &self,
        handle: &ConnectionHandle,
        database: &str,
    ) -> EngineResult<Vec<TableInfo>> {
        let pool = Self::pool(handle)?;

        let rows: Vec<(String, String, i64, i64, String)> = sqlx::query_as(
            r#"
            SELECT
                CAST(TABLE_NAME AS CHAR),
                CAST(IFNULL(ENGINE, '') AS CHAR),
                CAST(IFNULL(TABLE_ROWS, 0) AS SIGNED),
                CAST(IFNULL(DATA_LENGTH, 0) AS SIGNED),
                CAST(IFNULL(DATE_FORMAT(CREATE_TIME, '%Y-%m-%d %H:%i:%s'), '') AS CHAR)
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = COALESCE(NULLIF(?, ''), DATABASE())
              AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
            "#,
        )
        .bind(database)
        .fetch_all(pool)
        .await
        .map_err(|e| EngineError::query_failed("get_tables", e.to_string()))?;

        let tables = rows
            .into_iter()
            .map(|(name, engine, row_count, data_size, create_time)| TableInfo {
                name,
                engine,
                row_count,
                data_size,
                create_time,
            })
            .collect();

        Ok(tables)
    }

    async fn get_columns(
        &self,
        handle: &ConnectionHandle,
        database: &str,
        table: &str,
    ) -> EngineResult<Vec<ColumnInfo>> {
        let pool = Self::pool(handle)?;

        let rows: Vec<(String, String, String, String, Option<String>, String)> = sqlx::query_as(
            r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR),
                CAST(COLUMN_TYPE AS CHAR),
                CAST(IS_NULLABLE AS CHAR),
                CAST(COLUMN_KEY AS CHAR),
                CAST(COLUMN_DEFAULT AS CHAR),
                CAST(EXTRA AS CHAR)
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = COALESCE(NULLIF(?, ''), DATABASE()) AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(database)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| EngineError::query_failed("get_columns", e.to_string()))?;

        let columns = rows
            .into_iter()
            .map(|(name, data_type, is_nullable, key, default_value, extra)| ColumnInfo {
                name,
                data_type,
                nullable: is_nullable_flag(&is_nullable),
                key,
                default_value: default_value.unwrap_or_default(),
                extra,
            })
            .collect();

        Ok(columns)
    }

    async fn get_indexes(
        &self,
        handle: &ConnectionHandle,
        database: &str,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>> {
        let pool = Self::pool(handle)?;

        let mut rows = sqlx::query_as::<_, (String, Option<String>, i64)>(
            r#"
            SELECT
                CAST(INDEX_NAME AS CHAR),
                CAST(COLUMN_NAME AS CHAR),
                CAST(NON_UNIQUE AS SIGNED)
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = COALESCE(NULLIF(?, ''), DATABASE()) AND TABLE_NAME = ?
            ORDER BY INDEX_NAME, SEQ_IN_INDEX
            "#,
        )
        .bind(database)
        .bind(table)
        .fetch(pool);

        let mut collector = IndexCollector::default();
        while let Some((index, column, non_unique)) = rows
            .try_next()
            .await
            .map_err(|e| EngineError::query_failed("get_indexes", e.to_string()))?
        {
            collector.push(index, column, non_unique == 0);
        }

        Ok(collector.finish())
    }

    async fn execute(
        &self,
        handle: &ConnectionHandle,
        sql: &str,
        params: &[Value],
    ) -> EngineResult<QueryResult> {
        let pool = Self::pool(handle)?;
        let start = Instant::now();

        let mut query = sqlx::query(sql);
        for value in params {
            query = Self::bind_param(query, value);
        }

        if returns_rows(sql) {
            let mysql_rows: Vec<MySqlRow> = query
                .fetch_all(pool)
                .await
                .map_err(|e| statement_error(e, "syntax"))?;

            let columns = mysql_rows
                .first()
                .map(Self::result_columns)
                .unwrap_or_default();
            let rows = mysql_rows.iter().map(Self::convert_row).collect();

            Ok(QueryResult {
                columns,
                rows,
                affected_rows: None,
                execution_time_ms: start.elapsed().as_micros() as f64 / 1000.0,
            })
        } else {
            let result = query
                .execute(pool)
                .await
                .map_err(|e| statement_error(e, "syntax"))?;

            Ok(QueryResult::with_affected_rows(
                result.rows_affected(),
                start.elapsed().as_micros() as f64 / 1000.0,
            ))
        }
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_with(name, '`')
    }

    fn placeholder_style(&self) -> Placeholder {
        Placeholder::Positional
    }

    fn table_ref(&self, database: &str, table: &str) -> String {
        if database.is_empty() {
            self.quote_identifier(table)
        } else {
            format!(
                "{}.{}",
                self.quote_identifier(database),
                self.quote_identifier(table)
            )
        }
    }

    /// MySQL redefines a column as a whole in `MODIFY COLUMN`, so the type
    /// and nullability changes of one modification share a statement.
    fn build_alter_table_query(
        &self,
        database: &str,
        table: &str,
        alteration: &TableAlteration,
    ) -> EngineResult<Vec<String>> {
        let mut statements = Vec::new();
        let mut table_ref = self.table_ref(database, table);

        if let Some(new_name) = alteration.rename_target(table) {
            let renamed = self.table_ref(database, new_name);
            statements.push(format!("ALTER TABLE {} RENAME TO {}", table_ref, renamed));
            table_ref = renamed;
        }

        for column in &alteration.drop_columns {
            statements.push(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                table_ref,
                self.quote_identifier(column)
            ));
        }

        for column in &alteration.add_columns {
            let default_str = if column.default_value.is_empty() {
                String::new()
            } else {
                format!(" DEFAULT {}", quote_literal(&column.default_value))
            };
            statements.push(format!(
                "ALTER TABLE {} ADD COLUMN {} {} {}{}",
                table_ref,
                self.quote_identifier(&column.name),
                column.data_type,
                Self::nullability(column),
                default_str
            ));
        }

        for modification in &alteration.modify_columns {
            let column = &modification.column;
            let quoted_column = self.quote_identifier(&column.name);

            if let Some(old_name) = modification.renamed_from() {
                statements.push(format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    table_ref,
                    self.quote_identifier(old_name),
                    quoted_column
                ));
            }

            statements.push(format!(
                "ALTER TABLE {} MODIFY COLUMN {} {} {}",
                table_ref,
                quoted_column,
                column.data_type,
                Self::nullability(column)
            ));

            if column.default_value.is_empty() {
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                    table_ref, quoted_column
                ));
            } else {
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    table_ref,
                    quoted_column,
                    quote_literal(&column.default_value)
                ));
            }
        }

        Ok(statements)
    }
}
