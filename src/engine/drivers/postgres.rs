//! PostgreSQL Driver
//!
//! Implements the DataEngine trait for PostgreSQL databases using SQLx.
//!
//! ## Scope
//!
//! A PostgreSQL handle is bound to one database, so the `database` argument
//! of the introspection and builder calls is informational. Tables are read
//! from the `public` schema and referenced unqualified.

use std::time::Instant;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode, Postgres};
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
    Row as QRow, TableAlteration, TableInfo, Value, PRIMARY_KEY_ROLE,
};

const DEFAULT_SCHEMA: &str = "public";

/// PostgreSQL driver implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }

    fn pool(handle: &ConnectionHandle) -> EngineResult<&PgPool> {
        match handle {
            ConnectionHandle::Postgres(pool) => Ok(pool),
            other => Err(EngineError::handle_mismatch("postgres", other.driver_id())),
        }
    }

    /// Builds connect options from config
    fn build_connect_options(config: &ConnectionConfig) -> PgConnectOptions {
        let ssl_mode = if config.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Disable
        };

        PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(config.database_name().unwrap_or("postgres"))
            .ssl_mode(ssl_mode)
    }

    fn connect_error(err: sqlx::Error) -> EngineError {
        let msg = err.to_string();
        if msg.contains("password authentication failed") {
            EngineError::auth_failed(msg)
        } else {
            EngineError::connection_failed(format!("failed to ping postgres: {}", msg))
        }
    }

    /// Helper to bind a Value to a Postgres query
    fn bind_param<'q>(
        query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        value: &'q Value,
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
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

    /// Converts a SQLx row to our universal Row type
    fn convert_row(pg_row: &PgRow) -> QRow {
        let values = pg_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(pg_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Extracts a value from a PgRow at the given index
    fn extract_value(row: &PgRow, idx: usize) -> Value {
        // Integers before bool so int columns are not read as flags
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
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
        if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(idx) {
            return v.map(|d| Value::Text(d.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }

        Value::Null
    }

    fn result_columns(row: &PgRow) -> Vec<ResultColumn> {
        row.columns()
            .iter()
            .map(|col| ResultColumn {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
            })
            .collect()
    }
}

#[async_trait]
impl DataEngine for PostgresDriver {
    fn driver_id(&self) -> &'static str {
        "postgres"
    }

    fn driver_name(&self) -> &'static str {
        "PostgreSQL"
    }

    async fn connect(&self, config: &ConnectionConfig) -> EngineResult<ConnectionHandle> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(Self::build_connect_options(config));

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(Self::connect_error(e));
        }

        debug!(host = %config.host, port = config.port, "postgres handle opened");
        Ok(ConnectionHandle::Postgres(pool))
    }

    async fn get_databases(&self, handle: &ConnectionHandle) -> EngineResult<Vec<String>> {
        let pool = Self::pool(handle)?;

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT datname::text
            FROM pg_database
            WHERE datistemplate = false
            ORDER BY datname
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
        _database: &str,
    ) -> EngineResult<Vec<TableInfo>> {
        let pool = Self::pool(handle)?;

        // reltuples is -1 for tables that were never analyzed
        let rows: Vec<(String, String, i64, i64, String)> = sqlx::query_as(
            r#"
            SELECT
                c.relname::text,
                COALESCE(am.amname::text, ''),
                GREATEST(c.reltuples, 0)::bigint,
                pg_total_relation_size(c.oid)::bigint,
                ''::text
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_am am ON am.oid = c.relam
            WHERE n.nspname = $1 AND c.relkind IN ('r', 'p')
            ORDER BY c.relname
            "#,
        )
        .bind(DEFAULT_SCHEMA)
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
        _database: &str,
        table: &str,
    ) -> EngineResult<Vec<ColumnInfo>> {
        let pool = Self::pool(handle)?;

        let column_rows: Vec<(String, String, String, Option<String>, String)> = sqlx::query_as(
            r#"
            SELECT
                column_name::text,
                data_type::text,
                is_nullable::text,
                column_default::text,
                is_identity::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(DEFAULT_SCHEMA)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| EngineError::query_failed("get_columns", e.to_string()))?;

        let pk_rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            JOIN pg_class c ON c.oid = i.indrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE i.indisprimary
              AND n.nspname = $1
              AND c.relname = $2
            "#,
        )
        .bind(DEFAULT_SCHEMA)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| EngineError::query_failed("get_columns", e.to_string()))?;

        let pk_columns: Vec<String> = pk_rows.into_iter().map(|(name,)| name).collect();

        let columns = column_rows
            .into_iter()
            .map(|(name, data_type, is_nullable, default_value, is_identity)| {
                let key = if pk_columns.contains(&name) {
                    PRIMARY_KEY_ROLE.to_string()
                } else {
                    String::new()
                };
                let extra = if is_identity == "YES" {
                    "identity".to_string()
                } else {
                    String::new()
                };
                ColumnInfo {
                    name,
                    data_type,
                    nullable: is_nullable_flag(&is_nullable),
                    key,
                    default_value: default_value.unwrap_or_default(),
                    extra,
                }
            })
            .collect();

        Ok(columns)
    }

    async fn get_indexes(
        &self,
        handle: &ConnectionHandle,
        _database: &str,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>> {
        let pool = Self::pool(handle)?;

        let mut rows = sqlx::query_as::<_, (String, String, bool)>(
            r#"
            SELECT i.relname::text, a.attname::text, ix.indisunique
            FROM pg_index ix
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
            WHERE n.nspname = $1 AND t.relname = $2
            ORDER BY i.relname, array_position(ix.indkey, a.attnum)
            "#,
        )
        .bind(DEFAULT_SCHEMA)
        .bind(table)
        .fetch(pool);

        let mut collector = IndexCollector::default();
        while let Some((index, column, unique)) = rows
            .try_next()
            .await
            .map_err(|e| EngineError::query_failed("get_indexes", e.to_string()))?
        {
            collector.push(index, Some(column), unique);
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
            let pg_rows: Vec<PgRow> = query
                .fetch_all(pool)
                .await
                .map_err(|e| statement_error(e, "syntax error"))?;

            let columns = pg_rows
                .first()
                .map(Self::result_columns)
                .unwrap_or_default();
            let rows = pg_rows.iter().map(Self::convert_row).collect();

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
                .map_err(|e| statement_error(e, "syntax error"))?;

            Ok(QueryResult::with_affected_rows(
                result.rows_affected(),
                start.elapsed().as_micros() as f64 / 1000.0,
            ))
        }
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_with(name, '"')
    }

    fn placeholder_style(&self) -> Placeholder {
        Placeholder::Numbered
    }

    fn build_alter_table_query(
        &self,
        _database: &str,
        table: &str,
        alteration: &TableAlteration,
    ) -> EngineResult<Vec<String>> {
        let mut statements = Vec::new();
        let mut quoted_table = self.quote_identifier(table);

        if let Some(new_name) = alteration.rename_target(table) {
            let renamed = self.quote_identifier(new_name);
            statements.push(format!("ALTER TABLE {} RENAME TO {}", quoted_table, renamed));
            quoted_table = renamed;
        }

        for column in &alteration.drop_columns {
            statements.push(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quoted_table,
                self.quote_identifier(column)
            ));
        }

        for column in &alteration.add_columns {
            let null_str = if column.nullable { "NULL" } else { "NOT NULL" };
            let default_str = if column.default_value.is_empty() {
                String::new()
            } else {
                format!(" DEFAULT {}", quote_literal(&column.default_value))
            };
            statements.push(format!(
                "ALTER TABLE {} ADD COLUMN {} {} {}{}",
                quoted_table,
                self.quote_identifier(&column.name),
                column.data_type,
                null_str,
                default_str
            ));
        }

        for modification in &alteration.modify_columns {
            let column = &modification.column;
            let quoted_column = self.quote_identifier(&column.name);

            if let Some(old_name) = modification.renamed_from() {
                statements.push(format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    quoted_table,
                    self.quote_identifier(old_name),
                    quoted_column
                ));
            }

            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                quoted_table, quoted_column, column.data_type, quoted_column, column.data_type
            ));

            if column.nullable {
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                    quoted_table, quoted_column
                ));
            } else {
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                    quoted_table, quoted_column
                ));
            }

            if column.default_value.is_empty() {
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                    quoted_table, quoted_column
                ));
            } else {
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    quoted_table,
                    quoted_column,
                    quote_literal(&column.default_value)
                ));
            }
        }

        Ok(statements)
    }
}
