//! SQLite Driver
//!
//! Implements the DataEngine trait for SQLite files using SQLx.
//!
//! The database path comes from `ConnectionConfig::database`; `:memory:`
//! opens a private in-memory database held by a single pooled connection.
//! SQLite has no server-side databases, so the `database` argument of the
//! introspection and builder calls is ignored.

use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
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
    ColumnInfo, ConnectionConfig, IndexInfo, QueryResult, ResultColumn, Row as QRow,
    TableAlteration, TableInfo, Value, PRIMARY_KEY_ROLE,
};

const MEMORY_PATH: &str = ":memory:";

/// SQLite driver implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }

    fn pool(handle: &ConnectionHandle) -> EngineResult<&SqlitePool> {
        match handle {
            ConnectionHandle::Sqlite(pool) => Ok(pool),
            other => Err(EngineError::handle_mismatch("sqlite", other.driver_id())),
        }
    }

    fn build_connect_options(path: &str) -> EngineResult<SqliteConnectOptions> {
        if path == MEMORY_PATH {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| EngineError::connection_failed(e.to_string()))
        } else {
            Ok(SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true))
        }
    }

    fn pool_options(path: &str) -> SqlitePoolOptions {
        let options = SqlitePoolOptions::new().acquire_timeout(ACQUIRE_TIMEOUT);
        if path == MEMORY_PATH {
            // Every connection to :memory: is a separate database
            options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options.max_connections(MAX_CONNECTIONS)
        }
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        value: &'q Value,
    ) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
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

    fn convert_row(sqlite_row: &SqliteRow) -> QRow {
        let values = sqlite_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(sqlite_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// SQLite values carry one of four storage classes
    fn extract_value(row: &SqliteRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }

        Value::Null
    }

    fn result_columns(row: &SqliteRow) -> Vec<ResultColumn> {
        row.columns()
            .iter()
            .map(|col| ResultColumn {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
            })
            .collect()
    }

    /// Rejects alterations SQLite cannot express as plain `ALTER TABLE`
    fn check_alteration(table: &str, alteration: &TableAlteration) -> EngineResult<()> {
        if !alteration.modify_columns.is_empty() {
            return Err(EngineError::alteration_failed(
                table,
                "sqlite cannot modify existing column definitions",
            ));
        }

        if let Some(column) = alteration
            .add_columns
            .iter()
            .find(|c| !c.nullable && c.default_value.is_empty())
        {
            return Err(EngineError::alteration_failed(
                table,
                format!(
                    "sqlite cannot add NOT NULL column {} without a default value",
                    column.name
                ),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl DataEngine for SqliteDriver {
    fn driver_id(&self) -> &'static str {
        "sqlite"
    }

    fn driver_name(&self) -> &'static str {
        "SQLite"
    }

    async fn connect(&self, config: &ConnectionConfig) -> EngineResult<ConnectionHandle> {
        let path = config
            .database_name()
            .ok_or_else(|| EngineError::connection_failed("sqlite requires a database path"))?;

        let pool = Self::pool_options(path).connect_lazy_with(Self::build_connect_options(path)?);

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(EngineError::connection_failed(format!(
                "failed to open sqlite database {}: {}",
                path, e
            )));
        }

        debug!(path = %path, "sqlite handle opened");
        Ok(ConnectionHandle::Sqlite(pool))
    }

    async fn get_databases(&self, handle: &ConnectionHandle) -> EngineResult<Vec<String>> {
        let pool = Self::pool(handle)?;

        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_database_list ORDER BY seq")
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

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT name
            FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(|e| EngineError::query_failed("get_tables", e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(name,)| TableInfo {
                name,
                ..TableInfo::default()
            })
            .collect())
    }

    async fn get_columns(
        &self,
        handle: &ConnectionHandle,
        _database: &str,
        table: &str,
    ) -> EngineResult<Vec<ColumnInfo>> {
        let pool = Self::pool(handle)?;

        let rows: Vec<(String, String, i64, i64, Option<String>)> = sqlx::query_as(
            r#"
            SELECT name, type, "notnull", pk, dflt_value
            FROM pragma_table_info(?)
            ORDER BY cid
            "#,
        )
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| EngineError::query_failed("get_columns", e.to_string()))?;

        let columns = rows
            .into_iter()
            .map(|(name, data_type, not_null, pk, default_value)| ColumnInfo {
                name,
                data_type,
                nullable: not_null == 0,
                key: if pk > 0 {
                    PRIMARY_KEY_ROLE.to_string()
                } else {
                    String::new()
                },
                default_value: default_value.unwrap_or_default(),
                extra: String::new(),
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

        let mut rows = sqlx::query_as::<_, (String, Option<String>, i64)>(
            r#"
            SELECT il.name, ii.name, il."unique"
            FROM pragma_index_list(?) AS il, pragma_index_info(il.name) AS ii
            ORDER BY il.name, ii.seqno
            "#,
        )
        .bind(table)
        .fetch(pool);

        let mut collector = IndexCollector::default();
        while let Some((index, column, unique)) = rows
            .try_next()
            .await
            .map_err(|e| EngineError::query_failed("get_indexes", e.to_string()))?
        {
            collector.push(index, column, unique != 0);
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
            let sqlite_rows: Vec<SqliteRow> = query
                .fetch_all(pool)
                .await
                .map_err(|e| statement_error(e, "syntax error"))?;

            let columns = sqlite_rows
                .first()
                .map(Self::result_columns)
                .unwrap_or_default();
            let rows = sqlite_rows.iter().map(Self::convert_row).collect();

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
        Placeholder::Positional
    }

    /// SQLite has no TRUNCATE
    fn build_truncate_table_query(&self, database: &str, table: &str) -> String {
        format!("DELETE FROM {}", self.table_ref(database, table))
    }

    fn build_alter_table_query(
        &self,
        database: &str,
        table: &str,
        alteration: &TableAlteration,
    ) -> EngineResult<Vec<String>> {
        Self::check_alteration(table, alteration)?;

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
            let mut definition = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table_ref,
                self.quote_identifier(&column.name),
                column.data_type
            );
            if !column.nullable {
                definition.push_str(" NOT NULL");
            }
            if !column.default_value.is_empty() {
                definition.push_str(&format!(" DEFAULT {}", quote_literal(&column.default_value)));
            }
            statements.push(definition);
        }

        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{ColumnModification, TableDataRequest};

    fn memory_config() -> ConnectionConfig {
        ConnectionConfig {
            driver: "sqlite".to_string(),
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
            database: Some(MEMORY_PATH.to_string()),
            ssl: false,
            environment: String::new(),
            read_only: false,
        }
    }

    async fn seeded() -> (SqliteDriver, ConnectionHandle) {
        let driver = SqliteDriver::new();
        let handle = driver.connect(&memory_config()).await.unwrap();
        driver
            .execute(
                &handle,
                "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL, age INTEGER DEFAULT 18)",
                &[],
            )
            .await
            .unwrap();
        driver
            .execute(&handle, "CREATE UNIQUE INDEX idx_users_email ON users (email)", &[])
            .await
            .unwrap();
        (driver, handle)
    }

    #[tokio::test]
    async fn introspects_tables_columns_and_indexes() {
        let (driver, handle) = seeded().await;

        let databases = driver.get_databases(&handle).await.unwrap();
        assert_eq!(databases.first().map(String::as_str), Some("main"));

        let tables = driver.get_tables(&handle, "").await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "users");
        assert_eq!(tables[0].row_count, 0);

        let columns = driver.get_columns(&handle, "", "users").await.unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "email", "age"]);
        assert!(columns[0].is_primary_key());
        assert!(!columns[1].nullable);
        assert!(columns[2].nullable);
        assert_eq!(columns[2].default_value, "18");

        let indexes = driver.get_indexes(&handle, "", "users").await.unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "idx_users_email");
        assert_eq!(indexes[0].columns, vec!["email".to_string()]);
        assert!(indexes[0].unique);
    }

    #[tokio::test]
    async fn generated_statements_run_against_the_engine() {
        let (driver, handle) = seeded().await;
        let cols = vec!["email".to_string(), "age".to_string()];

        let insert = driver.build_insert_query("", "users", &cols);
        for (email, age) in [("a@x.io", 30), ("b@x.io", 41)] {
            let result = driver
                .execute(
                    &handle,
                    &insert,
                    &[Value::Text(email.to_string()), Value::Int(age)],
                )
                .await
                .unwrap();
            assert_eq!(result.affected_rows, Some(1));
        }

        let update = driver.build_update_query("", "users", "id", &cols);
        driver
            .execute(
                &handle,
                &update,
                &[Value::Text("c@x.io".to_string()), Value::Int(50), Value::Int(1)],
            )
            .await
            .unwrap();

        let mut request = TableDataRequest::new("users");
        request.order_dir = "desc".to_string();
        let page = driver
            .execute(&handle, &driver.build_table_data_query(&request, "id"), &[])
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.columns[1].name, "email");
        assert_eq!(page.rows[0].values[1], Value::Text("b@x.io".to_string()));
        assert_eq!(page.rows[1].values[2], Value::Int(50));

        let count = driver
            .execute(&handle, &driver.build_count_query("", "users", "age > 45"), &[])
            .await
            .unwrap();
        assert_eq!(count.rows[0].values[0], Value::Int(1));

        let batch = driver.build_batch_delete_query("", "users", "id", 2);
        let deleted = driver
            .execute(&handle, &batch, &[Value::Int(1), Value::Int(2)])
            .await
            .unwrap();
        assert_eq!(deleted.affected_rows, Some(2));
    }

    #[tokio::test]
    async fn truncate_deletes_all_rows() {
        let (driver, handle) = seeded().await;
        driver
            .execute(&handle, "INSERT INTO users (email) VALUES ('a'), ('b')", &[])
            .await
            .unwrap();

        let sql = driver.build_truncate_table_query("", "users");
        assert_eq!(sql, "DELETE FROM \"users\"");
        let result = driver.execute(&handle, &sql, &[]).await.unwrap();
        assert_eq!(result.affected_rows, Some(2));
    }

    #[tokio::test]
    async fn alteration_statements_apply_in_order() {
        let (driver, handle) = seeded().await;
        let alteration = TableAlteration {
            rename_to: Some("members".to_string()),
            add_columns: vec![ColumnInfo::new("nick", "TEXT")
                .not_null()
                .with_default("anon")],
            drop_columns: vec!["age".to_string()],
            modify_columns: Vec::new(),
        };

        let statements = driver
            .build_alter_table_query("", "users", &alteration)
            .unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"users\" RENAME TO \"members\"",
                "ALTER TABLE \"members\" DROP COLUMN \"age\"",
                "ALTER TABLE \"members\" ADD COLUMN \"nick\" TEXT NOT NULL DEFAULT 'anon'",
            ]
        );

        for sql in &statements {
            driver.execute(&handle, sql, &[]).await.unwrap();
        }
        let columns = driver.get_columns(&handle, "", "members").await.unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "email", "nick"]);
    }

    #[test]
    fn unsupported_alterations_are_rejected() {
        let driver = SqliteDriver::new();

        let modify = TableAlteration {
            modify_columns: vec![ColumnModification {
                column: ColumnInfo::new("age", "REAL"),
                old_name: None,
            }],
            ..TableAlteration::default()
        };
        let err = driver
            .build_alter_table_query("", "users", &modify)
            .unwrap_err();
        assert!(matches!(err, EngineError::AlterationFailed { .. }));

        let required = TableAlteration {
            add_columns: vec![ColumnInfo::new("code", "TEXT").not_null()],
            ..TableAlteration::default()
        };
        assert!(driver
            .build_alter_table_query("", "users", &required)
            .is_err());
    }

    #[tokio::test]
    async fn returning_and_commented_statements_yield_rows() {
        let (driver, handle) = seeded().await;

        let inserted = driver
            .execute(
                &handle,
                "INSERT INTO users (email) VALUES (?) RETURNING id",
                &[Value::Text("a@x.io".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(inserted.rows.len(), 1);
        assert_eq!(inserted.rows[0].values[0], Value::Int(1));

        let listed = driver
            .execute(&handle, "-- newest first\nSELECT email FROM users", &[])
            .await
            .unwrap();
        assert_eq!(listed.rows[0].values[0], Value::Text("a@x.io".to_string()));
    }

    #[tokio::test]
    async fn syntax_errors_are_classified() {
        let (driver, handle) = seeded().await;
        let err = driver
            .execute(&handle, "SELEC * FROM users", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SyntaxError { .. }));
    }

    #[tokio::test]
    async fn file_databases_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let mut config = memory_config();
        config.database = Some(path.to_string_lossy().into_owned());

        let driver = SqliteDriver::new();
        let handle = driver.connect(&config).await.unwrap();
        assert!(path.exists());

        handle.close().await;
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn missing_path_fails_to_connect() {
        let mut config = memory_config();
        config.database = None;

        let err = SqliteDriver::new().connect(&config).await.unwrap_err();
        assert!(err.is_connection_error());
    }
}
