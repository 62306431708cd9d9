//! Database service
//!
//! Session-level operations: each call resolves the driver and handle of a
//! session, builds the statement with the driver, enforces the read-only and
//! production policy, and runs it.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::config::EngineConfig;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::sql::{page_window, where_clause};
use crate::engine::sql_safety::{analyze_sql, SqlSafetyAnalysis};
use crate::engine::types::{
    ColumnInfo, IndexInfo, QueryResult, RowData, SessionId, TableAlteration, TableDataRequest,
    TableInfo, TablePage, Value,
};
use crate::engine::traits::DataEngine;
use crate::engine::SessionManager;

const READ_ONLY_BLOCKED: &str = "Operation blocked: read-only mode";
const DANGEROUS_BLOCKED: &str = "Dangerous query blocked: confirmation required";
const DANGEROUS_BLOCKED_POLICY: &str = "Dangerous query blocked by policy";
const SQL_PARSE_BLOCKED: &str = "Operation blocked: SQL parser could not classify the query";

const KEYED_WRITE: SqlSafetyAnalysis = SqlSafetyAnalysis {
    is_mutation: true,
    is_dangerous: false,
};
const DESTRUCTIVE: SqlSafetyAnalysis = SqlSafetyAnalysis {
    is_mutation: true,
    is_dangerous: true,
};

/// Policy-relevant flags of a session
#[derive(Debug, Clone, Copy)]
struct SessionFlags {
    read_only: bool,
    production: bool,
}

pub struct DatabaseService {
    sessions: Arc<SessionManager>,
    config: EngineConfig,
}

impl DatabaseService {
    pub fn new(sessions: Arc<SessionManager>, config: EngineConfig) -> Self {
        Self { sessions, config }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    async fn flags(&self, session: SessionId) -> EngineResult<SessionFlags> {
        Ok(SessionFlags {
            read_only: self.sessions.is_read_only(session).await?,
            production: self.sessions.is_production(session).await?,
        })
    }

    /// Refuses a statement the session policy does not allow.
    ///
    /// `analysis` is an error when the statement could not be classified.
    fn enforce(
        &self,
        flags: SessionFlags,
        analysis: EngineResult<SqlSafetyAnalysis>,
        acknowledged: bool,
    ) -> EngineResult<()> {
        let analysis = match analysis {
            Ok(analysis) => analysis,
            Err(err) => {
                if flags.read_only {
                    return Err(EngineError::blocked(format!("{SQL_PARSE_BLOCKED}: {err}")));
                }
                if flags.production {
                    if self.config.prod_block_dangerous_sql {
                        return Err(EngineError::blocked(format!(
                            "{DANGEROUS_BLOCKED_POLICY}: SQL parse error: {err}"
                        )));
                    }
                    if self.config.prod_require_confirmation && !acknowledged {
                        return Err(EngineError::blocked(format!(
                            "{DANGEROUS_BLOCKED}: SQL parse error: {err}"
                        )));
                    }
                }
                return Ok(());
            }
        };

        if flags.read_only && analysis.is_mutation {
            return Err(EngineError::blocked(READ_ONLY_BLOCKED));
        }

        if flags.production && analysis.is_dangerous {
            if self.config.prod_block_dangerous_sql {
                return Err(EngineError::blocked(DANGEROUS_BLOCKED_POLICY));
            }
            if self.config.prod_require_confirmation && !acknowledged {
                return Err(EngineError::blocked(DANGEROUS_BLOCKED));
            }
        }

        Ok(())
    }

    async fn guarded(
        &self,
        session: SessionId,
        analysis: SqlSafetyAnalysis,
        acknowledged: bool,
    ) -> EngineResult<()> {
        let flags = self.flags(session).await?;
        self.enforce(flags, Ok(analysis), acknowledged)
            .inspect_err(|e| warn!(session_id = %session.0, error = %e, "statement refused"))
    }

    #[instrument(skip(self), fields(session_id = %session.0))]
    pub async fn databases(&self, session: SessionId) -> EngineResult<Vec<String>> {
        let (driver, handle) = self.sessions.session(session).await?;
        driver.get_databases(&handle).await
    }

    #[instrument(skip(self), fields(session_id = %session.0))]
    pub async fn tables(&self, session: SessionId, database: &str) -> EngineResult<Vec<TableInfo>> {
        let (driver, handle) = self.sessions.session(session).await?;
        driver.get_tables(&handle, database).await
    }

    #[instrument(skip(self), fields(session_id = %session.0))]
    pub async fn columns(
        &self,
        session: SessionId,
        database: &str,
        table: &str,
    ) -> EngineResult<Vec<ColumnInfo>> {
        let (driver, handle) = self.sessions.session(session).await?;
        driver.get_columns(&handle, database, table).await
    }

    #[instrument(skip(self), fields(session_id = %session.0))]
    pub async fn indexes(
        &self,
        session: SessionId,
        database: &str,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>> {
        let (driver, handle) = self.sessions.session(session).await?;
        driver.get_indexes(&handle, database, table).await
    }

    /// One page of a table plus the number of rows matching the filter.
    ///
    /// Without an explicit order column the rows are ordered by the primary
    /// key, looked up from the table's columns.
    #[instrument(skip(self, request), fields(session_id = %session.0, table = %request.table))]
    pub async fn table_data(
        &self,
        session: SessionId,
        database: &str,
        request: &TableDataRequest,
    ) -> EngineResult<TablePage> {
        let (driver, handle) = self.sessions.session(session).await?;

        let primary_key = if request.order_by.is_empty() {
            driver
                .get_columns(&handle, database, &request.table)
                .await?
                .into_iter()
                .find(ColumnInfo::is_primary_key)
                .map(|c| c.name)
                .unwrap_or_default()
        } else {
            String::new()
        };

        let sql = table_data_query(driver.as_ref(), database, request, &primary_key);
        debug!(sql = %sql, "table data query");

        let result = driver.execute(&handle, &sql, &[]).await?;
        let count_sql = driver.build_count_query(database, &request.table, &request.filters);
        let count = driver.execute(&handle, &count_sql, &[]).await?;

        let (page_size, _) = page_window(request.page, request.page_size);
        Ok(TablePage {
            result,
            total_rows: first_count(&count),
            page: request.page.max(1),
            page_size,
        })
    }

    #[instrument(skip(self), fields(session_id = %session.0))]
    pub async fn distinct_values(
        &self,
        session: SessionId,
        database: &str,
        table: &str,
        column: &str,
    ) -> EngineResult<Vec<String>> {
        let (driver, handle) = self.sessions.session(session).await?;
        let sql = driver.build_distinct_values_query(database, table, column);
        let result = driver.execute(&handle, &sql, &[]).await?;

        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.values.first())
            .filter_map(Value::to_display_string)
            .collect())
    }

    #[instrument(skip(self, data), fields(session_id = %session.0))]
    pub async fn insert_row(
        &self,
        session: SessionId,
        database: &str,
        table: &str,
        data: &RowData,
    ) -> EngineResult<QueryResult> {
        self.guarded(session, KEYED_WRITE, false).await?;
        let (driver, handle) = self.sessions.session(session).await?;

        let (columns, values) = data.sorted();
        if columns.is_empty() {
            return Err(EngineError::validation("no columns to insert"));
        }

        let sql = driver.build_insert_query(database, table, &columns);
        debug!(sql = %sql, "insert");
        driver.execute(&handle, &sql, &values).await
    }

    #[instrument(skip(self, key_value, data), fields(session_id = %session.0))]
    pub async fn update_row(
        &self,
        session: SessionId,
        database: &str,
        table: &str,
        primary_key: &str,
        key_value: Value,
        data: &RowData,
    ) -> EngineResult<QueryResult> {
        self.guarded(session, KEYED_WRITE, false).await?;
        let (driver, handle) = self.sessions.session(session).await?;

        let (columns, mut values) = data.sorted();
        if columns.is_empty() {
            return Err(EngineError::validation("no columns to update"));
        }
        values.push(key_value);

        let sql = driver.build_update_query(database, table, primary_key, &columns);
        debug!(sql = %sql, "update");
        driver.execute(&handle, &sql, &values).await
    }

    #[instrument(skip(self, key_value), fields(session_id = %session.0))]
    pub async fn delete_row(
        &self,
        session: SessionId,
        database: &str,
        table: &str,
        primary_key: &str,
        key_value: Value,
    ) -> EngineResult<QueryResult> {
        self.guarded(session, KEYED_WRITE, false).await?;
        let (driver, handle) = self.sessions.session(session).await?;

        let sql = driver.build_delete_query(database, table, primary_key);
        driver.execute(&handle, &sql, &[key_value]).await
    }

    /// Deletes every row whose primary key is in `key_values`
    #[instrument(skip(self, key_values), fields(session_id = %session.0, count = key_values.len()))]
    pub async fn delete_rows(
        &self,
        session: SessionId,
        database: &str,
        table: &str,
        primary_key: &str,
        key_values: &[Value],
    ) -> EngineResult<QueryResult> {
        self.guarded(session, KEYED_WRITE, false).await?;
        if key_values.is_empty() {
            return Ok(QueryResult::with_affected_rows(0, 0.0));
        }
        let (driver, handle) = self.sessions.session(session).await?;

        let sql = driver.build_batch_delete_query(database, table, primary_key, key_values.len());
        driver.execute(&handle, &sql, key_values).await
    }

    /// Runs the alteration's statements in order and stops at the first
    /// failure. Returns the number of statements applied.
    #[instrument(skip(self, alteration), fields(session_id = %session.0))]
    pub async fn alter_table(
        &self,
        session: SessionId,
        database: &str,
        table: &str,
        alteration: &TableAlteration,
        acknowledged: bool,
    ) -> EngineResult<usize> {
        self.guarded(session, DESTRUCTIVE, acknowledged).await?;
        let (driver, handle) = self.sessions.session(session).await?;

        let statements = driver.build_alter_table_query(database, table, alteration)?;
        let total = statements.len();
        for (applied, sql) in statements.iter().enumerate() {
            debug!(sql = %sql, "alter table");
            driver
                .execute(&handle, sql, &[])
                .await
                .map_err(|e| e.with_context(format!("statement {} of {}", applied + 1, total)))?;
        }

        Ok(total)
    }

    #[instrument(skip(self), fields(session_id = %session.0))]
    pub async fn truncate_table(
        &self,
        session: SessionId,
        database: &str,
        table: &str,
        acknowledged: bool,
    ) -> EngineResult<QueryResult> {
        self.guarded(session, DESTRUCTIVE, acknowledged).await?;
        let (driver, handle) = self.sessions.session(session).await?;

        let sql = driver.build_truncate_table_query(database, table);
        driver.execute(&handle, &sql, &[]).await
    }

    #[instrument(skip(self), fields(session_id = %session.0))]
    pub async fn drop_table(
        &self,
        session: SessionId,
        database: &str,
        table: &str,
        acknowledged: bool,
    ) -> EngineResult<QueryResult> {
        self.guarded(session, DESTRUCTIVE, acknowledged).await?;
        let (driver, handle) = self.sessions.session(session).await?;

        let sql = driver.build_drop_table_query(database, table);
        driver.execute(&handle, &sql, &[]).await
    }

    /// Runs a user-supplied statement. Statements on read-only or production
    /// sessions are classified first.
    #[instrument(skip(self, sql, params), fields(session_id = %session.0, query_len = sql.len()))]
    pub async fn execute_query(
        &self,
        session: SessionId,
        sql: &str,
        params: &[Value],
        acknowledged: bool,
    ) -> EngineResult<QueryResult> {
        let (driver, handle) = self.sessions.session(session).await?;
        let flags = self.flags(session).await?;

        if flags.read_only || flags.production {
            self.enforce(flags, analyze_sql(driver.driver_id(), sql), acknowledged)
                .inspect_err(|e| warn!(error = %e, "query refused"))?;
        }

        driver.execute(&handle, sql, params).await
    }
}

/// Page query scoped like the count query: the table reference is
/// qualified the way `table_ref` qualifies it, followed by the raw filter
fn table_data_query(
    driver: &dyn DataEngine,
    database: &str,
    request: &TableDataRequest,
    primary_key: &str,
) -> String {
    let sql = driver.build_table_data_query(request, primary_key);
    let from = format!("FROM {}", driver.quote_identifier(&request.table));
    let scoped = format!(
        "FROM {}{}",
        driver.table_ref(database, &request.table),
        where_clause(&request.filters)
    );
    sql.replacen(&from, &scoped, 1)
}

/// First cell of a `COUNT(*)` result
fn first_count(result: &QueryResult) -> u64 {
    match result.rows.first().and_then(|row| row.values.first()) {
        Some(Value::Int(n)) => (*n).max(0) as u64,
        Some(Value::Text(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Float(f)) => f.max(0.0) as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ConnectionConfig;
    use crate::engine::DriverRegistry;

    fn sqlite_config(environment: &str, read_only: bool) -> ConnectionConfig {
        ConnectionConfig {
            driver: "sqlite".to_string(),
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
            database: Some(":memory:".to_string()),
            ssl: false,
            environment: environment.to_string(),
            read_only,
        }
    }

    fn service(config: EngineConfig) -> DatabaseService {
        let registry = Arc::new(DriverRegistry::with_default_drivers());
        let sessions = Arc::new(SessionManager::new(registry, &config));
        DatabaseService::new(sessions, config)
    }

    /// Opens a session and creates `people` directly through the driver
    async fn open(service: &DatabaseService, config: ConnectionConfig) -> SessionId {
        let id = service.sessions().connect(config).await.unwrap();
        let (driver, handle) = service.sessions().session(id).await.unwrap();
        driver
            .execute(
                &handle,
                "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, city TEXT)",
                &[],
            )
            .await
            .unwrap();
        id
    }

    fn person(name: &str, city: &str) -> RowData {
        RowData::new()
            .with_column("name", Value::Text(name.to_string()))
            .with_column("city", Value::Text(city.to_string()))
    }

    async fn seeded(service: &DatabaseService) -> SessionId {
        let id = open(service, sqlite_config("", false)).await;
        for (name, city) in [
            ("Ada", "London"),
            ("Alan", "London"),
            ("Grace", "Arlington"),
            ("Linus", "Helsinki"),
            ("Edsger", "Austin"),
        ] {
            service
                .insert_row(id, "", "people", &person(name, city))
                .await
                .unwrap();
        }
        id
    }

    #[tokio::test]
    async fn table_data_pages_filters_and_counts() {
        let service = service(EngineConfig::default());
        let id = seeded(&service).await;

        let mut request = TableDataRequest::new("people");
        request.page_size = 2;
        request.page = 2;
        let page = service.table_data(id, "", &request).await.unwrap();
        assert_eq!(page.total_rows, 5);
        assert_eq!(page.page_size, 2);
        assert_eq!(page.result.rows.len(), 2);
        // ordered by primary key: rows 3 and 4
        assert_eq!(page.result.rows[0].values[0], Value::Int(3));

        let mut filtered = TableDataRequest::new("people");
        filtered.filters = "city = 'London'".to_string();
        filtered.order_by = "name".to_string();
        filtered.order_dir = "desc".to_string();
        let page = service.table_data(id, "", &filtered).await.unwrap();
        assert_eq!(page.total_rows, 2);
        assert_eq!(page.page_size, 50);
        assert_eq!(page.result.rows[0].values[1], Value::Text("Alan".to_string()));
        assert_eq!(page.result.rows[1].values[1], Value::Text("Ada".to_string()));
    }

    #[tokio::test]
    async fn rows_are_updated_and_deleted_by_key() {
        let service = service(EngineConfig::default());
        let id = seeded(&service).await;

        let updated = service
            .update_row(id, "", "people", "id", Value::Int(1), &person("Ada", "Paris"))
            .await
            .unwrap();
        assert_eq!(updated.affected_rows, Some(1));

        let cities = service.distinct_values(id, "", "people", "city").await.unwrap();
        assert_eq!(cities.first().map(String::as_str), Some("Arlington"));
        assert!(cities.iter().any(|c| c == "Paris"));

        let deleted = service
            .delete_row(id, "", "people", "id", Value::Int(2))
            .await
            .unwrap();
        assert_eq!(deleted.affected_rows, Some(1));

        let batch = service
            .delete_rows(id, "", "people", "id", &[Value::Int(3), Value::Int(4), Value::Int(99)])
            .await
            .unwrap();
        assert_eq!(batch.affected_rows, Some(2));

        let none = service.delete_rows(id, "", "people", "id", &[]).await.unwrap();
        assert_eq!(none.affected_rows, Some(0));
    }

    #[tokio::test]
    async fn alteration_stops_at_first_failure() {
        let service = service(EngineConfig::default());
        let id = seeded(&service).await;

        let alteration = TableAlteration {
            add_columns: vec![ColumnInfo::new("email", "TEXT")],
            drop_columns: vec!["missing".to_string()],
            ..TableAlteration::default()
        };
        let err = service
            .alter_table(id, "", "people", &alteration, false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExecutionError { .. }));
        assert!(err.to_string().contains("statement 1 of 2"));

        // the drop ran first and failed, so the add never happened
        let columns = service.columns(id, "", "people").await.unwrap();
        assert!(columns.iter().all(|c| c.name != "email"));

        let applied = service
            .alter_table(
                id,
                "",
                "people",
                &TableAlteration {
                    rename_to: Some("persons".to_string()),
                    add_columns: vec![ColumnInfo::new("email", "TEXT")],
                    ..TableAlteration::default()
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(applied, 2);
        let tables = service.tables(id, "").await.unwrap();
        assert_eq!(tables[0].name, "persons");
    }

    #[tokio::test]
    async fn read_only_sessions_refuse_writes() {
        let service = service(EngineConfig::default());
        let id = open(&service, sqlite_config("", true)).await;

        let err = service
            .insert_row(id, "", "people", &person("Ada", "London"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Blocked { .. }));

        let err = service
            .execute_query(id, "UPDATE people SET city = 'x' WHERE id = 1", &[], false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), READ_ONLY_BLOCKED);

        assert!(service
            .execute_query(id, "this is not sql", &[], false)
            .await
            .is_err());

        let read = service
            .execute_query(id, "SELECT COUNT(*) FROM people", &[], false)
            .await
            .unwrap();
        assert_eq!(read.rows[0].values[0], Value::Int(0));
    }

    #[tokio::test]
    async fn production_requires_acknowledgement() {
        let service = service(EngineConfig::default());
        let id = open(&service, sqlite_config("production", false)).await;

        let err = service.truncate_table(id, "", "people", false).await.unwrap_err();
        assert_eq!(err.to_string(), DANGEROUS_BLOCKED);

        // keyed writes are not dangerous
        service
            .insert_row(id, "", "people", &person("Ada", "London"))
            .await
            .unwrap();

        let truncated = service.truncate_table(id, "", "people", true).await.unwrap();
        assert_eq!(truncated.affected_rows, Some(1));

        assert!(service
            .execute_query(id, "DELETE FROM people", &[], false)
            .await
            .is_err());
        service.drop_table(id, "", "people", true).await.unwrap();
        assert!(service.tables(id, "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn production_block_policy_ignores_acknowledgement() {
        let config = EngineConfig {
            prod_block_dangerous_sql: true,
            ..EngineConfig::default()
        };
        let service = service(config);
        let id = open(&service, sqlite_config("production", false)).await;

        let err = service.drop_table(id, "", "people", true).await.unwrap_err();
        assert_eq!(err.to_string(), DANGEROUS_BLOCKED_POLICY);
    }

    #[test]
    fn page_and_count_share_the_table_reference() {
        let driver = crate::engine::drivers::mysql::MySqlDriver::new();
        let mut request = TableDataRequest::new("orders");
        request.filters = "total > 10".to_string();

        let page = table_data_query(&driver, "shop", &request, "id");
        let count = driver.build_count_query("shop", "orders", &request.filters);
        assert_eq!(
            page,
            "SELECT * FROM `shop`.`orders` WHERE total > 10 ORDER BY `id` ASC LIMIT 50 OFFSET 0"
        );
        assert!(count.starts_with("SELECT COUNT(*) FROM `shop`.`orders` WHERE total > 10"));

        request.filters.clear();
        assert_eq!(
            table_data_query(&driver, "", &request, ""),
            "SELECT * FROM `orders` LIMIT 50 OFFSET 0"
        );
    }

    #[tokio::test]
    async fn array_values_are_stored_as_json_text() {
        let service = service(EngineConfig::default());
        let id = open(&service, sqlite_config("", false)).await;

        let row = RowData::new()
            .with_column("name", Value::Text("Ada".to_string()))
            .with_column("city", Value::Array(vec![Value::Int(1), Value::Text("b".to_string())]));
        service.insert_row(id, "", "people", &row).await.unwrap();

        let stored = service
            .execute_query(id, "SELECT city FROM people", &[], false)
            .await
            .unwrap();
        assert_eq!(stored.rows[0].values[0], Value::Text(r#"[1,"b"]"#.to_string()));
    }

    #[tokio::test]
    async fn unknown_sessions_fail() {
        let service = service(EngineConfig::default());
        let err = service.databases(SessionId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound { .. }));
    }

    #[test]
    fn counts_are_read_from_any_numeric_cell() {
        let mut result = QueryResult::empty();
        assert_eq!(first_count(&result), 0);

        result.rows.push(crate::engine::types::Row {
            values: vec![Value::Text("42".to_string())],
        });
        assert_eq!(first_count(&result), 42);
    }
}
