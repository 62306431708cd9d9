//! Universal data types for the Mergen engine
//!
//! Descriptors exchanged between the request layer and the drivers. All of
//! them are built per request by the caller; drivers never keep them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a database session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Database connection configuration
///
/// For SQLite, `database` holds the file path (or `:memory:`) and
/// `host`/`port` are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub driver: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub read_only: bool,
}

impl ConnectionConfig {
    /// Database name with surrounding whitespace removed, if any is set
    pub fn database_name(&self) -> Option<&str> {
        self.database
            .as_deref()
            .map(str::trim)
            .filter(|db| !db.is_empty())
    }
}

/// Table listing entry
///
/// Everything besides `name` is advisory: engines without a native
/// equivalent report zero or an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub engine: String,
    pub row_count: i64,
    pub data_size: i64,
    pub create_time: String,
}

/// Column metadata, ordered by the engine's native ordinal position
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    /// Key role; `PRI` marks primary-key columns on every engine
    pub key: String,
    /// Default expression; empty when the column has none
    pub default_value: String,
    pub extra: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            ..Self::default()
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = value.into();
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.key == PRIMARY_KEY_ROLE
    }
}

pub const PRIMARY_KEY_ROLE: &str = "PRI";

/// Maps an `is_nullable` indicator to a flag. Only the exact `YES` token
/// means nullable.
pub fn is_nullable_flag(indicator: &str) -> bool {
    indicator == "YES"
}

/// Index metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Paged table browsing request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableDataRequest {
    pub table: String,
    /// Raw boolean expression supplied by the user. Never quoted or escaped.
    pub filters: String,
    pub order_by: String,
    pub order_dir: String,
    /// 1-based page number
    pub page: i64,
    /// Rows per page; non-positive means the default of 50
    pub page_size: i64,
}

impl TableDataRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            page: 1,
            ..Self::default()
        }
    }
}

/// One column modification inside a `TableAlteration`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnModification {
    /// Target definition of the column
    #[serde(flatten)]
    pub column: ColumnInfo,
    /// Previous name when the column is renamed in place
    #[serde(default)]
    pub old_name: Option<String>,
}

impl ColumnModification {
    /// The previous name, only when it differs from the target name
    pub fn renamed_from(&self) -> Option<&str> {
        self.old_name
            .as_deref()
            .filter(|old| !old.is_empty() && *old != self.column.name)
    }
}

/// Batch description of table changes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableAlteration {
    pub rename_to: Option<String>,
    pub add_columns: Vec<ColumnInfo>,
    pub drop_columns: Vec<String>,
    pub modify_columns: Vec<ColumnModification>,
}

impl TableAlteration {
    /// New table name, only when it differs from `current`
    pub fn rename_target<'a>(&'a self, current: &str) -> Option<&'a str> {
        self.rename_to
            .as_deref()
            .filter(|name| !name.is_empty() && *name != current)
    }
}

/// Universal value representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    /// JSON text of an array parameter. Engines have no common array type,
    /// so arrays are bound as text.
    pub fn array_json(items: &[Value]) -> String {
        serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
    }

    /// Display form used for distinct-value suggestion lists
    pub fn to_display_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(format!("[BLOB: {} bytes]", b.len())),
            Value::Json(j) => Some(j.to_string()),
            Value::Array(items) => Some(format!("[{} items]", items.len())),
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Column of a statement result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultColumn {
    pub name: String,
    pub data_type: String,
}

/// A single row of data (indexed by column order)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

/// Row data for mutation operations (indexed by column name)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowData {
    pub columns: HashMap<String, Value>,
}

impl RowData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, value: Value) -> Self {
        self.columns.insert(name.into(), value);
        self
    }

    /// Column names in a stable order with their values
    pub fn sorted(&self) -> (Vec<String>, Vec<Value>) {
        let mut entries: Vec<(&String, &Value)> = self.columns.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
            .into_iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .unzip()
    }
}

/// Statement execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Row>,
    /// Number of affected rows (for INSERT/UPDATE/DELETE/DDL)
    pub affected_rows: Option<u64>,
    pub execution_time_ms: f64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: None,
            execution_time_ms: 0.0,
        }
    }

    pub fn with_affected_rows(affected: u64, time_ms: f64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: Some(affected),
            execution_time_ms: time_ms,
        }
    }
}

/// One page of table data plus the filtered total
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePage {
    pub result: QueryResult,
    pub total_rows: u64,
    pub page: i64,
    pub page_size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_render_as_json_text() {
        let items = vec![Value::Int(1), Value::Null, Value::Text("x".to_string())];
        assert_eq!(Value::array_json(&items), r#"[1,null,"x"]"#);
        assert_eq!(Value::array_json(&[]), "[]");
    }

    #[test]
    fn display_strings_skip_null() {
        assert_eq!(Value::Null.to_display_string(), None);
        assert_eq!(Value::Int(7).to_display_string().as_deref(), Some("7"));
        assert_eq!(
            Value::Bytes(vec![0, 1]).to_display_string().as_deref(),
            Some("[BLOB: 2 bytes]")
        );
    }

    #[test]
    fn only_exact_yes_is_nullable() {
        assert!(is_nullable_flag("YES"));
        assert!(!is_nullable_flag("NO"));
        assert!(!is_nullable_flag("yes"));
        assert!(!is_nullable_flag(""));
    }

    #[test]
    fn column_modification_deserializes_flat() {
        let json = r#"{"name":"email","type":"text","nullable":false,"old_name":"mail"}"#;
        let modification: ColumnModification = serde_json::from_str(json).expect("should parse");

        assert_eq!(modification.column.name, "email");
        assert_eq!(modification.column.data_type, "text");
        assert!(!modification.column.nullable);
        assert_eq!(modification.column.default_value, "");
        assert_eq!(modification.renamed_from(), Some("mail"));
    }

    #[test]
    fn rename_to_same_name_is_ignored() {
        let alteration = TableAlteration {
            rename_to: Some("users".to_string()),
            ..TableAlteration::default()
        };
        assert_eq!(alteration.rename_target("users"), None);
        assert_eq!(alteration.rename_target("people"), Some("users"));
    }

    #[test]
    fn password_is_not_serialized() {
        let config = ConnectionConfig {
            driver: "postgres".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            username: "admin".to_string(),
            password: "secret".to_string(),
            database: Some(" app ".to_string()),
            ssl: false,
            environment: "development".to_string(),
            read_only: false,
        };

        let json = serde_json::to_string(&config).expect("should serialize");
        assert!(!json.contains("secret"));
        assert_eq!(config.database_name(), Some("app"));
    }

    #[test]
    fn row_data_sorts_columns() {
        let data = RowData::new()
            .with_column("b", Value::Int(2))
            .with_column("a", Value::Text("x".to_string()));
        let (names, values) = data.sorted();

        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(values, vec![Value::Text("x".to_string()), Value::Int(2)]);
    }

    #[test]
    fn bytes_round_trip_as_base64_text() {
        let json = serde_json::to_string(&Value::Bytes(vec![1, 2, 3])).expect("should serialize");
        assert_eq!(json, "\"AQID\"");
    }
}
