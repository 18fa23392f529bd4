//! Adapter and connection traits

use crate::error::DbResult;
use async_trait::async_trait;
use qy_core::{Relation, RelationType};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// What the warehouse reported for a statement
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdapterResponse {
    #[serde(rename = "_message")]
    pub message: String,
    pub code: String,
    pub rows_affected: Option<u64>,
}

impl AdapterResponse {
    pub fn new(code: impl Into<String>, rows_affected: Option<u64>) -> Self {
        let code = code.into();
        let message = match rows_affected {
            Some(n) => format!("{} {}", code, n),
            None => code.clone(),
        };
        Self {
            message,
            code,
            rows_affected,
        }
    }

    /// Map form stored on run results
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        map.insert("_message".to_string(), Value::String(self.message.clone()));
        map.insert("code".to_string(), Value::String(self.code.clone()));
        if let Some(n) = self.rows_affected {
            map.insert("rows_affected".to_string(), Value::from(n));
        }
        map
    }
}

/// Rows returned by a query, one JSON value per cell
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// First cell of the first row
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    /// Values of a named column
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))?;
        Some(self.rows.iter().filter_map(|r| r.get(idx)).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A column of an existing relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

/// How a seed file lands in its table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvLoadOptions {
    /// Column name to SQL type overrides
    pub column_types: BTreeMap<String, String>,
    /// Field delimiter, `,` when unset
    pub delimiter: Option<char>,
    /// Replace the rows of an existing table instead of recreating it
    pub truncate: bool,
}

/// One session against the warehouse
///
/// Implementations hold their own locking so a connection can be shared
/// across an await point.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Name used in logs and run results
    fn name(&self) -> &str;

    /// Execute a statement that returns no rows
    async fn execute(&self, sql: &str) -> DbResult<AdapterResponse>;

    /// Execute several `;` separated statements
    async fn execute_batch(&self, sql: &str) -> DbResult<()>;

    /// Run a query and collect its rows
    async fn query(&self, sql: &str) -> DbResult<QueryResult>;

    /// `select count(*)` over an arbitrary query
    async fn query_count(&self, sql: &str) -> DbResult<i64> {
        let result = self
            .query(&format!("select count(*) from ({}) as _qy_count", sql))
            .await?;
        Ok(result.scalar().and_then(Value::as_i64).unwrap_or(0))
    }

    /// Kind of the existing object at a path, if any
    async fn get_relation(&self, relation: &Relation) -> DbResult<Option<RelationType>>;

    /// Columns of an existing relation, in ordinal order
    async fn get_columns(&self, relation: &Relation) -> DbResult<Vec<Column>>;

    async fn create_schema(&self, database: &str, schema: &str) -> DbResult<()>;

    async fn drop_relation(&self, relation: &Relation, kind: RelationType) -> DbResult<()>;

    /// Rename in place, keeping database and schema
    async fn rename_relation(
        &self,
        from: &Relation,
        kind: RelationType,
        new_identifier: &str,
    ) -> DbResult<()>;

    /// Load a CSV file into a table, returning the row count
    async fn load_csv(
        &self,
        relation: &Relation,
        path: &Path,
        options: &CsvLoadOptions,
    ) -> DbResult<u64>;

    async fn begin(&self) -> DbResult<()> {
        self.execute("begin transaction").await.map(|_| ())
    }

    async fn commit(&self) -> DbResult<()> {
        self.execute("commit").await.map(|_| ())
    }

    async fn rollback(&self) -> DbResult<()> {
        self.execute("rollback").await.map(|_| ())
    }

    /// Apply `grants` config; adapters without privileges ignore it
    async fn apply_grants(
        &self,
        _relation: &Relation,
        _grants: &BTreeMap<String, Vec<String>>,
    ) -> DbResult<()> {
        Ok(())
    }
}

/// A warehouse flavour that hands out connections
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter type name (e.g. "duckdb")
    fn adapter_type(&self) -> &str;

    /// Adapters whose macros also apply, nearest first
    fn parent_adapters(&self) -> Vec<String> {
        Vec::new()
    }

    /// Database (catalog) name relations default to
    fn default_database(&self) -> String;

    /// Open a new connection
    async fn open(&self, name: &str) -> DbResult<Box<dyn Connection>>;

    /// Quote an identifier the way this warehouse expects
    fn quote(&self, identifier: &str) -> String {
        qy_core::relation::quote_ident(identifier)
    }
}
