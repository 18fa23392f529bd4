//! DuckDB adapter

use crate::error::{DbError, DbResult};
use crate::traits::{Adapter, AdapterResponse, Column, Connection, CsvLoadOptions, QueryResult};
use async_trait::async_trait;
use duckdb::types::{TimeUnit, Value as DuckValue};
use qy_core::relation::{escape_sql_string, quote_ident};
use qy_core::{Relation, RelationType};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

/// Catalog name DuckDB gives an in-memory database
pub const MEMORY_CATALOG: &str = "memory";

/// DuckDB adapter; every connection is a clone of one database handle
pub struct DuckDbAdapter {
    root: Mutex<duckdb::Connection>,
    catalog: String,
}

impl DuckDbAdapter {
    /// Create a new in-memory database
    pub fn in_memory() -> DbResult<Self> {
        let conn = duckdb::Connection::open_in_memory()
            .map_err(|e| DbError::Connect(e.to_string()))?;
        Ok(Self {
            root: Mutex::new(conn),
            catalog: MEMORY_CATALOG.to_string(),
        })
    }

    /// Open (or create) a database file
    pub fn from_path(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| DbError::Connect(format!("{}: {}", parent.display(), e)))?;
        }
        let conn = duckdb::Connection::open(path)
            .map_err(|e| DbError::Connect(format!("{}: {}", path.display(), e)))?;
        let catalog = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| MEMORY_CATALOG.to_string());
        Ok(Self {
            root: Mutex::new(conn),
            catalog,
        })
    }

    /// Create from a path string (handles `:memory:`)
    pub fn new(path: &str) -> DbResult<Self> {
        if path.is_empty() || path == ":memory:" {
            Self::in_memory()
        } else {
            Self::from_path(Path::new(path))
        }
    }
}

#[async_trait]
impl Adapter for DuckDbAdapter {
    fn adapter_type(&self) -> &str {
        "duckdb"
    }

    fn default_database(&self) -> String {
        self.catalog.clone()
    }

    async fn open(&self, name: &str) -> DbResult<Box<dyn Connection>> {
        let root = self.root.lock().unwrap_or_else(|p| p.into_inner());
        let conn = root
            .try_clone()
            .map_err(|e| DbError::Connect(e.to_string()))?;
        log::debug!("Opened DuckDB connection {}", name);
        Ok(Box::new(DuckDbConnection {
            name: name.to_string(),
            conn: Mutex::new(conn),
        }))
    }
}

/// A single DuckDB session
pub struct DuckDbConnection {
    name: String,
    conn: Mutex<duckdb::Connection>,
}

impl DuckDbConnection {
    fn lock(&self) -> std::sync::MutexGuard<'_, duckdb::Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Execute SQL synchronously
    fn execute_sync(&self, sql: &str) -> DbResult<AdapterResponse> {
        log::trace!("[{}] {}", self.name, sql);
        let conn = self.lock();
        let rows = conn.execute(sql, []).map_err(DbError::from)?;
        Ok(AdapterResponse::new(statement_code(sql), Some(rows as u64)))
    }

    /// Execute batch SQL synchronously
    fn execute_batch_sync(&self, sql: &str) -> DbResult<()> {
        log::trace!("[{}] {}", self.name, sql);
        let conn = self.lock();
        conn.execute_batch(sql).map_err(DbError::from)
    }

    /// Query rows synchronously
    fn query_sync(&self, sql: &str) -> DbResult<QueryResult> {
        log::trace!("[{}] {}", self.name, sql);
        let conn = self.lock();
        let mut stmt = conn.prepare(sql).map_err(DbError::from)?;
        let mut rows = stmt.query([]).map_err(DbError::from)?;
        let columns = rows
            .as_ref()
            .map(|s| s.column_names())
            .unwrap_or_default();

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(DbError::from)? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                let value: DuckValue = row.get(idx).map_err(DbError::from)?;
                values.push(duck_to_json(value));
            }
            out.push(values);
        }
        Ok(QueryResult::new(columns, out))
    }
}

#[async_trait]
impl Connection for DuckDbConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, sql: &str) -> DbResult<AdapterResponse> {
        self.execute_sync(sql)
    }

    async fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.execute_batch_sync(sql)
    }

    async fn query(&self, sql: &str) -> DbResult<QueryResult> {
        self.query_sync(sql)
    }

    async fn begin(&self) -> DbResult<()> {
        self.execute_batch_sync("begin transaction")
    }

    async fn commit(&self) -> DbResult<()> {
        self.execute_batch_sync("commit")
    }

    async fn rollback(&self) -> DbResult<()> {
        self.execute_batch_sync("rollback")
    }

    async fn get_relation(&self, relation: &Relation) -> DbResult<Option<RelationType>> {
        let mut sql = format!(
            "select table_type from information_schema.tables \
             where table_schema = '{}' and table_name = '{}'",
            escape_sql_string(relation.schema()),
            escape_sql_string(relation.identifier()),
        );
        if let Some(db) = relation.database.as_deref().filter(|d| !d.is_empty()) {
            sql.push_str(&format!(" and table_catalog = '{}'", escape_sql_string(db)));
        }
        let result = self.query_sync(&sql)?;
        Ok(result.scalar().map(|v| {
            v.as_str()
                .and_then(RelationType::parse)
                .unwrap_or(RelationType::Table)
        }))
    }

    async fn get_columns(&self, relation: &Relation) -> DbResult<Vec<Column>> {
        let mut sql = format!(
            "select column_name, data_type from information_schema.columns \
             where table_schema = '{}' and table_name = '{}'",
            escape_sql_string(relation.schema()),
            escape_sql_string(relation.identifier()),
        );
        if let Some(db) = relation.database.as_deref().filter(|d| !d.is_empty()) {
            sql.push_str(&format!(" and table_catalog = '{}'", escape_sql_string(db)));
        }
        sql.push_str(" order by ordinal_position");
        let result = self.query_sync(&sql)?;
        Ok(result
            .rows
            .iter()
            .map(|row| Column {
                name: row.first().and_then(Value::as_str).unwrap_or_default().to_string(),
                data_type: row.get(1).and_then(Value::as_str).unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn create_schema(&self, database: &str, schema: &str) -> DbResult<()> {
        let path = if database.is_empty() {
            quote_ident(schema)
        } else {
            format!("{}.{}", quote_ident(database), quote_ident(schema))
        };
        self.execute_sync(&format!("create schema if not exists {}", path))?;
        Ok(())
    }

    async fn drop_relation(&self, relation: &Relation, kind: RelationType) -> DbResult<()> {
        let keyword = match kind {
            RelationType::View => "view",
            RelationType::Function => "macro",
            _ => "table",
        };
        self.execute_sync(&format!(
            "drop {} if exists {}",
            keyword,
            relation.render_path()
        ))?;
        Ok(())
    }

    async fn rename_relation(
        &self,
        from: &Relation,
        kind: RelationType,
        new_identifier: &str,
    ) -> DbResult<()> {
        let keyword = match kind {
            RelationType::View => "view",
            _ => "table",
        };
        self.execute_sync(&format!(
            "alter {} {} rename to {}",
            keyword,
            from.render_path(),
            quote_ident(new_identifier)
        ))?;
        Ok(())
    }

    async fn load_csv(
        &self,
        relation: &Relation,
        path: &Path,
        options: &CsvLoadOptions,
    ) -> DbResult<u64> {
        if !path.exists() {
            return Err(DbError::SeedLoad(format!(
                "file not found: {}",
                path.display()
            )));
        }
        let source = read_csv_expr(path, options);
        let target = relation.render_path();
        let exists = self.get_relation(relation).await?.is_some();
        let sql = if exists && options.truncate {
            format!(
                "delete from {target}; insert into {target} select * from {source};",
                target = target,
                source = source
            )
        } else {
            format!(
                "create or replace table {} as select * from {};",
                target, source
            )
        };
        self.execute_batch_sync(&sql)
            .map_err(|e| DbError::SeedLoad(format!("{}: {}", path.display(), e)))?;

        let count = self.query_sync(&format!("select count(*) from {}", target))?;
        Ok(count.scalar().and_then(Value::as_u64).unwrap_or(0))
    }
}

/// `read_csv(...)` call for a seed file
pub(crate) fn read_csv_expr(path: &Path, options: &CsvLoadOptions) -> String {
    let mut args = vec![
        format!("'{}'", escape_sql_string(&path.to_string_lossy())),
        "header = true".to_string(),
        "auto_detect = true".to_string(),
    ];
    if let Some(delim) = options.delimiter {
        args.push(format!("delim = '{}'", escape_sql_string(&delim.to_string())));
    }
    if !options.column_types.is_empty() {
        let types = options
            .column_types
            .iter()
            .map(|(col, ty)| format!("'{}': '{}'", escape_sql_string(col), escape_sql_string(ty)))
            .collect::<Vec<_>>()
            .join(", ");
        args.push(format!("types = {{{}}}", types));
    }
    format!("read_csv({})", args.join(", "))
}

/// Leading keyword of a statement, upper-cased
fn statement_code(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_ascii_alphabetic()).to_ascii_uppercase())
        .filter(|w| !w.is_empty())
        .unwrap_or_else(|| "OK".to_string())
}

fn duck_to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::from(i),
        DuckValue::SmallInt(i) => Value::from(i),
        DuckValue::Int(i) => Value::from(i),
        DuckValue::BigInt(i) => Value::from(i),
        DuckValue::HugeInt(i) => i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string())),
        DuckValue::UTinyInt(i) => Value::from(i),
        DuckValue::USmallInt(i) => Value::from(i),
        DuckValue::UInt(i) => Value::from(i),
        DuckValue::UBigInt(i) => Value::from(i),
        DuckValue::Float(f) => Value::from(f as f64),
        DuckValue::Double(f) => Value::from(f),
        DuckValue::Text(s) => Value::String(s),
        DuckValue::Enum(s) => Value::String(s),
        DuckValue::Timestamp(unit, v) => Value::from(to_micros(unit, v)),
        DuckValue::List(items) => Value::Array(items.into_iter().map(duck_to_json).collect()),
        other => Value::String(format!("{:?}", other)),
    }
}

fn to_micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
