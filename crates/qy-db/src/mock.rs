//! Recording adapter for tests
//!
//! Every statement is logged in order together with the connection that ran
//! it. Statements can be made to fail, panic or stall by substring, and DDL is
//! tracked well enough that existence checks behave like a real warehouse.

use crate::error::{DbError, DbResult};
use crate::traits::{Adapter, AdapterResponse, Column, Connection, CsvLoadOptions, QueryResult};
use async_trait::async_trait;
use qy_core::{Relation, RelationType};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// One statement seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    pub connection: String,
    pub sql: String,
}

#[derive(Default)]
struct MockState {
    statements: Mutex<Vec<RecordedStatement>>,
    failures: Mutex<Vec<(String, String)>>,
    panics: Mutex<Vec<String>>,
    delays: Mutex<Vec<(String, Duration)>>,
    results: Mutex<Vec<(String, QueryResult)>>,
    relations: Mutex<BTreeMap<String, RelationType>>,
    columns: Mutex<BTreeMap<String, Vec<Column>>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Adapter that records instead of executing
#[derive(Clone)]
pub struct MockAdapter {
    adapter_type: String,
    state: Arc<MockState>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            adapter_type: "duckdb".to_string(),
            state: Arc::new(MockState::default()),
        }
    }

    /// Report a different adapter type (affects macro dispatch)
    pub fn with_type(mut self, adapter_type: &str) -> Self {
        self.adapter_type = adapter_type.to_string();
        self
    }

    /// Fail any statement containing `pattern`
    pub fn fail_on(&self, pattern: &str, message: &str) {
        lock(&self.state.failures).push((pattern.to_string(), message.to_string()));
    }

    /// Panic inside any statement containing `pattern`
    pub fn panic_on(&self, pattern: &str) {
        lock(&self.state.panics).push(pattern.to_string());
    }

    /// Sleep before running any statement containing `pattern`
    pub fn delay_on(&self, pattern: &str, delay: Duration) {
        lock(&self.state.delays).push((pattern.to_string(), delay));
    }

    /// Rows returned by queries containing `pattern`
    pub fn respond(&self, pattern: &str, result: QueryResult) {
        lock(&self.state.results).push((pattern.to_string(), result));
    }

    /// Pretend an object already exists at `database.schema.identifier`
    pub fn add_relation(&self, path: &str, kind: RelationType) {
        lock(&self.state.relations).insert(path.to_ascii_lowercase(), kind);
    }

    pub fn set_columns(&self, path: &str, columns: Vec<Column>) {
        lock(&self.state.columns).insert(path.to_ascii_lowercase(), columns);
    }

    /// Kind of the tracked object at a dotted path
    pub fn relation(&self, path: &str) -> Option<RelationType> {
        lock(&self.state.relations)
            .get(&path.to_ascii_lowercase())
            .copied()
    }

    pub fn recorded(&self) -> Vec<RecordedStatement> {
        lock(&self.state.statements).clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.recorded().into_iter().map(|s| s.sql).collect()
    }

    /// Statements containing `pattern`
    pub fn matching(&self, pattern: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.contains(pattern))
            .collect()
    }

    /// Index of the first statement containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.statements().iter().position(|s| s.contains(pattern))
    }

    /// Highest number of statements that were in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        lock(&self.state.statements).clear();
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn adapter_type(&self) -> &str {
        &self.adapter_type
    }

    fn default_database(&self) -> String {
        "memory".to_string()
    }

    async fn open(&self, name: &str) -> DbResult<Box<dyn Connection>> {
        Ok(Box::new(MockConnection {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    name: String,
    state: Arc<MockState>,
}

/// Decrements the in-flight counter when a statement finishes
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockConnection {
    async fn run(&self, sql: &str) -> DbResult<()> {
        let now = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.state.active);
        self.state.peak.fetch_max(now, Ordering::SeqCst);

        lock(&self.state.statements).push(RecordedStatement {
            connection: self.name.clone(),
            sql: sql.to_string(),
        });

        let delay = lock(&self.state.delays)
            .iter()
            .filter(|(p, _)| sql.contains(p.as_str()))
            .map(|(_, d)| *d)
            .max();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let panic_pattern = lock(&self.state.panics)
            .iter()
            .find(|p| sql.contains(p.as_str()))
            .cloned();
        if let Some(pattern) = panic_pattern {
            panic!("mock adapter panicked on '{}'", pattern);
        }

        let failure = lock(&self.state.failures)
            .iter()
            .find(|(p, _)| sql.contains(p.as_str()))
            .map(|(_, m)| m.clone());
        if let Some(message) = failure {
            return Err(DbError::Query(message));
        }

        for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
            self.track_ddl(statement);
        }
        Ok(())
    }

    fn track_ddl(&self, sql: &str) {
        let mut relations = lock(&self.state.relations);
        if let Some(caps) = create_re().captures(sql) {
            let keyword = caps[1].to_ascii_lowercase();
            let kind = match keyword.split_whitespace().next() {
                Some("view") => RelationType::View,
                Some("materialized") => RelationType::MaterializedView,
                Some("macro") => RelationType::Function,
                _ => RelationType::Table,
            };
            relations.insert(normalize_path(&caps[2]), kind);
        } else if let Some(caps) = drop_re().captures(sql) {
            relations.remove(&normalize_path(&caps[1]));
        } else if let Some(caps) = rename_re().captures(sql) {
            let from = normalize_path(&caps[1]);
            let to = normalize_path(&caps[2]);
            if let Some(kind) = relations.remove(&from) {
                let mut parts: Vec<&str> = from.split('.').collect();
                parts.pop();
                parts.push(&to);
                relations.insert(parts.join("."), kind);
            }
        }
    }
}

fn create_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)^\s*create\s+(?:or\s+replace\s+)?(?:temp\s+|temporary\s+)?(table|view|materialized\s+view|macro)\s+(?:if\s+not\s+exists\s+)?([^\s(]+)",
        )
        .expect("valid regex")
    })
}

fn drop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^\s*drop\s+(?:table|view|materialized\s+view|macro)\s+(?:if\s+exists\s+)?([^\s;]+)")
            .expect("valid regex")
    })
}

fn rename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^\s*alter\s+(?:table|view)\s+(\S+)\s+rename\s+to\s+([^\s;]+)")
            .expect("valid regex")
    })
}

fn normalize_path(path: &str) -> String {
    path.replace('"', "").to_ascii_lowercase()
}

fn relation_key(relation: &Relation) -> String {
    [relation.database(), relation.schema(), relation.identifier()]
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| p.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}

#[async_trait]
impl Connection for MockConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, sql: &str) -> DbResult<AdapterResponse> {
        self.run(sql).await?;
        Ok(AdapterResponse::new("OK", None))
    }

    async fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.run(sql).await
    }

    async fn query(&self, sql: &str) -> DbResult<QueryResult> {
        self.run(sql).await?;
        Ok(lock(&self.state.results)
            .iter()
            .find(|(p, _)| sql.contains(p.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_default())
    }

    async fn get_relation(&self, relation: &Relation) -> DbResult<Option<RelationType>> {
        Ok(lock(&self.state.relations)
            .get(&relation_key(relation))
            .copied())
    }

    async fn get_columns(&self, relation: &Relation) -> DbResult<Vec<Column>> {
        Ok(lock(&self.state.columns)
            .get(&relation_key(relation))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_schema(&self, database: &str, schema: &str) -> DbResult<()> {
        self.run(&format!("create schema if not exists \"{}\".\"{}\"", database, schema))
            .await
    }

    async fn drop_relation(&self, relation: &Relation, kind: RelationType) -> DbResult<()> {
        let keyword = match kind {
            RelationType::View => "view",
            RelationType::Function => "macro",
            _ => "table",
        };
        self.run(&format!("drop {} if exists {}", keyword, relation.render_path()))
            .await
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
        self.run(&format!(
            "alter {} {} rename to \"{}\"",
            keyword,
            from.render_path(),
            new_identifier
        ))
        .await
    }

    async fn load_csv(
        &self,
        relation: &Relation,
        path: &Path,
        _options: &CsvLoadOptions,
    ) -> DbResult<u64> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DbError::SeedLoad(format!("{}: {}", path.display(), e)))?;
        self.run(&format!(
            "create or replace table {} as select * from read_csv('{}')",
            relation.render_path(),
            path.display()
        ))
        .await?;
        Ok(content.lines().skip(1).filter(|l| !l.trim().is_empty()).count() as u64)
    }
}

#[cfg(test)]
#[path = "mock_test.rs"]
mod tests;
