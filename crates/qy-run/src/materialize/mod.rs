//! Materialization dispatcher
//!
//! Each node is turned into warehouse statements by a strategy picked from
//! its resource type and `materialized` config. A project macro named
//! `materialization_<name>_<adapter>` (searched along the adapter dispatch
//! chain) takes precedence over the built-in strategies.

mod contract;
mod custom;
mod data_test;
mod function;
mod hooks;
mod incremental;
pub(crate) mod microbatch;
mod models;
mod seed;
mod snapshot;

use crate::compiler::{CompileOptions, CompiledNode, Compiler};
use crate::context::RunContext;
use crate::error::{DbResultExt, RunError, RunnerResult};
use qy_core::run_results::BatchResults;
use qy_core::{Node, Relation, RelationType, ResourceType, RunStatus};
use qy_db::{AdapterResponse, Column, Connection, ConnectionPool, QueryResult};
use std::sync::Arc;

pub use contract::types_match;
pub use incremental::IncrementalStrategy;

/// What a materialization produced for one node
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub status: RunStatus,
    pub message: Option<String>,
    pub adapter_response: Option<AdapterResponse>,
    /// Failing row count for tests
    pub failures: Option<i64>,
    pub compiled_code: Option<String>,
    pub batch_results: Option<BatchResults>,
}

impl NodeOutcome {
    pub fn new(status: RunStatus) -> Self {
        Self {
            status,
            message: None,
            adapter_response: None,
            failures: None,
            compiled_code: None,
            batch_results: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(RunStatus::Success).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn with_sql(mut self, sql: &str) -> Self {
        self.compiled_code = Some(sql.to_string());
        self
    }

    fn with_response(mut self, response: Option<AdapterResponse>) -> Self {
        self.adapter_response = response;
        self
    }
}

/// Everything one node's materialization reads
pub struct NodeTask<'a> {
    pub ctx: &'a Arc<RunContext>,
    pub compiler: &'a Compiler,
    pub pool: &'a Arc<ConnectionPool>,
    pub node: &'a Node,
}

impl NodeTask<'_> {
    pub fn id(&self) -> &str {
        self.node.unique_id()
    }

    fn relation(&self) -> RunnerResult<Relation> {
        crate::context::node_relation(self.node)
            .ok_or_else(|| RunError::materialization(self.id(), "node has no relation"))
    }

    fn compile(&self, options: &CompileOptions) -> RunnerResult<CompiledNode> {
        self.compiler.compile(self.id(), options)
    }
}

/// Statements issued for one node over one connection
pub(crate) struct Session<'a> {
    node_id: &'a str,
    conn: &'a dyn Connection,
    last: Option<AdapterResponse>,
}

impl<'a> Session<'a> {
    pub(crate) fn new(node_id: &'a str, conn: &'a dyn Connection) -> Self {
        Self {
            node_id,
            conn,
            last: None,
        }
    }

    pub(crate) async fn execute(&mut self, sql: &str) -> RunnerResult<AdapterResponse> {
        log::debug!("[{}] {}", self.conn.name(), sql);
        let response = self.conn.execute(sql).await.for_node(self.node_id)?;
        self.last = Some(response.clone());
        Ok(response)
    }

    pub(crate) async fn query(&self, sql: &str) -> RunnerResult<QueryResult> {
        log::debug!("[{}] {}", self.conn.name(), sql);
        self.conn.query(sql).await.for_node(self.node_id)
    }

    pub(crate) async fn existing(&self, relation: &Relation) -> RunnerResult<Option<RelationType>> {
        self.conn.get_relation(relation).await.for_node(self.node_id)
    }

    pub(crate) async fn columns(&self, relation: &Relation) -> RunnerResult<Vec<Column>> {
        self.conn.get_columns(relation).await.for_node(self.node_id)
    }

    pub(crate) async fn drop(&self, relation: &Relation, kind: RelationType) -> RunnerResult<()> {
        self.conn.drop_relation(relation, kind).await.for_node(self.node_id)
    }

    /// Drop whatever object sits at `relation`
    pub(crate) async fn drop_existing(&self, relation: &Relation) -> RunnerResult<()> {
        if let Some(kind) = self.existing(relation).await? {
            self.drop(relation, kind).await?;
        }
        Ok(())
    }

    pub(crate) async fn rename(&self, from: &Relation, kind: RelationType, to: &str) -> RunnerResult<()> {
        self.conn.rename_relation(from, kind, to).await.for_node(self.node_id)
    }

    pub(crate) async fn begin(&self) -> RunnerResult<()> {
        self.conn.begin().await.for_node(self.node_id)
    }

    pub(crate) async fn commit(&self) -> RunnerResult<()> {
        self.conn.commit().await.for_node(self.node_id)
    }

    /// Roll back after a failure; a rollback error is only logged
    pub(crate) async fn rollback(&self) {
        if let Err(e) = self.conn.rollback().await {
            log::warn!("Rollback failed for {}: {}", self.node_id, e);
        }
    }

    pub(crate) fn connection(&self) -> &'a dyn Connection {
        self.conn
    }

    pub(crate) fn last_response(&self) -> Option<AdapterResponse> {
        self.last.clone()
    }
}

/// Build one node
pub async fn materialize(task: &NodeTask<'_>) -> RunnerResult<NodeOutcome> {
    let node = task.node;
    if microbatch::is_microbatch(node) && !task.ctx.full_refresh_for(node) {
        return microbatch::run(task).await;
    }

    let conn = task
        .pool
        .acquire()
        .await
        .map_err(|e| RunError::database(task.id(), e))?;
    let mut session = Session::new(task.id(), &*conn);

    if let Some(name) = custom::find(task) {
        return custom::run(task, &mut session, &name).await;
    }

    match node.resource_type() {
        ResourceType::Model => match node.materialized() {
            "view" => models::view(task, &mut session).await,
            "table" => models::table(task, &mut session).await,
            "incremental" => incremental::run(task, &mut session).await,
            "materialized_view" => models::materialized_view(task, &mut session).await,
            other => Err(RunError::materialization(
                task.id(),
                format!("no materialization '{}' for adapter '{}'", other, task.ctx.target.adapter_type),
            )),
        },
        ResourceType::Seed => seed::run(task, &mut session).await,
        ResourceType::Snapshot => snapshot::run(task, &mut session).await,
        ResourceType::Test => data_test::run(task, &mut session).await,
        ResourceType::UnitTest => unit_test::run(task, &mut session).await,
        ResourceType::Function => function::run(task, &mut session).await,
        ResourceType::Operation => hooks::run_operation(task, &mut session).await,
        other => Err(RunError::Internal(format!(
            "{} nodes cannot be executed",
            other.as_str()
        ))),
    }
}

/// Statements of a rendered script, without empty fragments
pub(crate) fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
