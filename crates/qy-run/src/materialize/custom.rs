//! Project-defined materializations
//!
//! A `{% materialization name, adapter %}` block becomes the macro
//! `materialization_<name>_<adapter>`. It is rendered with `sql` (the
//! compiled node) and `this` in scope, and its output is executed statement
//! by statement.

use super::{split_statements, NodeOutcome, NodeTask, Session};
use crate::compiler::CompileOptions;
use crate::error::{RunError, RunnerResult};
use serde_json::Value;
use std::sync::Arc;

/// The macro implementing this node's materialization, if the project has one
pub(crate) fn find(task: &NodeTask<'_>) -> Option<String> {
    let materialized = task.node.materialized();
    let package = task.node.package_name();
    task.ctx
        .target
        .dispatch_chain()
        .iter()
        .map(|adapter| format!("materialization_{}_{}", materialized, adapter))
        .find(|name| task.ctx.renderer.has_macro(name, package))
}

pub(crate) async fn run(task: &NodeTask<'_>, session: &mut Session<'_>, name: &str) -> RunnerResult<NodeOutcome> {
    let compiled = task.compile(&CompileOptions::default())?;
    let resolver = Arc::new(crate::resolver::NodeResolver::new(
        Arc::clone(task.ctx),
        task.id(),
        task.node.package_name(),
        task.node.common.depends_on.nodes.iter().cloned().collect(),
    ));
    let env = task
        .compiler
        .render_env(task.node, Some(resolver), &CompileOptions::default())
        .with_global("sql", Value::String(compiled.sql.clone()));
    log::debug!("Materializing {} with {}", task.id(), name);
    let rendered = task
        .ctx
        .renderer
        .call_macro(name, &[], &env)
        .map_err(|e| RunError::compilation(task.id(), e.message))?;

    for statement in split_statements(&rendered.text) {
        session.execute(&statement).await?;
    }
    Ok(NodeOutcome::success(format!("materialized with {}", name))
        .with_sql(&compiled.sql)
        .with_response(session.last_response()))
}
