//! User-defined SQL functions

use super::{NodeOutcome, NodeTask, Session};
use crate::compiler::CompileOptions;
use crate::error::{RunError, RunnerResult};
use qy_core::node::FunctionAttrs;
use qy_core::relation::quote_ident;
use qy_core::{NodeKind, Relation};

/// DDL for a scalar function; DuckDB expresses these as macros
pub fn create_function_sql(adapter_type: &str, relation: &Relation, attrs: &FunctionAttrs, body: &str) -> String {
    let body = body.trim().trim_end_matches(';').trim();
    if adapter_type == "duckdb" {
        let args = attrs
            .arguments
            .iter()
            .map(|a| quote_ident(&a.name))
            .collect::<Vec<_>>()
            .join(", ");
        return format!("create or replace macro {}({}) as (\n{}\n)", relation.render_path(), args, body);
    }
    let args = attrs
        .arguments
        .iter()
        .map(|a| format!("{} {}", quote_ident(&a.name), a.data_type))
        .collect::<Vec<_>>()
        .join(", ");
    let returns = attrs
        .returns
        .as_deref()
        .map(|r| format!(" returns {}", r))
        .unwrap_or_default();
    format!(
        "create or replace function {}({}){} as $$\n{}\n$$",
        relation.render_path(),
        args,
        returns,
        body
    )
}

pub(super) async fn run(task: &NodeTask<'_>, session: &mut Session<'_>) -> RunnerResult<NodeOutcome> {
    let NodeKind::Function(attrs) = &task.node.kind else {
        return Err(RunError::Internal(format!("{} is not a function", task.id())));
    };
    let relation = task.relation()?;
    let compiled = task.compile(&CompileOptions::default())?;
    session
        .execute(&create_function_sql(&task.ctx.target.adapter_type, &relation, attrs, &compiled.sql))
        .await?;
    Ok(NodeOutcome::success("CREATE FUNCTION")
        .with_sql(&compiled.sql)
        .with_response(session.last_response()))
}
