//! `view`, `table` and `materialized_view` models

use super::hooks::NodeHooks;
use super::{contract, NodeOutcome, NodeTask, Session};
use crate::compiler::CompileOptions;
use crate::error::{RunError, RunnerResult};
use qy_core::{Relation, RelationType};

pub(crate) fn create_view_sql(relation: &Relation, sql: &str) -> String {
    format!("create or replace view {} as (\n{}\n)", relation.render_path(), sql)
}

pub(crate) fn create_table_sql(relation: &Relation, sql: &str) -> String {
    format!("create table {} as (\n{}\n)", relation.render_path(), sql)
}

pub(super) async fn view(task: &NodeTask<'_>, session: &mut Session<'_>) -> RunnerResult<NodeOutcome> {
    let relation = task.relation()?;
    let compiled = task.compile(&CompileOptions::default())?;
    let hooks = NodeHooks::load(task, false);
    hooks.before(task, session).await?;

    let built = async {
        if let Some(kind) = session.existing(&relation).await? {
            if kind != RelationType::View {
                session.drop(&relation, kind).await?;
            }
        }
        session.execute(&create_view_sql(&relation, &compiled.sql)).await?;
        contract::enforce(task, session, &relation).await?;
        contract::apply_grants(task, session, &relation).await?;
        Ok::<_, RunError>(NodeOutcome::success("CREATE VIEW"))
    }
    .await;

    let outcome = hooks.after(task, session, built).await?;
    Ok(outcome
        .with_sql(&compiled.sql)
        .with_response(session.last_response()))
}

/// Build `sql` into a fresh table and swap it in for `relation`
///
/// The old relation is renamed to its backup identifier first so the swap
/// never leaves the target missing on failure.
pub(crate) async fn swap_table(session: &mut Session<'_>, relation: &Relation, sql: &str) -> RunnerResult<()> {
    let tmp = relation.tmp();
    let backup = relation.backup();
    session.drop_existing(&tmp).await?;
    session.drop_existing(&backup).await?;
    session.execute(&create_table_sql(&tmp, sql)).await?;

    let existing = session.existing(relation).await?;
    if let Some(kind) = existing {
        session.rename(relation, kind, backup.identifier()).await?;
    }
    session
        .rename(&tmp, RelationType::Table, relation.identifier())
        .await?;
    if let Some(kind) = existing {
        session.drop(&backup, kind).await?;
    }
    Ok(())
}

pub(super) async fn table(task: &NodeTask<'_>, session: &mut Session<'_>) -> RunnerResult<NodeOutcome> {
    let relation = task.relation()?;
    let compiled = task.compile(&CompileOptions::default())?;
    let hooks = NodeHooks::load(task, true);
    hooks.before(task, session).await?;

    let built = async {
        swap_table(session, &relation, &compiled.sql).await?;
        contract::enforce(task, session, &relation).await?;
        contract::apply_grants(task, session, &relation).await?;
        Ok::<_, RunError>(NodeOutcome::success("SELECT"))
    }
    .await;

    let outcome = hooks.after(task, session, built).await?;
    Ok(outcome
        .with_sql(&compiled.sql)
        .with_response(session.last_response()))
}

/// `on_configuration_change` for materialized views
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnConfigurationChange {
    Apply,
    Skip,
    Fail,
}

impl OnConfigurationChange {
    fn parse(value: Option<&str>) -> Option<Self> {
        match value.unwrap_or("apply") {
            "apply" => Some(Self::Apply),
            "continue" | "skip" => Some(Self::Skip),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

/// DuckDB has no materialized views; they are kept as tables and rebuilt
fn emulated(task: &NodeTask<'_>) -> bool {
    task.ctx.target.adapter_type == "duckdb"
}

pub(super) async fn materialized_view(task: &NodeTask<'_>, session: &mut Session<'_>) -> RunnerResult<NodeOutcome> {
    let relation = task.relation()?;
    let compiled = task.compile(&CompileOptions::default())?;
    let config = task.node.config();
    let on_change = OnConfigurationChange::parse(config.get_str("on_configuration_change")).ok_or_else(|| {
        RunError::materialization(
            task.id(),
            "on_configuration_change must be one of apply, continue, fail",
        )
    })?;
    let own_kind = if emulated(task) {
        RelationType::Table
    } else {
        RelationType::MaterializedView
    };

    let hooks = NodeHooks::load(task, false);
    hooks.before(task, session).await?;

    let built = async {
        let existing = session.existing(&relation).await?;
        let full_refresh = task.ctx.full_refresh_for(task.node);
        match existing {
            Some(kind) if kind != own_kind && !full_refresh => match on_change {
                OnConfigurationChange::Fail => {
                    return Err(RunError::materialization(
                        task.id(),
                        format!(
                            "{} exists as a {} and on_configuration_change is 'fail'",
                            relation.render_path(),
                            kind.as_str()
                        ),
                    ));
                }
                OnConfigurationChange::Skip => {
                    log::warn!(
                        "Configuration changes for {} were not applied (on_configuration_change: continue)",
                        task.id()
                    );
                    return Ok(NodeOutcome::success("skipped configuration change"));
                }
                OnConfigurationChange::Apply => {
                    session.drop(&relation, kind).await?;
                    create_materialized_view(task, session, &relation, &compiled.sql).await?;
                }
            },
            Some(kind) if full_refresh => {
                session.drop(&relation, kind).await?;
                create_materialized_view(task, session, &relation, &compiled.sql).await?;
            }
            Some(_) if emulated(task) => swap_table(session, &relation, &compiled.sql).await?,
            Some(_) => {
                session
                    .execute(&format!("refresh materialized view {}", relation.render_path()))
                    .await?;
            }
            None => create_materialized_view(task, session, &relation, &compiled.sql).await?,
        }
        contract::apply_grants(task, session, &relation).await?;
        Ok::<_, RunError>(NodeOutcome::success("CREATE MATERIALIZED VIEW"))
    }
    .await;

    let outcome = hooks.after(task, session, built).await?;
    Ok(outcome
        .with_sql(&compiled.sql)
        .with_response(session.last_response()))
}

async fn create_materialized_view(
    task: &NodeTask<'_>,
    session: &mut Session<'_>,
    relation: &Relation,
    sql: &str,
) -> RunnerResult<()> {
    let statement = if emulated(task) {
        format!("create or replace table {} as (\n{}\n)", relation.render_path(), sql)
    } else {
        format!("create materialized view {} as (\n{}\n)", relation.render_path(), sql)
    };
    session.execute(&statement).await.map(|_| ())
}
