//! `incremental` models: append, merge and delete+insert

use super::hooks::NodeHooks;
use super::models::{create_table_sql, swap_table};
use super::{contract, NodeOutcome, NodeTask, Session};
use crate::compiler::CompileOptions;
use crate::error::{RunError, RunnerResult};
use qy_core::relation::quote_ident;
use qy_core::{Relation, RelationType};
use qy_db::Column;
use std::collections::BTreeSet;
use std::fmt;

/// How new rows reach an existing incremental relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementalStrategy {
    Append,
    Merge,
    DeleteInsert,
    Microbatch,
}

impl IncrementalStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "append" => Some(Self::Append),
            "merge" => Some(Self::Merge),
            "delete+insert" | "delete_insert" => Some(Self::DeleteInsert),
            "microbatch" => Some(Self::Microbatch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Merge => "merge",
            Self::DeleteInsert => "delete+insert",
            Self::Microbatch => "microbatch",
        }
    }

    fn needs_unique_key(&self) -> bool {
        matches!(self, Self::Merge | Self::DeleteInsert)
    }
}

impl fmt::Display for IncrementalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `on_schema_change` for incremental models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OnSchemaChange {
    Ignore,
    Fail,
    AppendNewColumns,
    SyncAllColumns,
}

impl OnSchemaChange {
    fn parse(s: Option<&str>) -> Option<Self> {
        match s.unwrap_or("ignore") {
            "ignore" => Some(Self::Ignore),
            "fail" => Some(Self::Fail),
            "append_new_columns" => Some(Self::AppendNewColumns),
            "sync_all_columns" => Some(Self::SyncAllColumns),
            _ => None,
        }
    }
}

pub(crate) fn on_schema_change_for(task: &NodeTask<'_>) -> RunnerResult<OnSchemaChange> {
    OnSchemaChange::parse(task.node.config().get_str("on_schema_change")).ok_or_else(|| {
        RunError::materialization(
            task.id(),
            "on_schema_change must be one of ignore, fail, append_new_columns, sync_all_columns",
        )
    })
}

/// The configured strategy, defaulting to `append`
pub(crate) fn strategy_for(task: &NodeTask<'_>) -> RunnerResult<IncrementalStrategy> {
    let config = task.node.config();
    match config.get_str("incremental_strategy") {
        None => Ok(IncrementalStrategy::Append),
        Some(name) => IncrementalStrategy::parse(name).ok_or_else(|| {
            RunError::materialization(task.id(), format!("unknown incremental strategy '{}'", name))
        }),
    }
}

pub(super) async fn run(task: &NodeTask<'_>, session: &mut Session<'_>) -> RunnerResult<NodeOutcome> {
    let relation = task.relation()?;
    let strategy = strategy_for(task)?;
    let unique_key = task.node.config().unique_key();
    if strategy.needs_unique_key() && unique_key.is_empty() {
        return Err(RunError::materialization(
            task.id(),
            format!("incremental strategy '{}' requires a unique_key", strategy),
        ));
    }
    let on_schema_change = on_schema_change_for(task)?;

    let existing = session.existing(&relation).await?;
    let rebuild = match existing {
        None => true,
        Some(RelationType::View) => true,
        Some(_) => task.ctx.full_refresh_for(task.node),
    };
    let compiled = task.compile(&CompileOptions {
        is_incremental: !rebuild,
        ..Default::default()
    })?;

    let hooks = NodeHooks::load(task, true);
    hooks.before(task, session).await?;
    let built = async {
        if rebuild {
            match existing {
                Some(RelationType::View) => {
                    session.drop(&relation, RelationType::View).await?;
                    session.execute(&create_table_sql(&relation, &compiled.sql)).await?;
                }
                Some(_) => swap_table(session, &relation, &compiled.sql).await?,
                None => {
                    session.execute(&create_table_sql(&relation, &compiled.sql)).await?;
                }
            }
        } else {
            let staged = relation.tmp();
            stage(session, &staged, &compiled.sql).await?;
            let columns = reconcile_columns(task, session, &relation, &staged, on_schema_change).await?;
            let applied = apply(task, session, strategy, &relation, &staged, &columns, &unique_key, None).await;
            session.drop_existing(&staged).await?;
            applied?;
        }
        contract::enforce(task, session, &relation).await?;
        contract::apply_grants(task, session, &relation).await?;
        Ok::<_, RunError>(NodeOutcome::success(if rebuild { "SELECT" } else { "INSERT" }))
    }
    .await;

    let outcome = hooks.after(task, session, built).await?;
    Ok(outcome
        .with_sql(&compiled.sql)
        .with_response(session.last_response()))
}

/// Materialize new rows into a scratch table next to the target
pub(crate) async fn stage(session: &mut Session<'_>, staged: &Relation, sql: &str) -> RunnerResult<()> {
    session.drop_existing(staged).await?;
    session.execute(&create_table_sql(staged, sql)).await.map(|_| ())
}

fn describe(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| format!("{} ({})", c.name, c.data_type))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Columns to copy from the staged rows, after applying `on_schema_change`
///
/// Empty when the warehouse reports no columns; inserts then use `select *`.
pub(crate) async fn reconcile_columns(
    task: &NodeTask<'_>,
    session: &mut Session<'_>,
    target: &Relation,
    staged: &Relation,
    on_schema_change: OnSchemaChange,
) -> RunnerResult<Vec<String>> {
    let target_columns = session.columns(target).await?;
    let staged_columns = session.columns(staged).await?;
    if target_columns.is_empty() || staged_columns.is_empty() {
        return Ok(Vec::new());
    }
    let existing: BTreeSet<String> = target_columns.iter().map(|c| c.name.to_ascii_lowercase()).collect();
    let incoming: BTreeSet<String> = staged_columns.iter().map(|c| c.name.to_ascii_lowercase()).collect();
    let added: Vec<Column> = staged_columns
        .iter()
        .filter(|c| !existing.contains(&c.name.to_ascii_lowercase()))
        .cloned()
        .collect();
    let removed: Vec<Column> = target_columns
        .iter()
        .filter(|c| !incoming.contains(&c.name.to_ascii_lowercase()))
        .cloned()
        .collect();

    if !added.is_empty() || !removed.is_empty() {
        match on_schema_change {
            OnSchemaChange::Ignore => {}
            OnSchemaChange::Fail => {
                let mut message = String::from("the source and target schemas are out of sync");
                if !added.is_empty() {
                    message.push_str(&format!("; new columns: {}", describe(&added)));
                }
                if !removed.is_empty() {
                    message.push_str(&format!("; removed columns: {}", describe(&removed)));
                }
                return Err(RunError::materialization(task.id(), message));
            }
            OnSchemaChange::AppendNewColumns | OnSchemaChange::SyncAllColumns => {
                for column in &added {
                    session
                        .execute(&format!(
                            "alter table {} add column {} {}",
                            target.render_path(),
                            quote_ident(&column.name),
                            column.data_type
                        ))
                        .await?;
                }
                if on_schema_change == OnSchemaChange::SyncAllColumns {
                    for column in &removed {
                        session
                            .execute(&format!(
                                "alter table {} drop column {}",
                                target.render_path(),
                                quote_ident(&column.name)
                            ))
                            .await?;
                    }
                }
                log::info!(
                    "Schema of {} changed: {} added, {} removed",
                    task.id(),
                    added.len(),
                    removed.len()
                );
            }
        }
    }

    let mut columns: Vec<String> = staged_columns.iter().map(|c| c.name.clone()).collect();
    if on_schema_change == OnSchemaChange::Ignore {
        columns.retain(|c| existing.contains(&c.to_ascii_lowercase()));
    }
    Ok(columns)
}


fn column_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
}

pub(crate) fn insert_sql(target: &Relation, staged: &Relation, columns: &[String]) -> String {
    if columns.is_empty() {
        return format!("insert into {} select * from {}", target.render_path(), staged.render_path());
    }
    let list = column_list(columns);
    format!(
        "insert into {} ({}) select {} from {}",
        target.render_path(),
        list,
        list,
        staged.render_path()
    )
}

fn key_match(unique_key: &[String], staged: &Relation) -> String {
    if let [key] = unique_key {
        let key = quote_ident(key);
        return format!("{} in (select {} from {})", key, key, staged.render_path());
    }
    let keys = column_list(unique_key);
    format!("({}) in (select {} from {})", keys, keys, staged.render_path())
}

fn predicates(task: &NodeTask<'_>) -> String {
    task.node
        .config()
        .get_list("incremental_predicates")
        .iter()
        .map(|p| format!(" and ({})", p))
        .collect()
}

/// Move staged rows into the target with `strategy`
///
/// `window` replaces the unique key match for microbatch batches.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn apply(
    task: &NodeTask<'_>,
    session: &mut Session<'_>,
    strategy: IncrementalStrategy,
    target: &Relation,
    staged: &Relation,
    columns: &[String],
    unique_key: &[String],
    window: Option<String>,
) -> RunnerResult<()> {
    let merge_natively = strategy == IncrementalStrategy::Merge
        && task.ctx.target.adapter_type != "duckdb"
        && !columns.is_empty();
    match strategy {
        IncrementalStrategy::Append => {}
        IncrementalStrategy::Merge if merge_natively => {
            session.execute(&merge_sql(target, staged, columns, unique_key)).await?;
            return Ok(());
        }
        IncrementalStrategy::Merge | IncrementalStrategy::DeleteInsert => {
            session
                .execute(&format!(
                    "delete from {} where {}{}",
                    target.render_path(),
                    key_match(unique_key, staged),
                    predicates(task)
                ))
                .await?;
        }
        IncrementalStrategy::Microbatch => {
            let window = window.ok_or_else(|| {
                RunError::Microbatch {
                    node: task.id().to_string(),
                    message: "a batch was applied without its window".to_string(),
                }
            })?;
            session
                .execute(&format!(
                    "delete from {} where {}{}",
                    target.render_path(),
                    window,
                    predicates(task)
                ))
                .await?;
        }
    }
    session.execute(&insert_sql(target, staged, columns)).await?;
    Ok(())
}

fn merge_sql(target: &Relation, staged: &Relation, columns: &[String], unique_key: &[String]) -> String {
    let on = unique_key
        .iter()
        .map(|k| {
            let k = quote_ident(k);
            format!("DBT_INTERNAL_DEST.{} = DBT_INTERNAL_SOURCE.{}", k, k)
        })
        .collect::<Vec<_>>()
        .join(" and ");
    let updates = columns
        .iter()
        .map(|c| {
            let c = quote_ident(c);
            format!("{} = DBT_INTERNAL_SOURCE.{}", c, c)
        })
        .collect::<Vec<_>>()
        .join(", ");
    let values = columns
        .iter()
        .map(|c| format!("DBT_INTERNAL_SOURCE.{}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "merge into {} as DBT_INTERNAL_DEST using {} as DBT_INTERNAL_SOURCE on {} \
         when matched then update set {} \
         when not matched then insert ({}) values ({})",
        target.render_path(),
        staged.render_path(),
        on,
        updates,
        column_list(columns),
        values
    )
}

#[cfg(test)]
#[path = "incremental_test.rs"]
mod tests;
