//! Snapshots: type-2 slowly changing dimension tables
//!
//! Every version of a row carries `dbt_valid_from`/`dbt_valid_to`; the
//! current version has a null `dbt_valid_to`. A run closes the current
//! version of changed rows and inserts their new versions.

use super::hooks::NodeHooks;
use super::incremental::stage;
use super::{NodeOutcome, NodeTask, Session};
use crate::compiler::CompileOptions;
use crate::error::{RunError, RunnerResult};
use chrono::Utc;
use qy_core::relation::{escape_sql_string, quote_ident};
use qy_core::{NodeConfig, Relation};
use serde_json::Value;

/// How changed rows are detected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStrategy {
    /// A row changed when its `updated_at` moved forward
    Timestamp { updated_at: String },
    /// A row changed when any listed column differs; empty means all columns
    Check { columns: Vec<String> },
}

/// What to do with rows that vanished from the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardDeletes {
    Ignore,
    Invalidate,
    NewRecord,
}

/// Names of the bookkeeping columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaColumns {
    pub scd_id: String,
    pub updated_at: String,
    pub valid_from: String,
    pub valid_to: String,
    pub is_deleted: String,
}

impl MetaColumns {
    fn from_config(config: &NodeConfig) -> Self {
        let name = |key: &str| {
            config
                .get_path(&format!("snapshot_meta_column_names.{}", key))
                .and_then(Value::as_str)
                .unwrap_or(key)
                .to_string()
        };
        Self {
            scd_id: name("dbt_scd_id"),
            updated_at: name("dbt_updated_at"),
            valid_from: name("dbt_valid_from"),
            valid_to: name("dbt_valid_to"),
            is_deleted: name("dbt_is_deleted"),
        }
    }

    fn all(&self) -> [&str; 5] {
        [
            &self.scd_id,
            &self.updated_at,
            &self.valid_from,
            &self.valid_to,
            &self.is_deleted,
        ]
    }
}

/// A snapshot's resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSpec {
    pub unique_key: Vec<String>,
    pub strategy: SnapshotStrategy,
    pub hard_deletes: HardDeletes,
    pub meta: MetaColumns,
}

impl SnapshotSpec {
    pub fn from_config(config: &NodeConfig) -> Result<Self, String> {
        let unique_key = config.unique_key();
        if unique_key.is_empty() {
            return Err("snapshots require a unique_key".to_string());
        }
        let strategy = match config.get_str("strategy") {
            Some("timestamp") => SnapshotStrategy::Timestamp {
                updated_at: config
                    .get_str("updated_at")
                    .ok_or("the timestamp strategy requires 'updated_at'")?
                    .to_string(),
            },
            Some("check") => match config.get("check_cols") {
                Some(Value::String(s)) if s == "all" => SnapshotStrategy::Check { columns: Vec::new() },
                Some(Value::Array(_)) => SnapshotStrategy::Check {
                    columns: config.get_list("check_cols"),
                },
                _ => return Err("the check strategy requires 'check_cols' ('all' or a list)".to_string()),
            },
            Some(other) => return Err(format!("unknown snapshot strategy '{}'", other)),
            None => return Err("snapshots require a 'strategy'".to_string()),
        };
        let hard_deletes = match config.get_str("hard_deletes") {
            Some("invalidate") => HardDeletes::Invalidate,
            Some("new_record") => HardDeletes::NewRecord,
            Some("ignore") => HardDeletes::Ignore,
            None if config.get_bool("invalidate_hard_deletes") == Some(true) => HardDeletes::Invalidate,
            None => HardDeletes::Ignore,
            Some(other) => return Err(format!("hard_deletes must be ignore, invalidate or new_record, got '{}'", other)),
        };
        Ok(Self {
            unique_key,
            strategy,
            hard_deletes,
            meta: MetaColumns::from_config(config),
        })
    }

    fn col(&self, name: &str) -> String {
        quote_ident(name)
    }

    /// `<a>.k1 = <b>.k1 and ...`
    fn key_join(&self, a: &str, b: &str) -> String {
        self.unique_key
            .iter()
            .map(|k| format!("{a}.{k} = {b}.{k}", a = a, b = b, k = quote_ident(k)))
            .collect::<Vec<_>>()
            .join(" and ")
    }

    /// Expression stamping a new version read from alias `src`
    fn version_time(&self, src: &str, now: &str) -> String {
        match &self.strategy {
            SnapshotStrategy::Timestamp { updated_at } => format!("{}.{}", src, quote_ident(updated_at)),
            SnapshotStrategy::Check { .. } => now.to_string(),
        }
    }

    fn scd_id(&self, src: &str, time: &str) -> String {
        let mut parts: Vec<String> = self
            .unique_key
            .iter()
            .map(|k| format!("coalesce(cast({}.{} as varchar), '')", src, quote_ident(k)))
            .collect();
        parts.push(format!("coalesce(cast({} as varchar), '')", time));
        format!("md5({})", parts.join(" || '|' || "))
    }

    /// Bookkeeping columns appended to a new version
    fn meta_select(&self, src: &str, now: &str, deleted: bool) -> String {
        let time = if deleted { now.to_string() } else { self.version_time(src, now) };
        let mut columns = vec![
            format!("{} as {}", self.scd_id(src, &time), self.col(&self.meta.scd_id)),
            format!("{} as {}", time, self.col(&self.meta.updated_at)),
            format!("{} as {}", time, self.col(&self.meta.valid_from)),
            format!("cast(null as timestamp) as {}", self.col(&self.meta.valid_to)),
        ];
        if self.hard_deletes == HardDeletes::NewRecord {
            columns.push(format!(
                "'{}' as {}",
                if deleted { "True" } else { "False" },
                self.col(&self.meta.is_deleted)
            ));
        }
        columns.join(", ")
    }

    /// First build of the snapshot table
    pub fn create_sql(&self, target: &Relation, source_sql: &str, now: &str) -> String {
        format!(
            "create table {} as (\n select snapshot_source.*, {} from (\n{}\n) snapshot_source\n)",
            target.render_path(),
            self.meta_select("snapshot_source", now, false),
            source_sql
        )
    }

    /// Predicate: the staged row `src` differs from the current version `cur`
    fn changed(&self, cur: &str, src: &str, check_columns: &[String]) -> String {
        let mut predicate = match &self.strategy {
            SnapshotStrategy::Timestamp { updated_at } => {
                let updated = quote_ident(updated_at);
                format!("{src}.{u} > {cur}.{m}", src = src, u = updated, cur = cur, m = self.col(&self.meta.updated_at))
            }
            SnapshotStrategy::Check { .. } if check_columns.is_empty() => "false".to_string(),
            SnapshotStrategy::Check { .. } => check_columns
                .iter()
                .map(|c| {
                    let c = quote_ident(c);
                    format!("{cur}.{c} is distinct from {src}.{c}", cur = cur, src = src, c = c)
                })
                .collect::<Vec<_>>()
                .join(" or "),
        };
        if self.hard_deletes == HardDeletes::NewRecord {
            predicate = format!("({}) or {}.{} = 'True'", predicate, cur, self.col(&self.meta.is_deleted));
        }
        predicate
    }

    /// Close the current version of every changed row
    pub fn close_changed_sql(&self, target: &Relation, staged: &Relation, now: &str, check_columns: &[String]) -> String {
        let cur = quote_ident(target.identifier());
        format!(
            "update {target} set {valid_to} = {time} from {staged} as src where {join} and {cur}.{valid_to} is null and ({changed})",
            target = target.render_path(),
            valid_to = self.col(&self.meta.valid_to),
            time = self.version_time("src", now),
            staged = staged.render_path(),
            join = self.key_join(&cur, "src"),
            cur = cur,
            changed = self.changed(&cur, "src", check_columns),
        )
    }

    /// Insert a new current version for every staged row without one
    pub fn insert_new_sql(&self, target: &Relation, staged: &Relation, now: &str, by_name: bool) -> String {
        format!(
            "insert into {target}{by_name} select src.*, {meta} from {staged} as src where not exists (select 1 from {target} as cur where {join} and cur.{valid_to} is null)",
            target = target.render_path(),
            by_name = if by_name { " by name" } else { "" },
            meta = self.meta_select("src", now, false),
            staged = staged.render_path(),
            join = self.key_join("cur", "src"),
            valid_to = self.col(&self.meta.valid_to),
        )
    }

    /// Statements handling rows missing from the source
    pub fn hard_delete_sql(&self, target: &Relation, staged: &Relation, now: &str) -> Vec<String> {
        if self.hard_deletes == HardDeletes::Ignore {
            return Vec::new();
        }
        let cur = quote_ident(target.identifier());
        let valid_to = self.col(&self.meta.valid_to);
        let missing = format!(
            "not exists (select 1 from {} as src where {})",
            staged.render_path(),
            self.key_join("src", &cur)
        );
        let mut statements = Vec::new();
        if self.hard_deletes == HardDeletes::NewRecord {
            let is_deleted = self.col(&self.meta.is_deleted);
            let meta: Vec<String> = self.meta.all().iter().map(|c| quote_ident(c)).collect();
            statements.push(format!(
                "update {target} set {valid_to} = {now} where {valid_to} is null and {cur}.{is_deleted} = 'False' and {missing}",
                target = target.render_path(),
                valid_to = valid_to,
                now = now,
                cur = cur,
                is_deleted = is_deleted,
                missing = missing,
            ));
            statements.push(format!(
                "insert into {target} by name select {cur}.* exclude ({meta}), {select} from {target} as {cur} where {cur}.{valid_to} = {now} and {cur}.{is_deleted} = 'False' and {missing}",
                target = target.render_path(),
                cur = cur,
                meta = meta.join(", "),
                select = self.meta_select(&cur, now, true),
                valid_to = valid_to,
                now = now,
                is_deleted = is_deleted,
                missing = missing,
            ));
        } else {
            statements.push(format!(
                "update {target} set {valid_to} = {now} where {valid_to} is null and {missing}",
                target = target.render_path(),
                valid_to = valid_to,
                now = now,
                missing = missing,
            ));
        }
        statements
    }
}

fn now_literal() -> String {
    format!(
        "cast('{}' as timestamp)",
        escape_sql_string(&Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string())
    )
}

pub(super) async fn run(task: &NodeTask<'_>, session: &mut Session<'_>) -> RunnerResult<NodeOutcome> {
    let relation = task.relation()?;
    let spec = SnapshotSpec::from_config(task.node.config()).map_err(|m| RunError::materialization(task.id(), m))?;
    let compiled = task.compile(&CompileOptions::default())?;
    let now = now_literal();
    let by_name = task.ctx.target.adapter_type == "duckdb";

    let hooks = NodeHooks::load(task, true);
    hooks.before(task, session).await?;
    let built = async {
        if session.existing(&relation).await?.is_none() {
            session.execute(&spec.create_sql(&relation, &compiled.sql, &now)).await?;
            return Ok(NodeOutcome::success("SELECT"));
        }

        let staged = relation.tmp();
        stage(session, &staged, &compiled.sql).await?;
        let check_columns = match &spec.strategy {
            SnapshotStrategy::Check { columns } if columns.is_empty() => session
                .columns(&staged)
                .await?
                .into_iter()
                .map(|c| c.name)
                .filter(|c| !spec.unique_key.contains(c))
                .collect(),
            SnapshotStrategy::Check { columns } => columns.clone(),
            SnapshotStrategy::Timestamp { .. } => Vec::new(),
        };
        let mut statements = vec![spec.close_changed_sql(&relation, &staged, &now, &check_columns)];
        statements.extend(spec.hard_delete_sql(&relation, &staged, &now));
        statements.push(spec.insert_new_sql(&relation, &staged, &now, by_name));

        let mut result = Ok(());
        for statement in &statements {
            if let Err(e) = session.execute(statement).await {
                result = Err(e);
                break;
            }
        }
        session.drop_existing(&staged).await?;
        result?;
        Ok::<_, RunError>(NodeOutcome::success("MERGE"))
    }
    .await;

    let outcome = hooks.after(task, session, built).await?;
    Ok(outcome
        .with_sql(&compiled.sql)
        .with_response(session.last_response()))
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;
