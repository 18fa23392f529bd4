//! Microbatch incremental models
//!
//! The model's time range is cut into `batch_size` windows over its
//! `event_time` column. Inputs that declare an `event_time` are filtered to
//! each window. Batches after the first run concurrently, bounded by half
//! the thread count.

use super::hooks::NodeHooks;
use super::incremental::{apply, on_schema_change_for, reconcile_columns, stage, IncrementalStrategy};
use super::models::create_table_sql;
use super::{NodeOutcome, NodeTask, Session};
use crate::compiler::{CompileOptions, Compiler};
use crate::context::RunContext;
use crate::error::{RunError, RunnerResult};
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, Timelike, Utc};
use qy_core::relation::EventTimeFilter;
use qy_core::run_results::BatchResults;
use qy_core::{Node, Relation, RunStatus};
use qy_db::ConnectionPool;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn is_microbatch(node: &Node) -> bool {
    node.materialized() == "incremental"
        && node.config().get_str("incremental_strategy") == Some("microbatch")
}

/// Width of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSize {
    Hour,
    Day,
    Month,
    Year,
}

impl BatchSize {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }

    /// Start of the batch containing `ts`
    pub fn truncate(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let date = ts.date();
        let day_start = |d: NaiveDate| d.and_hms_opt(0, 0, 0).unwrap_or(ts);
        match self {
            Self::Hour => date.and_hms_opt(ts.hour(), 0, 0).unwrap_or(ts),
            Self::Day => day_start(date),
            Self::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .map(day_start)
                .unwrap_or(ts),
            Self::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)
                .map(day_start)
                .unwrap_or(ts),
        }
    }

    pub fn advance(&self, ts: NaiveDateTime, n: i64) -> NaiveDateTime {
        match self {
            Self::Hour => ts + Duration::hours(n),
            Self::Day => ts + Duration::days(n),
            Self::Month | Self::Year => {
                let months = if *self == Self::Year { n * 12 } else { n };
                if months >= 0 {
                    ts.checked_add_months(Months::new(months as u32)).unwrap_or(ts)
                } else {
                    ts.checked_sub_months(Months::new(months.unsigned_abs() as u32))
                        .unwrap_or(ts)
                }
            }
        }
    }
}

/// Parse `2024-01-01`, `2024-01-01 10:00:00`, `2024-01-01T10:00:00` or RFC 3339
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(ts.naive_utc());
    }
    for format in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Half-open batch windows covering `[start, end)`
pub fn batch_windows(size: BatchSize, start: NaiveDateTime, end: NaiveDateTime) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut windows = Vec::new();
    let mut current = size.truncate(start);
    while current < end {
        let next = size.advance(current, 1);
        if next <= current {
            break;
        }
        windows.push((current, next));
        current = next;
    }
    windows
}

/// Combined status of a set of batches
pub fn batch_status(successful: usize, failed: usize) -> RunStatus {
    match (successful, failed) {
        (_, 0) => RunStatus::Success,
        (0, _) => RunStatus::Error,
        _ => RunStatus::PartialSuccess,
    }
}

struct Batching {
    field: String,
    windows: Vec<(NaiveDateTime, NaiveDateTime)>,
}

fn plan_batches(ctx: &RunContext, node: &Node, exists: bool) -> RunnerResult<Batching> {
    let config = node.config();
    let fail = |message: String| RunError::Microbatch {
        node: node.unique_id().to_string(),
        message,
    };
    let field = config
        .event_time()
        .ok_or_else(|| fail("microbatch models require 'event_time'".to_string()))?
        .to_string();
    let size_name = config
        .get_str("batch_size")
        .ok_or_else(|| fail("microbatch models require 'batch_size'".to_string()))?;
    let size = BatchSize::parse(size_name)
        .ok_or_else(|| fail(format!("batch_size '{}' must be hour, day, month or year", size_name)))?;

    let now = Utc::now().naive_utc();
    let parse = |value: &str, what: &str| {
        parse_timestamp(value).ok_or_else(|| fail(format!("{} '{}' is not a timestamp", what, value)))
    };
    let end = match &ctx.options.event_time_end {
        Some(end) => parse(end, "--event-time-end")?,
        None => size.advance(size.truncate(now), 1),
    };
    let start = match &ctx.options.event_time_start {
        Some(start) => parse(start, "--event-time-start")?,
        None if exists => {
            let lookback = config.get("lookback").and_then(|v| v.as_i64()).unwrap_or(1);
            size.advance(size.truncate(now), -lookback)
        }
        None => {
            let begin = config
                .get_str("begin")
                .ok_or_else(|| fail("microbatch models require 'begin' on their first run".to_string()))?;
            parse(begin, "begin")?
        }
    };
    if start >= end {
        return Err(fail(format!(
            "the batch window is empty ({} >= {})",
            start.format(TIMESTAMP_FORMAT),
            end.format(TIMESTAMP_FORMAT)
        )));
    }
    Ok(Batching {
        field,
        windows: batch_windows(size, start, end),
    })
}

/// Owned pieces a spawned batch needs
#[derive(Clone)]
struct BatchEnv {
    ctx: Arc<RunContext>,
    compiler: Compiler,
    pool: Arc<ConnectionPool>,
    node: Arc<Node>,
    relation: Relation,
    field: String,
}

impl BatchEnv {
    fn window_sql(&self, start: &str, end: &str) -> String {
        format!("{} >= '{}' and {} < '{}'", self.field, start, self.field, end)
    }

    /// Build one batch; `create` builds the relation from it
    async fn run(&self, index: usize, start: String, end: String, create: bool) -> RunnerResult<()> {
        let task = NodeTask {
            ctx: &self.ctx,
            compiler: &self.compiler,
            pool: &self.pool,
            node: &self.node,
        };
        let compiled = task.compile(&CompileOptions {
            is_incremental: !create,
            batch: Some(EventTimeFilter {
                field: self.field.clone(),
                start: start.clone(),
                end: end.clone(),
            }),
            ..Default::default()
        })?;
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| RunError::database(task.id(), e))?;
        let mut session = Session::new(task.id(), &*conn);
        if create {
            session.execute(&create_table_sql(&self.relation, &compiled.sql)).await?;
            return Ok(());
        }

        let staged = self.relation.replace_path(
            None,
            None,
            Some(format!("{}_{}", self.relation.tmp().identifier(), index)),
        );
        stage(&mut session, &staged, &compiled.sql).await?;
        let applied = async {
            let columns = reconcile_columns(&task, &mut session, &self.relation, &staged, on_schema_change_for(&task)?).await?;
            apply(
                &task,
                &mut session,
                IncrementalStrategy::Microbatch,
                &self.relation,
                &staged,
                &columns,
                &[],
                Some(self.window_sql(&start, &end)),
            )
            .await
        }
        .await;
        session.drop_existing(&staged).await?;
        applied
    }
}

pub(crate) async fn run(task: &NodeTask<'_>) -> RunnerResult<NodeOutcome> {
    let relation = task.relation()?;
    let hooks = NodeHooks::load(task, false);
    let exists = {
        let conn = task
            .pool
            .acquire()
            .await
            .map_err(|e| RunError::database(task.id(), e))?;
        let mut session = Session::new(task.id(), &*conn);
        hooks.before(task, &mut session).await?;
        session.existing(&relation).await?.is_some()
    };

    let batching = plan_batches(task.ctx, task.node, exists)?;
    let env = BatchEnv {
        ctx: Arc::clone(task.ctx),
        compiler: task.compiler.clone(),
        pool: Arc::clone(task.pool),
        node: Arc::new(task.node.clone()),
        relation: relation.clone(),
        field: batching.field.clone(),
    };
    let windows: Vec<(usize, String, String)> = batching
        .windows
        .iter()
        .enumerate()
        .map(|(i, (s, e))| (i, s.format(TIMESTAMP_FORMAT).to_string(), e.format(TIMESTAMP_FORMAT).to_string()))
        .collect();
    log::info!("Running {} in {} batches", task.id(), windows.len());

    let mut results = BatchResults::default();
    let mut remaining = windows.as_slice();
    if !exists {
        if let Some(((index, start, end), rest)) = remaining.split_first() {
            match env.run(*index, start.clone(), end.clone(), true).await {
                Ok(()) => results.successful.push((start.clone(), end.clone())),
                Err(e) => {
                    log::warn!("Batch {} of {} failed: {}", index + 1, task.id(), e);
                    results.failed.push((start.clone(), end.clone()));
                    let outcome = NodeOutcome::new(RunStatus::Error).with_message(e.to_string());
                    return Ok(with_batches(outcome, results, rest));
                }
            }
            remaining = rest;
        }
    }

    let concurrent = task
        .node
        .config()
        .get_bool("concurrent_batches")
        .unwrap_or(true);
    let permits = if concurrent {
        (task.ctx.options.threads / 2).max(1)
    } else {
        1
    };
    let semaphore = Arc::new(Semaphore::new(permits));
    let mut set = JoinSet::new();
    for (index, start, end) in remaining.iter().cloned() {
        let env = env.clone();
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let outcome = env.run(index, start.clone(), end.clone(), false).await;
            (index, start, end, outcome)
        });
    }
    let mut finished = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(done) => finished.push(done),
            Err(e) => return Err(RunError::Internal(format!("batch task failed: {}", e))),
        }
    }
    finished.sort_by_key(|(index, ..)| *index);
    let mut first_error = None;
    for (index, start, end, outcome) in finished {
        match outcome {
            Ok(()) => results.successful.push((start, end)),
            Err(e) => {
                log::warn!("Batch {} of {} failed: {}", index + 1, task.id(), e);
                first_error.get_or_insert_with(|| e.to_string());
                results.failed.push((start, end));
            }
        }
    }

    let status = batch_status(results.successful.len(), results.failed.len());
    let message = match (&status, first_error) {
        (RunStatus::Success, _) => format!("{} batches", results.successful.len()),
        (_, Some(error)) => format!(
            "{} of {} batches failed: {}",
            results.failed.len(),
            results.failed.len() + results.successful.len(),
            error
        ),
        (_, None) => String::new(),
    };

    if status == RunStatus::Success {
        let conn = task
            .pool
            .acquire()
            .await
            .map_err(|e| RunError::database(task.id(), e))?;
        let mut session = Session::new(task.id(), &*conn);
        hooks
            .after(task, &mut session, Ok(NodeOutcome::new(RunStatus::Success)))
            .await?;
    }
    Ok(with_batches(NodeOutcome::new(status).with_message(message), results, &[]))
}

fn with_batches(mut outcome: NodeOutcome, mut results: BatchResults, unrun: &[(usize, String, String)]) -> NodeOutcome {
    for (_, start, end) in unrun {
        results.failed.push((start.clone(), end.clone()));
    }
    outcome.batch_results = Some(results);
    outcome
}

#[cfg(test)]
#[path = "microbatch_test.rs"]
mod tests;
