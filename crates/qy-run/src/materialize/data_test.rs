//! Data tests: singular SQL tests and generic test macros

use super::{NodeOutcome, NodeTask, Session};
use crate::compiler::CompileOptions;
use crate::error::{RunError, RunnerResult};
use qy_core::{NodeConfig, RunStatus};
use qy_db::QueryResult;
use serde_json::Value;

/// `severity` plus the row-count thresholds of a test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thresholds {
    pub error_severity: bool,
    pub fail_calc: String,
    pub warn_if: String,
    pub error_if: String,
    pub limit: Option<i64>,
}

impl Thresholds {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            error_severity: !config
                .get_str("severity")
                .is_some_and(|s| s.eq_ignore_ascii_case("warn")),
            fail_calc: config.get_str("fail_calc").unwrap_or("count(*)").to_string(),
            warn_if: config.get_str("warn_if").unwrap_or("!= 0").to_string(),
            error_if: config.get_str("error_if").unwrap_or("!= 0").to_string(),
            limit: config.get("limit").and_then(Value::as_i64),
        }
    }

    /// Wrap a test query so it returns one row of counts and flags
    pub fn summary_sql(&self, sql: &str) -> String {
        let limit = self.limit.map(|n| format!("\nlimit {}", n)).unwrap_or_default();
        format!(
            "select {calc} as failures, {calc} {warn} as should_warn, {calc} {error} as should_error from (\n{sql}{limit}\n) dbt_internal_test",
            calc = self.fail_calc,
            warn = self.warn_if,
            error = self.error_if,
            sql = sql,
            limit = limit,
        )
    }

    /// Status for a summary row
    ///
    /// `error_if` only applies at error severity.
    pub fn status(&self, should_warn: bool, should_error: bool) -> RunStatus {
        if self.error_severity && should_error {
            RunStatus::Fail
        } else if should_warn {
            RunStatus::Warn
        } else {
            RunStatus::Pass
        }
    }

    fn condition(&self, status: RunStatus) -> &str {
        match status {
            RunStatus::Fail => &self.error_if,
            _ => &self.warn_if,
        }
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "t" | "1"),
        _ => false,
    }
}

/// `(failures, should_warn, should_error)` from the summary query
pub fn read_summary(result: &QueryResult) -> (i64, bool, bool) {
    let Some(row) = result.rows.first() else {
        return (0, false, false);
    };
    let cell = |name: &str| {
        result
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|i| row.get(i))
    };
    let failures = match cell("failures") {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    };
    (failures, truthy(cell("should_warn")), truthy(cell("should_error")))
}

fn stores_failures(task: &NodeTask<'_>) -> Option<&'static str> {
    let config = task.node.config();
    let as_kind = config.get_str("store_failures_as");
    let enabled = config.get_bool("store_failures").unwrap_or(task.ctx.options.store_failures) || as_kind.is_some();
    if !enabled {
        return None;
    }
    match as_kind {
        Some("view") => Some("view"),
        Some("ephemeral") => None,
        _ => Some("table"),
    }
}

pub(super) async fn run(task: &NodeTask<'_>, session: &mut Session<'_>) -> RunnerResult<NodeOutcome> {
    let compiled = task.compile(&CompileOptions::default())?;
    let thresholds = Thresholds::from_config(task.node.config());

    if let Some(kind) = stores_failures(task) {
        let relation = task.relation()?;
        session
            .connection()
            .create_schema(relation.database(), relation.schema())
            .await
            .map_err(|e| RunError::database(task.id(), e))?;
        session.drop_existing(&relation).await?;
        session
            .execute(&format!(
                "create {} {} as (\n{}\n)",
                kind,
                relation.render_path(),
                compiled.sql
            ))
            .await?;
    }

    let result = session.query(&thresholds.summary_sql(&compiled.sql)).await?;
    let (failures, should_warn, should_error) = read_summary(&result);
    let status = thresholds.status(should_warn, should_error);
    let message = match status {
        RunStatus::Pass => None,
        _ => Some(format!(
            "Got {} result{}, configured to {} if {}",
            failures,
            if failures == 1 { "" } else { "s" },
            if status == RunStatus::Fail { "fail" } else { "warn" },
            thresholds.condition(status)
        )),
    };

    let mut outcome = NodeOutcome::new(status).with_sql(&compiled.sql);
    outcome.failures = Some(failures);
    outcome.message = message;
    Ok(outcome)
}

#[cfg(test)]
#[path = "data_test_test.rs"]
mod tests;
