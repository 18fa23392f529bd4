//! The run-results artifact written at the end of every executing command.
//!
//! `retry` reads it back to re-select failed and skipped nodes, and the
//! `result:<status>` selector method matches against it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use crate::artifact;
use crate::error::CoreResult;
use crate::invocation::Invocation;

/// Schema identifier written into every run results file
pub const RUN_RESULTS_SCHEMA_VERSION: &str = "https://schemas.getdbt.com/dbt/run-results/v6.json";

/// Outcome of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Success,
    Error,
    Skipped,
    Warn,
    PartialSuccess,
    Pass,
    Fail,
    RuntimeError,
    Noop,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Skipped => "skipped",
            RunStatus::Warn => "warn",
            RunStatus::PartialSuccess => "partial-success",
            RunStatus::Pass => "pass",
            RunStatus::Fail => "fail",
            RunStatus::RuntimeError => "runtime-error",
            RunStatus::Noop => "noop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let status = match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "success" => RunStatus::Success,
            "error" => RunStatus::Error,
            "skipped" => RunStatus::Skipped,
            "warn" => RunStatus::Warn,
            "partial-success" => RunStatus::PartialSuccess,
            "pass" => RunStatus::Pass,
            "fail" => RunStatus::Fail,
            "runtime-error" => RunStatus::RuntimeError,
            "noop" => RunStatus::Noop,
            _ => return None,
        };
        Some(status)
    }

    /// Children of a node with this status are skipped
    pub fn blocks_children(&self) -> bool {
        matches!(
            self,
            RunStatus::Error | RunStatus::RuntimeError | RunStatus::Skipped | RunStatus::Fail
        )
    }

    /// Counts as a failure for the exit code
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RunStatus::Error | RunStatus::RuntimeError | RunStatus::Fail | RunStatus::PartialSuccess
        )
    }

    /// Re-run by `retry`
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RunStatus::Error
                | RunStatus::RuntimeError
                | RunStatus::Fail
                | RunStatus::Skipped
                | RunStatus::PartialSuccess
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start and end of one phase of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    /// `compile` or `execute`
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Per-batch outcome of a microbatch model, as `[start, end)` windows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResults {
    #[serde(default)]
    pub successful: Vec<(String, String)>,
    #[serde(default)]
    pub failed: Vec<(String, String)>,
}

/// One executed (or skipped) node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub unique_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub timing: Vec<TimingInfo>,
    pub thread_id: String,
    pub execution_time: f64,
    #[serde(default)]
    pub adapter_response: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failures: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_results: Option<BatchResults>,
}

impl RunResult {
    pub fn new(unique_id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            unique_id: unique_id.into(),
            status,
            timing: Vec::new(),
            thread_id: String::new(),
            execution_time: 0.0,
            adapter_response: BTreeMap::new(),
            message: None,
            failures: None,
            skip_reason: None,
            compiled_code: None,
            relation_name: None,
            batch_results: None,
        }
    }

    /// A node that never started
    pub fn skipped(unique_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut result = Self::new(unique_id, RunStatus::Skipped);
        result.message = Some(reason.clone());
        result.skip_reason = Some(reason);
        result
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResultsMetadata {
    pub dbt_schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub invocation_id: String,
    /// `DBT_ENV_CUSTOM_ENV_*` values, prefix stripped
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// `run_results.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    pub metadata: RunResultsMetadata,
    pub results: Vec<RunResult>,
    pub elapsed_time: f64,
    /// The invocation's command and flags, replayed by `retry`
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

impl RunResults {
    pub fn new(
        invocation: &Invocation,
        args: BTreeMap<String, Value>,
        elapsed_time: f64,
        mut results: Vec<RunResult>,
    ) -> Self {
        results.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        Self {
            metadata: RunResultsMetadata {
                dbt_schema_version: RUN_RESULTS_SCHEMA_VERSION.to_string(),
                generated_at: Utc::now(),
                invocation_id: invocation.invocation_id.clone(),
                env: invocation.env().custom_env(),
            },
            results,
            elapsed_time,
            args,
        }
    }

    pub fn load(path: &Path) -> CoreResult<Option<Self>> {
        artifact::read_json(path)
    }

    pub fn save(&self, path: &Path) -> CoreResult<()> {
        artifact::write_json(path, self)
    }

    pub fn get(&self, unique_id: &str) -> Option<&RunResult> {
        self.results.iter().find(|r| r.unique_id == unique_id)
    }

    /// Unique ids of nodes that ended with `status`
    pub fn with_status(&self, status: RunStatus) -> BTreeSet<String> {
        self.results
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.unique_id.clone())
            .collect()
    }

    /// Nodes `retry` runs again
    pub fn retry_ids(&self) -> BTreeSet<String> {
        self.results
            .iter()
            .filter(|r| r.status.is_retryable())
            .map(|r| r.unique_id.clone())
            .collect()
    }

    /// Count of results per status
    pub fn summary(&self) -> BTreeMap<RunStatus, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.results {
            *counts.entry(r.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.status.is_failure())
    }
}

#[cfg(test)]
#[path = "run_results_test.rs"]
mod tests;
