//! The DAG scheduler
//!
//! A supervisor loop owns the ready queue and the result list. Workers are
//! tokio tasks in a [`JoinSet`], at most `threads` at a time; each builds one
//! node through the materialization dispatcher and hands its [`RunResult`]
//! back to the supervisor.

use crate::compiler::Compiler;
use crate::context::RunContext;
use crate::error::{RunError, RunnerResult};
use crate::materialize::{materialize, NodeOutcome, NodeTask};
use crate::plan::ExecutionPlan;
use chrono::Utc;
use qy_core::run_results::TimingInfo;
use qy_core::{Node, RunResult, RunStatus};
use qy_db::ConnectionPool;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{self, JoinSet};

pub const FAIL_FAST_REASON: &str = "cancelled due to fail_fast";
pub const CANCELLED_REASON: &str = "cancelled";

/// Receives progress as nodes start and finish
pub trait Reporter: Send + Sync {
    fn node_started(&self, _node: &Node) {}
    fn node_finished(&self, _node: &Node, _result: &RunResult) {}
}

/// Reporter that ignores everything
pub struct NoopReporter;

impl Reporter for NoopReporter {}

/// Results of one scheduled run, in completion order
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub results: Vec<RunResult>,
    pub elapsed: f64,
}

impl RunOutcome {
    pub fn get(&self, unique_id: &str) -> Option<&RunResult> {
        self.results.iter().find(|r| r.unique_id == unique_id)
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.status.is_failure())
    }
}

pub struct Scheduler {
    ctx: Arc<RunContext>,
    pool: Arc<ConnectionPool>,
    reporter: Arc<dyn Reporter>,
    tests_gate_children: bool,
}

impl Scheduler {
    pub fn new(ctx: Arc<RunContext>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            ctx,
            pool,
            reporter: Arc::new(NoopReporter),
            tests_gate_children: false,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// `build` ordering: tests run before the children of what they test
    pub fn with_tests_gating_children(mut self, enabled: bool) -> Self {
        self.tests_gate_children = enabled;
        self
    }

    pub fn plan(&self) -> RunnerResult<ExecutionPlan> {
        Ok(ExecutionPlan::new(
            &self.ctx.manifest,
            &self.ctx.selected,
            self.tests_gate_children,
        )?)
    }

    /// Run start hooks, the plan, then end hooks
    pub async fn run(&self) -> RunnerResult<RunOutcome> {
        let started = Instant::now();
        let plan = self.plan()?;
        let compiler = Compiler::new(Arc::clone(&self.ctx));
        let mut results = Vec::new();
        log::info!(
            "Running {} nodes with {} threads",
            plan.len(),
            self.ctx.options.threads.max(1)
        );

        if !plan.is_empty() {
            self.create_schemas(&plan).await?;
        }

        let start_failed = self.run_hooks("on-run-start", &compiler, &mut results).await;
        match start_failed {
            Some(hook) => {
                let reason = format!("on-run-start hook {} failed", hook);
                for id in &plan.order {
                    self.record_skip(id, &reason, &mut results);
                }
            }
            None => self.run_plan(&plan, &compiler, &mut results).await,
        }
        self.run_hooks("on-run-end", &compiler, &mut results).await;

        Ok(RunOutcome {
            results,
            elapsed: started.elapsed().as_secs_f64(),
        })
    }

    /// Schemas of every relation the plan writes
    async fn create_schemas(&self, plan: &ExecutionPlan) -> RunnerResult<()> {
        let schemas: BTreeSet<(String, String)> = plan
            .order
            .iter()
            .filter_map(|id| self.ctx.node(id))
            .filter(|n| n.resource_type().materializable())
            .filter_map(|n| n.relation_triple())
            .map(|(db, schema, _)| (db, schema))
            .collect();
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| RunError::database("schemas", e))?;
        for (database, schema) in schemas {
            log::debug!("Creating schema {}.{}", database, schema);
            conn.create_schema(&database, &schema)
                .await
                .map_err(|e| RunError::database(&format!("{}.{}", database, schema), e))?;
        }
        Ok(())
    }

    /// Run project hooks in order; returns the first that failed
    async fn run_hooks(&self, hook_type: &str, compiler: &Compiler, results: &mut Vec<RunResult>) -> Option<String> {
        let hooks: Vec<Node> = self.ctx.manifest.hooks(hook_type).into_iter().cloned().collect();
        let mut failed = None;
        for hook in hooks {
            if failed.is_some() && hook_type == "on-run-start" {
                break;
            }
            self.reporter.node_started(&hook);
            let result = execute_node(
                Arc::clone(&self.ctx),
                compiler.clone(),
                Arc::clone(&self.pool),
                Arc::new(hook.clone()),
                "main".to_string(),
            )
            .await;
            self.reporter.node_finished(&hook, &result);
            if result.status.is_failure() && failed.is_none() {
                failed = Some(hook.unique_id().to_string());
            }
            results.push(result);
        }
        failed
    }

    fn record_skip(&self, id: &str, reason: &str, results: &mut Vec<RunResult>) {
        let result = RunResult::skipped(id, reason);
        if let Some(node) = self.ctx.node(id) {
            self.reporter.node_finished(node, &result);
        }
        results.push(result);
    }

    async fn run_plan(&self, plan: &ExecutionPlan, compiler: &Compiler, results: &mut Vec<RunResult>) {
        let threads = self.ctx.options.threads.max(1);
        let mut waiting: HashMap<&str, usize> = plan
            .parents
            .iter()
            .map(|(id, parents)| (id.as_str(), parents.len()))
            .collect();
        let mut ready: VecDeque<&String> = plan.order.iter().filter(|id| waiting.get(id.as_str()) == Some(&0)).collect();
        let mut settled: BTreeSet<String> = BTreeSet::new();
        let mut set = JoinSet::new();
        let mut running: HashMap<task::Id, String> = HashMap::new();
        let mut stop: Option<&str> = None;
        let mut dispatched = 0usize;

        loop {
            if stop.is_none() && self.ctx.is_cancelled() {
                log::warn!("Interrupted; waiting for running nodes to finish");
                stop = Some(CANCELLED_REASON);
            }
            while stop.is_none() && set.len() < threads {
                let Some(id) = ready.pop_front() else {
                    break;
                };
                let Some(node) = self.ctx.node(id) else {
                    continue;
                };
                self.reporter.node_started(node);
                let thread_id = format!("Thread-{}", dispatched % threads + 1);
                dispatched += 1;
                let handle = set.spawn(execute_node(
                    Arc::clone(&self.ctx),
                    compiler.clone(),
                    Arc::clone(&self.pool),
                    Arc::new(node.clone()),
                    thread_id,
                ));
                running.insert(handle.id(), id.clone());
            }

            let Some(joined) = set.join_next_with_id().await else {
                break;
            };
            let result = match joined {
                Ok((task_id, result)) => {
                    running.remove(&task_id);
                    result
                }
                Err(e) => {
                    let Some(id) = running.remove(&e.id()) else {
                        log::error!("Untracked worker task failed: {}", e);
                        continue;
                    };
                    log::error!("Worker for {} failed: {}", id, e);
                    let message = if e.is_panic() {
                        format!("worker panicked while building {}", id)
                    } else {
                        format!("worker for {} was aborted", id)
                    };
                    RunResult::new(&id, RunStatus::Error).with_message(message)
                }
            };
            let id = result.unique_id.clone();
            settled.insert(id.clone());
            if let Some(node) = self.ctx.node(&id) {
                self.reporter.node_finished(node, &result);
            }
            let status = result.status;
            results.push(result);

            if status.blocks_children() {
                let reason = format!("upstream {} finished with status {}", id, status);
                for child in plan.descendants(&id) {
                    if settled.insert(child.clone()) {
                        self.record_skip(&child, &reason, results);
                    }
                }
            }
            if status.is_failure() && self.ctx.options.fail_fast && stop.is_none() {
                log::warn!("{} failed; fail_fast stops the run", id);
                stop = Some(FAIL_FAST_REASON);
            }
            for child in plan.children.get(&id).into_iter().flatten() {
                if settled.contains(child) {
                    continue;
                }
                if let Some(count) = waiting.get_mut(child.as_str()) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.push_back(child);
                    }
                }
            }
        }

        let reason = stop.unwrap_or(CANCELLED_REASON);
        for id in &plan.order {
            if !settled.contains(id) {
                self.record_skip(id, reason, results);
            }
        }
    }
}

/// Build one node and turn the outcome into a result
async fn execute_node(
    ctx: Arc<RunContext>,
    compiler: Compiler,
    pool: Arc<ConnectionPool>,
    node: Arc<Node>,
    thread_id: String,
) -> RunResult {
    let started_at = Utc::now();
    let clock = Instant::now();
    let task = NodeTask {
        ctx: &ctx,
        compiler: &compiler,
        pool: &pool,
        node: &node,
    };
    let outcome = materialize(&task).await;
    let completed_at = Utc::now();

    let mut result = match outcome {
        Ok(outcome) => from_outcome(node.unique_id(), outcome),
        Err(e) => {
            let status = if e.is_runtime() {
                RunStatus::RuntimeError
            } else {
                RunStatus::Error
            };
            RunResult::new(node.unique_id(), status).with_message(e.to_string())
        }
    };
    result.message = result.message.map(|m| ctx.invocation.scrub(&m));
    result.thread_id = thread_id;
    result.execution_time = clock.elapsed().as_secs_f64();
    result.relation_name = node.common.relation_name.clone();
    result.timing.push(TimingInfo {
        name: "execute".to_string(),
        started_at,
        completed_at,
    });
    result
}

fn from_outcome(unique_id: &str, outcome: NodeOutcome) -> RunResult {
    let mut result = RunResult::new(unique_id, outcome.status);
    result.message = outcome.message;
    result.failures = outcome.failures;
    result.compiled_code = outcome.compiled_code;
    result.batch_results = outcome.batch_results;
    if let Some(response) = outcome.adapter_response {
        result.adapter_response = response.to_map();
    }
    result
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod tests;
