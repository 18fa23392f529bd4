//! Shared implementation of run, test, build, seed and snapshot

use anyhow::{Context, Result};
use qy_core::{Manifest, PreviousState, ResourceType, RunResults};
use qy_db::ConnectionPool;
use qy_run::{RunContext, RunOptions, Scheduler};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::cli::{GlobalArgs, RunArgs};
use crate::commands::common::{select_nodes, summarize, write_compiled, ConsoleReporter, ExitCode, Session};

/// The executing command being run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Which {
    Run,
    Test,
    Build,
    Seed,
    Snapshot,
}

impl Which {
    pub fn as_str(&self) -> &'static str {
        match self {
            Which::Run => "run",
            Which::Test => "test",
            Which::Build => "build",
            Which::Seed => "seed",
            Which::Snapshot => "snapshot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [Which::Run, Which::Test, Which::Build, Which::Seed, Which::Snapshot]
            .into_iter()
            .find(|w| w.as_str() == s)
    }

    /// Resource types selected when `--resource-type` is absent
    pub fn resource_types(&self) -> &'static [ResourceType] {
        match self {
            Which::Run => &[ResourceType::Model],
            Which::Test => &[ResourceType::Test, ResourceType::UnitTest],
            Which::Seed => &[ResourceType::Seed],
            Which::Snapshot => &[ResourceType::Snapshot],
            Which::Build => &[
                ResourceType::Model,
                ResourceType::Seed,
                ResourceType::Snapshot,
                ResourceType::Test,
                ResourceType::UnitTest,
                ResourceType::Function,
            ],
        }
    }
}

impl fmt::Display for Which {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments recorded in run_results.json for `retry`
pub(crate) fn invocation_args(which: Which, args: &RunArgs) -> Result<BTreeMap<String, Value>> {
    let mut map = BTreeMap::new();
    map.insert("which".to_string(), Value::String(which.as_str().to_string()));
    if let Value::Object(fields) = serde_json::to_value(args).context("Failed to record arguments")? {
        map.extend(fields);
    }
    Ok(map)
}

/// Prior manifest to resolve unselected refs against, when deferring
pub(crate) fn defer_manifest(args: &RunArgs, state: Option<&PreviousState>) -> Option<Arc<Manifest>> {
    if !args.selection.defer {
        return None;
    }
    state.map(|s| Arc::new(s.manifest.clone()))
}

/// Execute one of the executing commands
pub async fn execute(which: Which, args: &RunArgs, global: &GlobalArgs) -> Result<()> {
    let session = Session::load(global, args.vars.as_deref(), args.threads)?;
    let selection = select_nodes(&session, &args.selection, which.resource_types())?;
    run_selected(which, args, global, session, selection.selected, selection.state).await
}

/// Schedule `selected`, report progress and write run_results.json
pub(crate) async fn run_selected(
    which: Which,
    args: &RunArgs,
    global: &GlobalArgs,
    session: Session,
    selected: BTreeSet<String>,
    state: Option<PreviousState>,
) -> Result<()> {
    let recorded_args = invocation_args(which, args)?;
    let renderer = session.renderer();
    let Session {
        project,
        profile,
        invocation,
        manifest,
        ..
    } = session;
    let results_path = project.run_results_path();

    if selected.is_empty() {
        println!("Nothing to {}: no nodes match the selection", which);
        RunResults::new(&invocation, recorded_args, 0.0, Vec::new())
            .save(&results_path)
            .context("Failed to write run_results.json")?;
        return Ok(());
    }

    let threads = profile.target.threads.max(1);
    let options = RunOptions {
        threads,
        fail_fast: args.fail_fast,
        full_refresh: args.full_refresh,
        empty: args.empty,
        store_failures: args.store_failures,
        event_time_start: args.event_time_start.clone(),
        event_time_end: args.event_time_end.clone(),
    };
    let ctx = Arc::new(
        RunContext::new(Arc::new(manifest), renderer, profile.target.clone(), Arc::clone(&invocation))
            .with_options(options)
            .with_selection(selected)
            .with_defer(defer_manifest(args, state.as_ref())),
    );

    let adapter = profile.open()?;
    let pool = Arc::new(ConnectionPool::new(adapter, threads));
    let reporter = Arc::new(ConsoleReporter::new(Arc::clone(&invocation), global.verbose));
    let scheduler = Scheduler::new(Arc::clone(&ctx), Arc::clone(&pool))
        .with_reporter(reporter)
        .with_tests_gating_children(which == Which::Build);

    let cancel = ctx.cancel_flag();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; waiting for running nodes to finish");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    println!(
        "Running {} for project {} with {} thread{}",
        which,
        project.name(),
        threads,
        if threads == 1 { "" } else { "s" }
    );
    let outcome = scheduler.run().await;
    watcher.abort();
    pool.close();
    let outcome = outcome.context("Run failed")?;

    for result in &outcome.results {
        if let (Some(sql), Some(node)) = (&result.compiled_code, ctx.node(&result.unique_id)) {
            if let Err(e) = write_compiled(&project, node, sql) {
                log::warn!("{:#}", e);
            }
        }
    }

    let results = RunResults::new(&invocation, recorded_args, outcome.elapsed, outcome.results.clone());
    results
        .save(&results_path)
        .context("Failed to write run_results.json")?;

    println!();
    println!("Completed: {} [{:.2}s]", summarize(&outcome.results), outcome.elapsed);

    if ctx.is_cancelled() {
        return Err(ExitCode(2).into());
    }
    if outcome.has_failures() {
        return Err(ExitCode(1).into());
    }
    Ok(())
}

#[cfg(test)]
#[path = "execute_test.rs"]
mod tests;
