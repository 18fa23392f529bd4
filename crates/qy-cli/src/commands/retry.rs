//! Retry command implementation

use anyhow::{anyhow, bail, Context, Result};
use qy_core::{PreviousState, ResourceType, RunResults};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::cli::{GlobalArgs, RetryArgs, RunArgs};
use crate::commands::common::{load_project, Session};
use crate::commands::execute::{run_selected, Which};

/// The command and arguments of the invocation that wrote `results`
pub(crate) fn previous_command(results: &RunResults) -> Result<(Which, RunArgs)> {
    let which = results
        .args
        .get("which")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("run_results.json does not record which command produced it"))?;
    let which = Which::parse(which).ok_or_else(|| anyhow!("'{}' cannot be retried", which))?;
    let fields: serde_json::Map<String, Value> = results
        .args
        .iter()
        .filter(|(k, _)| k.as_str() != "which")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let args: RunArgs =
        serde_json::from_value(Value::Object(fields)).context("Unable to read the previous arguments")?;
    Ok((which, args))
}

/// Execute the retry command
pub async fn execute(args: &RetryArgs, global: &GlobalArgs) -> Result<()> {
    let project = load_project(global)?;
    let path = project.run_results_path();
    let Some(previous) = RunResults::load(&path)? else {
        bail!("No previous run results found at {}", path.display());
    };
    let (which, mut run_args) = previous_command(&previous)?;
    if args.threads.is_some() {
        run_args.threads = args.threads;
    }
    run_args.fail_fast |= args.fail_fast;

    let retry_ids = previous.retry_ids();
    if retry_ids.is_empty() {
        println!("Nothing to retry: the previous {} finished without failures", which);
        return Ok(());
    }

    let session = Session::load(global, run_args.vars.as_deref(), run_args.threads)?;
    let selected: BTreeSet<String> = retry_ids
        .into_iter()
        .filter(|id| {
            session
                .manifest
                .node(id)
                .is_some_and(|n| n.resource_type() != ResourceType::Operation)
        })
        .collect();
    let state = match &run_args.selection.state {
        Some(dir) if run_args.selection.defer => Some(PreviousState::load(dir)?),
        _ => None,
    };
    println!(
        "Retrying {} node{} from the previous {}",
        selected.len(),
        if selected.len() == 1 { "" } else { "s" },
        which
    );
    run_selected(which, &run_args, global, session, selected, state).await
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
