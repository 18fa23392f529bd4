//! List command implementation

use anyhow::{Context, Result};
use qy_core::{Node, ResourceType};
use serde_json::json;

use crate::cli::{GlobalArgs, ListArgs, ListOutput};
use crate::commands::common::{select_nodes, Session};

/// Resource types listed when `--resource-type` is absent
const LISTED_TYPES: &[ResourceType] = &[
    ResourceType::Model,
    ResourceType::Seed,
    ResourceType::Snapshot,
    ResourceType::Test,
    ResourceType::UnitTest,
    ResourceType::Analysis,
    ResourceType::Function,
    ResourceType::Source,
    ResourceType::Exposure,
    ResourceType::Metric,
    ResourceType::SemanticModel,
    ResourceType::SavedQuery,
];

/// Selector-style name: the fqn, prefixed for non-DAG resources
pub(crate) fn selector_name(node: &Node) -> String {
    let fqn = node.common.fqn.join(".");
    match node.resource_type() {
        ResourceType::Source
        | ResourceType::Exposure
        | ResourceType::Metric
        | ResourceType::SemanticModel
        | ResourceType::SavedQuery
        | ResourceType::UnitTest => format!("{}:{}", node.resource_type().as_str(), fqn),
        _ => fqn,
    }
}

/// One line of `--output json`
pub(crate) fn json_line(node: &Node) -> Result<String> {
    let entry = json!({
        "unique_id": node.unique_id(),
        "resource_type": node.resource_type().as_str(),
        "name": node.name(),
        "package_name": node.package_name(),
        "depends_on": node.common.depends_on,
        "original_file_path": node.common.original_file_path,
    });
    serde_json::to_string(&entry).context("Failed to serialize node")
}

/// Execute the list command
pub async fn execute(args: &ListArgs, global: &GlobalArgs) -> Result<()> {
    let session = Session::load(global, args.vars.as_deref(), None)?;
    let selection = select_nodes(&session, &args.selection, LISTED_TYPES)?;

    let mut lines = Vec::with_capacity(selection.selected.len());
    for id in &selection.selected {
        let Some(node) = session.manifest.node(id) else {
            continue;
        };
        let line = match args.output {
            ListOutput::Selector => selector_name(node),
            ListOutput::Name => node.name().to_string(),
            ListOutput::Path => node.common.original_file_path.clone(),
            ListOutput::Json => json_line(node)?,
        };
        lines.push(line);
    }
    if args.output != ListOutput::Json {
        lines.sort();
    }
    if lines.is_empty() {
        log::warn!("No nodes selected");
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

#[cfg(test)]
#[path = "ls_test.rs"]
mod tests;
