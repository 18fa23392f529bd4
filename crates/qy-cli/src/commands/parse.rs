//! Parse command implementation

use anyhow::Result;
use qy_core::{ParseStrategy, ResourceType};

use crate::cli::{GlobalArgs, ParseArgs};
use crate::commands::common::Session;

fn describe(strategy: &ParseStrategy) -> String {
    match strategy {
        ParseStrategy::Skip => "no changes, manifest reused".to_string(),
        ParseStrategy::Partial(diff) => format!("partial parse, {} file(s) changed", diff.touched()),
        ParseStrategy::Full(reason) => format!("full parse: {}", reason),
    }
}

/// Execute the parse command
pub async fn execute(args: &ParseArgs, global: &GlobalArgs) -> Result<()> {
    let session = Session::load(global, args.vars.as_deref(), None)?;
    let manifest = &session.manifest;

    let count = |rt: ResourceType| manifest.all_nodes().filter(|n| n.resource_type() == rt).count();
    println!("Parsed project: {} ({})", session.project.name(), describe(&session.strategy));
    println!(
        "  {} models, {} tests, {} seeds, {} snapshots, {} sources, {} macros",
        count(ResourceType::Model),
        count(ResourceType::Test) + count(ResourceType::UnitTest),
        count(ResourceType::Seed),
        count(ResourceType::Snapshot),
        manifest.sources.len(),
        manifest.macros.len()
    );
    if global.verbose {
        for node in manifest.disabled_nodes() {
            println!("  disabled: {}", node.unique_id());
        }
    }
    println!("  Manifest written to {}", session.project.manifest_path().display());
    Ok(())
}
