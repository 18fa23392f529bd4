//! Compile command implementation

use anyhow::{Context, Result};
use qy_core::ResourceType;
use qy_run::{CompileOptions, Compiler, RunContext};
use std::sync::Arc;

use crate::cli::{CompileArgs, GlobalArgs};
use crate::commands::common::{select_nodes, write_compiled, ExitCode, Session};

/// Nodes compile renders
fn compiles(resource_type: ResourceType) -> bool {
    resource_type.compilable() && !matches!(resource_type, ResourceType::UnitTest | ResourceType::Operation)
}

/// Execute the compile command
pub async fn execute(args: &CompileArgs, global: &GlobalArgs) -> Result<()> {
    let session = Session::load(global, args.vars.as_deref(), None)?;
    let selection = select_nodes(&session, &args.selection, &[])?;
    let defer = if args.selection.defer {
        selection.state.as_ref().map(|s| Arc::new(s.manifest.clone()))
    } else {
        None
    };

    let ids: Vec<String> = selection
        .selected
        .iter()
        .filter(|id| {
            session
                .manifest
                .node(id)
                .is_some_and(|n| compiles(n.resource_type()))
        })
        .cloned()
        .collect();

    let ctx = Arc::new(
        RunContext::new(
            Arc::new(session.manifest.clone()),
            session.renderer(),
            session.target().clone(),
            Arc::clone(&session.invocation),
        )
        .with_selection(selection.selected.clone())
        .with_defer(defer),
    );
    let compiler = Compiler::new(Arc::clone(&ctx));
    let mut manifest = session.manifest;
    let mut failed = 0;

    println!("Compiling {} node{}", ids.len(), if ids.len() == 1 { "" } else { "s" });
    for id in &ids {
        let Some(node) = ctx.node(id) else {
            continue;
        };
        match compiler.compile(id, &CompileOptions::default()) {
            Ok(compiled) => {
                let path = write_compiled(&session.project, node, &compiled.sql)?;
                if global.verbose {
                    println!("  \u{2713} {} -> {}", node.name(), path.display());
                }
                if let Some(entry) = manifest.nodes.get_mut(id) {
                    entry.common.compiled_code = Some(compiled.sql);
                }
            }
            Err(e) => {
                failed += 1;
                let message = session.invocation.scrub(&e.to_string());
                eprintln!("  \u{2717} {} - {}", node.name(), message);
            }
        }
    }

    manifest
        .save(&session.project.manifest_path())
        .context("Failed to write manifest.json")?;
    println!();
    println!(
        "Compiled {} of {} nodes to {}",
        ids.len() - failed,
        ids.len(),
        session.project.target_dir().join("compiled").display()
    );

    if failed > 0 {
        return Err(ExitCode(1).into());
    }
    Ok(())
}

#[cfg(test)]
#[path = "compile_test.rs"]
mod tests;
