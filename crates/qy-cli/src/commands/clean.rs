//! Clean command implementation

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::cli::{CleanArgs, GlobalArgs};
use crate::commands::common::{load_project, ExitCode};

/// Execute the clean command
pub async fn execute(args: &CleanArgs, global: &GlobalArgs) -> Result<()> {
    let project = load_project(global)?;
    let root = project
        .root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", project.root.display()))?;

    println!("Cleaning project: {}", project.name());

    let mut existing: Vec<PathBuf> = Vec::new();
    let mut skipped_count = 0;
    for target in &project.config.clean_targets {
        let target_path = project.root.join(target);
        if !target_path.exists() {
            if global.verbose {
                println!("  Skipping (not found): {}", target_path.display());
            }
            skipped_count += 1;
            continue;
        }
        let resolved = target_path
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", target_path.display()))?;
        if resolved == root {
            eprintln!("  Refusing to remove the project directory itself ({})", target);
            return Err(ExitCode(2).into());
        }
        if !resolved.starts_with(&root) && !args.no_clean_project_files_only {
            eprintln!(
                "  Refusing to remove {} outside the project directory; pass --no-clean-project-files-only to allow it",
                resolved.display()
            );
            return Err(ExitCode(2).into());
        }
        existing.push(resolved);
    }

    let mut cleaned_count = 0;
    for path in existing {
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => {
                println!("  Removed: {}", path.display());
                cleaned_count += 1;
            }
            Err(e) => eprintln!("  Failed to remove {}: {}", path.display(), e),
        }
    }

    println!();
    println!(
        "Cleaned {} director{}, {} skipped",
        cleaned_count,
        if cleaned_count == 1 { "y" } else { "ies" },
        skipped_count
    );
    Ok(())
}

#[cfg(test)]
#[path = "clean_test.rs"]
mod tests;
