//! Shared utilities for CLI commands

use anyhow::{bail, Context, Result};
use qy_core::partial_parse::project_hash;
use qy_core::{
    discover, BuildOptions, CompareOptions, IndirectSelection, Invocation, LoaderOptions, Manifest, ManifestBuilder,
    Node, NodeSelector, ParseState, ParseStrategy, PartialParser, PreviousState, Project, Renderer, ResourceType,
    RunResult, RunStatus, SelectionContext, SelectionRequest, SelectorsFile, TargetInfo,
};
use qy_jinja::JinjaRenderer;
use qy_run::Reporter;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::cli::{GlobalArgs, IndirectMode, SelectionArgs};
use crate::profiles::{self, ResolvedProfile};

/// Error type representing a non-zero process exit code.
///
/// Use `return Err(ExitCode(N).into())` instead of `std::process::exit(N)`
/// so that destructors run before the process exits.
#[derive(Debug)]
pub(crate) struct ExitCode(pub(crate) i32);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Control flow only; never shown to the user.
        write!(f, "")
    }
}

impl std::error::Error for ExitCode {}

/// Parse `--vars` (a YAML or JSON mapping)
pub(crate) fn parse_vars(raw: Option<&str>) -> Result<BTreeMap<String, Value>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(BTreeMap::new());
    };
    let value: Value = serde_yaml::from_str(raw).with_context(|| format!("Invalid --vars '{}'", raw))?;
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => bail!("--vars must be a mapping, got '{}'", raw),
    }
}

/// Load the project at `--project-dir`
pub(crate) fn load_project(global: &GlobalArgs) -> Result<Project> {
    Project::load(&global.project_dir)
        .with_context(|| format!("Failed to load project at {}", global.project_dir.display()))
}

/// A parsed project bound to its target
pub(crate) struct Session {
    pub project: Project,
    pub profile: ResolvedProfile,
    pub invocation: Arc<Invocation>,
    pub manifest: Manifest,
    /// How the manifest was produced
    pub strategy: ParseStrategy,
}

impl Session {
    /// Parse the project (partially when possible) and persist the manifest
    pub fn load(global: &GlobalArgs, vars: Option<&str>, threads: Option<usize>) -> Result<Self> {
        let started = Instant::now();
        let project = load_project(global)?;
        let invocation = Arc::new(Invocation::from_process());
        invocation.validate_engine_env();
        let profile = profiles::resolve(
            &project,
            global.profiles_dir.as_deref(),
            global.target.as_deref(),
            threads,
            invocation.env(),
        )?;
        let cli_vars = parse_vars(vars)?;

        let loader = LoaderOptions {
            maximum_seed_size: invocation.env().maximum_seed_size_bytes(),
            ..LoaderOptions::default()
        };
        let files = discover(&project, &loader).context("Failed to discover project files")?;
        let parser = PartialParser::new(
            project_hash(&project, &profile.target, &cli_vars),
            invocation.env().clone(),
        );
        let state_path = project.partial_parse_path();
        let previous = if global.no_partial_parse {
            None
        } else {
            ParseState::load(&state_path)
        };
        let run = parser.parse(previous, &files)?;

        let manifest = match run.reused_manifest {
            Some(manifest) => manifest,
            None => {
                let renderer = JinjaRenderer::new(
                    run.outputs.iter().flat_map(|o| o.macros.iter()),
                    project.name(),
                    &profile.target,
                )
                .with_dispatch(&project.config);
                ManifestBuilder::new(&project, &profile.target, &invocation)
                    .with_options(BuildOptions {
                        cli_vars,
                        ..BuildOptions::default()
                    })
                    .with_renderer(&renderer)
                    .build(&run.outputs)?
            }
        };

        if let Err(e) = parser.state(&files, &run.outputs, &manifest).save(&state_path) {
            log::warn!("Unable to save partial parse state: {}", e);
        }
        manifest
            .save(&project.manifest_path())
            .context("Failed to write manifest.json")?;
        log::debug!(
            "Parsed {} files ({} reparsed) in {}ms",
            files.len(),
            run.parsed_files,
            started.elapsed().as_millis()
        );

        Ok(Self {
            project,
            profile,
            invocation,
            manifest,
            strategy: run.strategy,
        })
    }

    pub fn target(&self) -> &TargetInfo {
        &self.profile.target
    }

    /// Renderer bound to the manifest's macros
    pub fn renderer(&self) -> Arc<dyn Renderer> {
        Arc::new(JinjaRenderer::from_manifest(&self.manifest, self.target()).with_dispatch(&self.project.config))
    }
}

/// Resource types named on the command line; `all` keeps every type
fn parse_resource_types(names: &[String]) -> Result<BTreeSet<ResourceType>> {
    let mut types = BTreeSet::new();
    for name in names {
        if name == "all" {
            return Ok(BTreeSet::new());
        }
        match ResourceType::parse(name) {
            Some(rt) => {
                types.insert(rt);
            }
            None => bail!("Unknown resource type '{}'", name),
        }
    }
    Ok(types)
}

fn indirect_mode(mode: IndirectMode) -> IndirectSelection {
    match mode {
        IndirectMode::Eager => IndirectSelection::Eager,
        IndirectMode::Cautious => IndirectSelection::Cautious,
        IndirectMode::Buildable => IndirectSelection::Buildable,
        IndirectMode::Empty => IndirectSelection::Empty,
    }
}

/// Selected nodes plus the prior state used to pick them
pub(crate) struct Selection {
    pub selected: BTreeSet<String>,
    pub state: Option<PreviousState>,
}

/// Evaluate `--select`/`--exclude`/`--selector` against the session manifest.
///
/// `default_types` applies when `--resource-type` is absent; empty keeps
/// every type.
pub(crate) fn select_nodes(
    session: &Session,
    args: &SelectionArgs,
    default_types: &[ResourceType],
) -> Result<Selection> {
    let state = match &args.state {
        Some(dir) => Some(
            PreviousState::load(dir).with_context(|| format!("Failed to load state from {}", dir.display()))?,
        ),
        None => None,
    };
    let options = CompareOptions {
        unrendered: args.state_modified_compare_unrendered
            || session.project.config.flag("state_modified_compare_unrendered"),
    };
    let comparison = state.as_ref().map(|s| s.compare(&session.manifest, options));

    let mut ctx = SelectionContext::new(&session.manifest);
    if let Some(comparison) = &comparison {
        ctx = ctx.with_state(comparison);
    }
    if let Some(results) = state.as_ref().and_then(|s| s.run_results.as_ref()) {
        ctx = ctx.with_results(results);
    }

    let mut request = SelectionRequest::from_args(&args.select, &args.exclude)?;
    let selectors = SelectorsFile::load(&session.project.root)?;
    if let Some(name) = &args.selector {
        if !args.select.is_empty() {
            bail!("--selector cannot be combined with --select");
        }
        request.select = Some(selectors.get(name)?);
    } else if request.select.is_none() {
        request.select = selectors.default_spec()?;
    }
    request.resource_types = if args.resource_type.is_empty() {
        default_types.iter().copied().collect()
    } else {
        parse_resource_types(&args.resource_type)?
    };
    request.exclude_resource_types = parse_resource_types(&args.exclude_resource_type)?;
    if let Some(mode) = args.indirect_selection {
        request.indirect_selection = indirect_mode(mode);
    }

    let selector = NodeSelector::new(ctx)?;
    let selected = selector.select(&request)?;
    log::debug!("Selected {} nodes", selected.len());
    Ok(Selection { selected, state })
}

/// Where a node's compiled SQL is written under the target directory
pub(crate) fn compiled_path(project: &Project, node: &Node) -> PathBuf {
    let original = Path::new(&node.common.original_file_path);
    let base = project
        .target_dir()
        .join("compiled")
        .join(node.package_name())
        .join(original);
    if original.extension().is_some_and(|ext| ext == "sql") {
        base
    } else {
        base.join(format!("{}.sql", node.name()))
    }
}

/// Write compiled SQL for `node`
pub(crate) fn write_compiled(project: &Project, node: &Node, sql: &str) -> Result<PathBuf> {
    let path = compiled_path(project, node);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create compiled directory")?;
    }
    std::fs::write(&path, sql).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// One progress line for a finished node
pub(crate) fn format_result_line(node: &Node, result: &RunResult) -> String {
    let ms = (result.execution_time * 1000.0).round() as u64;
    let message = result
        .message
        .clone()
        .unwrap_or_else(|| result.status.to_string());
    match result.status {
        RunStatus::Success => format!("  \u{2713} {} ({}) [{}ms]", node.name(), node.materialized(), ms),
        RunStatus::Pass | RunStatus::Noop => {
            format!("  \u{2713} {} ({}) [{}ms]", node.name(), result.status, ms)
        }
        RunStatus::Warn => format!("  ! {} - {} [{}ms]", node.name(), message, ms),
        RunStatus::Skipped => format!(
            "  - {} (skipped: {})",
            node.name(),
            result.skip_reason.as_deref().unwrap_or("upstream failure")
        ),
        RunStatus::Error | RunStatus::RuntimeError | RunStatus::Fail | RunStatus::PartialSuccess => {
            format!("  \u{2717} {} - {} [{}ms]", node.name(), message, ms)
        }
    }
}

/// Prints a line per finished node, scrubbed of secrets
pub(crate) struct ConsoleReporter {
    invocation: Arc<Invocation>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(invocation: Arc<Invocation>, verbose: bool) -> Self {
        Self { invocation, verbose }
    }
}

impl Reporter for ConsoleReporter {
    fn node_started(&self, node: &Node) {
        if self.verbose {
            println!("  ... {} ({})", node.name(), node.resource_type().as_str());
        }
    }

    fn node_finished(&self, node: &Node, result: &RunResult) {
        println!("{}", self.invocation.scrub(&format_result_line(node, result)));
    }
}

/// Counts per status as `N succeeded, M failed, ...`
pub(crate) fn summarize(results: &[RunResult]) -> String {
    let mut succeeded = 0;
    let mut warned = 0;
    let mut failed = 0;
    let mut skipped = 0;
    for r in results {
        match r.status {
            RunStatus::Success | RunStatus::Pass | RunStatus::Noop => succeeded += 1,
            RunStatus::Warn => warned += 1,
            RunStatus::Skipped => skipped += 1,
            _ => failed += 1,
        }
    }
    let mut parts = vec![format!("{} succeeded", succeeded), format!("{} failed", failed)];
    if warned > 0 {
        parts.push(format!("{} warned", warned));
    }
    if skipped > 0 {
        parts.push(format!("{} skipped", skipped));
    }
    parts.join(", ")
}

#[cfg(test)]
#[path = "common_test.rs"]
mod tests;
