//! CLI argument definitions using clap derive API

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// quarry - build, test and select SQL transformation projects
#[derive(Parser, Debug)]
#[command(name = "qy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to project directory
    #[arg(short = 'p', long, global = true, default_value = ".")]
    pub project_dir: PathBuf,

    /// Directory holding profiles.yml
    #[arg(long, global = true, env = "DBT_PROFILES_DIR")]
    pub profiles_dir: Option<PathBuf>,

    /// Profile output to connect with
    #[arg(short, long, global = true, env = "DBT_TARGET")]
    pub target: Option<String>,

    /// Always reparse every file
    #[arg(long, global = true)]
    pub no_partial_parse: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse the project and write manifest.json
    Parse(ParseArgs),

    /// Render SQL for selected nodes into the target directory
    Compile(CompileArgs),

    /// Build selected models
    Run(RunArgs),

    /// Run data tests and unit tests
    Test(RunArgs),

    /// Build seeds, models, snapshots and tests in DAG order
    Build(RunArgs),

    /// Load seed CSV files
    Seed(RunArgs),

    /// Execute snapshots
    Snapshot(RunArgs),

    /// List selected resources
    #[command(alias = "ls")]
    List(ListArgs),

    /// Remove the project's clean targets
    Clean(CleanArgs),

    /// Re-run nodes that failed or were skipped in the last invocation
    Retry(RetryArgs),
}

/// Node selection flags shared by every graph command
#[derive(Args, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionArgs {
    /// Selection expression; repeat to union several
    #[arg(short, long, action = ArgAction::Append)]
    pub select: Vec<String>,

    /// Exclusion expression; repeat to union several
    #[arg(long, action = ArgAction::Append)]
    pub exclude: Vec<String>,

    /// Named selector from selectors.yml
    #[arg(long)]
    pub selector: Option<String>,

    /// Keep only these resource types
    #[arg(long, action = ArgAction::Append)]
    pub resource_type: Vec<String>,

    /// Drop these resource types
    #[arg(long, action = ArgAction::Append)]
    pub exclude_resource_type: Vec<String>,

    /// How tests attached to selected nodes are picked up
    #[arg(long, value_enum)]
    pub indirect_selection: Option<IndirectMode>,

    /// Directory with artifacts of a previous invocation
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Resolve refs to unselected nodes against --state
    #[arg(long, requires = "state")]
    pub defer: bool,

    /// Compare configs by their unrendered source text
    #[arg(long)]
    pub state_modified_compare_unrendered: bool,
}

/// `--indirect-selection` modes
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndirectMode {
    Eager,
    Cautious,
    Buildable,
    Empty,
}

/// Arguments for the parse command
#[derive(Args, Debug, Clone, Default)]
pub struct ParseArgs {
    /// Project vars as a YAML mapping
    #[arg(long)]
    pub vars: Option<String>,
}

/// Arguments for the compile command
#[derive(Args, Debug, Clone, Default)]
pub struct CompileArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Project vars as a YAML mapping
    #[arg(long)]
    pub vars: Option<String>,
}

/// Arguments for the executing commands
#[derive(Args, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunArgs {
    #[command(flatten)]
    #[serde(flatten)]
    pub selection: SelectionArgs,

    /// Project vars as a YAML mapping
    #[arg(long)]
    pub vars: Option<String>,

    /// Worker count, overriding the profile
    #[arg(long)]
    pub threads: Option<usize>,

    /// Rebuild incremental models and reload seeds from scratch
    #[arg(long)]
    pub full_refresh: bool,

    /// Stop scheduling after the first failure
    #[arg(short = 'x', long)]
    pub fail_fast: bool,

    /// Build relations without reading input rows
    #[arg(long)]
    pub empty: bool,

    /// Persist failing test rows
    #[arg(long)]
    pub store_failures: bool,

    /// Lower bound for microbatch windows
    #[arg(long)]
    pub event_time_start: Option<String>,

    /// Upper bound for microbatch windows
    #[arg(long)]
    pub event_time_end: Option<String>,
}

/// Arguments for the list command
#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "selector")]
    pub output: ListOutput,

    /// Project vars as a YAML mapping
    #[arg(long)]
    pub vars: Option<String>,
}

/// List output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOutput {
    /// Selector-style names (`shop.staging.orders`)
    #[default]
    Selector,
    /// Node names
    Name,
    /// Defining file paths
    Path,
    /// One JSON object per node
    Json,
}

/// Arguments for the clean command
#[derive(Args, Debug, Clone, Default)]
pub struct CleanArgs {
    /// Allow removing clean targets outside the project directory
    #[arg(long)]
    pub no_clean_project_files_only: bool,
}

/// Arguments for the retry command
#[derive(Args, Debug, Clone, Default)]
pub struct RetryArgs {
    /// Worker count, overriding the previous invocation
    #[arg(long)]
    pub threads: Option<usize>,

    /// Stop scheduling after the first failure
    #[arg(short = 'x', long)]
    pub fail_fast: bool,
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
