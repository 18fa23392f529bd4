//! qy-run - Compilation and execution for quarry
//!
//! Turns manifest nodes into SQL ([`Compiler`]), builds them in the
//! warehouse with the materialization strategies, and runs the selected
//! graph on a bounded worker pool ([`Scheduler`]).

pub mod compiler;
pub mod context;
pub mod error;
pub mod materialize;
pub mod plan;
pub mod resolver;
pub mod scheduler;
#[cfg(test)]
mod test_support;

pub use compiler::{inject_ctes, CompileOptions, CompiledNode, Compiler};
pub use context::{node_relation, RunContext, RunOptions};
pub use error::{RunError, RunnerResult};
pub use materialize::{materialize, IncrementalStrategy, NodeOutcome, NodeTask};
pub use plan::ExecutionPlan;
pub use resolver::NodeResolver;
pub use scheduler::{NoopReporter, Reporter, RunOutcome, Scheduler};
