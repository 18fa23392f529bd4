//! Error types for qy-run

use qy_core::CoreError;
use qy_db::DbError;
use thiserror::Error;

/// Errors raised while compiling or executing a node
#[derive(Error, Debug)]
pub enum RunError {
    /// Rendering or reference resolution failed (R001)
    #[error("[R001] Compilation Error in {node}: {message}")]
    Compilation { node: String, message: String },

    /// The warehouse rejected a statement (R002)
    #[error("[R002] Database Error in {node}: {source}")]
    Database {
        node: String,
        #[source]
        source: DbError,
    },

    /// A materialization could not proceed (R003)
    #[error("[R003] {node}: {message}")]
    Materialization { node: String, message: String },

    /// Column contract not met (R004)
    #[error("[R004] Contract Error in {node}: {message}")]
    Contract { node: String, message: String },

    /// Invalid microbatch window or config (R005)
    #[error("[R005] Microbatch Error in {node}: {message}")]
    Microbatch { node: String, message: String },

    /// Manifest-level failure surfaced while planning (R006)
    #[error("[R006] {0}")]
    Core(#[from] CoreError),

    /// Anything that breaks an internal invariant (R007)
    #[error("[R007] Internal error: {0}")]
    Internal(String),
}

/// Result type alias for RunError
pub type RunnerResult<T> = Result<T, RunError>;

impl RunError {
    pub fn compilation(node: &str, message: impl Into<String>) -> Self {
        RunError::Compilation {
            node: node.to_string(),
            message: message.into(),
        }
    }

    pub fn database(node: &str, source: DbError) -> Self {
        RunError::Database {
            node: node.to_string(),
            source,
        }
    }

    pub fn materialization(node: &str, message: impl Into<String>) -> Self {
        RunError::Materialization {
            node: node.to_string(),
            message: message.into(),
        }
    }

    /// Warehouse errors become `runtime-error`, everything else `error`
    pub fn is_runtime(&self) -> bool {
        matches!(self, RunError::Database { .. })
    }
}

/// Attach the node id to adapter errors
pub(crate) trait DbResultExt<T> {
    fn for_node(self, node: &str) -> Result<T, RunError>;
}

impl<T> DbResultExt<T> for Result<T, DbError> {
    fn for_node(self, node: &str) -> Result<T, RunError> {
        self.map_err(|e| RunError::database(node, e))
    }
}
