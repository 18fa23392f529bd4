//! Error types for qy-core

use thiserror::Error;

/// Broad classification used to pick an exit code and a run status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed project input; fatal before anything executes
    Compilation,
    /// Warehouse failure during a node
    Runtime,
    /// Invariant violation inside quarry itself
    Internal,
}

/// Core error type for quarry
#[derive(Error, Debug)]
pub enum CoreError {
    /// E001: Project file not found
    #[error("[E001] Project file not found: {path}")]
    ProjectNotFound { path: String },

    /// E002: Failed to parse a configuration file
    #[error("[E002] Failed to parse {path}: {message}")]
    ConfigParseError { path: String, message: String },

    /// E003: Invalid configuration value
    #[error("[E003] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// E004: A file could not be read
    #[error("[E004] Unable to read {path}: {message}")]
    FileRead { path: String, message: String },

    /// E005: Two discovered files share a file id
    #[error("[E005] Duplicate file id '{file_id}': {path1} and {path2}")]
    DuplicateFile {
        file_id: String,
        path1: String,
        path2: String,
    },

    /// E006: Malformed schema YAML
    #[error("[E006] Invalid YAML in {path}: {message}")]
    YamlError { path: String, message: String },

    /// E007: Circular dependency detected
    #[error("[E007] Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    /// E008: Two resources share a unique id
    #[error("[E008] Duplicate resource '{unique_id}' defined in {path1} and {path2}")]
    DuplicateResource {
        unique_id: String,
        path1: String,
        path2: String,
    },

    /// E009: Invalid selector
    #[error("[E009] Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// E010: ref/source target does not exist
    #[error("[E010] {node} depends on '{target}' which was not found")]
    RefNotFound { node: String, target: String },

    /// E011: ref target exists but is disabled
    #[error("[E011] {node} depends on a disabled node '{target}'")]
    RefToDisabled { node: String, target: String },

    /// E012: unqualified ref matches nodes in several packages
    #[error("[E012] {node} has an ambiguous ref to '{target}'; candidates: {candidates}")]
    AmbiguousRef {
        node: String,
        target: String,
        candidates: String,
    },

    /// E013: Two enabled nodes compile to the same relation
    #[error("[E013] {first} and {second} have an identical database representation: {relation}")]
    DuplicateRelation {
        first: String,
        second: String,
        relation: String,
    },

    /// E014: Access rule violated
    #[error("[E014] {node} may not reference {target}: {reason}")]
    AccessViolation {
        node: String,
        target: String,
        reason: String,
    },

    /// E015: A schema patch marked required has no target node
    #[error("[E015] {path}: {resource_type} '{name}' is declared with required: true but does not exist")]
    MissingRequiredPatch {
        path: String,
        resource_type: String,
        name: String,
    },

    /// E016: Versioned model problems
    #[error("[E016] Invalid versions for model '{name}': {message}")]
    InvalidVersion { name: String, message: String },

    /// E017: Missing docs block
    #[error("[E017] {node} references doc '{name}' which was not found")]
    DocNotFound { node: String, name: String },

    /// E018: Compile-time ref that was not visible at parse time
    #[error("[E018] {node}: unable to infer all dependencies; '{target}' was not declared at parse time")]
    UndeclaredDependency { node: String, target: String },

    /// E019: Template rendering failed
    #[error("[E019] Compilation error in {node}: {message}")]
    Render { node: String, message: String },

    /// E020: Artifact serialization failure
    #[error("[E020] Artifact error for {path}: {message}")]
    Artifact { path: String, message: String },

    /// E021: Package problems
    #[error("[E021] Package error: {message}")]
    Package { message: String },

    /// E022: Several compilation errors reported together
    #[error("[E022] {} compilation error(s):\n{}", .0.len(), format_multiple(.0))]
    Multiple(Vec<CoreError>),

    /// E023: Invariant violation
    #[error("[E023] Internal error: {message}")]
    Internal { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_multiple(errors: &[CoreError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

impl CoreError {
    /// Classify the error for exit codes and run statuses
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Internal { .. } => ErrorKind::Internal,
            CoreError::Io(_) | CoreError::Artifact { .. } => ErrorKind::Runtime,
            CoreError::Multiple(errors) => {
                if errors.iter().any(|e| e.kind() == ErrorKind::Internal) {
                    ErrorKind::Internal
                } else {
                    ErrorKind::Compilation
                }
            }
            _ => ErrorKind::Compilation,
        }
    }

    /// Collapse a list of errors: none is `Ok`, one is itself, more is `Multiple`
    pub fn collect(mut errors: Vec<CoreError>) -> CoreResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(CoreError::Multiple(errors)),
        }
    }
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_in_messages() {
        let err = CoreError::RefToDisabled {
            node: "model.p.b".to_string(),
            target: "a".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("[E011]"));
        assert!(msg.contains("depends on a disabled node"));
    }

    #[test]
    fn test_collect_single_and_multiple() {
        assert!(CoreError::collect(vec![]).is_ok());

        let one = CoreError::collect(vec![CoreError::ConfigInvalid {
            message: "x".to_string(),
        }]);
        assert!(matches!(one, Err(CoreError::ConfigInvalid { .. })));

        let many = CoreError::collect(vec![
            CoreError::ConfigInvalid {
                message: "x".to_string(),
            },
            CoreError::ConfigInvalid {
                message: "y".to_string(),
            },
        ]);
        let err = many.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compilation);
        assert!(err.to_string().contains("2 compilation error(s)"));
    }

    #[test]
    fn test_internal_kind() {
        let err = CoreError::Internal {
            message: "bad".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
