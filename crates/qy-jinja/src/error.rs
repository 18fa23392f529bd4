//! Error types for qy-jinja

use qy_core::RenderError;
use thiserror::Error;

/// Jinja templating errors
#[derive(Error, Debug)]
pub enum JinjaError {
    /// Template render error (J001)
    #[error("[J001] Jinja render error: {0}")]
    RenderError(String),

    /// Unknown variable (J002)
    #[error("[J002] Required var '{name}' not found in config")]
    UnknownVariable { name: String },

    /// Missing environment variable (J003)
    #[error("[J003] Env var required but not provided: '{name}'")]
    MissingEnvVar { name: String },

    /// Secret env var used outside profiles (J004)
    #[error("[J004] Secret env vars are allowed only in profiles.yml or packages.yml, found '{name}'")]
    SecretEnvVar { name: String },

    /// Macro lookup failed (J005)
    #[error("[J005] Macro '{name}' not found from package '{package}'")]
    UnknownMacro { name: String, package: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for JinjaError
pub type JinjaResult<T> = Result<T, JinjaError>;

impl From<minijinja::Error> for JinjaError {
    fn from(err: minijinja::Error) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        JinjaError::RenderError(message)
    }
}

impl From<JinjaError> for RenderError {
    fn from(err: JinjaError) -> Self {
        RenderError::new(err.to_string())
    }
}

impl From<JinjaError> for minijinja::Error {
    fn from(err: JinjaError) -> Self {
        minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, err.to_string())
    }
}
