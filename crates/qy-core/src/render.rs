//! The template rendering capability.
//!
//! The core never evaluates templates itself. Anything that must render
//! (config values in YAML, `generate_*_name` overrides, node compilation)
//! goes through a [`Renderer`], which is bound to the project's macros when
//! constructed and returns the rendered text plus every reference captured
//! while rendering.

use crate::env_vars::EnvSnapshot;
use crate::node::{Node, RefCall, SourceCall};
use crate::relation::{Relation, TargetInfo};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Rendering failure
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RenderError {
    pub message: String,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Resolves `ref(...)` and `source(...)` calls made while rendering
pub trait ReferenceResolver: Send + Sync {
    fn resolve_ref(&self, call: &RefCall) -> Result<Relation, String>;
    fn resolve_source(&self, call: &SourceCall) -> Result<Relation, String>;
}

/// Runtime switches visible to templates
#[derive(Debug, Clone, Default)]
pub struct RenderFlags {
    /// The node's relation exists and is being built incrementally
    pub is_incremental: bool,
    pub full_refresh: bool,
    /// Render `ref`/`source` as empty subqueries
    pub empty: bool,
    pub invocation_id: String,
}

/// Everything a template can see besides macros
#[derive(Clone, Default)]
pub struct RenderEnv {
    pub target: TargetInfo,
    /// Project vars for the rendering package, CLI vars applied
    pub vars: BTreeMap<String, Value>,
    pub env: EnvSnapshot,
    /// Package whose macros take precedence
    pub package: String,
    /// Node being rendered, if any
    pub node: Option<Arc<Node>>,
    pub this: Option<Relation>,
    pub resolver: Option<Arc<dyn ReferenceResolver>>,
    /// False while parsing: `run_query` and friends return nothing
    pub execute: bool,
    pub flags: RenderFlags,
    /// Extra globals (`sql` for materializations, `model` for tests, ...)
    pub globals: BTreeMap<String, Value>,
}

impl RenderEnv {
    pub fn new(target: TargetInfo, package: impl Into<String>) -> Self {
        Self {
            target,
            package: package.into(),
            ..Default::default()
        }
    }

    pub fn with_node(mut self, node: Arc<Node>) -> Self {
        self.package = node.package_name().to_string();
        self.node = Some(node);
        self
    }

    pub fn with_global(mut self, key: impl Into<String>, value: Value) -> Self {
        self.globals.insert(key.into(), value);
        self
    }
}

impl fmt::Debug for RenderEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderEnv")
            .field("target", &self.target)
            .field("package", &self.package)
            .field("node", &self.node.as_ref().map(|n| n.unique_id().to_string()))
            .field("this", &self.this)
            .field("execute", &self.execute)
            .finish()
    }
}

/// Output of a render
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rendered {
    pub text: String,
    /// `ref` calls in evaluation order
    pub refs: Vec<RefCall>,
    pub sources: Vec<SourceCall>,
    /// Values passed to `config(...)`
    pub config: BTreeMap<String, Value>,
    /// Value passed to `return(...)`, if any
    pub return_value: Option<Value>,
}

/// A template engine bound to a set of macros
pub trait Renderer: Send + Sync {
    /// Render `text` in `env`
    fn render(&self, text: &str, env: &RenderEnv) -> Result<Rendered, RenderError>;

    /// Call the macro `name` (resolved with package precedence for
    /// `env.package`) with positional arguments
    fn call_macro(&self, name: &str, args: &[Value], env: &RenderEnv) -> Result<Rendered, RenderError>;

    /// Whether a macro of that name is visible from `package`
    fn has_macro(&self, name: &str, package: &str) -> bool;
}
