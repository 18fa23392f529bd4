//! qy-jinja - Jinja rendering for quarry
//!
//! Implements the [`qy_core::Renderer`] capability on top of minijinja with
//! `ref()`, `source()`, `config`, `var()`, `env_var()`, `this`, `builtins`,
//! `is_incremental()`, `return()`, `adapter.dispatch()` and the built-in
//! generic test macros. Every `ref`/`source` call is captured so callers can
//! check the dependencies a render actually used.

pub mod builtins;
pub mod convert;
pub mod environment;
pub mod error;
pub mod functions;
pub mod objects;
mod scope;

pub use builtins::{builtin_generic_tests, builtin_macros, INTERNAL_PACKAGE};
pub use environment::JinjaRenderer;
pub use error::{JinjaError, JinjaResult};
pub use objects::RelationObject;
