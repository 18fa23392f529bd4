//! qy-core - Core library for quarry
//!
//! This crate provides the data model, project loading, parsing, manifest
//! building, partial parsing, state comparison, node selection and the
//! persisted artifacts shared by every quarry component. Template rendering
//! is reached only through the [`Renderer`] capability.

pub mod artifact;
pub mod checksum;
pub mod config;
pub mod config_layer;
pub mod env_vars;
pub mod error;
pub mod graph;
pub mod invocation;
pub mod loader;
pub mod manifest;
pub mod node;
pub mod parser;
pub mod partial_parse;
pub mod project;
pub mod relation;
pub mod render;
pub mod run_results;
pub mod selector;
pub(crate) mod serde_helpers;
pub mod state;

pub use checksum::{compute_checksum, FileHash};
pub use config::ProjectConfig;
pub use config_layer::{ConfigLayer, LayerSource, NodeConfig};
pub use env_vars::{EnvSnapshot, SecretScrubber};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use graph::Graph;
pub use invocation::{Event, EventLevel, Invocation};
pub use loader::{discover, LoaderOptions, ParseKind, SourceFile};
pub use manifest::{BuildOptions, Manifest, ManifestBuilder};
pub use node::{Access, Macro, Node, NodeCommon, NodeKind, ResourceType, UniqueId};
pub use parser::{parse_files, ParseOutput};
pub use partial_parse::{ParseRun, ParseState, ParseStrategy, PartialParser};
pub use project::{Package, Project};
pub use relation::{Relation, RelationType, TargetInfo};
pub use render::{ReferenceResolver, RenderEnv, RenderError, RenderFlags, Rendered, Renderer};
pub use run_results::{RunResult, RunResults, RunStatus};
pub use selector::{IndirectSelection, NodeSelector, SelectionContext, SelectionRequest, SelectionSpec, SelectorsFile};
pub use state::{ChangeKind, CompareOptions, PreviousState, StateComparison};
