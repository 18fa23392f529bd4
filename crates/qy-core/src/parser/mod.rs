//! Parsers: one per parse kind, each a pure function of a [`SourceFile`].
//!
//! Parsers emit [`ParseOutput`] records: nodes with the config captured at
//! their definition site, patches for nodes defined elsewhere, macros, docs
//! blocks and groups. Nothing is resolved here; references are recorded as
//! declared call sites for the manifest builder.

pub mod blocks;
pub mod jinja_static;
mod schema;
mod sql;
pub mod yaml;

pub use generic_test::{
    generic_test_name, is_generic_test, GenericTestCall, TestDefinition, TestTarget,
};

use crate::checksum::FileHash;
use crate::error::{CoreError, CoreResult};
use crate::loader::{ParseKind, SourceFile};
use crate::node::{
    ColumnInfo, Documentation, FunctionAttrs, Group, Macro, Node, ResourceType,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A node plus the config captured where it was defined
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedNode {
    pub node: Node,
    /// `config(...)` calls in the node's own code
    #[serde(default)]
    pub inline_config: BTreeMap<String, Value>,
    /// `config:` of a node defined in YAML (sources, generic tests, ...)
    #[serde(default)]
    pub yaml_config: BTreeMap<String, Value>,
}

/// One version entry of a versioned model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionPatch {
    pub v: String,
    #[serde(default)]
    pub defined_in: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnInfo>,
}

/// Properties from schema YAML for a node defined in another file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Patch {
    pub resource_type: Option<ResourceType>,
    pub package_name: String,
    pub name: String,
    pub file_id: String,
    pub original_file_path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnInfo>,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    #[serde(default)]
    pub unrendered_config: BTreeMap<String, String>,
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub constraints: Vec<Value>,
    #[serde(default)]
    pub deprecation_date: Option<String>,
    #[serde(default)]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub versions: Vec<VersionPatch>,
    #[serde(default)]
    pub function: Option<FunctionAttrs>,
    /// Fail instead of warn when the target does not exist
    #[serde(default)]
    pub required: bool,
}

/// Description patch for a macro
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MacroPatch {
    pub package_name: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// Everything one file contributes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseOutput {
    pub file_id: String,
    #[serde(default)]
    pub nodes: Vec<ParsedNode>,
    #[serde(default)]
    pub patches: Vec<Patch>,
    #[serde(default)]
    pub macros: Vec<Macro>,
    #[serde(default)]
    pub macro_patches: Vec<MacroPatch>,
    #[serde(default)]
    pub docs: Vec<Documentation>,
    #[serde(default)]
    pub groups: Vec<Group>,
    /// `(deprecation key, message)` pairs
    #[serde(default)]
    pub deprecations: Vec<(String, String)>,
    /// Files read through `!include`: normalized absolute path -> content hash
    #[serde(default)]
    pub includes: BTreeMap<String, FileHash>,
    /// Schema error held until [`settle_includes`] knows whether the file is
    /// only an include fragment
    #[serde(default)]
    pub deferred_error: Option<String>,
    /// Another schema file includes this one; its own contents are ignored
    #[serde(default)]
    pub include_target: bool,
}

impl ParseOutput {
    pub fn new(file_id: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            ..Default::default()
        }
    }

    /// Unique ids of every node this file produced
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|n| n.node.common.unique_id.clone())
            .chain(self.macros.iter().map(|m| m.unique_id.clone()))
            .chain(self.docs.iter().map(|d| d.unique_id.clone()))
            .chain(self.groups.iter().map(|g| g.unique_id.clone()))
            .collect()
    }
}

/// Parse one file
pub fn parse_file(file: &SourceFile) -> CoreResult<ParseOutput> {
    let result = match file.parse_kind {
        ParseKind::Model => Ok(sql::parse_model(file)),
        ParseKind::Analysis => Ok(sql::parse_analysis(file)),
        ParseKind::Test => Ok(sql::parse_singular_test(file)),
        ParseKind::Snapshot => sql::parse_snapshot(file),
        ParseKind::Seed => Ok(sql::parse_seed(file)),
        ParseKind::Function => Ok(sql::parse_function(file)),
        ParseKind::Macro => sql::parse_macros(file),
        ParseKind::Docs => sql::parse_docs(file),
        ParseKind::Hook => sql::parse_hooks(file),
        ParseKind::SchemaYaml => {
            return Ok(schema::parse_schema(file).unwrap_or_else(|message| ParseOutput {
                deferred_error: Some(message),
                ..ParseOutput::new(&file.file_id)
            }))
        }
    };
    result.map_err(|message| CoreError::Render {
        node: file.file_id.clone(),
        message,
    })
}

/// Parse many files, reporting every failure together
pub fn parse_files<'a, I>(files: I) -> CoreResult<Vec<ParseOutput>>
where
    I: IntoIterator<Item = &'a SourceFile>,
{
    let files: Vec<&SourceFile> = files.into_iter().collect();
    let mut outputs = parse_unsettled(files.iter().copied())?;
    settle_includes(&mut outputs, files)?;
    Ok(outputs)
}

/// Parse files without [`settle_includes`]; the caller settles once every
/// output of the invocation is known
pub(crate) fn parse_unsettled<'a, I>(files: I) -> CoreResult<Vec<ParseOutput>>
where
    I: IntoIterator<Item = &'a SourceFile>,
{
    let mut outputs = Vec::new();
    let mut errors = Vec::new();
    for file in files {
        match parse_file(file) {
            Ok(out) => outputs.push(out),
            Err(e) => errors.push(e),
        }
    }
    CoreError::collect(errors)?;
    Ok(outputs)
}

/// Mark schema files that another schema file includes, then report the
/// deferred errors of every schema file that is not an include target.
///
/// Flags are recomputed from scratch, so outputs reused from an earlier
/// invocation settle the same way as freshly parsed ones.
pub fn settle_includes<'a, I>(outputs: &mut [ParseOutput], files: I) -> CoreResult<()>
where
    I: IntoIterator<Item = &'a SourceFile>,
{
    let paths: BTreeMap<&str, &SourceFile> = files.into_iter().map(|f| (f.file_id.as_str(), f)).collect();
    let targets: BTreeSet<String> = outputs
        .iter()
        .flat_map(|o| o.includes.keys().cloned())
        .collect();
    let mut errors = Vec::new();
    for output in outputs.iter_mut() {
        let Some(file) = paths.get(output.file_id.as_str()) else {
            continue;
        };
        let path = yaml::normalize_path(&file.absolute_path());
        output.include_target =
            matches!(file.parse_kind, ParseKind::SchemaYaml) && targets.contains(path.to_string_lossy().as_ref());
        if output.include_target {
            log::debug!("{} is an include fragment", file.original_file_path);
            continue;
        }
        if let Some(message) = &output.deferred_error {
            errors.push(CoreError::YamlError {
                path: file.original_file_path.clone(),
                message: message.clone(),
            });
        }
    }
    CoreError::collect(errors)
}
