//! Node types: every addressable unit in a manifest.
//!
//! A [`Node`] is a tagged union: attributes shared by every resource live in
//! [`NodeCommon`], kind-specific attributes in [`NodeKind`]. Back-references to
//! other nodes are always unique-id strings resolved through the manifest.

use crate::checksum::FileHash;
use crate::config_layer::NodeConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// `<resource_type>.<package>.<name>[.<version>]`
pub type UniqueId = String;

/// Resource type of a node
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Model,
    Seed,
    Snapshot,
    Test,
    UnitTest,
    Analysis,
    Operation,
    Function,
    Source,
    Exposure,
    Metric,
    SemanticModel,
    SavedQuery,
    Macro,
    Doc,
    Group,
}

impl ResourceType {
    pub const ALL: [ResourceType; 16] = [
        ResourceType::Model,
        ResourceType::Seed,
        ResourceType::Snapshot,
        ResourceType::Test,
        ResourceType::UnitTest,
        ResourceType::Analysis,
        ResourceType::Operation,
        ResourceType::Function,
        ResourceType::Source,
        ResourceType::Exposure,
        ResourceType::Metric,
        ResourceType::SemanticModel,
        ResourceType::SavedQuery,
        ResourceType::Macro,
        ResourceType::Doc,
        ResourceType::Group,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Model => "model",
            ResourceType::Seed => "seed",
            ResourceType::Snapshot => "snapshot",
            ResourceType::Test => "test",
            ResourceType::UnitTest => "unit_test",
            ResourceType::Analysis => "analysis",
            ResourceType::Operation => "operation",
            ResourceType::Function => "function",
            ResourceType::Source => "source",
            ResourceType::Exposure => "exposure",
            ResourceType::Metric => "metric",
            ResourceType::SemanticModel => "semantic_model",
            ResourceType::SavedQuery => "saved_query",
            ResourceType::Macro => "macro",
            ResourceType::Doc => "doc",
            ResourceType::Group => "group",
        }
    }

    /// Parse a resource type name, accepting `data_test` for tests
    pub fn parse(s: &str) -> Option<Self> {
        if s == "data_test" {
            return Some(ResourceType::Test);
        }
        Self::ALL.iter().copied().find(|rt| rt.as_str() == s)
    }

    /// Nodes of this type are rendered through the template engine
    pub fn compilable(&self) -> bool {
        matches!(
            self,
            ResourceType::Model
                | ResourceType::Snapshot
                | ResourceType::Test
                | ResourceType::UnitTest
                | ResourceType::Analysis
                | ResourceType::Operation
                | ResourceType::Function
        )
    }

    /// Nodes of this type produce a warehouse object
    pub fn materializable(&self) -> bool {
        matches!(
            self,
            ResourceType::Model
                | ResourceType::Seed
                | ResourceType::Snapshot
                | ResourceType::Function
        )
    }

    /// Nodes of this type assert over data and report pass/warn/fail
    pub fn testable(&self) -> bool {
        matches!(self, ResourceType::Test | ResourceType::UnitTest)
    }

    /// Nodes of this type are scheduled at all
    pub fn executable(&self) -> bool {
        self.materializable() || self.testable() || *self == ResourceType::Operation
    }

    /// Default `materialized` config for the type
    pub fn default_materialization(&self) -> &'static str {
        match self {
            ResourceType::Model | ResourceType::Analysis => "view",
            ResourceType::Seed => "seed",
            ResourceType::Snapshot => "snapshot",
            ResourceType::Test => "test",
            ResourceType::UnitTest => "unit",
            ResourceType::Function => "function",
            _ => "none",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Access level of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Private,
    #[default]
    Protected,
    Public,
}

impl Access {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Access::Private),
            "protected" => Some(Access::Protected),
            "public" => Some(Access::Public),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Private => "private",
            Access::Protected => "protected",
            Access::Public => "public",
        }
    }
}

/// Resolved dependencies of a node or macro
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependsOn {
    #[serde(default)]
    pub nodes: Vec<UniqueId>,
    #[serde(default)]
    pub macros: Vec<UniqueId>,
}

impl DependsOn {
    pub fn add_node(&mut self, id: &str) {
        if !self.nodes.iter().any(|n| n == id) {
            self.nodes.push(id.to_string());
        }
    }

    pub fn add_macro(&mut self, id: &str) {
        if !self.macros.iter().any(|m| m == id) {
            self.macros.push(id.to_string());
        }
    }
}

/// A `ref(...)` call site
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl RefCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            package: None,
            name: name.into(),
            version: None,
        }
    }
}

impl fmt::Display for RefCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(package) = &self.package {
            write!(f, "{}.", package)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, " (v{})", version)?;
        }
        Ok(())
    }
}

/// A `source(...)` call site
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceCall {
    pub source_name: String,
    pub table_name: String,
}

/// Declared column metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<bool>,
}

/// Attributes shared by every node kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeCommon {
    pub unique_id: UniqueId,
    pub name: String,
    pub package_name: String,
    /// Path relative to the resource root (e.g. `staging/orders.sql`)
    pub path: String,
    /// Path relative to the package root
    pub original_file_path: String,
    /// `<package>://<original_file_path>` of the defining file
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_path: Option<String>,
    pub fqn: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: NodeConfig,
    /// Pre-render source text of inline and YAML config values
    #[serde(default)]
    pub unrendered_config: BTreeMap<String, String>,
    #[serde(default)]
    pub depends_on: DependsOn,
    #[serde(default)]
    pub refs: Vec<RefCall>,
    #[serde(default)]
    pub sources: Vec<SourceCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Vec<String>>,
    /// Names of macros called directly from the raw code
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub macro_calls: Vec<String>,
    /// Project vars read by the raw code
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<String>,
    /// Environment variables read by the raw code
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<String>,
    #[serde(default)]
    pub raw_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_code: Option<String>,
    pub checksum: FileHash,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_name: Option<String>,
    /// Group name when grouped, else the package name
    #[serde(default)]
    pub subgraph_id: String,
}

/// Metadata of a generated generic test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub access: Access,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecation_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedAttrs {
    /// Absolute root of the package the seed belongs to
    pub root_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestAttrs {
    /// Set for generic tests, absent for singular tests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_metadata: Option<TestMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_node: Option<UniqueId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitTestInput {
    /// `ref('x')` or `source('s', 't')`
    pub input: String,
    #[serde(default)]
    pub rows: Vec<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitTestAttrs {
    /// Name of the model under test
    pub model: String,
    #[serde(default)]
    pub given: Vec<UnitTestInput>,
    #[serde(default)]
    pub expect: Vec<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionArg {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionAttrs {
    #[serde(default)]
    pub arguments: Vec<FunctionArg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceAttrs {
    pub source_name: String,
    pub identifier: String,
    #[serde(default)]
    pub source_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_at_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureAttrs {
    pub exposure_type: String,
    #[serde(default)]
    pub owner: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maturity: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricAttrs {
    #[serde(default)]
    pub label: String,
    pub metric_type: String,
    #[serde(default)]
    pub type_params: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticModelAttrs {
    /// The `ref(...)` expression naming the underlying model
    pub model: String,
    #[serde(default)]
    pub entities: Value,
    #[serde(default)]
    pub measures: Value,
    #[serde(default)]
    pub dimensions: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedQueryAttrs {
    #[serde(default)]
    pub query_params: Value,
    #[serde(default)]
    pub exports: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationAttrs {
    /// `on-run-start` or `on-run-end` for project hooks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_type: Option<String>,
    #[serde(default)]
    pub index: usize,
}

/// Kind-specific attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Model(ModelAttrs),
    Seed(SeedAttrs),
    Snapshot,
    Test(TestAttrs),
    UnitTest(UnitTestAttrs),
    Analysis,
    Operation(OperationAttrs),
    Function(FunctionAttrs),
    Source(SourceAttrs),
    Exposure(ExposureAttrs),
    Metric(MetricAttrs),
    SemanticModel(SemanticModelAttrs),
    SavedQuery(SavedQueryAttrs),
}

impl NodeKind {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            NodeKind::Model(_) => ResourceType::Model,
            NodeKind::Seed(_) => ResourceType::Seed,
            NodeKind::Snapshot => ResourceType::Snapshot,
            NodeKind::Test(_) => ResourceType::Test,
            NodeKind::UnitTest(_) => ResourceType::UnitTest,
            NodeKind::Analysis => ResourceType::Analysis,
            NodeKind::Operation(_) => ResourceType::Operation,
            NodeKind::Function(_) => ResourceType::Function,
            NodeKind::Source(_) => ResourceType::Source,
            NodeKind::Exposure(_) => ResourceType::Exposure,
            NodeKind::Metric(_) => ResourceType::Metric,
            NodeKind::SemanticModel(_) => ResourceType::SemanticModel,
            NodeKind::SavedQuery(_) => ResourceType::SavedQuery,
        }
    }
}

/// Any graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub common: NodeCommon,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(common: NodeCommon, kind: NodeKind) -> Self {
        Self { common, kind }
    }

    pub fn unique_id(&self) -> &str {
        &self.common.unique_id
    }

    pub fn name(&self) -> &str {
        &self.common.name
    }

    pub fn package_name(&self) -> &str {
        &self.common.package_name
    }

    pub fn resource_type(&self) -> ResourceType {
        self.kind.resource_type()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.common.config
    }

    /// Effective materialization (`view`, `table`, ..., `seed`, `test`)
    pub fn materialized(&self) -> &str {
        self.common
            .config
            .materialized()
            .unwrap_or_else(|| self.resource_type().default_materialization())
    }

    pub fn is_ephemeral(&self) -> bool {
        self.resource_type() == ResourceType::Model && self.materialized() == "ephemeral"
    }

    /// Nodes that own a warehouse relation
    pub fn is_relational(&self) -> bool {
        match self.resource_type() {
            ResourceType::Model => !self.is_ephemeral(),
            ResourceType::Seed | ResourceType::Snapshot | ResourceType::Source => true,
            _ => false,
        }
    }

    pub fn version(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Model(attrs) => attrs.version.as_deref(),
            _ => None,
        }
    }

    pub fn latest_version(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Model(attrs) => attrs.latest_version.as_deref(),
            _ => None,
        }
    }

    pub fn access(&self) -> Access {
        match &self.kind {
            NodeKind::Model(attrs) => attrs.access,
            _ => Access::Public,
        }
    }

    pub fn group(&self) -> Option<&str> {
        self.common.config.group()
    }

    pub fn test_attrs(&self) -> Option<&TestAttrs> {
        match &self.kind {
            NodeKind::Test(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// `(database, schema, identifier)` once relation names are computed
    pub fn relation_triple(&self) -> Option<(String, String, String)> {
        Some((
            self.common.database.clone().unwrap_or_default(),
            self.common.schema.clone()?,
            self.common.alias.clone()?,
        ))
    }
}

/// A named, callable unit of templated code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    pub unique_id: UniqueId,
    pub name: String,
    pub package_name: String,
    pub original_file_path: String,
    pub file_id: String,
    /// The full `{% macro %}...{% endmacro %}` block
    pub macro_sql: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub depends_on: DependsOn,
    /// Names of other macros called from the body
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub macro_calls: Vec<String>,
    pub checksum: FileHash,
}

/// A `{% docs %}` block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Documentation {
    pub unique_id: UniqueId,
    pub name: String,
    pub package_name: String,
    pub original_file_path: String,
    pub file_id: String,
    pub block_contents: String,
}

/// A named set of nodes with a shared owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub unique_id: UniqueId,
    pub name: String,
    pub package_name: String,
    pub original_file_path: String,
    pub file_id: String,
    #[serde(default)]
    pub owner: Value,
}

/// Build a unique id from its parts
pub fn unique_id(resource_type: ResourceType, package: &str, name: &str) -> UniqueId {
    format!("{}.{}.{}", resource_type.as_str(), package, name)
}

#[cfg(test)]
#[path = "node_test.rs"]
mod tests;
