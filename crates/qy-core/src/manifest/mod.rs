//! The manifest: the frozen, fully resolved graph of a project.

mod builder;
mod lookup;
mod macros;

pub use builder::{BuildOptions, ManifestBuilder};
pub(crate) use builder::compare_versions;
pub use lookup::{LookupError, RefLookup};
pub use macros::MacroResolver;

use crate::artifact;
use crate::checksum::compute_checksum;
use crate::error::CoreResult;
use crate::graph::Graph;
use crate::node::{Documentation, Group, Macro, Node, ResourceType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Schema identifier written into every manifest
pub const MANIFEST_SCHEMA_VERSION: &str = "https://schemas.getdbt.com/dbt/manifest/v12.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub dbt_schema_version: String,
    pub project_name: String,
    pub adapter_type: String,
    pub generated_at: String,
    pub invocation_id: String,
    /// Hash of everything below the metadata
    pub manifest_hash: String,
}

impl Default for ManifestMetadata {
    fn default() -> Self {
        Self {
            dbt_schema_version: MANIFEST_SCHEMA_VERSION.to_string(),
            project_name: String::new(),
            adapter_type: String::new(),
            generated_at: String::new(),
            invocation_id: String::new(),
            manifest_hash: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub metadata: ManifestMetadata,
    /// Models, seeds, snapshots, tests, analyses, operations and functions
    pub nodes: BTreeMap<String, Node>,
    pub sources: BTreeMap<String, Node>,
    pub unit_tests: BTreeMap<String, Node>,
    pub exposures: BTreeMap<String, Node>,
    pub metrics: BTreeMap<String, Node>,
    pub semantic_models: BTreeMap<String, Node>,
    pub saved_queries: BTreeMap<String, Node>,
    pub macros: BTreeMap<String, Macro>,
    pub docs: BTreeMap<String, Documentation>,
    pub groups: BTreeMap<String, Group>,
    /// Nodes excluded by `enabled: false`, by unique id
    pub disabled: BTreeMap<String, Vec<Node>>,
    /// child -> parents, restricted to enabled nodes
    pub parent_map: BTreeMap<String, Vec<String>>,
    /// parent -> children
    pub child_map: BTreeMap<String, Vec<String>>,
    /// group name -> member unique ids
    pub group_map: BTreeMap<String, Vec<String>>,
    /// Project vars per package, CLI vars applied
    #[serde(default)]
    pub vars: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Manifest {
    fn map_for(&self, resource_type: ResourceType) -> Option<&BTreeMap<String, Node>> {
        match resource_type {
            ResourceType::Source => Some(&self.sources),
            ResourceType::UnitTest => Some(&self.unit_tests),
            ResourceType::Exposure => Some(&self.exposures),
            ResourceType::Metric => Some(&self.metrics),
            ResourceType::SemanticModel => Some(&self.semantic_models),
            ResourceType::SavedQuery => Some(&self.saved_queries),
            ResourceType::Macro | ResourceType::Doc | ResourceType::Group => None,
            _ => Some(&self.nodes),
        }
    }

    pub(crate) fn map_for_mut(&mut self, resource_type: ResourceType) -> Option<&mut BTreeMap<String, Node>> {
        match resource_type {
            ResourceType::Source => Some(&mut self.sources),
            ResourceType::UnitTest => Some(&mut self.unit_tests),
            ResourceType::Exposure => Some(&mut self.exposures),
            ResourceType::Metric => Some(&mut self.metrics),
            ResourceType::SemanticModel => Some(&mut self.semantic_models),
            ResourceType::SavedQuery => Some(&mut self.saved_queries),
            ResourceType::Macro | ResourceType::Doc | ResourceType::Group => None,
            _ => Some(&mut self.nodes),
        }
    }

    /// Any enabled graph node by unique id
    pub fn node(&self, unique_id: &str) -> Option<&Node> {
        let prefix = unique_id.split('.').next()?;
        let resource_type = ResourceType::parse(prefix)?;
        self.map_for(resource_type)?.get(unique_id)
    }

    /// Every enabled graph node
    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .values()
            .chain(self.sources.values())
            .chain(self.unit_tests.values())
            .chain(self.exposures.values())
            .chain(self.metrics.values())
            .chain(self.semantic_models.values())
            .chain(self.saved_queries.values())
    }

    pub fn disabled_nodes(&self) -> impl Iterator<Item = &Node> {
        self.disabled.values().flatten()
    }

    pub fn node_count(&self) -> usize {
        self.all_nodes().count()
    }

    pub fn parents(&self, unique_id: &str) -> &[String] {
        self.parent_map.get(unique_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children(&self, unique_id: &str) -> &[String] {
        self.child_map.get(unique_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The dependency graph of enabled nodes
    pub fn graph(&self) -> CoreResult<Graph> {
        Graph::from_parent_map(&self.parent_map)
    }

    /// Project hooks of one type, root project first, in declaration order
    pub fn hooks(&self, hook_type: &str) -> Vec<&Node> {
        let root = &self.metadata.project_name;
        let mut hooks: Vec<&Node> = self
            .nodes
            .values()
            .filter(|n| match &n.kind {
                crate::node::NodeKind::Operation(attrs) => attrs.hook_type.as_deref() == Some(hook_type),
                _ => false,
            })
            .collect();
        hooks.sort_by_key(|n| {
            let index = match &n.kind {
                crate::node::NodeKind::Operation(attrs) => attrs.index,
                _ => 0,
            };
            (n.package_name() != root, n.package_name().to_string(), index)
        });
        hooks
    }

    /// Vars visible to a package
    pub fn vars_for(&self, package: &str) -> BTreeMap<String, Value> {
        self.vars.get(package).cloned().unwrap_or_default()
    }

    /// Stable hash over everything except metadata
    pub fn compute_hash(&self) -> String {
        let mut copy = self.clone();
        copy.metadata = ManifestMetadata::default();
        let json = serde_json::to_string(&copy).unwrap_or_default();
        compute_checksum(&json)
    }

    pub fn save(&self, path: &Path) -> CoreResult<()> {
        artifact::write_json(path, self)
    }

    /// Load a manifest written by [`Manifest::save`]; `None` when absent
    pub fn load(path: &Path) -> CoreResult<Option<Self>> {
        artifact::read_json(path)
    }
}

#[cfg(test)]
#[path = "manifest_test.rs"]
mod tests;
