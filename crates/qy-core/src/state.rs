//! State comparison between a previous manifest and the current one.
//!
//! Every node present in both manifests gets a set of [`ChangeKind`]s; nodes
//! only in the current manifest are new, nodes only in the previous one are
//! removed. The selector engine's `state:` methods read nothing else.

use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use crate::node::{ColumnInfo, Node};
use crate::run_results::RunResults;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// One way a node can differ from its previous version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    Body,
    Configs,
    Relation,
    PersistedDescriptions,
    Macros,
    Contract,
    Vars,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 7] = [
        ChangeKind::Body,
        ChangeKind::Configs,
        ChangeKind::Relation,
        ChangeKind::PersistedDescriptions,
        ChangeKind::Macros,
        ChangeKind::Contract,
        ChangeKind::Vars,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Body => "body",
            ChangeKind::Configs => "configs",
            ChangeKind::Relation => "relation",
            ChangeKind::PersistedDescriptions => "persisted_descriptions",
            ChangeKind::Macros => "macros",
            ChangeKind::Contract => "contract",
            ChangeKind::Vars => "vars",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to an enforced column contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractChange {
    ColumnRemoved { column: String },
    TypeChanged { column: String, old_type: String, new_type: String },
    ColumnAdded { column: String },
    EnforcementRemoved,
}

impl ContractChange {
    /// Breaking changes can fail downstream consumers
    pub fn is_breaking(&self) -> bool {
        !matches!(self, ContractChange::ColumnAdded { .. })
    }
}

/// Comparator settings
#[derive(Debug, Clone, Copy, Default)]
pub struct CompareOptions {
    /// Compare configs by their unrendered source text
    pub unrendered: bool,
}

/// Changes of every node between two manifests
#[derive(Debug, Clone, Default)]
pub struct StateComparison {
    /// Nodes in both manifests -> change kinds (empty when unmodified)
    pub changes: BTreeMap<String, BTreeSet<ChangeKind>>,
    /// Contract changes of nodes with a `Contract` change
    pub contract_changes: BTreeMap<String, Vec<ContractChange>>,
    pub new: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl StateComparison {
    pub fn is_new(&self, unique_id: &str) -> bool {
        self.new.contains(unique_id)
    }

    /// Present in the previous manifest
    pub fn is_old(&self, unique_id: &str) -> bool {
        self.changes.contains_key(unique_id)
    }

    /// New, or changed in any way
    pub fn is_modified(&self, unique_id: &str) -> bool {
        self.is_new(unique_id) || self.changes.get(unique_id).is_some_and(|k| !k.is_empty())
    }

    /// New, or changed in the given way
    pub fn is_modified_by(&self, unique_id: &str, kind: ChangeKind) -> bool {
        self.is_new(unique_id) || self.changes.get(unique_id).is_some_and(|k| k.contains(&kind))
    }

    pub fn is_unmodified(&self, unique_id: &str) -> bool {
        self.changes.get(unique_id).is_some_and(|k| k.is_empty())
    }

    pub fn has_breaking_contract_change(&self, unique_id: &str) -> bool {
        self.contract_changes
            .get(unique_id)
            .is_some_and(|c| c.iter().any(ContractChange::is_breaking))
    }
}

/// Collapse runs of whitespace so layout-only edits compare equal
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn same_body(previous: &Node, current: &Node) -> bool {
    previous.common.checksum.name == current.common.checksum.name
        && previous.common.checksum.checksum == current.common.checksum.checksum
}

fn same_configs(previous: &Node, current: &Node, options: CompareOptions) -> bool {
    if options.unrendered {
        let normalize = |node: &Node| -> BTreeMap<String, String> {
            node.common
                .unrendered_config
                .iter()
                .map(|(k, v)| (k.clone(), normalize_whitespace(v)))
                .collect()
        };
        return normalize(previous) == normalize(current);
    }
    previous.common.config == current.common.config
}

fn same_relation(previous: &Node, current: &Node) -> bool {
    let triple = |n: &Node| {
        (
            n.common.database.clone(),
            n.common.schema.clone(),
            n.common.alias.clone(),
        )
    };
    triple(previous) == triple(current)
}

fn persist_docs(node: &Node, key: &str) -> bool {
    node.config()
        .get_path(&format!("persist_docs.{}", key))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

fn same_persisted_descriptions(previous: &Node, current: &Node) -> bool {
    let relation = persist_docs(previous, "relation") || persist_docs(current, "relation");
    let columns = persist_docs(previous, "columns") || persist_docs(current, "columns");
    if relation && previous.common.description != current.common.description {
        return false;
    }
    if columns {
        let descriptions = |n: &Node| -> BTreeMap<String, String> {
            n.common
                .columns
                .iter()
                .map(|(k, c)| (k.clone(), c.description.clone()))
                .collect()
        };
        return descriptions(previous) == descriptions(current);
    }
    true
}

fn column_type(column: &ColumnInfo) -> String {
    column.data_type.clone().unwrap_or_default().to_lowercase()
}

/// Contract differences; empty unless either side enforces a contract
pub fn contract_changes(previous: &Node, current: &Node) -> Vec<ContractChange> {
    let was = previous.config().contract_enforced();
    let is = current.config().contract_enforced();
    if !was && !is {
        return Vec::new();
    }
    if was && !is {
        return vec![ContractChange::EnforcementRemoved];
    }
    let mut changes = Vec::new();
    if !was {
        for name in current.common.columns.keys() {
            changes.push(ContractChange::ColumnAdded { column: name.clone() });
        }
        return changes;
    }
    for (name, old) in &previous.common.columns {
        match current.common.columns.get(name) {
            None => changes.push(ContractChange::ColumnRemoved { column: name.clone() }),
            Some(new) if column_type(old) != column_type(new) => changes.push(ContractChange::TypeChanged {
                column: name.clone(),
                old_type: column_type(old),
                new_type: column_type(new),
            }),
            Some(_) => {}
        }
    }
    for name in current.common.columns.keys() {
        if !previous.common.columns.contains_key(name) {
            changes.push(ContractChange::ColumnAdded { column: name.clone() });
        }
    }
    changes
}

fn same_vars(previous: &Manifest, current: &Manifest, node: &Node) -> bool {
    let package = node.package_name();
    let before = previous.vars_for(package);
    let after = current.vars_for(package);
    node.common
        .vars
        .iter()
        .all(|name| before.get(name) == after.get(name))
}

/// Macros whose definition differs, plus macros only on one side
fn changed_macros(previous: &Manifest, current: &Manifest) -> BTreeSet<String> {
    let mut changed = BTreeSet::new();
    for (id, m) in &current.macros {
        match previous.macros.get(id) {
            Some(old) if old.macro_sql == m.macro_sql => {}
            _ => {
                changed.insert(id.clone());
            }
        }
    }
    for id in previous.macros.keys() {
        if !current.macros.contains_key(id) {
            changed.insert(id.clone());
        }
    }
    changed
}

/// Whether any macro reachable from `roots` is in `changed`
fn reaches_changed_macro(current: &Manifest, roots: &[String], changed: &BTreeSet<String>) -> bool {
    let mut stack: Vec<&str> = roots.iter().map(String::as_str).collect();
    let mut seen = BTreeSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if changed.contains(id) {
            return true;
        }
        if let Some(m) = current.macros.get(id) {
            stack.extend(m.depends_on.macros.iter().map(String::as_str));
        }
    }
    false
}

/// Classify every node of `current` against `previous`
pub fn compare(previous: &Manifest, current: &Manifest, options: CompareOptions) -> StateComparison {
    let mut comparison = StateComparison::default();
    let macros = changed_macros(previous, current);

    for node in current.all_nodes() {
        let uid = node.unique_id();
        let Some(old) = previous.node(uid) else {
            comparison.new.insert(uid.to_string());
            continue;
        };
        let mut kinds = BTreeSet::new();
        if !same_body(old, node) {
            kinds.insert(ChangeKind::Body);
        }
        if !same_configs(old, node, options) {
            kinds.insert(ChangeKind::Configs);
        }
        if !same_relation(old, node) {
            kinds.insert(ChangeKind::Relation);
        }
        if !same_persisted_descriptions(old, node) {
            kinds.insert(ChangeKind::PersistedDescriptions);
        }
        if !macros.is_empty() && reaches_changed_macro(current, &node.common.depends_on.macros, &macros) {
            kinds.insert(ChangeKind::Macros);
        }
        let contract = contract_changes(old, node);
        if !contract.is_empty() {
            kinds.insert(ChangeKind::Contract);
            comparison.contract_changes.insert(uid.to_string(), contract);
        }
        if !same_vars(previous, current, node) {
            kinds.insert(ChangeKind::Vars);
        }
        comparison.changes.insert(uid.to_string(), kinds);
    }
    for node in previous.all_nodes() {
        if current.node(node.unique_id()).is_none() {
            comparison.removed.insert(node.unique_id().to_string());
        }
    }
    comparison
}

/// Artifacts of a previous invocation (`--state <dir>`)
#[derive(Debug, Clone)]
pub struct PreviousState {
    pub path: PathBuf,
    pub manifest: Manifest,
    pub run_results: Option<RunResults>,
}

impl PreviousState {
    /// Load `manifest.json` (required) and `run_results.json` from `dir`
    pub fn load(dir: &Path) -> CoreResult<Self> {
        let manifest_path = dir.join("manifest.json");
        let manifest = Manifest::load(&manifest_path)?.ok_or_else(|| CoreError::Artifact {
            path: manifest_path.display().to_string(),
            message: "no manifest found in the state directory".to_string(),
        })?;
        let run_results = RunResults::load(&dir.join("run_results.json"))?;
        Ok(Self {
            path: dir.to_path_buf(),
            manifest,
            run_results,
        })
    }

    pub fn compare(&self, current: &Manifest, options: CompareOptions) -> StateComparison {
        compare(&self.manifest, current, options)
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
