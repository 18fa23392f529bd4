//! Name lookup for `ref(...)` and `source(...)` targets.

use crate::node::{Node, RefCall, ResourceType, SourceCall};
use std::collections::BTreeMap;

/// Why a lookup failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    NotFound,
    /// Only a disabled node matches; carries its unique id
    Disabled(String),
    /// Several packages define the name; carries the candidates
    Ambiguous(Vec<String>),
}

#[derive(Debug, Clone)]
struct RefEntry {
    unique_id: String,
    package: String,
    version: Option<String>,
    latest_version: Option<String>,
}

impl RefEntry {
    fn from_node(node: &Node) -> Self {
        Self {
            unique_id: node.unique_id().to_string(),
            package: node.package_name().to_string(),
            version: node.version().map(str::to_string),
            latest_version: node.latest_version().map(str::to_string),
        }
    }

    /// Whether the entry answers a ref with an optional explicit version
    fn matches_version(&self, version: Option<&str>) -> bool {
        match (version, &self.version) {
            (Some(wanted), Some(v)) => v == wanted,
            (Some(_), None) => false,
            (None, Some(v)) => match &self.latest_version {
                Some(latest) => v == latest,
                None => false,
            },
            (None, None) => true,
        }
    }
}

/// Refable nodes by name, enabled and disabled
#[derive(Debug, Clone, Default)]
pub struct RefLookup {
    root_package: String,
    enabled: BTreeMap<String, Vec<RefEntry>>,
    disabled: BTreeMap<String, Vec<RefEntry>>,
    sources: BTreeMap<(String, String), Vec<(String, String)>>,
    disabled_sources: BTreeMap<(String, String), String>,
}

fn refable(resource_type: ResourceType) -> bool {
    matches!(
        resource_type,
        ResourceType::Model | ResourceType::Seed | ResourceType::Snapshot
    )
}

impl RefLookup {
    pub fn new<'a, E, D>(root_package: &str, enabled: E, disabled: D) -> Self
    where
        E: IntoIterator<Item = &'a Node>,
        D: IntoIterator<Item = &'a Node>,
    {
        let mut lookup = Self {
            root_package: root_package.to_string(),
            ..Default::default()
        };
        for node in enabled {
            lookup.insert(node, true);
        }
        for node in disabled {
            lookup.insert(node, false);
        }
        lookup
    }

    fn insert(&mut self, node: &Node, enabled: bool) {
        if let crate::node::NodeKind::Source(attrs) = &node.kind {
            let key = (attrs.source_name.clone(), node.name().to_string());
            if enabled {
                self.sources
                    .entry(key)
                    .or_default()
                    .push((node.package_name().to_string(), node.unique_id().to_string()));
            } else {
                self.disabled_sources
                    .entry(key)
                    .or_insert_with(|| node.unique_id().to_string());
            }
            return;
        }
        if !refable(node.resource_type()) {
            return;
        }
        let map = if enabled {
            &mut self.enabled
        } else {
            &mut self.disabled
        };
        map.entry(node.name().to_string())
            .or_default()
            .push(RefEntry::from_node(node));
    }

    fn candidates<'a>(
        entries: Option<&'a Vec<RefEntry>>,
        call: &RefCall,
    ) -> Vec<&'a RefEntry> {
        entries
            .map(|list| {
                list.iter()
                    .filter(|e| call.package.as_deref().map_or(true, |p| p == e.package))
                    .filter(|e| e.matches_version(call.version.as_deref()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve a ref made from a node in `from_package`
    pub fn resolve_ref(&self, call: &RefCall, from_package: &str) -> Result<String, LookupError> {
        let found = Self::candidates(self.enabled.get(&call.name), call);
        if found.is_empty() {
            return match Self::candidates(self.disabled.get(&call.name), call).first() {
                Some(entry) => Err(LookupError::Disabled(entry.unique_id.clone())),
                None => Err(LookupError::NotFound),
            };
        }
        if found.len() == 1 {
            return Ok(found[0].unique_id.clone());
        }
        for preferred in [from_package, self.root_package.as_str()] {
            let local: Vec<&&RefEntry> = found.iter().filter(|e| e.package == preferred).collect();
            if local.len() == 1 {
                return Ok(local[0].unique_id.clone());
            }
        }
        let mut ids: Vec<String> = found.iter().map(|e| e.unique_id.clone()).collect();
        ids.sort();
        Err(LookupError::Ambiguous(ids))
    }

    /// Resolve a source call, preferring the calling package's sources
    pub fn resolve_source(&self, call: &SourceCall, from_package: &str) -> Result<String, LookupError> {
        let key = (call.source_name.clone(), call.table_name.clone());
        let Some(found) = self.sources.get(&key) else {
            return match self.disabled_sources.get(&key) {
                Some(id) => Err(LookupError::Disabled(id.clone())),
                None => Err(LookupError::NotFound),
            };
        };
        for preferred in [from_package, self.root_package.as_str()] {
            if let Some((_, id)) = found.iter().find(|(p, _)| p == preferred) {
                return Ok(id.clone());
            }
        }
        match found.as_slice() {
            [(_, id)] => Ok(id.clone()),
            many => Err(LookupError::Ambiguous(many.iter().map(|(_, id)| id.clone()).collect())),
        }
    }
}

#[cfg(test)]
#[path = "lookup_test.rs"]
mod tests;
