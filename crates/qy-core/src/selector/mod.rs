//! Node selection.
//!
//! Expressions (see [`parse`]) are evaluated against a frozen manifest:
//! every criteria runs its method, expands along the dependency graph, and
//! collects the tests attached to what it picked. Indirectly collected tests
//! are kept or dropped per [`IndirectSelection`] once the whole expression
//! has been evaluated, then `--exclude` and resource type filters apply.

mod methods;
mod parse;
mod yaml;

pub use methods::{search, SelectionContext};
pub use parse::{
    parse_criteria, parse_expression, parse_expressions, IndirectSelection, MethodName, SelectionCriteria,
    SelectionSpec,
};
pub use yaml::{SelectorDefinition, SelectorsFile};

use crate::error::CoreResult;
use crate::graph::Graph;
use crate::node::ResourceType;
use std::collections::{BTreeMap, BTreeSet};

/// Directly and indirectly selected nodes of a (sub)expression
#[derive(Debug, Clone, Default)]
struct Selection {
    direct: BTreeSet<String>,
    /// Candidate tests with the mode that collected them
    indirect: BTreeMap<String, IndirectSelection>,
}

impl Selection {
    fn all(&self) -> BTreeSet<String> {
        self.direct.iter().chain(self.indirect.keys()).cloned().collect()
    }

    fn add_indirect(&mut self, id: String, mode: IndirectSelection) {
        let entry = self.indirect.entry(id).or_insert(mode);
        *entry = (*entry).min(mode);
    }
}

/// Everything that shapes one selection
#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
    /// `--select`; `None` selects every enabled node
    pub select: Option<SelectionSpec>,
    /// `--exclude`
    pub exclude: Option<SelectionSpec>,
    /// `--resource-type`; empty keeps every type
    pub resource_types: BTreeSet<ResourceType>,
    /// `--exclude-resource-type`
    pub exclude_resource_types: BTreeSet<ResourceType>,
    pub indirect_selection: IndirectSelection,
}

impl SelectionRequest {
    /// Build a request from raw CLI values
    pub fn from_args<S: AsRef<str>>(select: &[S], exclude: &[S]) -> CoreResult<Self> {
        Ok(Self {
            select: parse_expressions(select)?,
            exclude: parse_expressions(exclude)?,
            ..Default::default()
        })
    }

    pub fn with_resource_types(mut self, types: impl IntoIterator<Item = ResourceType>) -> Self {
        self.resource_types = types.into_iter().collect();
        self
    }

    pub fn with_indirect_selection(mut self, mode: IndirectSelection) -> Self {
        self.indirect_selection = mode;
        self
    }
}

/// Evaluates selection expressions against one manifest
pub struct NodeSelector<'a> {
    ctx: SelectionContext<'a>,
    graph: Graph,
}

impl<'a> NodeSelector<'a> {
    pub fn new(ctx: SelectionContext<'a>) -> CoreResult<Self> {
        let graph = ctx.manifest.graph()?;
        Ok(Self { ctx, graph })
    }

    fn is_test(&self, id: &str) -> bool {
        self.ctx
            .manifest
            .node(id)
            .is_some_and(|n| n.resource_type().testable())
    }

    /// Tests with at least one parent in `nodes`
    fn attached_tests(&self, nodes: &BTreeSet<String>) -> BTreeSet<String> {
        let mut tests = BTreeSet::new();
        for id in nodes {
            for child in self.ctx.manifest.children(id) {
                if self.is_test(child) && !nodes.contains(child) {
                    tests.insert(child.clone());
                }
            }
        }
        tests
    }

    fn expand(&self, criteria: &SelectionCriteria, found: BTreeSet<String>) -> BTreeSet<String> {
        let mut expanded = found.clone();
        if criteria.childrens_parents {
            let mut children = found.clone();
            for id in &found {
                children.extend(self.graph.descendants(id, None));
            }
            expanded.extend(children.iter().cloned());
            for id in &children {
                expanded.extend(self.graph.ancestors(id, None));
            }
            return expanded;
        }
        if criteria.parents {
            for id in &found {
                expanded.extend(self.graph.ancestors(id, criteria.parents_depth));
            }
        }
        if criteria.children {
            for id in &found {
                expanded.extend(self.graph.descendants(id, criteria.children_depth));
            }
        }
        expanded
    }

    fn evaluate(&self, spec: &SelectionSpec, default_mode: IndirectSelection) -> CoreResult<Selection> {
        match spec {
            SelectionSpec::All => {
                let direct = self
                    .ctx
                    .manifest
                    .all_nodes()
                    .map(|n| n.unique_id().to_string())
                    .collect();
                Ok(Selection {
                    direct,
                    indirect: BTreeMap::new(),
                })
            }
            SelectionSpec::Criteria(criteria) => {
                let found = search(&self.ctx, &criteria.method, &criteria.value)?;
                let direct = self.expand(criteria, found);
                let mode = criteria.indirect_selection.unwrap_or(default_mode);
                let mut selection = Selection::default();
                for test in self.attached_tests(&direct) {
                    selection.add_indirect(test, mode);
                }
                selection.direct = direct;
                log::debug!(
                    "selector '{}' matched {} node(s)",
                    criteria.raw,
                    selection.direct.len()
                );
                Ok(selection)
            }
            SelectionSpec::Union(specs) => {
                let mut merged = Selection::default();
                for s in specs {
                    let part = self.evaluate(s, default_mode)?;
                    merged.direct.extend(part.direct);
                    for (id, mode) in part.indirect {
                        merged.add_indirect(id, mode);
                    }
                }
                Ok(merged)
            }
            SelectionSpec::Intersection(specs) => {
                let mut parts = Vec::with_capacity(specs.len());
                for s in specs {
                    parts.push(self.evaluate(s, default_mode)?);
                }
                let Some((first, rest)) = parts.split_first() else {
                    return Ok(Selection::default());
                };
                let mut direct = first.direct.clone();
                let mut everything = first.all();
                for p in rest {
                    direct = direct.intersection(&p.direct).cloned().collect();
                    everything = everything.intersection(&p.all()).cloned().collect();
                }
                let mut selection = Selection {
                    direct,
                    indirect: BTreeMap::new(),
                };
                for id in everything {
                    if selection.direct.contains(&id) {
                        continue;
                    }
                    let mode = parts
                        .iter()
                        .filter_map(|p| p.indirect.get(&id))
                        .max()
                        .copied()
                        .unwrap_or(default_mode);
                    selection.add_indirect(id, mode);
                }
                Ok(selection)
            }
            SelectionSpec::Difference(base, removed) => {
                let base = self.evaluate(base, default_mode)?;
                let removed = self.evaluate(removed, default_mode)?.all();
                Ok(Selection {
                    direct: base.direct.difference(&removed).cloned().collect(),
                    indirect: base
                        .indirect
                        .into_iter()
                        .filter(|(id, _)| !removed.contains(id))
                        .collect(),
                })
            }
        }
    }

    /// Keep each candidate test per the mode that collected it
    fn resolve_indirect(&self, selection: Selection) -> BTreeSet<String> {
        let direct = selection.direct;
        let mut buildable = direct.clone();
        for id in &direct {
            buildable.extend(self.graph.ancestors(id, None));
        }
        let mut selected = direct.clone();
        for (test, mode) in selection.indirect {
            let parents = self.ctx.manifest.parents(&test);
            let keep = match mode {
                IndirectSelection::Eager => true,
                IndirectSelection::Cautious => parents.iter().all(|p| direct.contains(p)),
                IndirectSelection::Buildable => parents.iter().all(|p| buildable.contains(p)),
                IndirectSelection::Empty => false,
            };
            if keep {
                selected.insert(test);
            }
        }
        selected
    }

    /// Evaluate one expression to a set of unique ids
    pub fn select_spec(&self, spec: &SelectionSpec, mode: IndirectSelection) -> CoreResult<BTreeSet<String>> {
        let selection = self.evaluate(spec, mode)?;
        Ok(self.resolve_indirect(selection))
    }

    /// Apply a full request: selection, exclusion, resource type filters
    pub fn select(&self, request: &SelectionRequest) -> CoreResult<BTreeSet<String>> {
        let spec = request.select.clone().unwrap_or(SelectionSpec::All);
        let mut selected = self.select_spec(&spec, request.indirect_selection)?;

        if let Some(exclude) = &request.exclude {
            let removed = self.evaluate(exclude, request.indirect_selection)?;
            let mut removed_all = removed.direct.clone();
            if request.indirect_selection != IndirectSelection::Empty {
                removed_all.extend(self.attached_tests(&removed.direct));
            }
            selected.retain(|id| !removed_all.contains(id));
        }

        selected.retain(|id| {
            let Some(node) = self.ctx.manifest.node(id) else {
                return false;
            };
            let rt = node.resource_type();
            (request.resource_types.is_empty() || request.resource_types.contains(&rt))
                && !request.exclude_resource_types.contains(&rt)
        });
        log::debug!("selected {} node(s)", selected.len());
        Ok(selected)
    }

    /// Selected ids in dependency order
    pub fn ordered(&self, selected: &BTreeSet<String>) -> CoreResult<Vec<String>> {
        Ok(self
            .graph
            .topological_order()?
            .into_iter()
            .filter(|id| selected.contains(id))
            .collect())
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

#[cfg(test)]
#[path = "selector_test.rs"]
mod tests;
