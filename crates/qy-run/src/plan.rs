//! The executable subgraph of one invocation

use qy_core::{CoreResult, Manifest, Node, ResourceType};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Selected executable nodes with the edges between them
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Topological order
    pub order: Vec<String>,
    pub parents: BTreeMap<String, BTreeSet<String>>,
    pub children: BTreeMap<String, BTreeSet<String>>,
}

/// Whether the scheduler runs `node` at all
pub fn is_schedulable(node: &Node) -> bool {
    let resource_type = node.resource_type();
    if resource_type == ResourceType::Operation {
        return false;
    }
    resource_type.executable() && !node.is_ephemeral()
}

impl ExecutionPlan {
    /// Plan the `selected` nodes. A node's parents are its nearest selected
    /// ancestors; unselected or ephemeral nodes in between are walked
    /// through.
    ///
    /// With `tests_gate_children`, a model's tests run before that model's
    /// children (`build`), unless doing so would close a cycle, and unit
    /// tests run before the model they test.
    pub fn new(manifest: &Manifest, selected: &BTreeSet<String>, tests_gate_children: bool) -> CoreResult<Self> {
        let graph = manifest.graph()?;
        let members: BTreeSet<String> = selected
            .iter()
            .filter(|id| manifest.node(id).is_some_and(is_schedulable))
            .cloned()
            .collect();
        let mut parents = graph.induced_parents(&members);
        for id in &members {
            parents.entry(id.clone()).or_default();
        }

        // Unit tests read fixtures only; in `build` they gate their model
        let unit_tests: Vec<(String, BTreeSet<String>)> = parents
            .iter()
            .filter(|(id, _)| manifest.node(id).is_some_and(|n| n.resource_type() == ResourceType::UnitTest))
            .map(|(id, p)| (id.clone(), p.clone()))
            .collect();
        for (unit_test, tested) in unit_tests {
            parents.insert(unit_test.clone(), BTreeSet::new());
            if tests_gate_children {
                for model in tested {
                    parents.entry(model).or_default().insert(unit_test.clone());
                }
            }
        }

        if tests_gate_children {
            let tests: Vec<(String, BTreeSet<String>)> = parents
                .iter()
                .filter(|(id, _)| manifest.node(id).is_some_and(|n| n.resource_type() == ResourceType::Test))
                .map(|(id, p)| (id.clone(), p.clone()))
                .collect();
            let children = child_map(&parents);
            for (test, tested) in tests {
                let downstream: BTreeSet<String> = tested
                    .iter()
                    .flat_map(|t| children.get(t).into_iter().flatten())
                    .filter(|c| **c != test)
                    .cloned()
                    .collect();
                for child in downstream {
                    if !reaches(&parents, &test, &child) {
                        parents.entry(child).or_default().insert(test.clone());
                    }
                }
            }
        }

        let children = child_map(&parents);
        let order = topological(&parents, &children);
        Ok(Self {
            order,
            parents,
            children,
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.parents.contains_key(id)
    }

    /// Every node downstream of `id` in the plan
    pub fn descendants(&self, id: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack: Vec<&String> = self.children.get(id).into_iter().flatten().collect();
        while let Some(next) = stack.pop() {
            if out.insert(next.clone()) {
                stack.extend(self.children.get(next).into_iter().flatten());
            }
        }
        out
    }
}

/// Invert `parents`; every planned node gets an entry
fn child_map(parents: &BTreeMap<String, BTreeSet<String>>) -> BTreeMap<String, BTreeSet<String>> {
    let mut children: BTreeMap<String, BTreeSet<String>> =
        parents.keys().map(|id| (id.clone(), BTreeSet::new())).collect();
    for (child, ps) in parents {
        for p in ps {
            children.entry(p.clone()).or_default().insert(child.clone());
        }
    }
    children
}

/// Whether `to` is `from` or one of its ancestors
fn reaches(parents: &BTreeMap<String, BTreeSet<String>>, from: &str, to: &str) -> bool {
    let mut stack = vec![from.to_string()];
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if id == to {
            return true;
        }
        if seen.insert(id.clone()) {
            stack.extend(parents.get(&id).into_iter().flatten().cloned());
        }
    }
    false
}

/// Kahn's algorithm, ties broken by unique id
fn topological(
    parents: &BTreeMap<String, BTreeSet<String>>,
    children: &BTreeMap<String, BTreeSet<String>>,
) -> Vec<String> {
    let mut remaining: BTreeMap<&String, usize> = parents.iter().map(|(id, ps)| (id, ps.len())).collect();
    let mut order = Vec::with_capacity(parents.len());
    let mut ready: BTreeSet<&String> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| *id)
        .collect();
    while let Some(id) = ready.pop_first() {
        order.push(id.clone());
        remaining.remove(id);
        for child in children.get(id).into_iter().flatten() {
            if let Some(n) = remaining.get_mut(child) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(child);
                }
            }
        }
    }
    order
}

#[cfg(test)]
#[path = "plan_test.rs"]
mod tests;
