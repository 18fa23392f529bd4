//! Dependency graph over node unique ids.

use crate::error::{CoreError, CoreResult};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// A directed acyclic graph; edges point from parent to child
#[derive(Debug, Clone)]
pub struct Graph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Add a node, returning its index
    pub fn add_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.index.insert(id.to_string(), idx);
        idx
    }

    /// Add an edge `parent -> child`
    pub fn add_edge(&mut self, parent: &str, child: &str) {
        let p = self.add_node(parent);
        let c = self.add_node(child);
        if self.graph.find_edge(p, c).is_none() {
            self.graph.add_edge(p, c, ());
        }
    }

    /// Build from a child -> parents map. Parents missing from the map are
    /// ignored so callers can pass maps restricted to enabled nodes.
    pub fn from_parent_map(parent_map: &BTreeMap<String, Vec<String>>) -> CoreResult<Self> {
        let mut graph = Self::new();
        for id in parent_map.keys() {
            graph.add_node(id);
        }
        for (child, parents) in parent_map {
            for parent in parents {
                if parent_map.contains_key(parent) {
                    graph.add_edge(parent, child);
                }
            }
        }
        graph.validate()?;
        Ok(graph)
    }

    /// Fail with the cycle path if the graph has a cycle
    pub fn validate(&self) -> CoreResult<()> {
        self.topological_order().map(|_| ())
    }

    fn find_cycle_path(&self, start: NodeIndex) -> String {
        let mut path = vec![self.graph[start].clone()];
        let mut current = start;
        let mut visited = HashSet::new();
        visited.insert(current);
        while let Some(edge) = self.graph.edges(current).next() {
            let target = edge.target();
            path.push(self.graph[target].clone());
            if target == start || !visited.insert(target) {
                break;
            }
            current = target;
        }
        path.join(" -> ")
    }

    /// Node ids with every parent before its children
    pub fn topological_order(&self) -> CoreResult<Vec<String>> {
        match toposort(&self.graph, None) {
            Ok(indices) => Ok(indices.into_iter().map(|i| self.graph[i].clone()).collect()),
            Err(cycle) => Err(CoreError::CircularDependency {
                cycle: self.find_cycle_path(cycle.node_id()),
            }),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_ids(&self) -> BTreeSet<String> {
        self.index.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn neighbors(&self, id: &str, direction: Direction) -> BTreeSet<String> {
        let Some(&idx) = self.index.get(id) else {
            return BTreeSet::new();
        };
        self.graph
            .edges_directed(idx, direction)
            .map(|e| match direction {
                Direction::Incoming => self.graph[e.source()].clone(),
                Direction::Outgoing => self.graph[e.target()].clone(),
            })
            .collect()
    }

    pub fn parents(&self, id: &str) -> BTreeSet<String> {
        self.neighbors(id, Direction::Incoming)
    }

    pub fn children(&self, id: &str) -> BTreeSet<String> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Transitive parents, up to `depth` hops when given
    pub fn ancestors(&self, id: &str, depth: Option<usize>) -> BTreeSet<String> {
        self.reachable(id, Direction::Incoming, depth)
    }

    /// Transitive children, up to `depth` hops when given
    pub fn descendants(&self, id: &str, depth: Option<usize>) -> BTreeSet<String> {
        self.reachable(id, Direction::Outgoing, depth)
    }

    fn reachable(&self, id: &str, direction: Direction, max_depth: Option<usize>) -> BTreeSet<String> {
        let Some(&start) = self.index.get(id) else {
            return BTreeSet::new();
        };
        let mut result = BTreeSet::new();
        let mut visited = HashSet::new();
        visited.insert(start);
        let mut queue = VecDeque::new();
        queue.push_back((start, 0usize));
        while let Some((current, depth)) = queue.pop_front() {
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            for edge in self.graph.edges_directed(current, direction) {
                let neighbor = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                if visited.insert(neighbor) {
                    result.insert(self.graph[neighbor].clone());
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }
        result
    }

    /// The induced subgraph on `selected`, as a child -> parents map.
    ///
    /// Edges through unselected nodes are preserved: a selected node depends
    /// on its nearest selected ancestors.
    pub fn induced_parents(&self, selected: &BTreeSet<String>) -> BTreeMap<String, BTreeSet<String>> {
        let mut out = BTreeMap::new();
        for id in selected {
            let mut parents = BTreeSet::new();
            let mut stack: Vec<String> = self.parents(id).into_iter().collect();
            let mut seen = HashSet::new();
            while let Some(p) = stack.pop() {
                if !seen.insert(p.clone()) {
                    continue;
                }
                if selected.contains(&p) {
                    parents.insert(p);
                } else {
                    stack.extend(self.parents(&p));
                }
            }
            out.insert(id.clone(), parents);
        }
        out
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod tests;
