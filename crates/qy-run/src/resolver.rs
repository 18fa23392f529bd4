//! `ref`/`source` resolution for one node's render

use crate::context::{node_relation, RunContext};
use qy_core::manifest::LookupError;
use qy_core::node::{RefCall, SourceCall};
use qy_core::relation::EventTimeFilter;
use qy_core::{ReferenceResolver, Relation};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Resolves references against the manifest for the node being compiled
///
/// Records ephemeral models it hands out as CTEs and any target the node did
/// not declare at parse time, so the compiler can act on both afterwards.
pub struct NodeResolver {
    ctx: Arc<RunContext>,
    node_id: String,
    package: String,
    declared: BTreeSet<String>,
    batch: Option<EventTimeFilter>,
    fixtures: BTreeMap<String, String>,
    ephemerals: Mutex<Vec<String>>,
    undeclared: Mutex<Vec<String>>,
}

impl NodeResolver {
    pub fn new(ctx: Arc<RunContext>, node_id: &str, package: &str, declared: BTreeSet<String>) -> Self {
        Self {
            ctx,
            node_id: node_id.to_string(),
            package: package.to_string(),
            declared,
            batch: None,
            fixtures: BTreeMap::new(),
            ephemerals: Mutex::new(Vec::new()),
            undeclared: Mutex::new(Vec::new()),
        }
    }

    /// Filter inputs that declare an `event_time` to one batch window
    pub fn with_batch(mut self, batch: Option<EventTimeFilter>) -> Self {
        self.batch = batch;
        self
    }

    /// Replace targets (by unique id) with named CTEs
    pub fn with_fixtures(mut self, fixtures: BTreeMap<String, String>) -> Self {
        self.fixtures = fixtures;
        self
    }

    /// Ephemeral models referenced, in first-use order
    pub fn ephemerals(&self) -> Vec<String> {
        self.ephemerals
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// References that were not known when the project was parsed
    pub fn undeclared(&self) -> Vec<String> {
        self.undeclared
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn resolve_id(&self, unique_id: &str, label: String) -> Result<Relation, String> {
        if unique_id != self.node_id && !self.declared.contains(unique_id) {
            let mut undeclared = self.undeclared.lock().unwrap_or_else(|p| p.into_inner());
            if !undeclared.contains(&label) {
                undeclared.push(label);
            }
        }
        if let Some(cte) = self.fixtures.get(unique_id) {
            return Ok(Relation::cte(cte.clone()));
        }

        let node = self
            .ctx
            .node(unique_id)
            .ok_or_else(|| format!("'{}' is not in the manifest", unique_id))?;
        if node.is_ephemeral() {
            let mut ephemerals = self.ephemerals.lock().unwrap_or_else(|p| p.into_inner());
            if !ephemerals.iter().any(|e| e == unique_id) {
                ephemerals.push(unique_id.to_string());
            }
            return Ok(Relation::cte(node.name()));
        }

        let deferred = if self.ctx.selected.contains(unique_id) {
            None
        } else {
            self.ctx
                .defer
                .as_ref()
                .and_then(|m| m.node(unique_id))
                .filter(|n| n.is_relational())
        };
        if deferred.is_some() {
            log::debug!("Deferring {} to the state manifest", unique_id);
        }
        let mut relation = node_relation(deferred.unwrap_or(node))
            .ok_or_else(|| format!("'{}' has no relation", unique_id))?;

        if let (Some(batch), Some(field)) = (&self.batch, node.config().event_time()) {
            relation.event_time_filter = Some(EventTimeFilter {
                field: field.to_string(),
                start: batch.start.clone(),
                end: batch.end.clone(),
            });
        }
        Ok(relation)
    }
}

pub(crate) fn lookup_message(err: LookupError, label: &str) -> String {
    match err {
        LookupError::NotFound => format!("'{}' was not found", label),
        LookupError::Disabled(id) => format!("'{}' resolves to the disabled node {}", label, id),
        LookupError::Ambiguous(ids) => format!("'{}' is ambiguous: {}", label, ids.join(", ")),
    }
}

impl ReferenceResolver for NodeResolver {
    fn resolve_ref(&self, call: &RefCall) -> Result<Relation, String> {
        let label = call.to_string();
        let unique_id = self
            .ctx
            .lookup
            .resolve_ref(call, &self.package)
            .map_err(|e| lookup_message(e, &label))?;
        self.resolve_id(&unique_id, label)
    }

    fn resolve_source(&self, call: &SourceCall) -> Result<Relation, String> {
        let label = format!("source('{}', '{}')", call.source_name, call.table_name);
        let unique_id = self
            .ctx
            .lookup
            .resolve_source(call, &self.package)
            .map_err(|e| lookup_message(e, &label))?;
        self.resolve_id(&unique_id, label)
    }
}

#[cfg(test)]
#[path = "resolver_test.rs"]
mod tests;
