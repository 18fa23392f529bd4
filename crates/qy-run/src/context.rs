//! Shared, read-only state for one invocation's execution

use qy_core::manifest::RefLookup;
use qy_core::{Invocation, Manifest, Node, Relation, RelationType, Renderer, ResourceType, TargetInfo};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flags that shape how nodes are built
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub threads: usize,
    pub fail_fast: bool,
    pub full_refresh: bool,
    /// Build relations without reading any input rows
    pub empty: bool,
    /// Persist failing test rows regardless of node config
    pub store_failures: bool,
    /// `--event-time-start` for microbatch models
    pub event_time_start: Option<String>,
    pub event_time_end: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            fail_fast: false,
            full_refresh: false,
            empty: false,
            store_failures: false,
            event_time_start: None,
            event_time_end: None,
        }
    }
}

/// Everything a worker reads while compiling and materializing nodes
pub struct RunContext {
    pub manifest: Arc<Manifest>,
    pub renderer: Arc<dyn Renderer>,
    pub target: TargetInfo,
    pub invocation: Arc<Invocation>,
    pub options: RunOptions,
    /// Nodes selected for this invocation
    pub selected: BTreeSet<String>,
    /// Prior manifest used for `--defer`
    pub defer: Option<Arc<Manifest>>,
    pub(crate) lookup: RefLookup,
    cancel: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(
        manifest: Arc<Manifest>,
        renderer: Arc<dyn Renderer>,
        target: TargetInfo,
        invocation: Arc<Invocation>,
    ) -> Self {
        let lookup = RefLookup::new(
            &manifest.metadata.project_name,
            manifest.all_nodes(),
            manifest.disabled_nodes(),
        );
        let selected = manifest
            .nodes
            .keys()
            .chain(manifest.unit_tests.keys())
            .cloned()
            .collect();
        Self {
            manifest,
            renderer,
            target,
            invocation,
            options: RunOptions::default(),
            selected,
            defer: None,
            lookup,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_selection(mut self, selected: BTreeSet<String>) -> Self {
        self.selected = selected;
        self
    }

    pub fn with_defer(mut self, manifest: Option<Arc<Manifest>>) -> Self {
        self.defer = manifest;
        self
    }

    /// Flag shared with signal handlers; setting it drains the run
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn node(&self, unique_id: &str) -> Option<&Node> {
        self.manifest.node(unique_id)
    }

    /// Full refresh for a node: the `full_refresh` config wins over the flag
    pub fn full_refresh_for(&self, node: &Node) -> bool {
        node.config().full_refresh().unwrap_or(self.options.full_refresh)
    }
}

/// The relation a node builds, if it has one
pub fn node_relation(node: &Node) -> Option<Relation> {
    let (database, schema, identifier) = node.relation_triple()?;
    let relation = Relation::new(database, schema, identifier);
    let kind = match node.resource_type() {
        ResourceType::Model => match node.materialized() {
            "view" => RelationType::View,
            "materialized_view" => RelationType::MaterializedView,
            "ephemeral" => RelationType::Cte,
            _ => RelationType::Table,
        },
        ResourceType::Function => RelationType::Function,
        ResourceType::Source => RelationType::External,
        _ => RelationType::Table,
    };
    Some(relation.with_type(kind))
}
