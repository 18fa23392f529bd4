//! Rendering nodes to executable SQL
//!
//! Compilation renders a node's raw code with a [`NodeResolver`] bound to the
//! manifest, rejects references the parser never saw, and prepends the CTEs
//! of every ephemeral model the node reaches.

use crate::context::{node_relation, RunContext};
use crate::error::{RunError, RunnerResult};
use crate::resolver::NodeResolver;
use qy_core::relation::EventTimeFilter;
use qy_core::{CoreError, Node, Relation, RenderEnv, RenderFlags};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

fn leading_with() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^\s*with\s+").expect("valid regex"))
}

/// Per-render switches
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// The target relation exists and is being extended
    pub is_incremental: bool,
    /// Microbatch window applied to inputs that declare `event_time`
    pub batch: Option<EventTimeFilter>,
    /// Unique id -> CTE name substitutions (unit test fixtures)
    pub fixtures: BTreeMap<String, String>,
    pub globals: BTreeMap<String, Value>,
}

/// A node's rendered SQL
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledNode {
    pub unique_id: String,
    pub sql: String,
    pub relation: Option<Relation>,
    /// Ephemeral models inlined as CTEs, deepest first
    pub ephemerals: Vec<String>,
}

#[derive(Clone)]
pub struct Compiler {
    ctx: Arc<RunContext>,
}

impl Compiler {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    /// Environment for rendering `node`
    pub fn render_env(&self, node: &Node, resolver: Option<Arc<NodeResolver>>, options: &CompileOptions) -> RenderEnv {
        let mut env = RenderEnv::new(self.ctx.target.clone(), node.package_name()).with_node(Arc::new(node.clone()));
        env.vars = self.ctx.manifest.vars_for(node.package_name());
        env.env = self.ctx.invocation.env().clone();
        env.this = node_relation(node);
        env.resolver = resolver.map(|r| r as Arc<dyn qy_core::ReferenceResolver>);
        env.execute = true;
        env.flags = RenderFlags {
            is_incremental: options.is_incremental,
            full_refresh: self.ctx.full_refresh_for(node),
            empty: self.ctx.options.empty,
            invocation_id: self.ctx.invocation.invocation_id.clone(),
        };
        env.globals = options.globals.clone();
        env
    }

    fn resolver(&self, node: &Node, options: &CompileOptions) -> Arc<NodeResolver> {
        let declared: BTreeSet<String> = node.common.depends_on.nodes.iter().cloned().collect();
        Arc::new(
            NodeResolver::new(Arc::clone(&self.ctx), node.unique_id(), node.package_name(), declared)
                .with_batch(options.batch.clone())
                .with_fixtures(options.fixtures.clone()),
        )
    }

    /// Render one node's body; returns the text and the ephemerals it used
    fn render_body(&self, node: &Node, text: &str, options: &CompileOptions) -> RunnerResult<(String, Vec<String>)> {
        let resolver = self.resolver(node, options);
        let env = self.render_env(node, Some(Arc::clone(&resolver)), options);
        let rendered = self
            .ctx
            .renderer
            .render(text, &env)
            .map_err(|e| RunError::compilation(node.unique_id(), e.message))?;

        let undeclared = resolver.undeclared();
        if !undeclared.is_empty() {
            return Err(CoreError::UndeclaredDependency {
                node: node.unique_id().to_string(),
                target: undeclared.join(", "),
            }
            .into());
        }
        Ok((rendered.text, resolver.ephemerals()))
    }

    /// Compile a node from its own raw code
    pub fn compile(&self, unique_id: &str, options: &CompileOptions) -> RunnerResult<CompiledNode> {
        let node = self
            .ctx
            .node(unique_id)
            .ok_or_else(|| RunError::Internal(format!("'{}' is not in the manifest", unique_id)))?;
        self.compile_text(node, &node.common.raw_code, options)
    }

    /// Compile arbitrary text in the context of `node`
    pub fn compile_text(&self, node: &Node, text: &str, options: &CompileOptions) -> RunnerResult<CompiledNode> {
        let (body, direct) = self.render_body(node, text, options)?;
        let mut order = Vec::new();
        let mut ctes = BTreeMap::new();
        let mut visiting = BTreeSet::new();
        for id in &direct {
            self.collect_cte(id, options, &mut order, &mut ctes, &mut visiting)?;
        }
        let sql = inject_ctes(&body, order.iter().filter_map(|id| ctes.get(id)));
        log::debug!("Compiled {} ({} ephemeral)", node.unique_id(), order.len());
        Ok(CompiledNode {
            unique_id: node.unique_id().to_string(),
            sql,
            relation: node_relation(node),
            ephemerals: order,
        })
    }

    /// Depth-first so that every CTE follows the ones it selects from
    fn collect_cte(
        &self,
        unique_id: &str,
        options: &CompileOptions,
        order: &mut Vec<String>,
        ctes: &mut BTreeMap<String, String>,
        visiting: &mut BTreeSet<String>,
    ) -> RunnerResult<()> {
        if ctes.contains_key(unique_id) || !visiting.insert(unique_id.to_string()) {
            return Ok(());
        }
        let node = self
            .ctx
            .node(unique_id)
            .ok_or_else(|| RunError::Internal(format!("'{}' is not in the manifest", unique_id)))?;
        let (body, nested) = self.render_body(node, &node.common.raw_code, options)?;
        for id in &nested {
            self.collect_cte(id, options, order, ctes, visiting)?;
        }
        ctes.insert(
            unique_id.to_string(),
            format!("{} as (\n{}\n)", Relation::cte(node.name()).render_path(), body.trim()),
        );
        order.push(unique_id.to_string());
        Ok(())
    }

    /// Render hook or other ad-hoc SQL for `node`, without CTE injection
    pub fn render_sql(&self, node: &Node, sql: &str) -> RunnerResult<String> {
        let (text, _) = self.render_body(node, sql, &CompileOptions::default())?;
        Ok(text)
    }
}

/// Prepend CTE definitions, merging with a leading `with` in the body
pub fn inject_ctes<'a>(body: &str, ctes: impl Iterator<Item = &'a String>) -> String {
    let defs: Vec<&str> = ctes.map(String::as_str).collect();
    if defs.is_empty() {
        return body.to_string();
    }
    let prefix = format!("with {}", defs.join(",\n"));
    match leading_with().find(body) {
        Some(m) => format!("{},\n{}", prefix, &body[m.end()..]),
        None => format!("{}\n{}", prefix, body.trim_start()),
    }
}

#[cfg(test)]
#[path = "compiler_test.rs"]
mod tests;
