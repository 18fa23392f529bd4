//! Manifest builder.
//!
//! Turns parse outputs into a frozen [`Manifest`] in phases, each consuming
//! the previous one's result: collect, versions, patches, config, docs,
//! macro dependencies, references, access, relation names, unique relations,
//! edge maps, freeze. Errors within a phase are gathered and reported
//! together before the next phase runs.

use super::{LookupError, MacroResolver, Manifest, ManifestMetadata, RefLookup};
use crate::config_layer::{merge_layers, normalize_key, ConfigLayer, LayerSource};
use crate::error::{CoreError, CoreResult};
use crate::graph::Graph;
use crate::invocation::Invocation;
use crate::node::{
    Access, Documentation, Group, Macro, Node, NodeKind, ResourceType,
};
use crate::parser::{MacroPatch, ParseOutput, ParsedNode, Patch, VersionPatch};
use crate::project::Project;
use crate::relation::{Relation, TargetInfo};
use crate::render::{RenderEnv, Renderer};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

/// Config keys whose mapping values are configs rather than folders
const DICT_CONFIGS: &[&str] = &[
    "meta",
    "docs",
    "persist_docs",
    "quoting",
    "column_types",
    "contract",
    "grants",
    "freshness",
    "snapshot_meta_column_names",
    "labels",
];

/// Schema suffix for tests
const TEST_AUDIT_SCHEMA: &str = "dbt_test__audit";

/// Inputs besides parse outputs
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// `--vars`, overriding project vars
    pub cli_vars: BTreeMap<String, Value>,
    /// Lowest-precedence config layer for every node
    pub adapter_defaults: BTreeMap<String, Value>,
}

/// Builds a manifest for one project and target
pub struct ManifestBuilder<'a> {
    project: &'a Project,
    target: &'a TargetInfo,
    invocation: &'a Invocation,
    options: BuildOptions,
    renderer: Option<&'a dyn Renderer>,
}

struct Collected {
    nodes: Vec<ParsedNode>,
    patches: Vec<Patch>,
    macro_patches: Vec<MacroPatch>,
    macros: BTreeMap<String, Macro>,
    docs: BTreeMap<String, Documentation>,
    groups: BTreeMap<String, Group>,
}

struct Partitioned {
    enabled: BTreeMap<String, Node>,
    disabled: BTreeMap<String, Vec<Node>>,
}

fn doc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"\{\{\s*doc\(\s*['"]([^'"]+)['"]\s*(?:,\s*['"]([^'"]+)['"]\s*)?\)\s*\}\}"#,
        )
        .expect("valid regex")
    })
}

pub(crate) fn compare_versions(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

fn is_config_entry(key: &str, value: &Value) -> bool {
    key.starts_with('+') || !value.is_object() || DICT_CONFIGS.contains(&normalize_key(key).as_str())
}

/// Config layers from a project config tree walked along `fqn`
fn tree_layers(tree: &Value, fqn: &[String]) -> Vec<ConfigLayer> {
    let mut layers = Vec::new();
    let mut current = tree;
    let mut depth = 0;
    while let Value::Object(map) = current {
        let values: BTreeMap<String, Value> = map
            .iter()
            .filter(|(k, v)| is_config_entry(k, v))
            .map(|(k, v)| (normalize_key(k), v.clone()))
            .collect();
        if !values.is_empty() {
            let source = if depth == 0 {
                LayerSource::ProjectDefaults
            } else {
                LayerSource::Folder(fqn[..depth].join("."))
            };
            layers.push(ConfigLayer::new(source, values));
        }
        let Some(part) = fqn.get(depth) else {
            break;
        };
        match map.get(part.as_str()) {
            Some(next) if !is_config_entry(part, next) => current = next,
            _ => break,
        }
        depth += 1;
    }
    layers
}

fn unrendered_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(project: &'a Project, target: &'a TargetInfo, invocation: &'a Invocation) -> Self {
        Self {
            project,
            target,
            invocation,
            options: BuildOptions::default(),
            renderer: None,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Render templated config values and honor `generate_*_name` overrides
    pub fn with_renderer(mut self, renderer: &'a dyn Renderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    fn root(&self) -> &str {
        self.project.name()
    }

    /// Vars visible to a package: its own project vars, the root project's
    /// vars for it, then CLI vars
    pub fn package_vars(&self, package: &str) -> BTreeMap<String, Value> {
        let names = self.project.package_names();
        let mut vars = BTreeMap::new();
        if let Some(pkg) = self.project.package(package) {
            if !pkg.is_root {
                vars.extend(pkg.config.vars_for_package(package, &names));
            }
        }
        vars.extend(self.project.config.vars_for_package(package, &names));
        vars.extend(self.options.cli_vars.clone());
        vars
    }

    fn render_env(&self, package: &str) -> RenderEnv {
        let mut env = RenderEnv::new(self.target.clone(), package);
        env.vars = self.package_vars(package);
        env.env = self.invocation.env().clone();
        env.flags.invocation_id = self.invocation.invocation_id.clone();
        env
    }

    /// Build the manifest
    pub fn build(&self, outputs: &[ParseOutput]) -> CoreResult<Manifest> {
        let mut collected = self.collect(outputs)?;
        self.apply_versions(&mut collected)?;
        self.apply_patches(&mut collected)?;
        self.apply_configs(&mut collected.nodes)?;
        let mut parts = self.partition(std::mem::take(&mut collected.nodes))?;
        self.resolve_docs(&mut parts.enabled, &collected.docs)?;

        let resolver = self.macro_resolver(collected.macros.values());
        self.resolve_macro_dependencies(&resolver, &mut collected.macros, &mut parts.enabled);
        self.resolve_references(&mut parts)?;
        self.check_access(&parts.enabled)?;
        self.compute_relation_names(&mut parts.enabled, &collected.macros)?;
        self.check_unique_relations(&parts.enabled)?;

        let mut manifest = Manifest {
            macros: collected.macros,
            docs: collected.docs,
            groups: collected.groups,
            disabled: parts.disabled,
            ..Default::default()
        };
        for package in self.project.package_names() {
            let vars = self.package_vars(&package);
            manifest.vars.insert(package, vars);
        }
        self.build_edges(&mut manifest, parts.enabled)?;

        manifest.metadata = ManifestMetadata {
            project_name: self.root().to_string(),
            adapter_type: self.target.adapter_type.clone(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            invocation_id: self.invocation.invocation_id.clone(),
            ..Default::default()
        };
        manifest.metadata.manifest_hash = manifest.compute_hash();
        log::debug!(
            "Built manifest with {} nodes, {} macros, {} disabled",
            manifest.node_count(),
            manifest.macros.len(),
            manifest.disabled.len()
        );
        Ok(manifest)
    }

    /// Phase 1: gather everything, rejecting duplicate macros, docs and groups
    fn collect(&self, outputs: &[ParseOutput]) -> CoreResult<Collected> {
        let mut errors = Vec::new();
        let mut collected = Collected {
            nodes: Vec::new(),
            patches: Vec::new(),
            macro_patches: Vec::new(),
            macros: BTreeMap::new(),
            docs: BTreeMap::new(),
            groups: BTreeMap::new(),
        };
        for out in outputs.iter().filter(|o| !o.include_target) {
            for (key, message) in &out.deprecations {
                self.invocation.deprecation(key, message.clone());
            }
            collected.nodes.extend(out.nodes.iter().cloned());
            collected.patches.extend(out.patches.iter().cloned());
            collected.macro_patches.extend(out.macro_patches.iter().cloned());
            for m in &out.macros {
                if let Some(existing) = collected.macros.get(&m.unique_id) {
                    errors.push(CoreError::DuplicateResource {
                        unique_id: m.unique_id.clone(),
                        path1: existing.original_file_path.clone(),
                        path2: m.original_file_path.clone(),
                    });
                    continue;
                }
                collected.macros.insert(m.unique_id.clone(), m.clone());
            }
            for d in &out.docs {
                if let Some(existing) = collected.docs.get(&d.unique_id) {
                    errors.push(CoreError::DuplicateResource {
                        unique_id: d.unique_id.clone(),
                        path1: existing.original_file_path.clone(),
                        path2: d.original_file_path.clone(),
                    });
                    continue;
                }
                collected.docs.insert(d.unique_id.clone(), d.clone());
            }
            for g in &out.groups {
                if let Some(existing) = collected.groups.get(&g.unique_id) {
                    errors.push(CoreError::DuplicateResource {
                        unique_id: g.unique_id.clone(),
                        path1: existing.original_file_path.clone(),
                        path2: g.original_file_path.clone(),
                    });
                    continue;
                }
                collected.groups.insert(g.unique_id.clone(), g.clone());
            }
        }
        CoreError::collect(errors)?;
        Ok(collected)
    }

    /// Phase 2: turn the files backing each declared version into versioned
    /// model nodes
    fn apply_versions(&self, collected: &mut Collected) -> CoreResult<()> {
        let mut errors = Vec::new();
        for patch in &collected.patches {
            if patch.versions.is_empty() || patch.resource_type != Some(ResourceType::Model) {
                continue;
            }
            let latest = patch.latest_version.clone().or_else(|| {
                patch
                    .versions
                    .iter()
                    .map(|v| v.v.clone())
                    .max_by(|a, b| compare_versions(a, b))
            });
            if let Some(latest) = &latest {
                if !patch.versions.iter().any(|v| &v.v == latest) {
                    errors.push(CoreError::InvalidVersion {
                        name: patch.name.clone(),
                        message: format!("latest_version {} is not one of the declared versions", latest),
                    });
                    continue;
                }
            }
            let mut claimed: BTreeSet<usize> = BTreeSet::new();
            for version in &patch.versions {
                let candidates = match &version.defined_in {
                    Some(file) => vec![file.clone()],
                    None => vec![format!("{}_v{}", patch.name, version.v), patch.name.clone()],
                };
                let position = candidates.iter().find_map(|file_name| {
                    collected.nodes.iter().position(|p| {
                        p.node.resource_type() == ResourceType::Model
                            && p.node.package_name() == patch.package_name
                            && p.node.name() == file_name
                            && p.node.version().is_none()
                    })
                });
                let Some(position) = position else {
                    errors.push(CoreError::InvalidVersion {
                        name: patch.name.clone(),
                        message: format!(
                            "no file defines version {} (expected {})",
                            version.v,
                            candidates.join(" or ")
                        ),
                    });
                    continue;
                };
                if !claimed.insert(position) {
                    errors.push(CoreError::InvalidVersion {
                        name: patch.name.clone(),
                        message: format!("version {} reuses the file of another version", version.v),
                    });
                    continue;
                }
                let parsed = &mut collected.nodes[position];
                let common = &mut parsed.node.common;
                common.unique_id = format!("model.{}.{}.v{}", patch.package_name, patch.name, version.v);
                common.name = patch.name.clone();
                if let Some(last) = common.fqn.last_mut() {
                    *last = patch.name.clone();
                }
                common.fqn.push(format!("v{}", version.v));
                if let NodeKind::Model(attrs) = &mut parsed.node.kind {
                    attrs.version = Some(version.v.clone());
                    attrs.latest_version = latest.clone();
                }
            }
        }
        CoreError::collect(errors)
    }

    /// Phase 3: merge schema patches into their nodes and macros
    fn apply_patches(&self, collected: &mut Collected) -> CoreResult<()> {
        let mut errors = Vec::new();
        let mut index: HashMap<(ResourceType, String, String), Vec<usize>> = HashMap::new();
        for (i, parsed) in collected.nodes.iter().enumerate() {
            let node = &parsed.node;
            index
                .entry((node.resource_type(), node.package_name().to_string(), node.name().to_string()))
                .or_default()
                .push(i);
        }
        let mut seen: HashMap<(ResourceType, String, String), String> = HashMap::new();
        for patch in &collected.patches {
            let Some(resource_type) = patch.resource_type else {
                continue;
            };
            let key = (resource_type, patch.package_name.clone(), patch.name.clone());
            if let Some(first) = seen.insert(key.clone(), patch.original_file_path.clone()) {
                errors.push(CoreError::DuplicateResource {
                    unique_id: format!("{}.{}.{} (patch)", resource_type, patch.package_name, patch.name),
                    path1: first,
                    path2: patch.original_file_path.clone(),
                });
                continue;
            }
            let targets = index.get(&key).cloned().unwrap_or_default();
            if targets.is_empty() {
                if patch.required {
                    errors.push(CoreError::MissingRequiredPatch {
                        path: patch.original_file_path.clone(),
                        resource_type: resource_type.to_string(),
                        name: patch.name.clone(),
                    });
                } else {
                    self.invocation.warn(
                        "NoNodeForYamlKey",
                        format!(
                            "{} declares {} '{}' which does not exist",
                            patch.original_file_path, resource_type, patch.name
                        ),
                    );
                }
                continue;
            }
            for i in targets {
                let parsed = &mut collected.nodes[i];
                let version = parsed
                    .node
                    .version()
                    .and_then(|v| patch.versions.iter().find(|vp| vp.v == v))
                    .cloned();
                if let Err(e) = apply_patch(parsed, patch, version.as_ref()) {
                    errors.push(e);
                }
            }
        }
        for mp in &collected.macro_patches {
            let uid = crate::node::unique_id(ResourceType::Macro, &mp.package_name, &mp.name);
            match collected.macros.get_mut(&uid) {
                Some(m) => {
                    m.description = mp.description.clone();
                    if !mp.arguments.is_empty() {
                        m.arguments = mp.arguments.clone();
                    }
                }
                None => self.invocation.warn(
                    "MacroNotFoundForPatch",
                    format!("macro '{}' is described in YAML but not defined", mp.name),
                ),
            }
        }
        CoreError::collect(errors)
    }

    /// Phase 4: layer configs for every node
    fn apply_configs(&self, nodes: &mut [ParsedNode]) -> CoreResult<()> {
        let mut errors = Vec::new();
        for parsed in nodes.iter_mut() {
            if let Err(e) = self.apply_config(parsed) {
                errors.push(e);
            }
        }
        CoreError::collect(errors)
    }

    fn apply_config(&self, parsed: &mut ParsedNode) -> CoreResult<()> {
        let resource_type = parsed.node.resource_type();
        let package = parsed.node.package_name().to_string();
        let fqn = parsed.node.common.fqn.clone();

        let mut project_layers = Vec::new();
        if let Some(pkg) = self.project.package(&package) {
            if !pkg.is_root {
                project_layers.extend(tree_layers(pkg.config.config_tree(resource_type), &fqn));
            }
        }
        project_layers.extend(tree_layers(self.project.config.config_tree(resource_type), &fqn));

        let mut layers = Vec::new();
        if !self.options.adapter_defaults.is_empty() {
            layers.push(ConfigLayer::new(
                LayerSource::AdapterDefaults,
                self.options.adapter_defaults.clone(),
            ));
        }
        if resource_type == ResourceType::Test {
            let mut defaults = BTreeMap::new();
            defaults.insert("severity".to_string(), Value::String("ERROR".to_string()));
            layers.push(ConfigLayer::new(LayerSource::AdapterDefaults, defaults));
        }
        for layer in &project_layers {
            let values = self.render_values(&layer.values, &package, parsed)?;
            layers.push(ConfigLayer::new(layer.source.clone(), values));
        }
        let yaml = self.render_values(&parsed.yaml_config, &package, parsed)?;
        layers.push(ConfigLayer::new(LayerSource::SchemaYaml, yaml));

        let mut inline = parsed.inline_config.clone();
        if self.needs_dynamic_config(parsed) {
            inline.extend(self.capture_dynamic_config(parsed)?);
        }
        layers.push(ConfigLayer::new(LayerSource::Inline, inline));

        let config = merge_layers(&layers);
        let common = &mut parsed.node.common;
        for layer in &project_layers {
            for (k, v) in &layer.values {
                common
                    .unrendered_config
                    .entry(k.clone())
                    .or_insert_with(|| unrendered_text(v));
            }
        }
        if let NodeKind::Model(attrs) = &mut parsed.node.kind {
            if let Some(access) = config.get_str("access") {
                attrs.access = Access::parse(access).ok_or_else(|| CoreError::ConfigInvalid {
                    message: format!(
                        "{}: invalid access '{}'; expected private, protected or public",
                        parsed.node.common.unique_id, access
                    ),
                })?;
            }
        }
        parsed.node.common.config = config;
        Ok(())
    }

    /// Render string values holding template expressions
    fn render_values(
        &self,
        values: &BTreeMap<String, Value>,
        package: &str,
        parsed: &ParsedNode,
    ) -> CoreResult<BTreeMap<String, Value>> {
        let Some(renderer) = self.renderer else {
            return Ok(values.clone());
        };
        let mut out = BTreeMap::new();
        for (key, value) in values {
            let rendered = match value {
                Value::String(s) if s.contains("{{") && !matches!(key.as_str(), "pre_hook" | "post_hook") => {
                    let env = self.render_env(package);
                    let result = renderer.render(s, &env).map_err(|e| CoreError::Render {
                        node: parsed.node.common.unique_id.clone(),
                        message: format!("config '{}': {}", key, e),
                    })?;
                    Value::String(result.text.trim().to_string())
                }
                other => other.clone(),
            };
            out.insert(key.clone(), rendered);
        }
        Ok(out)
    }

    /// Inline config keys whose values are not literals require rendering
    fn needs_dynamic_config(&self, parsed: &ParsedNode) -> bool {
        self.renderer.is_some()
            && parsed.node.resource_type().compilable()
            && parsed.node.common.unrendered_config.keys().any(|k| {
                !parsed.inline_config.contains_key(k) && !parsed.yaml_config.contains_key(k)
            })
    }

    fn capture_dynamic_config(&self, parsed: &mut ParsedNode) -> CoreResult<BTreeMap<String, Value>> {
        let Some(renderer) = self.renderer else {
            return Ok(BTreeMap::new());
        };
        let env = self
            .render_env(parsed.node.package_name())
            .with_node(std::sync::Arc::new(parsed.node.clone()));
        let rendered = renderer
            .render(&parsed.node.common.raw_code, &env)
            .map_err(|e| CoreError::Render {
                node: parsed.node.common.unique_id.clone(),
                message: e.message,
            })?;
        let common = &mut parsed.node.common;
        for call in rendered.refs {
            if !common.refs.contains(&call) {
                common.refs.push(call);
            }
        }
        for call in rendered.sources {
            if !common.sources.contains(&call) {
                common.sources.push(call);
            }
        }
        Ok(rendered.config)
    }

    /// Split nodes into enabled (unique ids must be unique) and disabled
    fn partition(&self, nodes: Vec<ParsedNode>) -> CoreResult<Partitioned> {
        let mut errors = Vec::new();
        let mut parts = Partitioned {
            enabled: BTreeMap::new(),
            disabled: BTreeMap::new(),
        };
        for parsed in nodes {
            let node = parsed.node;
            let uid = node.unique_id().to_string();
            if !node.config().enabled() {
                parts.disabled.entry(uid).or_default().push(node);
                continue;
            }
            if let Some(existing) = parts.enabled.get(&uid) {
                errors.push(CoreError::DuplicateResource {
                    unique_id: uid,
                    path1: existing.common.original_file_path.clone(),
                    path2: node.common.original_file_path.clone(),
                });
                continue;
            }
            parts.enabled.insert(uid, node);
        }
        CoreError::collect(errors)?;
        Ok(parts)
    }

    /// Phase 5: replace `{{ doc('x') }}` in descriptions
    fn resolve_docs(
        &self,
        nodes: &mut BTreeMap<String, Node>,
        docs: &BTreeMap<String, Documentation>,
    ) -> CoreResult<()> {
        let mut errors = Vec::new();
        for node in nodes.values_mut() {
            let uid = node.common.unique_id.clone();
            let package = node.common.package_name.clone();
            let mut resolve = |text: &mut String| {
                if !text.contains("doc(") {
                    return;
                }
                match self.expand_docs(text, &package, docs) {
                    Ok(expanded) => *text = expanded,
                    Err(name) => errors.push(CoreError::DocNotFound {
                        node: uid.clone(),
                        name,
                    }),
                }
            };
            resolve(&mut node.common.description);
            for column in node.common.columns.values_mut() {
                resolve(&mut column.description);
            }
        }
        CoreError::collect(errors)
    }

    fn expand_docs(
        &self,
        text: &str,
        package: &str,
        docs: &BTreeMap<String, Documentation>,
    ) -> Result<String, String> {
        let mut missing = None;
        let expanded = doc_regex().replace_all(text, |caps: &regex::Captures<'_>| {
            let (pkg, name) = match caps.get(2) {
                Some(name) => (Some(caps[1].to_string()), name.as_str().to_string()),
                None => (None, caps[1].to_string()),
            };
            let found = match &pkg {
                Some(pkg) => docs.get(&format!("doc.{}.{}", pkg, name)),
                None => docs
                    .get(&format!("doc.{}.{}", package, name))
                    .or_else(|| docs.get(&format!("doc.{}.{}", self.root(), name)))
                    .or_else(|| docs.values().find(|d| d.name == name)),
            };
            match found {
                Some(doc) => doc.block_contents.clone(),
                None => {
                    missing.get_or_insert(name);
                    String::new()
                }
            }
        });
        match missing {
            Some(name) => Err(name),
            None => Ok(expanded.into_owned()),
        }
    }

    fn macro_resolver<'m, I>(&self, macros: I) -> MacroResolver
    where
        I: IntoIterator<Item = &'m Macro>,
    {
        let mut resolver = MacroResolver::new(macros, self.root(), self.target.dispatch_chain());
        for dispatch in &self.project.config.dispatch {
            resolver = resolver.with_search_order(&dispatch.macro_namespace, dispatch.search_order.clone());
        }
        resolver
    }

    /// Phase 6: macro-to-macro and node-to-macro dependencies
    fn resolve_macro_dependencies(
        &self,
        resolver: &MacroResolver,
        macros: &mut BTreeMap<String, Macro>,
        nodes: &mut BTreeMap<String, Node>,
    ) {
        for m in macros.values_mut() {
            for call in &m.macro_calls {
                for dep in resolver.call_dependencies(call, &m.package_name) {
                    if dep != m.unique_id {
                        m.depends_on.add_macro(&dep);
                    }
                }
            }
        }
        for node in nodes.values_mut() {
            let package = node.common.package_name.clone();
            let mut deps = Vec::new();
            for call in &node.common.macro_calls {
                deps.extend(resolver.call_dependencies(call, &package));
            }
            if node.resource_type().materializable() {
                let name = format!("materialization_{}", node.materialized());
                for prefix in resolver.dispatch_chain() {
                    if let Some(id) = resolver.find(&format!("{}_{}", name, prefix), &package) {
                        deps.push(id.to_string());
                        break;
                    }
                }
            }
            for dep in deps {
                node.common.depends_on.add_macro(&dep);
            }
        }
    }

    /// Phase 7: resolve refs, sources and metrics into `depends_on.nodes`
    fn resolve_references(&self, parts: &mut Partitioned) -> CoreResult<()> {
        let lookup = RefLookup::new(
            self.root(),
            parts.enabled.values(),
            parts.disabled.values().flatten(),
        );
        let metric_index: Vec<(String, String, String)> = parts
            .enabled
            .values()
            .filter(|n| n.resource_type() == ResourceType::Metric)
            .map(|n| (n.package_name().to_string(), n.name().to_string(), n.unique_id().to_string()))
            .collect();
        let measures: BTreeMap<String, String> = parts
            .enabled
            .values()
            .filter_map(|n| match &n.kind {
                NodeKind::SemanticModel(attrs) => Some((n.unique_id(), attrs)),
                _ => None,
            })
            .flat_map(|(uid, attrs)| {
                attrs
                    .measures
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(move |m| (m.to_string(), uid.to_string()))
            })
            .collect();

        let mut errors = Vec::new();
        let mut to_disable = Vec::new();
        for node in parts.enabled.values_mut() {
            let uid = node.common.unique_id.clone();
            let package = node.common.package_name.clone();
            let testlike = node.resource_type().testable();
            let mut disable = false;

            for call in node.common.refs.clone() {
                match lookup.resolve_ref(&call, &package) {
                    Ok(target) => {
                        if target != uid {
                            node.common.depends_on.add_node(&target);
                        }
                    }
                    Err(LookupError::Disabled(_)) if testlike => disable = true,
                    Err(LookupError::Disabled(_)) => errors.push(CoreError::RefToDisabled {
                        node: uid.clone(),
                        target: call.to_string(),
                    }),
                    Err(LookupError::NotFound) => errors.push(CoreError::RefNotFound {
                        node: uid.clone(),
                        target: call.to_string(),
                    }),
                    Err(LookupError::Ambiguous(candidates)) => errors.push(CoreError::AmbiguousRef {
                        node: uid.clone(),
                        target: call.to_string(),
                        candidates: candidates.join(", "),
                    }),
                }
            }
            for call in node.common.sources.clone() {
                let label = format!("source('{}', '{}')", call.source_name, call.table_name);
                match lookup.resolve_source(&call, &package) {
                    Ok(target) => node.common.depends_on.add_node(&target),
                    Err(LookupError::Disabled(_)) if testlike => disable = true,
                    Err(LookupError::Disabled(_)) => errors.push(CoreError::RefToDisabled {
                        node: uid.clone(),
                        target: label,
                    }),
                    Err(LookupError::NotFound) => errors.push(CoreError::RefNotFound {
                        node: uid.clone(),
                        target: label,
                    }),
                    Err(LookupError::Ambiguous(candidates)) => errors.push(CoreError::AmbiguousRef {
                        node: uid.clone(),
                        target: label,
                        candidates: candidates.join(", "),
                    }),
                }
            }
            for call in node.common.metrics.clone() {
                let (pkg, name) = match call.as_slice() {
                    [name] => (None, name.clone()),
                    [pkg, name, ..] => (Some(pkg.clone()), name.clone()),
                    [] => continue,
                };
                let found = metric_index
                    .iter()
                    .filter(|(p, n, _)| n == &name && pkg.as_ref().map_or(true, |want| want == p))
                    .min_by_key(|(p, _, _)| (p != &package, p != self.root(), p.clone()));
                match found {
                    Some((_, _, target)) if target != &uid => node.common.depends_on.add_node(target),
                    Some(_) => {}
                    None => errors.push(CoreError::RefNotFound {
                        node: uid.clone(),
                        target: format!("metric '{}'", name),
                    }),
                }
            }
            if let NodeKind::Metric(attrs) = &node.kind {
                let measure = attrs.type_params.get("measure").and_then(|m| match m {
                    Value::Object(obj) => obj.get("name").and_then(Value::as_str),
                    other => other.as_str(),
                });
                if let Some(measure) = measure {
                    match measures.get(measure) {
                        Some(target) => node.common.depends_on.add_node(target),
                        None => errors.push(CoreError::RefNotFound {
                            node: uid.clone(),
                            target: format!("measure '{}'", measure),
                        }),
                    }
                }
            }

            if disable {
                to_disable.push(uid.clone());
                continue;
            }
            if let NodeKind::Test(attrs) = &mut node.kind {
                if attrs.test_metadata.is_some() {
                    attrs.attached_node = node.common.refs.first().and_then(|call| {
                        lookup.resolve_ref(call, &package).ok()
                    });
                }
            }
        }
        for uid in to_disable {
            if let Some(node) = parts.enabled.remove(&uid) {
                log::debug!("Disabling {} because it depends on a disabled node", uid);
                parts.disabled.entry(uid).or_default().push(node);
            }
        }
        CoreError::collect(errors)
    }

    /// Phase 8: group and package visibility of models
    fn check_access(&self, nodes: &BTreeMap<String, Node>) -> CoreResult<()> {
        let mut errors = Vec::new();
        for node in nodes.values() {
            if node.resource_type().testable() {
                continue;
            }
            for parent_id in &node.common.depends_on.nodes {
                let Some(parent) = nodes.get(parent_id) else {
                    continue;
                };
                if parent.resource_type() != ResourceType::Model {
                    continue;
                }
                let reason = match parent.access() {
                    Access::Private if parent.group().is_none() || parent.group() != node.group() => Some(format!(
                        "it is private to group '{}'",
                        parent.group().unwrap_or_default()
                    )),
                    Access::Protected if parent.package_name() != node.package_name() => Some(format!(
                        "it is protected to package '{}'",
                        parent.package_name()
                    )),
                    _ => None,
                };
                if let Some(reason) = reason {
                    errors.push(CoreError::AccessViolation {
                        node: node.unique_id().to_string(),
                        target: parent_id.clone(),
                        reason,
                    });
                }
            }
        }
        CoreError::collect(errors)
    }

    fn user_macro(&self, macros: &BTreeMap<String, Macro>, name: &str) -> bool {
        macros
            .values()
            .any(|m| m.name == name && m.package_name == self.root())
    }

    /// Call a root-project `generate_*_name` override
    fn generate_name(
        &self,
        macro_name: &str,
        custom: Option<&str>,
        node: &Node,
    ) -> CoreResult<String> {
        let renderer = self.renderer.ok_or_else(|| CoreError::Internal {
            message: format!("{} override requires a renderer", macro_name),
        })?;
        let node_value = serde_json::to_value(node).unwrap_or(Value::Null);
        let args = [
            custom.map(|c| Value::String(c.to_string())).unwrap_or(Value::Null),
            node_value,
        ];
        let env = self.render_env(self.root());
        let rendered = renderer
            .call_macro(macro_name, &args, &env)
            .map_err(|e| CoreError::Render {
                node: node.unique_id().to_string(),
                message: format!("{}: {}", macro_name, e),
            })?;
        Ok(rendered.text.trim().to_string())
    }

    /// Phase 9: database, schema, alias and relation name per node
    fn compute_relation_names(
        &self,
        nodes: &mut BTreeMap<String, Node>,
        macros: &BTreeMap<String, Macro>,
    ) -> CoreResult<()> {
        let override_schema = self.renderer.is_some() && self.user_macro(macros, "generate_schema_name");
        let override_alias = self.renderer.is_some() && self.user_macro(macros, "generate_alias_name");
        let override_database = self.renderer.is_some() && self.user_macro(macros, "generate_database_name");

        let mut errors = Vec::new();
        for node in nodes.values_mut() {
            let resource_type = node.resource_type();
            if resource_type == ResourceType::Source {
                let common = &mut node.common;
                if common.database.is_none() {
                    common.database = Some(self.target.database.clone());
                }
                let relation = Relation::new(
                    common.database.clone().unwrap_or_default(),
                    common.schema.clone().unwrap_or_default(),
                    common.alias.clone().unwrap_or_default(),
                );
                common.relation_name = Some(relation.render_path());
                continue;
            }
            if !matches!(
                resource_type,
                ResourceType::Model
                    | ResourceType::Seed
                    | ResourceType::Snapshot
                    | ResourceType::Test
                    | ResourceType::Function
            ) {
                continue;
            }
            match self.relation_parts(node, override_schema, override_alias, override_database) {
                Ok((database, schema, alias)) => {
                    let relational = node.is_relational() || resource_type == ResourceType::Function;
                    let common = &mut node.common;
                    common.relation_name =
                        relational.then(|| Relation::new(database.clone(), schema.clone(), alias.clone()).render_path());
                    common.database = Some(database);
                    common.schema = Some(schema);
                    common.alias = Some(alias);
                }
                Err(e) => errors.push(e),
            }
        }
        CoreError::collect(errors)
    }

    fn relation_parts(
        &self,
        node: &Node,
        override_schema: bool,
        override_alias: bool,
        override_database: bool,
    ) -> CoreResult<(String, String, String)> {
        let config = node.config();
        let is_snapshot = node.resource_type() == ResourceType::Snapshot;

        let custom_database = if is_snapshot {
            config.get_str("target_database").or(config.database())
        } else {
            config.database()
        };
        let database = if override_database {
            self.generate_name("generate_database_name", custom_database, node)?
        } else {
            custom_database.unwrap_or(self.target.database.as_str()).to_string()
        };

        let snapshot_schema = if is_snapshot { config.get_str("target_schema") } else { None };
        let custom_schema = match config.schema() {
            Some(s) => Some(s),
            None if node.resource_type() == ResourceType::Test => Some(TEST_AUDIT_SCHEMA),
            None => None,
        };
        let schema = match snapshot_schema {
            Some(verbatim) => verbatim.to_string(),
            None if override_schema => self.generate_name("generate_schema_name", custom_schema, node)?,
            None => match custom_schema {
                Some(custom) => format!("{}_{}", self.target.schema, custom.trim()),
                None => self.target.schema.clone(),
            },
        };

        let custom_alias = config.alias();
        let alias = if override_alias {
            self.generate_name("generate_alias_name", custom_alias, node)?
        } else {
            match (custom_alias, node.version()) {
                (Some(alias), _) => alias.to_string(),
                (None, Some(v)) => format!("{}_v{}", node.name(), v),
                (None, None) => node.name().to_string(),
            }
        };
        Ok((database, schema, alias))
    }

    /// Phase 10: no two enabled relations may share a database representation
    fn check_unique_relations(&self, nodes: &BTreeMap<String, Node>) -> CoreResult<()> {
        let mut seen: BTreeMap<(String, String, String), &str> = BTreeMap::new();
        let mut errors = Vec::new();
        for node in nodes.values() {
            if !matches!(
                node.resource_type(),
                ResourceType::Model | ResourceType::Seed | ResourceType::Snapshot
            ) || node.is_ephemeral()
            {
                continue;
            }
            let Some((db, schema, alias)) = node.relation_triple() else {
                continue;
            };
            let key = (db.to_lowercase(), schema.to_lowercase(), alias.to_lowercase());
            match seen.get(&key) {
                Some(first) => errors.push(CoreError::DuplicateRelation {
                    first: first.to_string(),
                    second: node.unique_id().to_string(),
                    relation: node.common.relation_name.clone().unwrap_or_else(|| format!("{}.{}.{}", db, schema, alias)),
                }),
                None => {
                    seen.insert(key, node.unique_id());
                }
            }
        }
        CoreError::collect(errors)
    }

    /// Phase 11: edge maps, groups, subgraph ids; the graph must be acyclic
    fn build_edges(&self, manifest: &mut Manifest, mut nodes: BTreeMap<String, Node>) -> CoreResult<()> {
        let enabled: BTreeSet<String> = nodes.keys().cloned().collect();
        let mut parent_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut child_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut group_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let group_names: BTreeSet<&str> = manifest.groups.values().map(|g| g.name.as_str()).collect();

        for (uid, node) in nodes.iter_mut() {
            let mut parents: Vec<String> = node
                .common
                .depends_on
                .nodes
                .iter()
                .filter(|p| enabled.contains(*p))
                .cloned()
                .collect();
            parents.sort();
            parents.dedup();
            for parent in &parents {
                child_map.entry(parent.clone()).or_default().push(uid.clone());
            }
            child_map.entry(uid.clone()).or_default();
            parent_map.insert(uid.clone(), parents);

            match node.group().map(str::to_string) {
                Some(group) => {
                    if !group_names.contains(group.as_str()) {
                        self.invocation.warn(
                            "GroupNotFound",
                            format!("{} is assigned to undefined group '{}'", uid, group),
                        );
                    }
                    group_map.entry(group.clone()).or_default().push(uid.clone());
                    node.common.subgraph_id = group;
                }
                None => node.common.subgraph_id = node.common.package_name.clone(),
            }
        }
        for children in child_map.values_mut() {
            children.sort();
            children.dedup();
        }
        Graph::from_parent_map(&parent_map)?;

        for (uid, node) in nodes {
            if let Some(map) = manifest.map_for_mut(node.resource_type()) {
                map.insert(uid, node);
            }
        }
        manifest.parent_map = parent_map;
        manifest.child_map = child_map;
        manifest.group_map = group_map;
        Ok(())
    }
}

/// Merge one patch (and the matching version entry) into a node
fn apply_patch(parsed: &mut ParsedNode, patch: &Patch, version: Option<&VersionPatch>) -> CoreResult<()> {
    let common = &mut parsed.node.common;
    if !patch.description.is_empty() {
        common.description = patch.description.clone();
    }
    common.patch_path = Some(patch.file_id.clone());
    for (name, column) in &patch.columns {
        common.columns.insert(name.clone(), column.clone());
    }
    for (k, v) in &patch.config {
        parsed.yaml_config.insert(k.clone(), v.clone());
    }
    for (k, v) in &patch.unrendered_config {
        common.unrendered_config.entry(k.clone()).or_insert_with(|| v.clone());
    }
    if let Some(version) = version {
        if let Some(description) = &version.description {
            common.description = description.clone();
        }
        if !version.columns.is_empty() {
            common.columns = version.columns.clone();
        }
        for (k, v) in &version.config {
            parsed.yaml_config.insert(k.clone(), v.clone());
            common.unrendered_config.entry(k.clone()).or_insert_with(|| unrendered_text(v));
        }
    }
    match &mut parsed.node.kind {
        NodeKind::Model(attrs) => {
            if let Some(access) = &patch.access {
                attrs.access = Access::parse(access).ok_or_else(|| CoreError::ConfigInvalid {
                    message: format!(
                        "{}: invalid access '{}'; expected private, protected or public",
                        patch.original_file_path, access
                    ),
                })?;
            }
            if !patch.constraints.is_empty() {
                attrs.constraints = patch.constraints.clone();
            }
            if patch.deprecation_date.is_some() {
                attrs.deprecation_date = patch.deprecation_date.clone();
            }
        }
        NodeKind::Function(attrs) => {
            if let Some(function) = &patch.function {
                *attrs = function.clone();
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
#[path = "builder_test.rs"]
mod tests;
