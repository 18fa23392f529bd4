//! The minijinja-backed [`Renderer`].
//!
//! Every render gets a fresh environment whose callables share one
//! [`RenderScope`], so captured refs, sources, config and `return` values
//! never leak between renders. Macros are loaded lazily by unique id.

use crate::builtins::builtin_macros;
use crate::convert::{arg_to_string, json_to_value, value_to_json};
use crate::error::{JinjaError, JinjaResult};
use crate::functions::{
    make_discard_fn, make_env_var_fn, make_from_json_fn, make_from_yaml_fn, make_is_incremental_fn,
    make_log_fn, make_raise_compiler_error_fn, make_ref_fn, make_return_fn,
    make_should_full_refresh_fn, make_source_fn, make_to_json_fn, make_to_yaml_fn, make_var_fn,
    make_warn_fn, DISCARD_FN, RETURN_FN,
};
use crate::objects::{
    macro_name, run_macro, AdapterObject, ConfigObject, MacroFn, MacroOutcome, Namespace,
    RelationObject,
};
use crate::scope::RenderScope;
use minijinja::value::Value;
use minijinja::{AutoEscape, Environment};
use qy_core::manifest::MacroResolver;
use qy_core::{Macro, Manifest, ProjectConfig, Relation, RenderEnv, RenderError, Rendered, Renderer, TargetInfo};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

/// Globals a package macro may not shadow; only root project macros can
const OVERRIDABLE_GLOBALS: &[&str] = &["ref", "source", "config", "var", "env_var", "is_incremental"];

fn do_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{%(-?)\s*do\s+(.+?)\s*(-?)%\}").expect("valid regex"))
}

fn return_call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(^|[^.\w])return\s*\(").expect("valid regex"))
}

/// Rewrite `{% do expr %}` and `return(...)` into calls the environment
/// provides
pub(crate) fn preprocess(source: &str) -> String {
    let with_do = do_tag_regex().replace_all(source, format!("{{{{$1 {}($2) $3}}}}", DISCARD_FN).as_str());
    return_call_regex()
        .replace_all(&with_do, format!("${{1}}{}(", RETURN_FN).as_str())
        .into_owned()
}

/// Template renderer bound to a set of macros
pub struct JinjaRenderer {
    root_package: String,
    /// macro unique id -> preprocessed template source
    sources: Arc<BTreeMap<String, String>>,
    /// distinct macro names
    names: BTreeSet<String>,
    /// package -> its macro names
    packages: BTreeMap<String, Vec<String>>,
    resolver: Arc<MacroResolver>,
}

impl JinjaRenderer {
    /// Bind to `macros` plus the built-in macros
    pub fn new<'a, I>(macros: I, root_package: &str, target: &TargetInfo) -> Self
    where
        I: IntoIterator<Item = &'a Macro>,
    {
        let mut all: Vec<Macro> = macros.into_iter().cloned().collect();
        all.extend(builtin_macros());

        let resolver = MacroResolver::new(all.iter(), root_package, target.dispatch_chain());
        let mut sources = BTreeMap::new();
        let mut names = BTreeSet::new();
        let mut packages: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for m in &all {
            sources.insert(m.unique_id.clone(), preprocess(&m.macro_sql));
            names.insert(m.name.clone());
            packages
                .entry(m.package_name.clone())
                .or_default()
                .push(m.name.clone());
        }
        log::debug!("Jinja renderer bound to {} macros", all.len());
        Self {
            root_package: root_package.to_string(),
            sources: Arc::new(sources),
            names,
            packages,
            resolver: Arc::new(resolver),
        }
    }

    /// Bind to a manifest's macros
    pub fn from_manifest(manifest: &Manifest, target: &TargetInfo) -> Self {
        Self::new(manifest.macros.values(), &manifest.metadata.project_name, target)
    }

    /// Apply the project's `dispatch:` search orders
    pub fn with_dispatch(mut self, config: &ProjectConfig) -> Self {
        let mut resolver = (*self.resolver).clone();
        for dispatch in &config.dispatch {
            resolver = resolver.with_search_order(&dispatch.macro_namespace, dispatch.search_order.clone());
        }
        self.resolver = Arc::new(resolver);
        self
    }

    fn environment(&self, scope: &Arc<RenderScope>) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        let sources = Arc::clone(&self.sources);
        env.set_loader(move |name| Ok(sources.get(name).cloned()));

        let ref_fn = Value::from_function(make_ref_fn(scope.clone()));
        let source_fn = Value::from_function(make_source_fn(scope.clone()));
        let config = ConfigObject::value(scope.clone());
        env.add_global("ref", ref_fn.clone());
        env.add_global("source", source_fn.clone());
        env.add_global("config", config.clone());
        env.add_global(
            "builtins",
            Namespace::value("builtins", [("ref", ref_fn), ("source", source_fn), ("config", config)]),
        );
        env.add_function("var", make_var_fn(scope.clone()));
        env.add_function("env_var", make_env_var_fn(scope.clone()));
        env.add_function("is_incremental", make_is_incremental_fn(scope.clone()));
        env.add_function("should_full_refresh", make_should_full_refresh_fn(scope.clone()));
        env.add_function(RETURN_FN, make_return_fn(scope.clone()));
        env.add_function(DISCARD_FN, make_discard_fn());
        env.add_function("log", make_log_fn());
        env.add_function("fromjson", make_from_json_fn());
        env.add_function("tojson", make_to_json_fn());
        env.add_filter("tojson", make_to_json_fn());
        env.add_function("fromyaml", make_from_yaml_fn());
        env.add_function("toyaml", make_to_yaml_fn());
        env.add_global(
            "exceptions",
            Namespace::value(
                "exceptions",
                [
                    ("raise_compiler_error", Value::from_function(make_raise_compiler_error_fn())),
                    ("warn", Value::from_function(make_warn_fn())),
                ],
            ),
        );
        env.add_global("adapter", AdapterObject::value(scope.clone(), self.resolver.clone()));

        let render_env = &scope.env;
        env.add_global("target", Value::from_serialize(&render_env.target));
        env.add_global("execute", render_env.execute);
        env.add_global("invocation_id", render_env.flags.invocation_id.clone());
        env.add_global("project_name", self.root_package.clone());
        env.add_global(
            "flags",
            Value::from_serialize(serde_json::json!({
                "FULL_REFRESH": render_env.flags.full_refresh,
                "EMPTY": render_env.flags.empty,
            })),
        );
        if let Some(this) = this_relation(render_env) {
            env.add_global("this", RelationObject::value(this));
        }
        if let Some(node) = &render_env.node {
            env.add_global("model", Value::from_serialize(&**node));
        }
        for (key, value) in &render_env.globals {
            env.add_global(key.clone(), json_to_value(value));
        }

        for (package, names) in &self.packages {
            let members: Vec<(String, Value)> = names
                .iter()
                .filter_map(|name| {
                    self.resolver
                        .find_in(package, name)
                        .map(|id| (name.clone(), MacroFn::value(id, scope.clone())))
                })
                .collect();
            env.add_global(package.clone(), Namespace::value(package, members));
        }
        for name in &self.names {
            let Some(id) = self.resolver.find(name, &render_env.package) else {
                continue;
            };
            if OVERRIDABLE_GLOBALS.contains(&name.as_str())
                && !id.starts_with(&format!("macro.{}.", self.root_package))
            {
                continue;
            }
            env.add_global(name.clone(), MacroFn::value(id, scope.clone()));
        }
        env
    }

    fn render_text(&self, text: &str, env: &RenderEnv) -> JinjaResult<Rendered> {
        let scope = Arc::new(RenderScope::new(env.clone()));
        let jinja = self.environment(&scope);
        let source = preprocess(text);
        let output = jinja.render_str(&source, ())?;
        Ok(scope.finish(output))
    }

    fn call(&self, name: &str, args: &[serde_json::Value], env: &RenderEnv) -> JinjaResult<Rendered> {
        let unique_id = self
            .resolver
            .find_qualified(name, &env.package)
            .ok_or_else(|| JinjaError::UnknownMacro {
                name: name.to_string(),
                package: env.package.clone(),
            })?
            .to_string();
        let scope = Arc::new(RenderScope::new(env.clone()));
        let jinja = self.environment(&scope);
        let values: Vec<Value> = args.iter().map(json_to_value).collect();
        let template = jinja.template_from_str("")?;
        let state = template.eval_to_state(())?;
        log::debug!("Calling macro {}", macro_name(&unique_id));
        let outcome = run_macro(&state, &scope, &unique_id, &values)?;
        let mut rendered = scope.finish(String::new());
        match outcome {
            MacroOutcome::Output(value) => rendered.text = value.to_string(),
            MacroOutcome::Returned(value) => {
                rendered.text = arg_to_string(&value).unwrap_or_default();
                rendered.return_value = Some(value_to_json(&value));
            }
        }
        Ok(rendered)
    }
}

/// `this`: the explicit relation, else the node's own relation
fn this_relation(env: &RenderEnv) -> Option<Relation> {
    if let Some(this) = &env.this {
        return Some(this.clone());
    }
    let node = env.node.as_ref()?;
    let common = &node.common;
    Some(Relation::new(
        common.database.clone().unwrap_or_else(|| env.target.database.clone()),
        common.schema.clone().unwrap_or_else(|| env.target.schema.clone()),
        common.alias.clone().unwrap_or_else(|| common.name.clone()),
    ))
}

impl Renderer for JinjaRenderer {
    fn render(&self, text: &str, env: &RenderEnv) -> Result<Rendered, RenderError> {
        Ok(self.render_text(text, env)?)
    }

    fn call_macro(&self, name: &str, args: &[serde_json::Value], env: &RenderEnv) -> Result<Rendered, RenderError> {
        Ok(self.call(name, args, env)?)
    }

    fn has_macro(&self, name: &str, package: &str) -> bool {
        self.resolver.find_qualified(name, package).is_some()
    }
}

#[cfg(test)]
#[path = "environment_test.rs"]
mod tests;
