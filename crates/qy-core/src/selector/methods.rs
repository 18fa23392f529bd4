//! Selection methods: each maps a value to the matching enabled nodes.

use super::parse::MethodName;
use crate::error::{CoreError, CoreResult};
use crate::manifest::{compare_versions, Manifest};
use crate::node::{Node, NodeKind, ResourceType};
use crate::run_results::{RunResults, RunStatus};
use crate::state::{ChangeKind, StateComparison};
use glob::Pattern;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Everything a method may consult
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub manifest: &'a Manifest,
    /// Comparison against `--state`, required by `state:`
    pub state: Option<&'a StateComparison>,
    /// Previous run results, required by `result:`
    pub previous_results: Option<&'a RunResults>,
}

impl<'a> SelectionContext<'a> {
    pub fn new(manifest: &'a Manifest) -> Self {
        Self {
            manifest,
            state: None,
            previous_results: None,
        }
    }

    pub fn with_state(mut self, state: &'a StateComparison) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_results(mut self, results: &'a RunResults) -> Self {
        self.previous_results = Some(results);
        self
    }
}

/// Glob match; an invalid pattern only matches itself
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches(text),
        Err(_) => pattern == text,
    }
}

fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?', '[', ']'])
}

/// Match a dotted selector against a node fqn
pub(crate) fn fqn_matches(fqn: &[String], selector: &str, versioned: bool) -> bool {
    if versioned && fqn.len() >= 2 {
        let name = &fqn[fqn.len() - 2];
        if name == selector {
            return true;
        }
        let parts: Vec<&str> = selector.split('.').collect();
        let tail = parts[parts.len().saturating_sub(2)..].join("_");
        if fqn[fqn.len() - 2..].join("_") == tail {
            return true;
        }
    } else if fqn.last().is_some_and(|leaf| leaf == selector) {
        return true;
    }

    let flat: Vec<&str> = fqn.iter().flat_map(|s| s.split('.')).collect();
    let parts: Vec<&str> = selector.split('.').collect();
    if flat.len() < parts.len() {
        return false;
    }
    for (i, part) in parts.iter().enumerate() {
        if has_wildcard(part) {
            return glob_match(&parts[i..].join("."), &flat[i..].join("."));
        }
        if flat[i] != *part {
            return false;
        }
    }
    true
}

fn invalid(method: &MethodName, value: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidSelector {
        selector: format!("{}:{}", method, value),
        reason: reason.into(),
    }
}

/// Split `[package.]name` selectors used by named resources
fn package_and_name<'v>(method: &MethodName, value: &'v str) -> CoreResult<(&'v str, &'v str)> {
    let parts: Vec<&str> = value.split('.').collect();
    match parts.as_slice() {
        [name] => Ok(("*", *name)),
        [package, name] => Ok((*package, *name)),
        _ => Err(invalid(method, value, "expected <name> or <package>.<name>")),
    }
}

fn named(nodes: &[&Node], resource_type: ResourceType, package: &str, name: &str) -> BTreeSet<String> {
    nodes
        .iter()
        .filter(|n| n.resource_type() == resource_type)
        .filter(|n| glob_match(package, n.package_name()) && glob_match(name, n.name()))
        .map(|n| n.unique_id().to_string())
        .collect()
}

/// Compare a config value against the selector text
fn config_value_matches(value: &Value, selector: &str, case_insensitive: bool) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|v| !v.is_array() && config_value_matches(v, selector, case_insensitive)),
        Value::String(s) if case_insensitive => s.eq_ignore_ascii_case(selector),
        Value::String(s) => s == selector,
        Value::Bool(b) => selector.eq_ignore_ascii_case(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let (Some(a), Ok(b)) = (n.as_f64(), selector.parse::<f64>()) {
                a == b
            } else {
                n.to_string() == selector
            }
        }
        Value::Null => selector.eq_ignore_ascii_case("none") || selector.eq_ignore_ascii_case("null"),
        Value::Object(_) => false,
    }
}

/// Whether `path` lies under the selector path or matches it as a glob
fn path_matches(selector: &str, path: &str) -> bool {
    let selector = selector.trim_start_matches("./").trim_end_matches('/');
    if selector.is_empty() || selector == "." {
        return true;
    }
    if path == selector || path.starts_with(&format!("{}/", selector)) {
        return true;
    }
    if has_wildcard(selector) {
        return glob_match(selector, path)
            || std::path::Path::new(path)
                .ancestors()
                .any(|a| glob_match(selector, &a.to_string_lossy()));
    }
    false
}

fn file_name_and_stem(path: &str) -> (String, String) {
    let p = std::path::Path::new(path);
    let name = p.file_name().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let stem = p.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    (name, stem)
}

/// Evaluate one method over every enabled node
pub fn search(ctx: &SelectionContext<'_>, method: &MethodName, value: &str) -> CoreResult<BTreeSet<String>> {
    let nodes: Vec<&Node> = ctx.manifest.all_nodes().collect();
    let ids = |pred: &dyn Fn(&Node) -> bool| -> BTreeSet<String> {
        nodes
            .iter()
            .filter(|n| pred(n))
            .map(|n| n.unique_id().to_string())
            .collect()
    };

    let selected = match method {
        MethodName::Fqn => {
            if value == "*" {
                return Ok(ids(&|n| n.resource_type() != ResourceType::Source));
            }
            ids(&|n| {
                if n.resource_type() == ResourceType::Source {
                    return false;
                }
                let versioned = n.version().is_some();
                fqn_matches(&n.common.fqn, value, versioned)
                    || (n.common.fqn.len() > 1 && fqn_matches(&n.common.fqn[1..], value, versioned))
            })
        }
        MethodName::Tag => ids(&|n| n.config().tags().iter().any(|t| glob_match(value, t))),
        MethodName::Source => {
            let parts: Vec<&str> = value.split('.').collect();
            let (package, source, table) = match parts.as_slice() {
                [source] => ("*", *source, "*"),
                [source, table] => ("*", *source, *table),
                [package, source, table] => (*package, *source, *table),
                _ => return Err(invalid(method, value, "expected <source>[.<table>] or <package>.<source>.<table>")),
            };
            ids(&|n| match &n.kind {
                NodeKind::Source(attrs) => {
                    glob_match(package, n.package_name())
                        && glob_match(source, &attrs.source_name)
                        && glob_match(table, n.name())
                }
                _ => false,
            })
        }
        MethodName::ResourceType => {
            let resource_type =
                ResourceType::parse(value).ok_or_else(|| invalid(method, value, "unknown resource type"))?;
            ids(&|n| n.resource_type() == resource_type)
        }
        MethodName::Path => ids(&|n| {
            path_matches(value, &n.common.original_file_path)
                || n.common
                    .patch_path
                    .as_deref()
                    .map(|p| p.split_once("://").map_or(p, |(_, rest)| rest))
                    .is_some_and(|p| path_matches(value, p))
        }),
        MethodName::File => ids(&|n| {
            let (name, stem) = file_name_and_stem(&n.common.original_file_path);
            glob_match(value, &name) || glob_match(value, &stem)
        }),
        MethodName::Package => ids(&|n| glob_match(value, n.package_name())),
        MethodName::Config(path) => {
            let key = path.join(".");
            let case_insensitive = key == "severity";
            ids(&|n| {
                n.config()
                    .get_path(&key)
                    .is_some_and(|v| config_value_matches(v, value, case_insensitive))
            })
        }
        MethodName::TestType => {
            let (generic, singular, unit) = match value {
                "generic" | "schema" => (true, false, false),
                "singular" => (false, true, false),
                "data" => (true, true, false),
                "unit" => (false, false, true),
                _ => return Err(invalid(method, value, "expected generic, singular, unit or data")),
            };
            ids(&|n| match &n.kind {
                NodeKind::Test(attrs) => {
                    if attrs.test_metadata.is_some() {
                        generic
                    } else {
                        singular
                    }
                }
                NodeKind::UnitTest(_) => unit,
                _ => false,
            })
        }
        MethodName::TestName => ids(&|n| match &n.kind {
            NodeKind::Test(attrs) => attrs
                .test_metadata
                .as_ref()
                .is_some_and(|m| glob_match(value, &m.name)),
            NodeKind::UnitTest(_) => glob_match(value, n.name()),
            _ => false,
        }),
        MethodName::State => {
            let state = ctx
                .state
                .ok_or_else(|| invalid(method, value, "state selection requires --state"))?;
            let check: Box<dyn Fn(&str) -> bool + '_> = match value {
                "new" => Box::new(move |id| state.is_new(id)),
                "old" => Box::new(move |id| state.is_old(id)),
                "modified" => Box::new(move |id| state.is_modified(id)),
                "unmodified" => Box::new(move |id| state.is_unmodified(id)),
                other => {
                    let kind = other
                        .strip_prefix("modified.")
                        .and_then(ChangeKind::parse)
                        .ok_or_else(|| invalid(method, value, "unknown state selector"))?;
                    Box::new(move |id| state.is_modified_by(id, kind))
                }
            };
            ids(&|n| check(n.unique_id()))
        }
        MethodName::Exposure => {
            let (package, name) = package_and_name(method, value)?;
            named(&nodes, ResourceType::Exposure, package, name)
        }
        MethodName::Metric => {
            let (package, name) = package_and_name(method, value)?;
            named(&nodes, ResourceType::Metric, package, name)
        }
        MethodName::SemanticModel => {
            let (package, name) = package_and_name(method, value)?;
            named(&nodes, ResourceType::SemanticModel, package, name)
        }
        MethodName::SavedQuery => {
            let (package, name) = package_and_name(method, value)?;
            named(&nodes, ResourceType::SavedQuery, package, name)
        }
        MethodName::Group => ids(&|n| n.group().is_some_and(|g| glob_match(value, g))),
        MethodName::Access => ids(&|n| n.resource_type() == ResourceType::Model && n.access().as_str() == value),
        MethodName::Version => {
            if !matches!(value, "latest" | "prerelease" | "old" | "none") {
                return Err(invalid(method, value, "expected latest, prerelease, old or none"));
            }
            ids(&|n| {
                let NodeKind::Model(attrs) = &n.kind else {
                    return false;
                };
                let ordering = match (&attrs.version, &attrs.latest_version) {
                    (Some(v), Some(latest)) => Some(compare_versions(v, latest)),
                    _ => None,
                };
                match value {
                    "latest" => ordering == Some(Ordering::Equal),
                    "prerelease" => ordering == Some(Ordering::Greater),
                    "old" => ordering == Some(Ordering::Less),
                    _ => attrs.version.is_none(),
                }
            })
        }
        MethodName::Wildcard => ids(&|n| glob_match(value, n.unique_id())),
        MethodName::Result => {
            let results = ctx
                .previous_results
                .ok_or_else(|| invalid(method, value, "result selection requires run results in --state"))?;
            let status = RunStatus::parse(value).ok_or_else(|| invalid(method, value, "unknown status"))?;
            let matching = results.with_status(status);
            ids(&|n| matching.contains(n.unique_id()))
        }
    };
    Ok(selected)
}

#[cfg(test)]
#[path = "methods_test.rs"]
mod tests;
