//! Macro name resolution with package precedence and adapter dispatch.

use crate::node::Macro;
use std::collections::BTreeMap;

/// Resolves macro names visible from a package.
///
/// Unqualified names resolve in the calling package first, then the root
/// project, then any other package in name order. Dispatched names try
/// `<adapter>__<name>` for every adapter in the dispatch chain, ending with
/// `default__<name>`.
#[derive(Debug, Clone, Default)]
pub struct MacroResolver {
    root_package: String,
    /// macro name -> `(package, unique_id)`, packages sorted
    by_name: BTreeMap<String, Vec<(String, String)>>,
    dispatch_chain: Vec<String>,
    /// macro namespace -> explicit package search order
    search_orders: BTreeMap<String, Vec<String>>,
}

impl MacroResolver {
    pub fn new<'a, I>(macros: I, root_package: &str, dispatch_chain: Vec<String>) -> Self
    where
        I: IntoIterator<Item = &'a Macro>,
    {
        let mut by_name: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for m in macros {
            by_name
                .entry(m.name.clone())
                .or_default()
                .push((m.package_name.clone(), m.unique_id.clone()));
        }
        for entries in by_name.values_mut() {
            entries.sort();
        }
        Self {
            root_package: root_package.to_string(),
            by_name,
            dispatch_chain,
            search_orders: BTreeMap::new(),
        }
    }

    /// Set the `dispatch:` search order for a macro namespace
    pub fn with_search_order(mut self, namespace: &str, order: Vec<String>) -> Self {
        self.search_orders.insert(namespace.to_string(), order);
        self
    }

    pub fn dispatch_chain(&self) -> &[String] {
        &self.dispatch_chain
    }

    /// A macro defined in exactly `package`
    pub fn find_in(&self, package: &str, name: &str) -> Option<&str> {
        self.by_name
            .get(name)?
            .iter()
            .find(|(p, _)| p == package)
            .map(|(_, id)| id.as_str())
    }

    /// Resolve an unqualified name called from `from_package`
    pub fn find(&self, name: &str, from_package: &str) -> Option<&str> {
        let entries = self.by_name.get(name)?;
        for preferred in [from_package, self.root_package.as_str()] {
            if let Some((_, id)) = entries.iter().find(|(p, _)| p == preferred) {
                return Some(id);
            }
        }
        entries.first().map(|(_, id)| id.as_str())
    }

    /// Resolve a possibly package-qualified name (`pkg.name`)
    pub fn find_qualified(&self, name: &str, from_package: &str) -> Option<&str> {
        match name.split_once('.') {
            Some((package, bare)) => self.find_in(package, bare),
            None => self.find(name, from_package),
        }
    }

    /// Packages searched for a dispatched macro
    fn dispatch_packages(&self, namespace: Option<&str>, from_package: &str) -> Vec<String> {
        if let Some(order) = namespace.and_then(|ns| self.search_orders.get(ns)) {
            return order.clone();
        }
        match namespace {
            Some(ns) => vec![self.root_package.clone(), ns.to_string()],
            None => vec![from_package.to_string(), self.root_package.clone()],
        }
    }

    /// Resolve `adapter.dispatch(name, namespace)` to the first implementation
    /// along the dispatch chain
    pub fn dispatch(&self, name: &str, namespace: Option<&str>, from_package: &str) -> Option<&str> {
        let packages = self.dispatch_packages(namespace, from_package);
        for prefix in &self.dispatch_chain {
            let candidate = format!("{}__{}", prefix, name);
            for package in &packages {
                if let Some(id) = self.find_in(package, &candidate) {
                    return Some(id);
                }
            }
            if namespace.is_none() {
                if let Some(id) = self.find(&candidate, from_package) {
                    return Some(id);
                }
            }
        }
        None
    }

    /// Macros a call to `name` depends on: the direct definition if any, plus
    /// every dispatch candidate that exists. Unknown names yield nothing.
    pub fn call_dependencies(&self, name: &str, from_package: &str) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(id) = self.find_qualified(name, from_package) {
            out.push(id.to_string());
        }
        if !name.contains('.') {
            if let Some(id) = self.dispatch(name, None, from_package) {
                if !out.iter().any(|o| o == id) {
                    out.push(id.to_string());
                }
            }
        }
        out
    }
}

#[cfg(test)]
#[path = "macros_test.rs"]
mod tests;
