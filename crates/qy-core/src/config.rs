//! Configuration types and parsing for dbt_project.yml

use crate::error::{CoreError, CoreResult};
use crate::node::ResourceType;
use crate::serde_helpers::string_or_list;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Project file name
pub const PROJECT_FILE: &str = "dbt_project.yml";

/// Project configuration from dbt_project.yml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name; doubles as the root package name
    pub name: String,

    #[serde(default = "default_version", deserialize_with = "version_string")]
    pub version: String,

    /// Profile to read connection settings from
    #[serde(default)]
    pub profile: Option<String>,

    #[serde(
        rename = "model-paths",
        alias = "model_paths",
        alias = "source-paths",
        default = "default_model_paths"
    )]
    pub model_paths: Vec<String>,

    #[serde(
        rename = "seed-paths",
        alias = "seed_paths",
        alias = "data-paths",
        default = "default_seed_paths"
    )]
    pub seed_paths: Vec<String>,

    #[serde(
        rename = "snapshot-paths",
        alias = "snapshot_paths",
        default = "default_snapshot_paths"
    )]
    pub snapshot_paths: Vec<String>,

    #[serde(
        rename = "test-paths",
        alias = "test_paths",
        default = "default_test_paths"
    )]
    pub test_paths: Vec<String>,

    #[serde(
        rename = "macro-paths",
        alias = "macro_paths",
        default = "default_macro_paths"
    )]
    pub macro_paths: Vec<String>,

    #[serde(
        rename = "analysis-paths",
        alias = "analysis_paths",
        default = "default_analysis_paths"
    )]
    pub analysis_paths: Vec<String>,

    /// Where `.md` docs blocks live; defaults to every resource path
    #[serde(rename = "docs-paths", alias = "docs_paths", default)]
    pub docs_paths: Option<Vec<String>>,

    #[serde(
        rename = "function-paths",
        alias = "function_paths",
        default = "default_function_paths"
    )]
    pub function_paths: Vec<String>,

    #[serde(
        rename = "target-path",
        alias = "target_path",
        default = "default_target_path"
    )]
    pub target_path: String,

    #[serde(
        rename = "packages-install-path",
        alias = "packages_install_path",
        default = "default_packages_install_path"
    )]
    pub packages_install_path: String,

    #[serde(
        rename = "clean-targets",
        alias = "clean_targets",
        default = "default_clean_targets"
    )]
    pub clean_targets: Vec<String>,

    #[serde(
        rename = "on-run-start",
        alias = "on_run_start",
        default,
        deserialize_with = "string_or_list"
    )]
    pub on_run_start: Vec<String>,

    #[serde(
        rename = "on-run-end",
        alias = "on_run_end",
        default,
        deserialize_with = "string_or_list"
    )]
    pub on_run_end: Vec<String>,

    /// Project vars; a mapping keyed by a package name scopes to that package
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,

    #[serde(default)]
    pub models: Value,

    #[serde(default)]
    pub seeds: Value,

    #[serde(default)]
    pub snapshots: Value,

    #[serde(default, alias = "tests")]
    pub data_tests: Value,

    #[serde(default)]
    pub unit_tests: Value,

    #[serde(default)]
    pub sources: Value,

    #[serde(default)]
    pub analyses: Value,

    #[serde(default)]
    pub functions: Value,

    /// Project-level quoting overrides (`database`, `schema`, `identifier`)
    #[serde(default)]
    pub quoting: BTreeMap<String, bool>,

    /// Explicit dispatch search orders
    #[serde(default)]
    pub dispatch: Vec<DispatchConfig>,

    /// Behavior flags
    #[serde(default)]
    pub flags: BTreeMap<String, Value>,

    /// Keys quarry does not recognize; reported as deprecations
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

/// One `dispatch:` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub macro_namespace: String,
    pub search_order: Vec<String>,
}

fn version_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(
        crate::serde_helpers::optional_string_or_number(deserializer)?
            .unwrap_or_else(default_version),
    )
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_model_paths() -> Vec<String> {
    vec!["models".to_string()]
}

fn default_seed_paths() -> Vec<String> {
    vec!["seeds".to_string()]
}

fn default_snapshot_paths() -> Vec<String> {
    vec!["snapshots".to_string()]
}

fn default_test_paths() -> Vec<String> {
    vec!["tests".to_string()]
}

fn default_macro_paths() -> Vec<String> {
    vec!["macros".to_string()]
}

fn default_analysis_paths() -> Vec<String> {
    vec!["analyses".to_string()]
}

fn default_function_paths() -> Vec<String> {
    vec!["functions".to_string()]
}

fn default_target_path() -> String {
    "target".to_string()
}

fn default_packages_install_path() -> String {
    "dbt_packages".to_string()
}

fn default_clean_targets() -> Vec<String> {
    vec!["target".to_string()]
}

impl ProjectConfig {
    /// Load configuration from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ProjectNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::FileRead {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_str(&content, path)
    }

    /// Parse configuration text; `path` is only used in error messages
    pub fn from_str(content: &str, path: &Path) -> CoreResult<Self> {
        let config: ProjectConfig =
            serde_yaml::from_str(content).map_err(|e| CoreError::ConfigParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `dbt_project.yml` from a project directory
    pub fn load_from_dir(dir: &Path) -> CoreResult<Self> {
        Self::load(&dir.join(PROJECT_FILE))
    }

    fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "Project name cannot be empty".to_string(),
            });
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "Project name '{}' may only contain letters, digits and underscores",
                    self.name
                ),
            });
        }
        Ok(())
    }

    /// Resource paths searched for `.md` docs blocks
    pub fn docs_paths(&self) -> Vec<String> {
        match &self.docs_paths {
            Some(paths) => paths.clone(),
            None => {
                let mut all = Vec::new();
                for group in [
                    &self.model_paths,
                    &self.seed_paths,
                    &self.snapshot_paths,
                    &self.test_paths,
                    &self.macro_paths,
                    &self.analysis_paths,
                ] {
                    for p in group {
                        if !all.contains(p) {
                            all.push(p.clone());
                        }
                    }
                }
                all
            }
        }
    }

    /// The per-resource config tree for a resource type
    pub fn config_tree(&self, resource_type: ResourceType) -> &Value {
        match resource_type {
            ResourceType::Model => &self.models,
            ResourceType::Seed => &self.seeds,
            ResourceType::Snapshot => &self.snapshots,
            ResourceType::Test => &self.data_tests,
            ResourceType::UnitTest => &self.unit_tests,
            ResourceType::Source => &self.sources,
            ResourceType::Analysis => &self.analyses,
            ResourceType::Function => &self.functions,
            _ => &Value::Null,
        }
    }

    /// Vars visible to nodes of `package`: globals overlaid by the package scope
    pub fn vars_for_package(
        &self,
        package: &str,
        package_names: &[String],
    ) -> BTreeMap<String, Value> {
        let mut vars: BTreeMap<String, Value> = self
            .vars
            .iter()
            .filter(|(k, v)| !(v.is_object() && package_names.contains(k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(Value::Object(scoped)) = self.vars.get(package) {
            for (k, v) in scoped {
                vars.insert(k.clone(), v.clone());
            }
        }
        vars
    }

    /// Search order for `adapter.dispatch` under a macro namespace
    pub fn dispatch_order(&self, namespace: &str) -> Option<&[String]> {
        self.dispatch
            .iter()
            .find(|d| d.macro_namespace == namespace)
            .map(|d| d.search_order.as_slice())
    }

    pub fn target_path_absolute(&self, root: &Path) -> PathBuf {
        root.join(&self.target_path)
    }

    pub fn packages_install_path_absolute(&self, root: &Path) -> PathBuf {
        root.join(&self.packages_install_path)
    }

    /// Whether a behavior flag is set
    pub fn flag(&self, name: &str) -> bool {
        self.flags
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
