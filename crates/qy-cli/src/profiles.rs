//! profiles.yml loading
//!
//! A profile maps target names to connection outputs. Only DuckDB outputs
//! are supported; string values may use `{{ env_var(...) }}`.

use anyhow::{bail, Context, Result};
use qy_core::{EnvSnapshot, Macro, Project, RenderEnv, Renderer, TargetInfo};
use qy_db::{Adapter, DuckDbAdapter};
use qy_jinja::JinjaRenderer;
use serde::Deserialize;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PROFILES_FILE: &str = "profiles.yml";
const IN_MEMORY: &str = ":memory:";
const DEFAULT_SCHEMA: &str = "main";

#[derive(Debug, Deserialize)]
struct ProfileEntry {
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    outputs: BTreeMap<String, OutputConfig>,
}

#[derive(Debug, Deserialize)]
struct OutputConfig {
    #[serde(rename = "type")]
    adapter_type: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    threads: Option<usize>,
    #[serde(default)]
    database: Option<String>,
}

/// The target an invocation connects to
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProfile {
    pub target: TargetInfo,
    /// Database file, or `:memory:`
    pub path: String,
}

impl ResolvedProfile {
    /// In-memory DuckDB used when no profile is configured
    pub fn in_memory(threads: Option<usize>) -> Self {
        Self {
            target: TargetInfo {
                threads: threads.unwrap_or(1).max(1),
                ..TargetInfo::default()
            },
            path: IN_MEMORY.to_string(),
        }
    }

    /// Open the adapter for this target
    pub fn open(&self) -> Result<Arc<dyn Adapter>> {
        let adapter = DuckDbAdapter::new(&self.path)
            .with_context(|| format!("Failed to open database '{}'", self.path))?;
        Ok(Arc::new(adapter))
    }
}

/// Directory to read profiles.yml from
fn profiles_dir(explicit: Option<&Path>, project: &Project, env: &EnvSnapshot) -> Option<PathBuf> {
    if let Some(dir) = explicit {
        return Some(dir.to_path_buf());
    }
    if project.root.join(PROFILES_FILE).is_file() {
        return Some(project.root.clone());
    }
    env.get("HOME")
        .map(|home| Path::new(home).join(".dbt"))
        .filter(|dir| dir.join(PROFILES_FILE).is_file())
}

/// Catalog name DuckDB assigns to a database path
fn catalog_for(path: &str) -> String {
    if path.is_empty() || path == IN_MEMORY {
        return qy_db::duckdb::MEMORY_CATALOG.to_string();
    }
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| qy_db::duckdb::MEMORY_CATALOG.to_string())
}

/// Render templated string values in place
fn render_strings(value: &mut YamlValue, renderer: &JinjaRenderer, env: &RenderEnv) -> Result<()> {
    match value {
        YamlValue::String(s) if s.contains("{{") => {
            let rendered = renderer
                .render(s, env)
                .map_err(|e| anyhow::anyhow!("{}", e.message))?;
            *s = rendered.text.trim().to_string();
        }
        YamlValue::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                render_strings(v, renderer, env)?;
            }
        }
        YamlValue::Sequence(items) => {
            for item in items {
                render_strings(item, renderer, env)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Parse profiles.yml content and pick the output for `profile_name`
pub fn from_str(
    content: &str,
    profile_name: &str,
    target_name: Option<&str>,
    project_root: &Path,
    env: &EnvSnapshot,
) -> Result<ResolvedProfile> {
    let mut raw: YamlValue = serde_yaml::from_str(content).context("Failed to parse profiles.yml")?;
    let renderer = JinjaRenderer::new(std::iter::empty::<&Macro>(), profile_name, &TargetInfo::default());
    let mut render_env = RenderEnv::new(TargetInfo::default(), profile_name);
    render_env.env = env.clone();
    render_strings(&mut raw, &renderer, &render_env).context("Failed to render profiles.yml")?;

    let mut profiles: BTreeMap<String, YamlValue> =
        serde_yaml::from_value(raw).context("profiles.yml must be a mapping of profile names")?;
    let Some(entry) = profiles.remove(profile_name) else {
        bail!("Profile '{}' not found in profiles.yml", profile_name);
    };
    let mut entry: ProfileEntry =
        serde_yaml::from_value(entry).with_context(|| format!("Invalid profile '{}'", profile_name))?;

    let target_name = target_name
        .map(str::to_string)
        .or(entry.target.clone())
        .unwrap_or_else(|| "dev".to_string());
    let Some(output) = entry.outputs.remove(&target_name) else {
        bail!(
            "Target '{}' not found in profile '{}'; available: {}",
            target_name,
            profile_name,
            entry.outputs.keys().cloned().collect::<Vec<_>>().join(", ")
        );
    };
    if output.adapter_type != "duckdb" {
        bail!("Adapter type '{}' is not supported", output.adapter_type);
    }

    let path = match output.path.as_deref() {
        None | Some("") | Some(IN_MEMORY) => IN_MEMORY.to_string(),
        Some(p) if Path::new(p).is_absolute() => p.to_string(),
        Some(p) => project_root.join(p).to_string_lossy().into_owned(),
    };
    let database = catalog_for(&path);
    if let Some(requested) = output.database.as_deref().filter(|d| *d != database) {
        log::warn!(
            "Profile database '{}' ignored; DuckDB names the catalog '{}'",
            requested,
            database
        );
    }
    Ok(ResolvedProfile {
        target: TargetInfo {
            name: target_name,
            adapter_type: output.adapter_type,
            database,
            schema: output.schema.unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            threads: output.threads.unwrap_or(1).max(1),
            parent_adapters: Vec::new(),
        },
        path,
    })
}

/// Resolve the profile for `project`, falling back to in-memory DuckDB
pub fn resolve(
    project: &Project,
    profiles_dir_arg: Option<&Path>,
    target_name: Option<&str>,
    threads: Option<usize>,
    env: &EnvSnapshot,
) -> Result<ResolvedProfile> {
    let Some(dir) = profiles_dir(profiles_dir_arg, project, env) else {
        log::info!("No profiles.yml found; using an in-memory DuckDB target");
        return Ok(ResolvedProfile::in_memory(threads));
    };
    let path = dir.join(PROFILES_FILE);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let profile_name = project
        .config
        .profile
        .clone()
        .unwrap_or_else(|| project.name().to_string());
    let mut resolved = from_str(&content, &profile_name, target_name, &project.root, env)?;
    if let Some(threads) = threads {
        resolved.target.threads = threads.max(1);
    }
    Ok(resolved)
}

#[cfg(test)]
#[path = "profiles_test.rs"]
mod tests;
