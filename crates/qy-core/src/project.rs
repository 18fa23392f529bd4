//! Project discovery: the root project plus its installed and local packages

use crate::config::{ProjectConfig, PROJECT_FILE};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One package taking part in the parse (the root project is one too)
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    /// Absolute package root
    pub root: PathBuf,
    pub config: ProjectConfig,
    /// Raw text of its dbt_project.yml, for the project hash
    pub config_text: String,
    pub is_root: bool,
}

/// A `packages.yml` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageSpec {
    Local {
        local: String,
    },
    Git {
        git: String,
        #[serde(default)]
        revision: Option<String>,
        #[serde(default)]
        subdirectory: Option<String>,
    },
    Hub {
        package: String,
        #[serde(default)]
        version: serde_json::Value,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PackagesFile {
    #[serde(default)]
    packages: Vec<PackageSpec>,
}

/// Represents a quarry project
#[derive(Debug, Clone)]
pub struct Project {
    /// Project root directory
    pub root: PathBuf,
    /// Root project configuration
    pub config: ProjectConfig,
    /// Every package, root first, then dependencies sorted by name
    pub packages: Vec<Package>,
    /// Declared dependencies from packages.yml / dependencies.yml
    pub package_specs: Vec<PackageSpec>,
}

impl Project {
    /// Load a project and discover its packages
    pub fn load(root: &Path) -> CoreResult<Self> {
        let root = root
            .canonicalize()
            .map_err(|_| CoreError::ProjectNotFound {
                path: root.join(PROJECT_FILE).display().to_string(),
            })?;
        let root_pkg = load_package(&root, true)?;
        let config = root_pkg.config.clone();
        let package_specs = load_package_specs(&root)?;

        let mut deps: Vec<Package> = Vec::new();
        let mut remote_count = 0usize;
        for spec in &package_specs {
            match spec {
                PackageSpec::Local { local } => {
                    let pkg_root = root.join(local);
                    let pkg = load_package(&pkg_root, false).map_err(|e| CoreError::Package {
                        message: format!("local package '{}': {}", local, e),
                    })?;
                    deps.push(pkg);
                }
                PackageSpec::Git { .. } | PackageSpec::Hub { .. } => remote_count += 1,
            }
        }

        let install_dir = config.packages_install_path_absolute(&root);
        let mut installed = 0usize;
        if install_dir.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&install_dir)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.join(PROJECT_FILE).is_file())
                .collect();
            entries.sort();
            for path in entries {
                let pkg = load_package(&path, false)?;
                if deps.iter().any(|d| d.name == pkg.name) {
                    continue;
                }
                installed += 1;
                deps.push(pkg);
            }
        }
        if installed < remote_count {
            return Err(CoreError::Package {
                message: format!(
                    "{} package(s) specified but only {} installed in {}; install dependencies first",
                    remote_count,
                    installed,
                    config.packages_install_path
                ),
            });
        }

        deps.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in deps.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(CoreError::Package {
                    message: format!(
                        "package '{}' found twice: {} and {}",
                        pair[0].name,
                        pair[0].root.display(),
                        pair[1].root.display()
                    ),
                });
            }
        }
        if deps.iter().any(|d| d.name == config.name) {
            return Err(CoreError::Package {
                message: format!("a dependency has the root project's name '{}'", config.name),
            });
        }

        let mut packages = vec![root_pkg];
        packages.extend(deps);
        Ok(Self {
            root,
            config,
            packages,
            package_specs,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn package_names(&self) -> Vec<String> {
        self.packages.iter().map(|p| p.name.clone()).collect()
    }

    pub fn target_dir(&self) -> PathBuf {
        self.config.target_path_absolute(&self.root)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.target_dir().join("manifest.json")
    }

    pub fn run_results_path(&self) -> PathBuf {
        self.target_dir().join("run_results.json")
    }

    pub fn partial_parse_path(&self) -> PathBuf {
        self.target_dir().join("partial_parse.msgpack")
    }

    /// Concatenated project files, hashed to invalidate partial parse state
    pub fn config_fingerprint(&self) -> String {
        let mut out = String::new();
        for pkg in &self.packages {
            out.push_str(&pkg.name);
            out.push('\n');
            out.push_str(&pkg.config_text);
            out.push('\n');
        }
        out
    }
}

fn load_package(root: &Path, is_root: bool) -> CoreResult<Package> {
    let path = root.join(PROJECT_FILE);
    let config_text = std::fs::read_to_string(&path).map_err(|_| CoreError::ProjectNotFound {
        path: path.display().to_string(),
    })?;
    let config = ProjectConfig::from_str(&config_text, &path)?;
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    Ok(Package {
        name: config.name.clone(),
        root,
        config,
        config_text,
        is_root,
    })
}

fn load_package_specs(root: &Path) -> CoreResult<Vec<PackageSpec>> {
    for file in ["packages.yml", "dependencies.yml"] {
        let path = root.join(file);
        if !path.is_file() {
            continue;
        }
        let content = std::fs::read_to_string(&path).map_err(|e| CoreError::FileRead {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parsed: PackagesFile =
            serde_yaml::from_str(&content).map_err(|e| CoreError::ConfigParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        return Ok(parsed.packages);
    }
    Ok(Vec::new())
}

#[cfg(test)]
#[path = "project_test.rs"]
mod tests;
