//! File loader: walks package resource paths and classifies files.
//!
//! Every recognized file becomes a [`SourceFile`] with a stable file id
//! (`<package>://<original_file_path>`) and a content hash. Unknown
//! extensions are skipped; an unreadable file or a file id seen twice is
//! fatal.

use crate::checksum::FileHash;
use crate::config::PROJECT_FILE;
use crate::error::{CoreError, CoreResult};
use crate::project::{Package, Project};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Parser a file is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseKind {
    Model,
    Snapshot,
    Seed,
    Test,
    Analysis,
    SchemaYaml,
    Macro,
    Docs,
    Function,
    /// A package's dbt_project.yml, which declares run hooks
    Hook,
}

impl ParseKind {
    /// Changes to these files can alter nodes defined in other files
    pub fn is_structural(&self) -> bool {
        matches!(self, ParseKind::SchemaYaml | ParseKind::Macro | ParseKind::Hook)
    }
}

/// One physical file
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub file_id: String,
    pub package_name: String,
    /// Absolute root of the owning package
    pub package_root: PathBuf,
    /// Path relative to the package root, `/`-separated
    pub original_file_path: String,
    /// Path relative to the resource directory it was found under
    pub path: String,
    pub parse_kind: ParseKind,
    pub checksum: FileHash,
    /// Text contents; empty for seeds
    pub contents: String,
}

impl SourceFile {
    pub fn absolute_path(&self) -> PathBuf {
        self.package_root.join(&self.original_file_path)
    }

    /// File stem with every extension removed (`orders.sql.j2` -> `orders`)
    pub fn stem(&self) -> &str {
        let file_name = self.path.rsplit('/').next().unwrap_or(&self.path);
        file_name.split('.').next().unwrap_or(file_name)
    }

    /// Folders between the resource directory and the file
    pub fn folders(&self) -> Vec<String> {
        let mut parts: Vec<String> = self.path.split('/').map(str::to_string).collect();
        parts.pop();
        parts
    }
}

/// Loader settings
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Also accept `.sql.j2` files
    pub jinja_extensions: bool,
    /// Seeds larger than this are hashed by path
    pub maximum_seed_size: u64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            jinja_extensions: false,
            maximum_seed_size: 1024 * 1024,
        }
    }
}

/// Discover every recognized file of every package, sorted by file id
pub fn discover(project: &Project, options: &LoaderOptions) -> CoreResult<Vec<SourceFile>> {
    let mut files: BTreeMap<String, SourceFile> = BTreeMap::new();
    for package in &project.packages {
        for file in discover_package(package, options)? {
            if let Some(existing) = files.get(&file.file_id) {
                if existing.parse_kind == file.parse_kind {
                    continue;
                }
                return Err(CoreError::DuplicateFile {
                    file_id: file.file_id.clone(),
                    path1: existing.absolute_path().display().to_string(),
                    path2: file.absolute_path().display().to_string(),
                });
            }
            files.insert(file.file_id.clone(), file);
        }
    }
    Ok(files.into_values().collect())
}

fn discover_package(package: &Package, options: &LoaderOptions) -> CoreResult<Vec<SourceFile>> {
    let config = &package.config;
    let ignore = IgnoreList::load(&package.root);
    let mut out = Vec::new();

    let project_path = package.root.join(PROJECT_FILE);
    let contents = read_text(&project_path)?;
    out.push(SourceFile {
        file_id: file_id(&package.name, PROJECT_FILE),
        package_name: package.name.clone(),
        package_root: package.root.clone(),
        original_file_path: PROJECT_FILE.to_string(),
        path: PROJECT_FILE.to_string(),
        parse_kind: ParseKind::Hook,
        checksum: FileHash::from_contents(&contents),
        contents,
    });

    let resource_dirs: [(&Vec<String>, Option<ParseKind>); 7] = [
        (&config.model_paths, Some(ParseKind::Model)),
        (&config.seed_paths, Some(ParseKind::Seed)),
        (&config.snapshot_paths, Some(ParseKind::Snapshot)),
        (&config.test_paths, Some(ParseKind::Test)),
        (&config.macro_paths, Some(ParseKind::Macro)),
        (&config.analysis_paths, Some(ParseKind::Analysis)),
        (&config.function_paths, Some(ParseKind::Function)),
    ];
    let docs_dirs = config.docs_paths();

    for (dirs, sql_kind) in resource_dirs {
        for dir in dirs {
            walk(package, dir, &ignore, &mut |rel, resource_rel| {
                classify(rel, resource_rel, sql_kind, options)
            }, options, &mut out)?;
        }
    }
    for dir in &docs_dirs {
        walk(package, dir, &ignore, &mut |rel, _| {
            rel.ends_with(".md").then_some(ParseKind::Docs)
        }, options, &mut out)?;
    }
    Ok(out)
}

fn classify(
    rel: &str,
    resource_rel: &str,
    sql_kind: Option<ParseKind>,
    options: &LoaderOptions,
) -> Option<ParseKind> {
    if rel.ends_with(".yml") || rel.ends_with(".yaml") {
        return Some(ParseKind::SchemaYaml);
    }
    let is_sql = rel.ends_with(".sql") || (options.jinja_extensions && rel.ends_with(".sql.j2"));
    match sql_kind? {
        ParseKind::Seed => rel.ends_with(".csv").then_some(ParseKind::Seed),
        // tests/generic holds generic test definitions, parsed as macros
        ParseKind::Test if is_sql && resource_rel.starts_with("generic/") => Some(ParseKind::Macro),
        kind if is_sql => Some(kind),
        _ => None,
    }
}

fn walk(
    package: &Package,
    dir: &str,
    ignore: &IgnoreList,
    classify: &mut dyn FnMut(&str, &str) -> Option<ParseKind>,
    options: &LoaderOptions,
    out: &mut Vec<SourceFile>,
) -> CoreResult<()> {
    let base = package.root.join(dir);
    if !base.is_dir() {
        return Ok(());
    }
    for entry in WalkDir::new(&base).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::FileRead {
            path: base.display().to_string(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let abs = entry.path();
        let Some(rel) = relative(&package.root, abs) else {
            continue;
        };
        let Some(resource_rel) = relative(&base, abs) else {
            continue;
        };
        if ignore.is_ignored(&rel) {
            log::debug!("Ignoring {} (.dbtignore)", rel);
            continue;
        }
        let Some(kind) = classify(&rel, &resource_rel) else {
            continue;
        };
        let (checksum, contents) = if kind == ParseKind::Seed {
            let size = entry
                .metadata()
                .map_err(|e| CoreError::FileRead {
                    path: abs.display().to_string(),
                    message: e.to_string(),
                })?
                .len();
            if size > options.maximum_seed_size {
                log::debug!("Seed {} exceeds the size cap; hashing by path", rel);
                (FileHash::path(&rel), String::new())
            } else {
                (FileHash::from_contents(&read_text(abs)?), String::new())
            }
        } else {
            let text = read_text(abs)?;
            (FileHash::from_contents(&text), text)
        };
        out.push(SourceFile {
            file_id: file_id(&package.name, &rel),
            package_name: package.name.clone(),
            package_root: package.root.clone(),
            original_file_path: rel,
            path: resource_rel,
            parse_kind: kind,
            checksum,
            contents,
        });
    }
    Ok(())
}

/// `<package>://<original_file_path>`
pub fn file_id(package: &str, original_file_path: &str) -> String {
    format!("{}://{}", package, original_file_path)
}

fn relative(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn read_text(path: &Path) -> CoreResult<String> {
    std::fs::read_to_string(path).map_err(|e| CoreError::FileRead {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Glob patterns from a package's `.dbtignore`
#[derive(Debug, Default)]
struct IgnoreList {
    patterns: Vec<glob::Pattern>,
}

impl IgnoreList {
    fn load(root: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(root.join(".dbtignore")) else {
            return Self::default();
        };
        let patterns = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| match glob::Pattern::new(l.trim_end_matches('/')) {
                Ok(p) => Some(p),
                Err(e) => {
                    log::warn!("Ignoring invalid .dbtignore pattern '{}': {}", l, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    fn is_ignored(&self, rel: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let parts: Vec<&str> = rel.split('/').collect();
        self.patterns.iter().any(|p| {
            p.matches(rel)
                || parts.iter().any(|part| p.matches(part))
                || (1..parts.len()).any(|i| p.matches(&parts[..i].join("/")))
        })
    }
}

#[cfg(test)]
#[path = "loader_test.rs"]
mod tests;
