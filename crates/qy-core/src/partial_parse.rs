//! Partial parsing: reuse the previous invocation's per-file parse results.
//!
//! Parse results depend only on a file's own contents and the files it pulls
//! in with `!include`, so a changed file is reparsed alone and the manifest is rebuilt from the merged per-file
//! outputs. That rebuild always runs, which keeps a partially parsed manifest
//! identical to a fully parsed one. State is discarded when the schema
//! version, project hash or env hash disagree, and a full parse is used when
//! too large a share of files changed.

use crate::checksum::{compute_checksum, FileHash};
use crate::env_vars::EnvSnapshot;
use crate::error::{CoreError, CoreResult};
use crate::loader::SourceFile;
use crate::manifest::Manifest;
use crate::parser::{parse_files, parse_unsettled, settle_includes, ParseOutput};
use crate::project::Project;
use crate::relation::TargetInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Bumped whenever the persisted layout changes
pub const PARTIAL_PARSE_SCHEMA_VERSION: u32 = 2;

/// Share of changed files above which a full parse is used
pub const DEFAULT_FALLBACK_FRACTION: f64 = 0.5;

/// Persisted parse state (`partial_parse.msgpack`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseState {
    pub schema_version: u32,
    pub project_hash: String,
    pub env_hash: String,
    /// Environment variables read while parsing, hashed into `env_hash`
    #[serde(default)]
    pub env_var_names: Vec<String>,
    /// file id -> content hash
    pub files: BTreeMap<String, FileHash>,
    /// file id -> what that file contributed
    pub outputs: BTreeMap<String, ParseOutput>,
    pub manifest: Manifest,
}

impl ParseState {
    /// Load the state file; unreadable or foreign state counts as absent
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        match rmp_serde::from_slice::<ParseState>(&bytes) {
            Ok(state) if state.schema_version == PARTIAL_PARSE_SCHEMA_VERSION => Some(state),
            Ok(state) => {
                log::info!(
                    "Ignoring partial parse state with schema version {}",
                    state.schema_version
                );
                None
            }
            Err(e) => {
                log::warn!("Ignoring unreadable partial parse state {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let bytes = rmp_serde::to_vec_named(self).map_err(|e| CoreError::Artifact {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        crate::artifact::write_atomic(path, &bytes)
    }
}

/// Hash of everything outside the files that shapes parsing: project and
/// package configs, CLI vars and the target
pub fn project_hash(project: &Project, target: &TargetInfo, cli_vars: &BTreeMap<String, Value>) -> String {
    let mut text = project.config_fingerprint();
    text.push_str(&serde_json::to_string(cli_vars).unwrap_or_default());
    text.push_str(&serde_json::to_string(target).unwrap_or_default());
    compute_checksum(&text)
}

/// Hash of the current values of the named environment variables
pub fn env_hash(env: &EnvSnapshot, names: &[String]) -> String {
    let mut text = String::new();
    for name in names {
        text.push_str(name);
        text.push('=');
        text.push_str(env.get(name).unwrap_or("<unset>"));
        text.push('\n');
    }
    compute_checksum(&text)
}

/// Environment variables read by any parsed node, sorted
pub fn env_var_names<'a, I>(outputs: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a ParseOutput>,
{
    let names: BTreeSet<String> = outputs
        .into_iter()
        .flat_map(|o| o.nodes.iter())
        .flat_map(|n| n.node.common.env_vars.iter().cloned())
        .collect();
    names.into_iter().collect()
}

/// File-level differences against the previous state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileDiff {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
}

impl FileDiff {
    pub fn compute(previous: &BTreeMap<String, FileHash>, files: &[SourceFile]) -> Self {
        let mut diff = FileDiff::default();
        let mut seen = BTreeSet::new();
        for file in files {
            seen.insert(file.file_id.as_str());
            match previous.get(&file.file_id) {
                None => diff.added.push(file.file_id.clone()),
                Some(hash) if *hash == file.checksum => diff.unchanged += 1,
                Some(_) => diff.changed.push(file.file_id.clone()),
            }
        }
        diff.deleted = previous
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .cloned()
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    pub fn touched(&self) -> usize {
        self.added.len() + self.changed.len() + self.deleted.len()
    }

    /// Count unchanged files whose `!include` targets changed as changed
    pub fn mark_stale_includers(&mut self, outputs: &BTreeMap<String, ParseOutput>) {
        for output in outputs.values() {
            let id = &output.file_id;
            if self.changed.contains(id) || self.added.contains(id) || self.deleted.contains(id) {
                continue;
            }
            let stale = output.includes.iter().any(|(path, hash)| {
                std::fs::read_to_string(path)
                    .map(|text| FileHash::from_contents(&text) != *hash)
                    .unwrap_or(true)
            });
            if stale {
                log::debug!("{} includes a changed file", id);
                self.changed.push(id.clone());
                self.unchanged = self.unchanged.saturating_sub(1);
            }
        }
    }
}

/// How the manifest gets produced this invocation
#[derive(Debug, Clone, PartialEq)]
pub enum ParseStrategy {
    /// Nothing changed; the stored manifest is reused
    Skip,
    /// Reparse only the listed files
    Partial(FileDiff),
    /// Reparse everything, with the reason
    Full(String),
}

/// Decides between reuse, partial and full parsing
#[derive(Debug, Clone)]
pub struct PartialParser {
    pub project_hash: String,
    pub env: EnvSnapshot,
    pub fallback_fraction: f64,
}

/// Result of [`PartialParser::parse`]
#[derive(Debug)]
pub struct ParseRun {
    pub strategy: ParseStrategy,
    /// Per-file outputs in file id order
    pub outputs: Vec<ParseOutput>,
    /// Stored manifest when the skip path was taken
    pub reused_manifest: Option<Manifest>,
    /// Files that went through a parser
    pub parsed_files: usize,
}

impl PartialParser {
    pub fn new(project_hash: String, env: EnvSnapshot) -> Self {
        Self {
            project_hash,
            env,
            fallback_fraction: DEFAULT_FALLBACK_FRACTION,
        }
    }

    /// Choose a strategy given the previous state and the discovered files
    pub fn plan(&self, state: Option<&ParseState>, files: &[SourceFile]) -> ParseStrategy {
        let Some(state) = state else {
            return ParseStrategy::Full("no saved state".to_string());
        };
        if state.project_hash != self.project_hash {
            return ParseStrategy::Full("project configuration, vars or target changed".to_string());
        }
        if state.env_hash != env_hash(&self.env, &state.env_var_names) {
            return ParseStrategy::Full("environment variables changed".to_string());
        }
        let mut diff = FileDiff::compute(&state.files, files);
        diff.mark_stale_includers(&state.outputs);
        if diff.is_empty() {
            return ParseStrategy::Skip;
        }
        let total = files.len().max(state.files.len()).max(1);
        let fraction = diff.touched() as f64 / total as f64;
        if fraction > self.fallback_fraction {
            return ParseStrategy::Full(format!(
                "{} of {} files changed",
                diff.touched(),
                total
            ));
        }
        ParseStrategy::Partial(diff)
    }

    /// Produce per-file outputs for `files`, reusing `state` where possible
    pub fn parse(&self, state: Option<ParseState>, files: &[SourceFile]) -> CoreResult<ParseRun> {
        let strategy = self.plan(state.as_ref(), files);
        match (&strategy, state) {
            (ParseStrategy::Skip, Some(state)) => {
                log::info!("Partial parse: no files changed, reusing manifest");
                Ok(ParseRun {
                    strategy: ParseStrategy::Skip,
                    outputs: state.outputs.into_values().collect(),
                    reused_manifest: Some(state.manifest),
                    parsed_files: 0,
                })
            }
            (ParseStrategy::Partial(diff), Some(state)) => {
                let structural = files
                    .iter()
                    .filter(|f| diff.changed.contains(&f.file_id) || diff.added.contains(&f.file_id))
                    .filter(|f| f.parse_kind.is_structural())
                    .count();
                log::info!(
                    "Partial parse: {} added, {} changed ({} structural), {} deleted",
                    diff.added.len(),
                    diff.changed.len(),
                    structural,
                    diff.deleted.len()
                );
                let mut outputs = state.outputs;
                for deleted in &diff.deleted {
                    outputs.remove(deleted);
                }
                let stale: Vec<&SourceFile> = files
                    .iter()
                    .filter(|f| diff.changed.contains(&f.file_id) || diff.added.contains(&f.file_id))
                    .collect();
                let parsed_files = stale.len();
                for output in parse_unsettled(stale)? {
                    outputs.insert(output.file_id.clone(), output);
                }
                let mut outputs: Vec<ParseOutput> = outputs.into_values().collect();
                settle_includes(&mut outputs, files)?;
                Ok(ParseRun {
                    strategy: strategy.clone(),
                    outputs,
                    reused_manifest: None,
                    parsed_files,
                })
            }
            _ => {
                if let ParseStrategy::Full(reason) = &strategy {
                    log::info!("Full parse: {}", reason);
                }
                Ok(ParseRun {
                    outputs: parse_files(files.iter())?,
                    strategy: strategy.clone(),
                    reused_manifest: None,
                    parsed_files: files.len(),
                })
            }
        }
    }

    /// State to persist after a successful build
    pub fn state(&self, files: &[SourceFile], outputs: &[ParseOutput], manifest: &Manifest) -> ParseState {
        let env_var_names = env_var_names(outputs);
        ParseState {
            schema_version: PARTIAL_PARSE_SCHEMA_VERSION,
            project_hash: self.project_hash.clone(),
            env_hash: env_hash(&self.env, &env_var_names),
            env_var_names,
            files: files
                .iter()
                .map(|f| (f.file_id.clone(), f.checksum.clone()))
                .collect(),
            outputs: outputs
                .iter()
                .map(|o| (o.file_id.clone(), o.clone()))
                .collect(),
            manifest: manifest.clone(),
        }
    }
}

#[cfg(test)]
#[path = "partial_parse_test.rs"]
mod tests;
