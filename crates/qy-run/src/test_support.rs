//! Throw-away projects for unit tests

use crate::compiler::Compiler;
use crate::context::{RunContext, RunOptions};
use crate::error::RunnerResult;
use crate::materialize::{materialize, NodeOutcome, NodeTask};
use qy_core::{discover, parse_files, Invocation, LoaderOptions, Manifest, ManifestBuilder, Project, TargetInfo};
use qy_db::{ConnectionPool, MockAdapter};
use qy_jinja::JinjaRenderer;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Write `files` under a fresh project named `shop` and build its manifest
pub fn project(files: &[(&str, &str)]) -> (TempDir, Manifest) {
    let dir = TempDir::new().unwrap();
    if !files.iter().any(|(p, _)| *p == "dbt_project.yml") {
        write(dir.path(), "dbt_project.yml", "name: shop\n");
    }
    for (path, content) in files {
        write(dir.path(), path, content);
    }
    let project = Project::load(dir.path()).unwrap();
    let sources = discover(&project, &LoaderOptions::default()).unwrap();
    let outputs = parse_files(sources.iter()).unwrap();
    let target = TargetInfo::default();
    let invocation = Invocation::default();
    let manifest = ManifestBuilder::new(&project, &target, &invocation)
        .build(&outputs)
        .unwrap();
    (dir, manifest)
}

pub fn context(manifest: Manifest, options: RunOptions) -> Arc<RunContext> {
    let target = TargetInfo::default();
    let renderer = Arc::new(JinjaRenderer::from_manifest(&manifest, &target));
    Arc::new(
        RunContext::new(Arc::new(manifest), renderer, target, Arc::new(Invocation::default()))
            .with_options(options),
    )
}

/// A project wired to a recording adapter
pub struct Harness {
    pub dir: TempDir,
    pub ctx: Arc<RunContext>,
    pub adapter: MockAdapter,
    pub pool: Arc<ConnectionPool>,
}

impl Harness {
    pub fn new(files: &[(&str, &str)], options: RunOptions) -> Self {
        let (dir, manifest) = project(files);
        let threads = options.threads;
        let ctx = context(manifest, options);
        let adapter = MockAdapter::new();
        let pool = Arc::new(ConnectionPool::new(Arc::new(adapter.clone()), threads));
        Self {
            dir,
            ctx,
            adapter,
            pool,
        }
    }

    pub async fn build(&self, unique_id: &str) -> RunnerResult<NodeOutcome> {
        let compiler = Compiler::new(Arc::clone(&self.ctx));
        let node = self.ctx.node(unique_id).unwrap().clone();
        let task = NodeTask {
            ctx: &self.ctx,
            compiler: &compiler,
            pool: &self.pool,
            node: &node,
        };
        materialize(&task).await
    }
}
