use super::*;
use crate::commands::common::ExitCode;
use crate::commands::execute;
use qy_core::RunStatus;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn global(dir: &Path) -> GlobalArgs {
    GlobalArgs {
        verbose: false,
        project_dir: dir.to_path_buf(),
        profiles_dir: None,
        target: None,
        no_partial_parse: false,
    }
}

fn results(dir: &Path) -> RunResults {
    RunResults::load(&dir.join("target/run_results.json")).unwrap().unwrap()
}

#[test]
fn test_previous_command_round_trip() {
    let args = RunArgs {
        full_refresh: true,
        vars: Some("{a: 1}".to_string()),
        ..Default::default()
    };
    let recorded = execute::invocation_args(Which::Build, &args).unwrap();
    let results = RunResults::new(&qy_core::Invocation::default(), recorded, 0.0, Vec::new());
    let (which, back) = previous_command(&results).unwrap();
    assert_eq!(which, Which::Build);
    assert!(back.full_refresh);
    assert_eq!(back.vars.as_deref(), Some("{a: 1}"));

    let bare = RunResults::new(&qy_core::Invocation::default(), Default::default(), 0.0, Vec::new());
    assert!(previous_command(&bare).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_reruns_failed_and_skipped() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "dbt_project.yml", "name: shop\n");
    write(dir.path(), "models/a.sql", "selct 1");
    write(dir.path(), "models/b.sql", "select * from {{ ref('a') }}");
    write(dir.path(), "models/c.sql", "select 2 as id");

    let err = execute::execute(Which::Run, &RunArgs::default(), &global(dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<ExitCode>(), Some(ExitCode(1))));
    assert_eq!(results(dir.path()).get("model.shop.c").unwrap().status, RunStatus::Success);

    write(dir.path(), "models/a.sql", "select 1 as id");
    execute(&RetryArgs::default(), &global(dir.path())).await.unwrap();

    let retried = results(dir.path());
    assert_eq!(retried.results.len(), 2);
    assert_eq!(retried.get("model.shop.a").unwrap().status, RunStatus::Success);
    assert_eq!(retried.get("model.shop.b").unwrap().status, RunStatus::Success);
    assert!(retried.get("model.shop.c").is_none());
    assert_eq!(retried.args["which"], "run");

    execute(&RetryArgs::default(), &global(dir.path())).await.unwrap();
}

#[tokio::test]
async fn test_retry_without_results_fails() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "dbt_project.yml", "name: shop\n");
    let err = execute(&RetryArgs::default(), &global(dir.path())).await.unwrap_err();
    assert!(err.to_string().contains("No previous run results"));
}
