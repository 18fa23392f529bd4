use super::*;
use std::fs::File;
use tempfile::tempdir;

fn global(project_dir: &std::path::Path, verbose: bool) -> GlobalArgs {
    GlobalArgs {
        verbose,
        project_dir: project_dir.to_path_buf(),
        profiles_dir: None,
        target: None,
        no_partial_parse: false,
    }
}

#[tokio::test]
async fn test_clean_removes_target_directory() {
    let temp_dir = tempdir().unwrap();
    let project_path = temp_dir.path();
    fs::write(project_path.join("dbt_project.yml"), "name: shop\n").unwrap();

    let target_dir = project_path.join("target");
    fs::create_dir_all(&target_dir).unwrap();
    File::create(target_dir.join("manifest.json")).unwrap();

    execute(&CleanArgs::default(), &global(project_path, false))
        .await
        .unwrap();

    assert!(!target_dir.exists());
}

#[tokio::test]
async fn test_clean_handles_missing_directory() {
    let temp_dir = tempdir().unwrap();
    let project_path = temp_dir.path();
    fs::write(
        project_path.join("dbt_project.yml"),
        "name: shop\nclean-targets: [target, dbt_packages]\n",
    )
    .unwrap();

    let result = execute(&CleanArgs::default(), &global(project_path, true)).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_clean_refuses_paths_outside_project() {
    let outside = tempdir().unwrap();
    let temp_dir = tempdir().unwrap();
    let project_path = temp_dir.path();
    let outside_target = outside.path().join("shared");
    fs::create_dir_all(&outside_target).unwrap();
    fs::write(
        project_path.join("dbt_project.yml"),
        format!("name: shop\nclean-targets: ['{}']\n", outside_target.display()),
    )
    .unwrap();

    let err = execute(&CleanArgs::default(), &global(project_path, false))
        .await
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<ExitCode>(), Some(ExitCode(2))));
    assert!(outside_target.exists());

    let args = CleanArgs {
        no_clean_project_files_only: true,
    };
    execute(&args, &global(project_path, false)).await.unwrap();
    assert!(!outside_target.exists());
}

#[tokio::test]
async fn test_clean_refuses_project_root() {
    let temp_dir = tempdir().unwrap();
    let project_path = temp_dir.path();
    fs::write(project_path.join("dbt_project.yml"), "name: shop\nclean-targets: ['.']\n").unwrap();

    let err = execute(&CleanArgs::default(), &global(project_path, false))
        .await
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<ExitCode>(), Some(ExitCode(2))));
    assert!(project_path.join("dbt_project.yml").exists());
}
