use super::*;
use crate::context::RunOptions;
use crate::test_support::Harness;
use qy_core::RelationType;

#[test]
fn test_split_statements() {
    assert_eq!(
        split_statements("create table a (id int);\n\n insert into a values (1);  ;"),
        vec!["create table a (id int)", "insert into a values (1)"]
    );
    assert!(split_statements(" ; \n").is_empty());
}

#[tokio::test]
async fn test_view_is_created_in_place() {
    let harness = Harness::new(&[("models/a.sql", "select 1 as id")], RunOptions::default());
    let outcome = harness.build("model.shop.a").await.unwrap();

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.compiled_code.as_deref(), Some("select 1 as id"));
    let statements = harness.adapter.statements();
    assert_eq!(statements.len(), 1, "{:?}", statements);
    assert!(statements[0].starts_with("create or replace view \"memory\".\"main\".\"a\" as ("));
    assert_eq!(harness.adapter.relation("memory.main.a"), Some(RelationType::View));
}

#[tokio::test]
async fn test_view_replaces_existing_table() {
    let harness = Harness::new(&[("models/a.sql", "select 1 as id")], RunOptions::default());
    harness.adapter.add_relation("memory.main.a", RelationType::Table);
    harness.build("model.shop.a").await.unwrap();

    let drop = harness.adapter.position("drop table if exists \"memory\".\"main\".\"a\"").unwrap();
    let create = harness.adapter.position("create or replace view").unwrap();
    assert!(drop < create);
}

#[tokio::test]
async fn test_table_swaps_through_tmp_and_backup() {
    let harness = Harness::new(
        &[("models/a.sql", "{{ config(materialized='table') }}\nselect 1 as id")],
        RunOptions::default(),
    );
    harness.adapter.add_relation("memory.main.a", RelationType::Table);
    harness.build("model.shop.a").await.unwrap();

    let order = [
        "begin transaction",
        "create table \"memory\".\"main\".\"a__dbt_tmp\" as (",
        "alter table \"memory\".\"main\".\"a\" rename to \"a__dbt_backup\"",
        "alter table \"memory\".\"main\".\"a__dbt_tmp\" rename to \"a\"",
        "drop table if exists \"memory\".\"main\".\"a__dbt_backup\"",
        "commit",
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|p| harness.adapter.position(p).unwrap_or_else(|| panic!("missing {}", p)))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", harness.adapter.statements());
    assert_eq!(harness.adapter.relation("memory.main.a"), Some(RelationType::Table));
    assert_eq!(harness.adapter.relation("memory.main.a__dbt_backup"), None);
}

#[tokio::test]
async fn test_hooks_wrap_the_build_transaction() {
    let harness = Harness::new(
        &[(
            "models/a.sql",
            "{{ config(materialized='table', pre_hook=\"insert into audit values ('start')\", \
             post_hook=[{'sql': 'vacuum', 'transaction': false}]) }}\nselect 1 as id",
        )],
        RunOptions::default(),
    );
    harness.build("model.shop.a").await.unwrap();

    let begin = harness.adapter.position("begin transaction").unwrap();
    let pre = harness.adapter.position("insert into audit").unwrap();
    let create = harness.adapter.position("create table").unwrap();
    let commit = harness.adapter.position("commit").unwrap();
    let post = harness.adapter.position("vacuum").unwrap();
    assert!(begin < pre && pre < create && create < commit && commit < post);
}

#[tokio::test]
async fn test_failed_build_rolls_back() {
    let harness = Harness::new(
        &[("models/a.sql", "{{ config(materialized='table') }}\nselect 1 as id")],
        RunOptions::default(),
    );
    harness.adapter.fail_on("create table", "Catalog Error: boom");
    let err = harness.build("model.shop.a").await.unwrap_err();

    assert!(err.is_runtime());
    assert!(err.to_string().contains("boom"), "{}", err);
    assert!(harness.adapter.position("rollback").is_some());
    assert!(harness.adapter.position("commit").is_none());
}

#[tokio::test]
async fn test_unknown_materialization_is_an_error() {
    let harness = Harness::new(
        &[("models/a.sql", "{{ config(materialized='lakehouse') }}\nselect 1 as id")],
        RunOptions::default(),
    );
    let err = harness.build("model.shop.a").await.unwrap_err();
    assert!(!err.is_runtime());
    assert!(err.to_string().contains("no materialization 'lakehouse'"), "{}", err);
}

#[tokio::test]
async fn test_custom_materialization_takes_precedence() {
    let harness = Harness::new(
        &[
            (
                "macros/mat.sql",
                "{% materialization table, adapter='duckdb' %}create table {{ this }} as {{ sql }}; analyze {{ this }}{% endmaterialization %}",
            ),
            ("models/a.sql", "{{ config(materialized='table') }}\nselect 1 as id"),
        ],
        RunOptions::default(),
    );
    harness.build("model.shop.a").await.unwrap();

    let statements = harness.adapter.statements();
    assert!(statements.iter().any(|s| s.starts_with("analyze \"memory\".\"main\".\"a\"")), "{:?}", statements);
    assert!(harness.adapter.position("__dbt_tmp").is_none());
}
