use super::*;
use crate::context::RunOptions;
use crate::test_support::{context, project};

#[test]
fn test_compiles_refs_to_quoted_paths() {
    let (_dir, manifest) = project(&[
        ("models/a.sql", "select 1 as id"),
        ("models/b.sql", "select * from {{ ref('a') }}"),
    ]);
    let compiler = Compiler::new(context(manifest, RunOptions::default()));
    let compiled = compiler.compile("model.shop.b", &CompileOptions::default()).unwrap();
    assert_eq!(compiled.sql, "select * from \"memory\".\"main\".\"a\"");
    assert_eq!(compiled.relation.unwrap().identifier(), "b");
}

#[test]
fn test_nested_ephemerals_are_injected_deepest_first() {
    let (_dir, manifest) = project(&[
        ("models/e1.sql", "{{ config(materialized='ephemeral') }}\nselect 1 as id"),
        ("models/e2.sql", "{{ config(materialized='ephemeral') }}\nselect * from {{ ref('e1') }}"),
        ("models/m.sql", "with x as (select * from {{ ref('e2') }}) select * from x join {{ ref('e1') }} using (id)"),
    ]);
    let compiler = Compiler::new(context(manifest, RunOptions::default()));
    let compiled = compiler.compile("model.shop.m", &CompileOptions::default()).unwrap();
    assert_eq!(compiled.ephemerals, vec!["model.shop.e1", "model.shop.e2"]);

    let sql = compiled.sql;
    assert!(sql.starts_with("with __dbt__cte__e1 as ("), "{}", sql);
    let e1 = sql.find("__dbt__cte__e1 as (").unwrap();
    let e2 = sql.find("__dbt__cte__e2 as (").unwrap();
    assert!(e1 < e2);
    assert!(sql.contains("),\nx as (select * from __dbt__cte__e2)"), "{}", sql);
    assert_eq!(sql.matches("__dbt__cte__e1 as (").count(), 1);
}

#[test]
fn test_undeclared_dependency_is_rejected() {
    let (_dir, manifest) = project(&[
        ("dbt_project.yml", "name: shop\nvars:\n  upstream: a\n"),
        ("models/a.sql", "select 1 as id"),
        ("models/b.sql", "select * from {{ ref(var('upstream')) }}"),
    ]);
    let compiler = Compiler::new(context(manifest, RunOptions::default()));
    let err = compiler.compile("model.shop.b", &CompileOptions::default()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("[E018]"), "{}", message);
    assert!(message.contains("'a'"), "{}", message);
}

#[test]
fn test_empty_mode_wraps_inputs() {
    let (_dir, manifest) = project(&[
        ("models/a.sql", "select 1 as id"),
        ("models/b.sql", "select * from {{ ref('a') }}"),
    ]);
    let options = RunOptions {
        empty: true,
        ..Default::default()
    };
    let compiler = Compiler::new(context(manifest, options));
    let compiled = compiler.compile("model.shop.b", &CompileOptions::default()).unwrap();
    assert!(compiled.sql.contains("where false limit 0"), "{}", compiled.sql);
}

#[test]
fn test_inject_ctes_without_body_with() {
    let ctes = vec!["__dbt__cte__e as (\nselect 1\n)".to_string()];
    assert_eq!(
        inject_ctes("select * from __dbt__cte__e", ctes.iter()),
        "with __dbt__cte__e as (\nselect 1\n)\nselect * from __dbt__cte__e"
    );
    assert_eq!(inject_ctes("select 1", std::iter::empty()), "select 1");
}
