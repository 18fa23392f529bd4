//! Builds a small project end to end against in-memory DuckDB

use qy_core::{discover, parse_files, Invocation, LoaderOptions, ManifestBuilder, Project, RunStatus, TargetInfo};
use qy_db::{Adapter, ConnectionPool, DuckDbAdapter};
use qy_jinja::JinjaRenderer;
use qy_run::{RunContext, RunOptions, RunOutcome, Scheduler};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const FILES: &[(&str, &str)] = &[
    ("dbt_project.yml", "name: shop\n"),
    ("seeds/raw_orders.csv", "id,amount,updated_at\n1,10,2024-01-01\n2,20,2024-01-01\n"),
    ("models/stg_orders.sql", "select id, amount, updated_at from {{ ref('raw_orders') }}"),
    (
        "models/big_orders.sql",
        "{{ config(materialized='table') }}\nselect * from {{ ref('stg_orders') }} where amount > 15",
    ),
    ("models/order_ids.sql", "{{ config(materialized='ephemeral') }}\nselect id from {{ ref('stg_orders') }}"),
    ("models/order_count.sql", "select count(*) as n from {{ ref('order_ids') }}"),
    (
        "models/totals.sql",
        "{{ config(materialized='incremental', incremental_strategy='delete+insert', unique_key='id') }}\n\
         select id, amount from {{ ref('stg_orders') }}\n\
         {% if is_incremental() %}where id >= (select max(id) from {{ this }}){% endif %}",
    ),
    (
        "models/schema.yml",
        "models:\n  - name: big_orders\n    columns:\n      - name: id\n        tests:\n          - not_null\n          - unique\n",
    ),
    (
        "snapshots/orders_snap.sql",
        "{% snapshot orders_snap %}\n{{ config(target_schema='snapshots', unique_key='id', strategy='timestamp', updated_at='updated_at') }}\nselect * from {{ ref('raw_orders') }}\n{% endsnapshot %}",
    ),
];

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

async fn build(dir: &Path, adapter: &Arc<DuckDbAdapter>) -> RunOutcome {
    let project = Project::load(dir).unwrap();
    let files = discover(&project, &LoaderOptions::default()).unwrap();
    let outputs = parse_files(files.iter()).unwrap();
    let target = TargetInfo::default();
    let invocation = Arc::new(Invocation::default());
    let manifest = ManifestBuilder::new(&project, &target, &invocation)
        .build(&outputs)
        .unwrap();
    let renderer = Arc::new(JinjaRenderer::from_manifest(&manifest, &target));
    let ctx = Arc::new(
        RunContext::new(Arc::new(manifest), renderer, target, invocation).with_options(RunOptions {
            threads: 1,
            ..Default::default()
        }),
    );
    let pool = Arc::new(ConnectionPool::new(Arc::clone(adapter) as Arc<dyn Adapter>, 1));
    Scheduler::new(ctx, pool)
        .with_tests_gating_children(true)
        .run()
        .await
        .unwrap()
}

async fn count(adapter: &Arc<DuckDbAdapter>, sql: &str) -> i64 {
    let conn = adapter.open("check").await.unwrap();
    conn.query_count(sql).await.unwrap()
}

#[tokio::test]
async fn test_build_twice() {
    let dir = TempDir::new().unwrap();
    for (path, content) in FILES {
        write(dir.path(), path, content);
    }
    let adapter = Arc::new(DuckDbAdapter::in_memory().unwrap());

    let first = build(dir.path(), &adapter).await;
    for result in &first.results {
        assert!(
            matches!(result.status, RunStatus::Success | RunStatus::Pass),
            "{} finished {}: {:?}",
            result.unique_id,
            result.status,
            result.message
        );
    }
    assert!(first.get("model.shop.order_ids").is_none());
    assert_eq!(count(&adapter, "select * from raw_orders").await, 2);
    assert_eq!(count(&adapter, "select * from big_orders").await, 1);
    assert_eq!(count(&adapter, "select * from totals").await, 2);
    assert_eq!(count(&adapter, "select * from order_count where n = 2").await, 1);
    assert_eq!(count(&adapter, "select * from snapshots.orders_snap").await, 2);

    let second = build(dir.path(), &adapter).await;
    assert!(!second.has_failures());
    assert_eq!(count(&adapter, "select * from totals").await, 2);
    assert_eq!(
        count(&adapter, "select * from snapshots.orders_snap where dbt_valid_to is null").await,
        2
    );
}
