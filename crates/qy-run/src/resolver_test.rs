use super::*;
use crate::context::RunOptions;
use crate::test_support::{context, project};

fn resolver(ctx: &Arc<RunContext>, node_id: &str) -> NodeResolver {
    let node = ctx.node(node_id).unwrap();
    let declared = node.common.depends_on.nodes.iter().cloned().collect();
    NodeResolver::new(Arc::clone(ctx), node_id, node.package_name(), declared)
}

#[test]
fn test_resolves_declared_ref_to_relation() {
    let (_dir, manifest) = project(&[
        ("models/a.sql", "select 1 as id"),
        ("models/b.sql", "select * from {{ ref('a') }}"),
    ]);
    let ctx = context(manifest, RunOptions::default());
    let r = resolver(&ctx, "model.shop.b");
    let relation = r.resolve_ref(&RefCall::new("a")).unwrap();
    assert_eq!(relation.render(), "\"memory\".\"main\".\"a\"");
    assert!(r.undeclared().is_empty());
}

#[test]
fn test_records_undeclared_and_missing_refs() {
    let (_dir, manifest) = project(&[
        ("models/a.sql", "select 1 as id"),
        ("models/b.sql", "select 2 as id"),
    ]);
    let ctx = context(manifest, RunOptions::default());
    let r = resolver(&ctx, "model.shop.b");
    assert!(r.resolve_ref(&RefCall::new("a")).is_ok());
    assert_eq!(r.undeclared(), vec!["a".to_string()]);

    let err = r.resolve_ref(&RefCall::new("missing")).unwrap_err();
    assert!(err.contains("'missing' was not found"), "{}", err);
}

#[test]
fn test_ephemeral_becomes_cte() {
    let (_dir, manifest) = project(&[
        ("models/e.sql", "{{ config(materialized='ephemeral') }}\nselect 1 as id"),
        ("models/b.sql", "select * from {{ ref('e') }}"),
    ]);
    let ctx = context(manifest, RunOptions::default());
    let r = resolver(&ctx, "model.shop.b");
    let relation = r.resolve_ref(&RefCall::new("e")).unwrap();
    assert_eq!(relation.render(), "__dbt__cte__e");
    assert_eq!(r.ephemerals(), vec!["model.shop.e".to_string()]);
}

#[test]
fn test_fixtures_and_batch_filters() {
    let (_dir, manifest) = project(&[
        ("models/events.sql", "{{ config(event_time='ts') }}\nselect now() as ts"),
        ("models/plain.sql", "select 1 as id"),
        ("models/b.sql", "select * from {{ ref('events') }} join {{ ref('plain') }} using (id)"),
    ]);
    let ctx = context(manifest, RunOptions::default());
    let batch = EventTimeFilter {
        field: "ts".to_string(),
        start: "2024-01-01 00:00:00".to_string(),
        end: "2024-01-02 00:00:00".to_string(),
    };
    let r = resolver(&ctx, "model.shop.b")
        .with_batch(Some(batch))
        .with_fixtures(BTreeMap::from([("model.shop.plain".to_string(), "plain".to_string())]));

    let events = r.resolve_ref(&RefCall::new("events")).unwrap();
    assert!(events.render().contains("where ts >= '2024-01-01 00:00:00' and ts < '2024-01-02 00:00:00'"));
    let plain = r.resolve_ref(&RefCall::new("plain")).unwrap();
    assert_eq!(plain.render(), "__dbt__cte__plain");
}

#[test]
fn test_unselected_nodes_defer_to_state() {
    let (_dir, manifest) = project(&[
        ("models/a.sql", "select 1 as id"),
        ("models/b.sql", "select * from {{ ref('a') }}"),
    ]);
    let mut state = manifest.clone();
    if let Some(a) = state.nodes.get_mut("model.shop.a") {
        a.common.schema = Some("prod".to_string());
    }
    let target = qy_core::TargetInfo::default();
    let renderer = Arc::new(qy_jinja::JinjaRenderer::from_manifest(&manifest, &target));
    let ctx = Arc::new(
        RunContext::new(Arc::new(manifest), renderer, target, Arc::new(qy_core::Invocation::default()))
            .with_selection(["model.shop.b".to_string()].into_iter().collect())
            .with_defer(Some(Arc::new(state))),
    );
    let r = resolver(&ctx, "model.shop.b");
    let relation = r.resolve_ref(&RefCall::new("a")).unwrap();
    assert_eq!(relation.schema(), "prod");
}
