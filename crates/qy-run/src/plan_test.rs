use super::*;
use crate::test_support::project;

fn shop() -> (tempfile::TempDir, Manifest) {
    project(&[
        ("seeds/raw.csv", "id\n1\n"),
        ("models/e.sql", "{{ config(materialized='ephemeral') }}\nselect * from {{ ref('raw') }}"),
        ("models/a.sql", "select * from {{ ref('e') }}"),
        ("models/b.sql", "select * from {{ ref('a') }}"),
        (
            "models/schema.yml",
            "models:\n  - name: a\n    columns:\n      - name: id\n        tests:\n          - not_null\n",
        ),
        (
            "models/unit.yml",
            "unit_tests:\n  - name: b_passes\n    model: b\n    given:\n      - input: ref('a')\n        rows:\n          - {id: 1}\n    expect:\n      rows:\n        - {id: 1}\n",
        ),
    ])
}

fn all(manifest: &Manifest) -> BTreeSet<String> {
    manifest.all_nodes().map(|n| n.unique_id().to_string()).collect()
}

fn test_id(manifest: &Manifest) -> String {
    manifest
        .nodes
        .keys()
        .find(|id| id.starts_with("test.shop.not_null_a_id"))
        .unwrap()
        .clone()
}

fn position(plan: &ExecutionPlan, id: &str) -> usize {
    plan.order.iter().position(|x| x == id).unwrap()
}

#[test]
fn test_ephemeral_nodes_are_walked_through() {
    let (_dir, manifest) = shop();
    let plan = ExecutionPlan::new(&manifest, &all(&manifest), false).unwrap();
    assert!(!plan.contains("model.shop.e"));
    assert_eq!(
        plan.parents["model.shop.a"],
        BTreeSet::from(["seed.shop.raw".to_string()])
    );
    assert!(position(&plan, "seed.shop.raw") < position(&plan, "model.shop.a"));
    assert!(position(&plan, "model.shop.a") < position(&plan, "model.shop.b"));
}

#[test]
fn test_unselected_nodes_are_not_planned() {
    let (_dir, manifest) = shop();
    let selected = BTreeSet::from(["model.shop.b".to_string()]);
    let plan = ExecutionPlan::new(&manifest, &selected, false).unwrap();
    assert_eq!(plan.order, vec!["model.shop.b".to_string()]);
    assert!(plan.parents["model.shop.b"].is_empty());
}

#[test]
fn test_build_gates_children_on_tests() {
    let (_dir, manifest) = shop();
    let test = test_id(&manifest);

    let plan = ExecutionPlan::new(&manifest, &all(&manifest), false).unwrap();
    assert!(!plan.parents["model.shop.b"].contains(&test));

    let plan = ExecutionPlan::new(&manifest, &all(&manifest), true).unwrap();
    assert!(plan.parents["model.shop.b"].contains(&test));
    assert!(plan.descendants("model.shop.a").contains("model.shop.b"));
    assert!(plan.descendants(&test).contains("model.shop.b"));
}

#[test]
fn test_unit_tests_run_before_their_model_in_build() {
    let (_dir, manifest) = shop();
    let unit = manifest.unit_tests.keys().next().unwrap().clone();

    let plan = ExecutionPlan::new(&manifest, &all(&manifest), false).unwrap();
    assert!(plan.parents[&unit].is_empty());

    let plan = ExecutionPlan::new(&manifest, &all(&manifest), true).unwrap();
    assert!(plan.parents["model.shop.b"].contains(&unit));
    assert!(position(&plan, &unit) < position(&plan, "model.shop.b"));
}

fn edges(pairs: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
    pairs
        .iter()
        .map(|(id, ps)| (id.to_string(), ps.iter().map(|p| p.to_string()).collect()))
        .collect()
}

#[test]
fn test_child_map_inverts_parents() {
    let parents = edges(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"]), ("d", &[])]);
    let children = child_map(&parents);
    assert_eq!(children.len(), 4);
    assert_eq!(children["a"], edges(&[("x", &["b", "c"])])["x"]);
    assert_eq!(children["b"], edges(&[("x", &["c"])])["x"]);
    assert!(children["c"].is_empty() && children["d"].is_empty());
}

#[test]
fn test_topological_breaks_ties_by_id() {
    let parents = edges(&[("z", &[]), ("m", &["z"]), ("a", &["m"]), ("b", &[]), ("c", &["b", "z"])]);
    let order = topological(&parents, &child_map(&parents));
    assert_eq!(order, vec!["b", "z", "c", "m", "a"]);
}

#[test]
fn test_wide_fan_out_plans_every_node() {
    let mut parents = BTreeMap::new();
    parents.insert("root".to_string(), BTreeSet::new());
    for i in 0..5000 {
        let id = format!("leaf_{:04}", i);
        parents.insert(id, ["root".to_string()].into_iter().collect());
    }
    let order = topological(&parents, &child_map(&parents));
    assert_eq!(order.len(), 5001);
    assert_eq!(order[0], "root");
    assert_eq!(order[1], "leaf_0000");
}
