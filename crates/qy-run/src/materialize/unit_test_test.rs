use super::*;
use crate::context::RunOptions;
use crate::test_support::Harness;
use qy_db::QueryResult;
use serde_json::json;

fn row(values: serde_json::Value) -> BTreeMap<String, Value> {
    serde_json::from_value(values).unwrap()
}

#[test]
fn test_parse_input() {
    assert_eq!(parse_input("ref('orders')"), Some(FixtureInput::Ref(RefCall::new("orders"))));
    assert_eq!(
        parse_input(" ref(\"shop\", \"orders\") "),
        Some(FixtureInput::Ref(RefCall {
            package: Some("shop".to_string()),
            name: "orders".to_string(),
            version: None,
        }))
    );
    assert_eq!(
        parse_input("source('raw', 'orders')"),
        Some(FixtureInput::Source(SourceCall {
            source_name: "raw".to_string(),
            table_name: "orders".to_string(),
        }))
    );
    assert_eq!(parse_input("source('raw')"), None);
    assert_eq!(parse_input("this"), None);
}

#[test]
fn test_rows_sql() {
    let rows = vec![row(json!({"id": 1, "name": "o'brien"})), row(json!({"id": 2, "flag": true}))];
    let columns = row_columns(&rows);
    assert_eq!(columns, vec!["id", "name", "flag"]);
    assert_eq!(
        rows_sql(&rows, &columns),
        "select 1 as \"id\", 'o''brien' as \"name\", null as \"flag\"\nunion all\nselect 2 as \"id\", null as \"name\", true as \"flag\""
    );
}

const FILES: [(&str, &str); 3] = [
    ("models/orders.sql", "select 1 as id, 10 as amount"),
    ("models/big_orders.sql", "select id from {{ ref('orders') }} where amount > 5"),
    (
        "models/unit.yml",
        "unit_tests:\n  - name: keeps_big\n    model: big_orders\n    given:\n      - input: ref('orders')\n        rows:\n          - {id: 1, amount: 10}\n          - {id: 2, amount: 1}\n    expect:\n      rows:\n        - {id: 1}\n",
    ),
];

#[tokio::test]
async fn test_model_reads_fixture_ctes() {
    let harness = Harness::new(&FILES, RunOptions::default());
    let outcome = harness.build("unit_test.shop.big_orders.keeps_big").await.unwrap();

    assert_eq!(outcome.status, RunStatus::Pass);
    let sql = outcome.compiled_code.unwrap();
    assert!(sql.contains("with __dbt__cte__fixture_0 as ("), "{}", sql);
    assert!(sql.contains("select id from __dbt__cte__fixture_0 where amount > 5"), "{}", sql);
    assert!(!sql.contains("\"memory\".\"main\".\"orders\""), "{}", sql);
    assert_eq!(harness.adapter.matching("except").len(), 2);
}

#[tokio::test]
async fn test_differences_fail() {
    let harness = Harness::new(&FILES, RunOptions::default());
    harness
        .adapter
        .respond("dbt_internal_diff", QueryResult::new(vec!["n".into()], vec![vec![json!(1)]]));
    let outcome = harness.build("unit_test.shop.big_orders.keeps_big").await.unwrap();

    assert_eq!(outcome.status, RunStatus::Fail);
    assert_eq!(outcome.failures, Some(2));
    assert_eq!(
        outcome.message.as_deref(),
        Some("actual differs from expected: 1 unexpected row, 1 missing row")
    );
}
