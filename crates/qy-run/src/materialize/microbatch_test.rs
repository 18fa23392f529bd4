use super::*;
use crate::context::RunOptions;
use crate::test_support::Harness;
use qy_core::RelationType;

fn ts(value: &str) -> NaiveDateTime {
    parse_timestamp(value).unwrap()
}

#[test]
fn test_parse_timestamp_formats() {
    assert_eq!(ts("2024-03-05"), ts("2024-03-05 00:00:00"));
    assert_eq!(ts("2024-03-05T10:30:00"), ts("2024-03-05 10:30:00"));
    assert_eq!(ts("2024-03-05T10:30:00+02:00"), ts("2024-03-05 08:30:00"));
    assert_eq!(ts("2024-03-05 10:30"), ts("2024-03-05 10:30:00"));
    assert!(parse_timestamp("yesterday").is_none());
}

#[test]
fn test_truncate_and_advance() {
    let at = ts("2024-03-05 10:30:15");
    assert_eq!(BatchSize::Hour.truncate(at), ts("2024-03-05 10:00:00"));
    assert_eq!(BatchSize::Day.truncate(at), ts("2024-03-05"));
    assert_eq!(BatchSize::Month.truncate(at), ts("2024-03-01"));
    assert_eq!(BatchSize::Year.truncate(at), ts("2024-01-01"));

    assert_eq!(BatchSize::Day.advance(ts("2024-02-28"), 2), ts("2024-03-01"));
    assert_eq!(BatchSize::Month.advance(ts("2024-01-01"), -2), ts("2023-11-01"));
    assert_eq!(BatchSize::Year.advance(ts("2024-01-01"), 1), ts("2025-01-01"));
    assert_eq!(BatchSize::parse("week"), None);
}

#[test]
fn test_windows_cover_range() {
    let windows = batch_windows(BatchSize::Day, ts("2024-01-01 06:00:00"), ts("2024-01-03 12:00:00"));
    assert_eq!(
        windows,
        vec![
            (ts("2024-01-01"), ts("2024-01-02")),
            (ts("2024-01-02"), ts("2024-01-03")),
            (ts("2024-01-03"), ts("2024-01-04")),
        ]
    );
    assert!(batch_windows(BatchSize::Day, ts("2024-01-02"), ts("2024-01-02")).is_empty());
}

#[test]
fn test_batch_status() {
    assert_eq!(batch_status(3, 0), RunStatus::Success);
    assert_eq!(batch_status(0, 2), RunStatus::Error);
    assert_eq!(batch_status(2, 1), RunStatus::PartialSuccess);
}

const EVENTS: &str = "{{ config(materialized='table', event_time='ts') }}\nselect 1 as id, now() as ts";
const DAILY: &str = "{{ config(materialized='incremental', incremental_strategy='microbatch', \
    event_time='ts', batch_size='day', begin='2024-01-01') }}\nselect * from {{ ref('events') }}";

fn windowed(threads: usize) -> RunOptions {
    RunOptions {
        threads,
        event_time_start: Some("2024-01-01".to_string()),
        event_time_end: Some("2024-01-04".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_first_batch_creates_then_rest_insert() {
    let harness = Harness::new(&[("models/events.sql", EVENTS), ("models/daily.sql", DAILY)], windowed(4));
    let outcome = harness.build("model.shop.daily").await.unwrap();

    assert_eq!(outcome.status, RunStatus::Success);
    let batches = outcome.batch_results.unwrap();
    assert_eq!(batches.successful.len(), 3);
    assert!(batches.failed.is_empty());
    assert_eq!(
        batches.successful[0],
        ("2024-01-01 00:00:00".to_string(), "2024-01-02 00:00:00".to_string())
    );

    let create = harness.adapter.matching("create table \"memory\".\"main\".\"daily\" as (");
    assert_eq!(create.len(), 1);
    assert!(create[0].contains("ts >= '2024-01-01 00:00:00' and ts < '2024-01-02 00:00:00'"), "{}", create[0]);
    let deletes = harness.adapter.matching("delete from \"memory\".\"main\".\"daily\"");
    assert_eq!(deletes.len(), 2);
    assert!(deletes.iter().any(|d| d.contains("ts >= '2024-01-03 00:00:00' and ts < '2024-01-04 00:00:00'")));
}

#[tokio::test]
async fn test_failed_batch_is_partial_success() {
    let harness = Harness::new(&[("models/events.sql", EVENTS), ("models/daily.sql", DAILY)], windowed(2));
    harness.adapter.add_relation("memory.main.daily", RelationType::Table);
    harness.adapter.fail_on("ts >= '2024-01-02 00:00:00'", "Conversion Error");
    let outcome = harness.build("model.shop.daily").await.unwrap();

    assert_eq!(outcome.status, RunStatus::PartialSuccess);
    let batches = outcome.batch_results.unwrap();
    assert_eq!(batches.successful.len(), 2);
    assert_eq!(
        batches.failed,
        vec![("2024-01-02 00:00:00".to_string(), "2024-01-03 00:00:00".to_string())]
    );
    assert!(outcome.message.unwrap().starts_with("1 of 3 batches failed"));
}

#[tokio::test]
async fn test_failed_first_batch_fails_every_window() {
    let harness = Harness::new(&[("models/events.sql", EVENTS), ("models/daily.sql", DAILY)], windowed(2));
    harness.adapter.fail_on("create table \"memory\".\"main\".\"daily\"", "Catalog Error");
    let outcome = harness.build("model.shop.daily").await.unwrap();

    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.batch_results.unwrap().failed.len(), 3);
}

#[tokio::test]
async fn test_missing_batch_size_is_rejected() {
    let harness = Harness::new(
        &[
            ("models/events.sql", EVENTS),
            (
                "models/daily.sql",
                "{{ config(materialized='incremental', incremental_strategy='microbatch', event_time='ts') }}\nselect 1",
            ),
        ],
        windowed(1),
    );
    let err = harness.build("model.shop.daily").await.unwrap_err().to_string();
    assert!(err.contains("microbatch models require 'batch_size'"), "{}", err);
}
