//! Transactional backend against a live PostgreSQL
//!
//! The configured user needs CREATE on the public schema.

use capsule_judge::config::SqlSettings;
use capsule_judge::sql::IsolationBackend;
use capsule_judge::{ErrorKind, SqlCapsule, SqlValidator};
use serde_json::Value;

fn validator() -> SqlValidator {
    SqlValidator::new(SqlSettings::default())
}

fn scratch_table() -> String {
    format!("capsule_scratch_{}", std::process::id())
}

fn people_schema(table: &str) -> Vec<String> {
    vec![
        format!("CREATE TABLE {table} (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)"),
        format!("INSERT INTO {table} VALUES (1, 'Ada', 36), (2, 'Linus', 28), (3, 'Grace', 45)"),
    ]
}

#[tokio::test]
async fn test_postgres_matching_query() {
    let table = scratch_table();
    let capsule = SqlCapsule::new(
        people_schema(&table),
        format!("SELECT name FROM {table} WHERE age > 30 ORDER BY name"),
    )
    .with_user_query(format!("SELECT name FROM {table} WHERE age >= 31"))
    .with_postgres();

    let response = validator().validate(&capsule).await;

    assert!(response.success, "{response:?}");
    assert_eq!(response.validation_mode, IsolationBackend::TransactionalRollback);
    assert_eq!(response.expected_result.as_ref().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_postgres_changes_are_rolled_back() {
    let table = format!("{}_rollback", scratch_table());
    let first = SqlCapsule::new(people_schema(&table), format!("SELECT count(*) AS n FROM {table}"))
        .with_postgres();
    let response = validator().validate(&first).await;
    assert!(response.success, "{response:?}");

    let check = SqlCapsule::new(
        vec!["SELECT 1".to_owned()],
        format!("SELECT to_regclass('{table}') IS NULL AS gone"),
    )
    .with_postgres();
    let response = validator().validate(&check).await;

    assert!(response.success, "{response:?}");
    let rows = response.expected_result.expect("expected rows");
    assert_eq!(rows[0]["gone"], Value::Bool(true));
}

#[tokio::test]
async fn test_postgres_user_error_is_rewritten() {
    let table = format!("{}_errors", scratch_table());
    let capsule = SqlCapsule::new(people_schema(&table), format!("SELECT name FROM {table}"))
        .with_user_query("SELECT name FROM no_such_table")
        .with_postgres();

    let response = validator().validate(&capsule).await;

    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::RuntimeError));
    let error = response.error.expect("error message");
    assert!(error.starts_with("SQL Error: Database object does not exist"), "{error}");
    assert!(response.expected_result.is_some());
}

#[tokio::test]
async fn test_postgres_statement_timeout() {
    let settings = SqlSettings {
        statement_timeout: 1.0,
        ..SqlSettings::default()
    };
    let capsule = SqlCapsule::new(vec!["SELECT 1".to_owned()], "SELECT 1 AS one")
        .with_user_query(
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT count(*) FROM n",
        )
        .with_postgres();

    let response = SqlValidator::new(settings).validate(&capsule).await;

    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::Timeout));
    assert!(response.execution_time < 5000);
}
