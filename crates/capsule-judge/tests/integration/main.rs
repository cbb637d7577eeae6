//! Integration tests for capsule-judge
//!
//! Toolchain tests need javac, go, dotnet and python3 on PATH.
//! Run with: cargo test -p capsule-judge --features integration-tests
//!
//! Tests that need the .NET SDK are marked `#[ignore]`. To include them:
//!    cargo test -p capsule-judge --features integration-tests -- --include-ignored
//!
//! PostgreSQL rollback tests read DB_HOST, DB_NAME, DB_USER_RO, DB_PASS_RO
//! and DB_PORT. Run with: cargo test -p capsule-judge --features postgres-tests

#![cfg(any(feature = "integration-tests", feature = "postgres-tests"))]

#[cfg(feature = "integration-tests")]
use capsule_judge::{Config, ExecutionRequest, JudgeResponse, Runner};

#[cfg(feature = "integration-tests")]
mod config_loading;
#[cfg(feature = "integration-tests")]
mod csharp;
#[cfg(feature = "integration-tests")]
mod go;
#[cfg(feature = "integration-tests")]
mod java;
#[cfg(feature = "postgres-tests")]
mod postgres;
#[cfg(feature = "integration-tests")]
mod scripts;

/// Runner over the embedded default configuration
#[cfg(feature = "integration-tests")]
pub(crate) fn test_runner() -> Runner {
    Runner::new(Config::default())
}

/// Judge `code` with optional stdin
#[cfg(feature = "integration-tests")]
pub(crate) async fn judge(language: &str, code: &str, input: Option<&str>) -> JudgeResponse {
    let mut request = ExecutionRequest::new(language, code);
    if let Some(input) = input {
        request = request.with_input(input);
    }
    test_runner().judge(&request).await
}
