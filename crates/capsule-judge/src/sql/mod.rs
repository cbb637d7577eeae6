//! SQL capsule validation
//!
//! A capsule is a schema, a reference query and optionally a candidate query.
//! Both queries run against the same freshly built schema, either in a
//! throwaway in-memory SQLite database or inside a PostgreSQL transaction that
//! is always rolled back, and the candidate passes when its result set is
//! equivalent to the reference's.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, instrument};

pub use crate::sql::compare::{Comparison, compare};
pub use crate::sql::screen::{Rejection, screen};

mod compare;
mod postgres;
mod screen;
mod sqlite;

use crate::config::{ConfigError, SqlSettings};
use crate::normalize::summarize;
use crate::types::ErrorKind;

/// One result row, column name to value
pub type Row = serde_json::Map<String, Value>;

/// An exercise bundle validated by result equivalence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqlCapsule {
    /// Statements applied in order before any query runs
    #[serde(default)]
    pub schema_setup: Vec<String>,

    #[serde(default)]
    pub reference_solution: String,

    /// Candidate query; without one only the reference result is returned
    #[serde(default)]
    pub user_query: Option<String>,

    /// Use the transactional PostgreSQL backend
    #[serde(default)]
    pub requires_postgres: bool,
}

impl SqlCapsule {
    pub fn new(schema_setup: Vec<String>, reference_solution: impl Into<String>) -> Self {
        Self {
            schema_setup,
            reference_solution: reference_solution.into(),
            user_query: None,
            requires_postgres: false,
        }
    }

    pub fn with_user_query(mut self, query: impl Into<String>) -> Self {
        self.user_query = Some(query.into());
        self
    }

    pub fn with_postgres(mut self) -> Self {
        self.requires_postgres = true;
        self
    }

    pub fn backend(&self) -> IsolationBackend {
        if self.requires_postgres {
            IsolationBackend::TransactionalRollback
        } else {
            IsolationBackend::Ephemeral
        }
    }

    /// The candidate query, if it is not blank
    pub fn candidate(&self) -> Option<&str> {
        self.user_query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }
}

/// Where a capsule runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationBackend {
    /// In-memory SQLite, created and discarded per call
    #[serde(rename = "sqlite")]
    Ephemeral,
    /// One PostgreSQL transaction, rolled back on every path
    #[serde(rename = "postgres")]
    TransactionalRollback,
}

impl IsolationBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationBackend::Ephemeral => "sqlite",
            IsolationBackend::TransactionalRollback => "postgres",
        }
    }

    /// Prefix for schema and reference failures
    fn engine_name(&self) -> &'static str {
        match self {
            IsolationBackend::Ephemeral => "SQLite",
            IsolationBackend::TransactionalRollback => "PostgreSQL",
        }
    }
}

impl std::fmt::Display for IsolationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    Idle,
    SchemaApplied,
    ReferenceExecuted,
    UserExecuted,
    Skipped,
    Compared,
    Done,
    Failed,
}

impl ValidationState {
    pub fn can_advance_to(self, next: ValidationState) -> bool {
        use ValidationState::*;
        matches!(
            (self, next),
            (Idle, SchemaApplied)
                | (SchemaApplied, ReferenceExecuted)
                | (ReferenceExecuted, UserExecuted | Skipped)
                | (UserExecuted | Skipped, Compared)
                | (Compared, Done)
        ) || (next == Failed && !matches!(self, Done | Failed))
    }
}

/// The states a validation passed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTrace {
    states: Vec<ValidationState>,
}

impl ValidationTrace {
    pub fn new() -> Self {
        Self {
            states: vec![ValidationState::Idle],
        }
    }

    pub fn current(&self) -> ValidationState {
        self.states
            .last()
            .copied()
            .unwrap_or(ValidationState::Idle)
    }

    pub fn states(&self) -> &[ValidationState] {
        &self.states
    }

    /// Move to `next`, refusing transitions the state machine does not have
    pub fn advance(&mut self, next: ValidationState) -> Result<(), SqlError> {
        let current = self.current();
        if !current.can_advance_to(next) {
            return Err(SqlError::Internal(format!(
                "invalid validation transition {current:?} -> {next:?}"
            )));
        }
        debug!(from = ?current, to = ?next, "validation state");
        self.states.push(next);
        Ok(())
    }

    fn fail(&mut self) {
        if self.current().can_advance_to(ValidationState::Failed) {
            self.states.push(ValidationState::Failed);
        }
    }
}

impl Default for ValidationTrace {
    fn default() -> Self {
        Self::new()
    }
}

/// Rows and column order produced by one query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// What a backend produced for a capsule
#[derive(Debug)]
pub struct Execution {
    pub expected: ResultSet,

    /// `None` when there was no candidate; `Err` when the candidate failed
    pub user: Option<Result<ResultSet, SqlError>>,

    pub trace: ValidationTrace,
}

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("{0}")]
    InputValidation(String),

    #[error("Security violation: {message}")]
    SecurityRejection { rule: String, message: String },

    #[error("database configuration error: {0}")]
    Configuration(String),

    #[error("database connection failed: {0}")]
    Connection(String),

    /// The schema or the reference query failed
    #[error("{engine} Error: {message}")]
    Setup {
        engine: &'static str,
        message: String,
    },

    #[error("{0}")]
    Query(String),

    #[error("query exceeded the statement timeout of {0}s")]
    Timeout(String),

    #[error("result exceeds {0} rows")]
    TooManyRows(usize),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SqlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SqlError::InputValidation(_) | SqlError::Setup { .. } => ErrorKind::InputValidation,
            SqlError::SecurityRejection { .. } => ErrorKind::SecurityRejection,
            SqlError::Configuration(_) | SqlError::Connection(_) => {
                ErrorKind::ToolchainConfiguration
            }
            SqlError::Query(_) | SqlError::TooManyRows(_) => ErrorKind::RuntimeError,
            SqlError::Timeout(_) => ErrorKind::Timeout,
            SqlError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Attribute a failure to the capsule's own schema or reference query
    fn in_setup(self, backend: IsolationBackend) -> SqlError {
        match self {
            SqlError::Query(message) => SqlError::Setup {
                engine: backend.engine_name(),
                message,
            },
            SqlError::Timeout(_) | SqlError::TooManyRows(_) => SqlError::Setup {
                engine: backend.engine_name(),
                message: self.to_string(),
            },
            other => other,
        }
    }
}

impl From<ConfigError> for SqlError {
    fn from(e: ConfigError) -> Self {
        SqlError::Configuration(e.to_string())
    }
}

impl From<Rejection> for SqlError {
    fn from(r: Rejection) -> Self {
        SqlError::SecurityRejection {
            rule: r.rule,
            message: r.message,
        }
    }
}

/// Canonical SQL capsule response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlCapsuleResponse {
    pub success: bool,

    pub validation_mode: IsolationBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_result: Option<Vec<Row>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<Vec<Row>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall time in milliseconds
    #[serde(rename = "executionTime")]
    pub execution_time: u64,

    #[serde(
        default,
        rename = "errorKind",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_kind: Option<ErrorKind>,

    /// Deny-list rule that rejected the candidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl SqlCapsuleResponse {
    fn failure(backend: IsolationBackend, error: &SqlError) -> Self {
        let rule = match error {
            SqlError::SecurityRejection { rule, .. } => Some(rule.clone()),
            _ => None,
        };
        let message = match error {
            SqlError::Configuration(_) => "Database connection is not configured".to_owned(),
            SqlError::Connection(_) => "Database connection failed".to_owned(),
            other => summarize(&other.to_string()),
        };
        Self {
            success: false,
            validation_mode: backend,
            user_result: None,
            expected_result: None,
            columns: None,
            error: Some(message),
            execution_time: 0,
            error_kind: Some(error.kind()),
            rule,
        }
    }
}

/// Validates capsules against the configured backends
#[derive(Debug, Clone, Default)]
pub struct SqlValidator {
    settings: SqlSettings,
}

impl SqlValidator {
    pub fn new(settings: SqlSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SqlSettings {
        &self.settings
    }

    /// Validate a capsule. Never fails: every error becomes a response.
    #[instrument(skip_all, fields(backend = %capsule.backend()))]
    pub async fn validate(&self, capsule: &SqlCapsule) -> SqlCapsuleResponse {
        let started = Instant::now();
        let backend = capsule.backend();

        let mut response = match self.try_validate(capsule).await {
            Ok(response) => response,
            Err(e) => {
                if matches!(
                    e,
                    SqlError::Configuration(_) | SqlError::Connection(_) | SqlError::Internal(_)
                ) {
                    error!(error = %e, "capsule validation failed");
                } else {
                    debug!(kind = ?e.kind(), "capsule rejected");
                }
                SqlCapsuleResponse::failure(backend, &e)
            }
        };
        response.execution_time = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        response
    }

    /// Run the whole validation, keeping failures typed
    pub async fn try_validate(&self, capsule: &SqlCapsule) -> Result<SqlCapsuleResponse, SqlError> {
        if capsule.schema_setup.iter().all(|s| s.trim().is_empty()) {
            return Err(SqlError::InputValidation(
                "No schema_setup provided".to_owned(),
            ));
        }
        let reference = capsule.reference_solution.trim();
        if reference.is_empty() {
            return Err(SqlError::InputValidation(
                "No reference_solution provided".to_owned(),
            ));
        }

        // The screen runs before any database scope exists
        let candidate = capsule.candidate();
        if let Some(query) = candidate {
            screen(query, &self.settings)?;
        }

        let backend = capsule.backend();
        let schema: Vec<String> = capsule
            .schema_setup
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();

        let execution = match backend {
            IsolationBackend::Ephemeral => {
                sqlite::run(schema, reference.to_owned(), candidate.map(str::to_owned), self.settings.clone())
                    .await?
            }
            IsolationBackend::TransactionalRollback => {
                let pg = self.settings.postgres()?;
                postgres::run(&schema, reference, candidate, &self.settings, &pg).await?
            }
        };

        let mut trace = execution.trace;
        let expected = execution.expected;
        let response = match execution.user {
            None => {
                trace.advance(ValidationState::Compared)?;
                SqlCapsuleResponse {
                    success: true,
                    validation_mode: backend,
                    user_result: None,
                    columns: Some(expected.columns),
                    expected_result: Some(expected.rows),
                    error: None,
                    execution_time: 0,
                    error_kind: None,
                    rule: None,
                }
            }
            Some(Err(e)) => {
                trace.fail();
                let message = match &e {
                    SqlError::Query(message) => format!("SQL Error: {message}"),
                    other => format!("SQL Error: {other}"),
                };
                SqlCapsuleResponse {
                    success: false,
                    validation_mode: backend,
                    user_result: None,
                    columns: Some(expected.columns),
                    expected_result: Some(expected.rows),
                    error: Some(summarize(&message)),
                    execution_time: 0,
                    error_kind: Some(e.kind()),
                    rule: None,
                }
            }
            Some(Ok(actual)) => {
                let comparison = compare(&expected, &actual);
                trace.advance(ValidationState::Compared)?;
                let error = comparison.mismatch_message();
                SqlCapsuleResponse {
                    success: comparison.is_equivalent(),
                    validation_mode: backend,
                    error_kind: error.as_ref().map(|_| ErrorKind::ValidationMismatch),
                    error,
                    user_result: Some(actual.rows),
                    columns: Some(actual.columns),
                    expected_result: Some(expected.rows),
                    execution_time: 0,
                    rule: None,
                }
            }
        };
        if trace.current() == ValidationState::Compared {
            trace.advance(ValidationState::Done)?;
        }
        debug!(states = ?trace.states(), success = response.success, "validation finished");

        Ok(response)
    }
}
