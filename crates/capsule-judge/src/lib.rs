//! A judge engine for untrusted code submissions and SQL capsules.
//!
//! Capsule Judge compiles and runs student programs in per-request
//! workspaces under wall-clock, memory and output limits, and validates SQL
//! exercises by comparing a candidate query against a reference solution in
//! an isolated database scope.
//!
//! # Features
//!
//! - **Multi-language** - Compiled, script and restricted-interpreter languages from TOML.
//! - **Entrypoint adaptation** - Java, Go and C# programs get a generated entrypoint when needed.
//! - **Restricted interpreter** - A WASI guest with a fixed host capability table.
//! - **SQL capsules** - Ephemeral SQLite or rolled-back PostgreSQL transactions.
//! - **Uniform responses** - Every request ends in a single JSON-shaped result.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Language, SqlSettings};
pub use interpreter::{CapabilityTable, InterpreterError, RestrictedInterpreter};
pub use runner::{
    CompileError, CompileResult, ExecuteError, HealthReport, JudgeError, LanguageHealth, Runner,
    Verdict,
};
pub use sql::{SqlCapsule, SqlCapsuleResponse, SqlError, SqlValidator};
pub use types::{
    ErrorKind, ExecutionOutcome, ExecutionRequest, JudgeResponse, ResourceLimits,
    TerminationReason,
};

pub mod adapter;
pub mod config;
pub mod interpreter;
pub mod normalize;
pub mod runner;
pub mod sandbox;
pub mod sql;
pub mod types;
