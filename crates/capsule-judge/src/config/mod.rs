use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{
    CommandContext, CompileConfig, DEFAULT_SANDBOX_PATH, EntrypointKind, ExecutionMode,
    FileExtension, InterpreterConfig, Language, LibraryDir, RunConfig,
};
pub use crate::config::sql::{PostgresSettings, SqlSettings};
use crate::types::{Ceilings, ResourceLimits};

pub mod language;
mod loader;
pub mod sql;

/// Example configuration embedded at compile time.
///
/// Also the configuration used when no file is given.
pub const EXAMPLE_CONFIG: &str = include_str!("../../capsule-judge.example.toml");

/// Prefix for environment variable overrides, e.g. `CAPSULE_JUDGE__SQL__MAX_ROWS`
pub const ENV_PREFIX: &str = "CAPSULE_JUDGE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("missing database credential {0}")]
    MissingCredential(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Judge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory in which per-call workspaces are created (system temp dir if unset)
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Default resource limits applied to all executions.
    /// Request values override these, then everything is clamped to `ceilings`.
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Base limits for compilation steps
    #[serde(default = "default_compile_limits")]
    pub compile_limits: ResourceLimits,

    /// Upper bounds no request can exceed
    #[serde(default)]
    pub ceilings: Ceilings,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, Language>,

    /// SQL capsule validator settings
    #[serde(default)]
    pub sql: SqlSettings,
}

fn default_compile_limits() -> ResourceLimits {
    ResourceLimits::unset()
        .with_time_limit(10.0)
        .with_max_output(ResourceLimits::MB)
}

impl Config {
    /// Create a new config with the embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            workspace_root: None,
            default_limits: ResourceLimits::default(),
            compile_limits: default_compile_limits(),
            ceilings: Ceilings::default(),
            languages: HashMap::new(),
            sql: SqlSettings::default(),
        }
    }

    /// Get a language by ID
    pub fn get_language(&self, id: &str) -> Result<&Language, ConfigError> {
        self.languages
            .get(id)
            .ok_or_else(|| ConfigError::LanguageNotFound(id.to_string()))
    }

    /// Limits for a run: defaults, then language overrides, then the request, clamped
    pub fn effective_limits(
        &self,
        language: &Language,
        overrides: Option<&ResourceLimits>,
    ) -> ResourceLimits {
        let mut limits = self.default_limits.clone();
        if let Some(ref lang_limits) = language.run.limits {
            limits = limits.with_overrides(lang_limits);
        }
        if let Some(overrides) = overrides {
            limits = limits.with_overrides(overrides);
        }
        limits.clamped(&self.ceilings)
    }

    /// Limits for a compilation step
    pub fn effective_compile_limits(&self, compile: &CompileConfig) -> ResourceLimits {
        match compile.limits {
            Some(ref limits) => self.compile_limits.with_overrides(limits),
            None => self.compile_limits.clone(),
        }
        .clamped(&self.ceilings)
    }
}

impl Default for Config {
    fn default() -> Self {
        // The embedded file is covered by tests; fall back to an empty config
        // rather than panicking if it ever stops parsing.
        Self::parse_toml(EXAMPLE_CONFIG).unwrap_or_else(|e| {
            tracing::error!(error = %e, "embedded example config is invalid");
            Self::empty()
        })
    }
}
