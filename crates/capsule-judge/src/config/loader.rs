//! Configuration loading
//!
//! Files are TOML, read through the config crate and layered with
//! `CAPSULE_JUDGE__*` environment overrides.

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError, ENV_PREFIX, ExecutionMode};

impl Config {
    /// Load configuration from a file, applying environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .add_source(env_source())
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load the embedded example configuration, applying environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(super::EXAMPLE_CONFIG, FileFormat::Toml))
            .add_source(env_source())
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else the embedded example
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ceilings.max_time_limit < 1.0 {
            return Err(ConfigError::Invalid(
                "ceilings.max_time_limit must be at least 1 second".to_owned(),
            ));
        }
        if self.ceilings.max_memory_limit == 0 {
            return Err(ConfigError::Invalid(
                "ceilings.max_memory_limit must be positive".to_owned(),
            ));
        }
        let statement_timeout = self.sql.statement_timeout;
        if !statement_timeout.is_finite() || statement_timeout <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "sql.statement_timeout must be a positive number of seconds, got {statement_timeout}"
            )));
        }

        for (id, lang) in &self.languages {
            if lang.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty name"
                )));
            }
            if lang.extension.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty extension"
                )));
            }
            if lang.run.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty run command"
                )));
            }
            if let Some(ref compile) = lang.compile
                && compile.command.is_empty()
            {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty compile command"
                )));
            }
            if lang.mode == ExecutionMode::Restricted {
                if lang.interpreter.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "restricted language '{id}' has no interpreter module"
                    )));
                }
                if lang.compile.is_some() {
                    return Err(ConfigError::Invalid(format!(
                        "restricted language '{id}' cannot have a compile step"
                    )));
                }
            }
        }

        Ok(())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
