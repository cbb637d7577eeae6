use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Settings for the SQL capsule validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlSettings {
    /// Per-statement timeout in seconds
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout: f64,

    /// Result sets larger than this fail validation
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    /// Maximum candidate query length in bytes
    #[serde(default = "default_max_query_bytes")]
    pub max_query_bytes: usize,

    /// Maximum number of nested `SELECT`s in a candidate query
    #[serde(default = "default_max_subqueries")]
    pub max_subqueries: usize,

    /// Connection settings for the transactional backend
    #[serde(default)]
    pub postgres: Option<PostgresSettings>,
}

fn default_statement_timeout() -> f64 {
    30.0
}

fn default_max_rows() -> usize {
    1000
}

fn default_max_query_bytes() -> usize {
    10_000
}

fn default_max_subqueries() -> usize {
    5
}

impl SqlSettings {
    /// Never shorter than a millisecond; absurd values saturate
    pub fn statement_timeout(&self) -> Duration {
        let seconds = if self.statement_timeout.is_nan() {
            default_statement_timeout()
        } else {
            self.statement_timeout.max(0.001)
        };
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    /// Postgres settings from configuration, falling back to `DB_*` variables
    pub fn postgres(&self) -> Result<PostgresSettings, ConfigError> {
        match &self.postgres {
            Some(settings) => Ok(settings.clone()),
            None => PostgresSettings::from_env(),
        }
    }
}

impl Default for SqlSettings {
    fn default() -> Self {
        Self {
            statement_timeout: default_statement_timeout(),
            max_rows: default_max_rows(),
            max_query_bytes: default_max_query_bytes(),
            max_subqueries: default_max_subqueries(),
            postgres: None,
        }
    }
}

/// Credentials for the transactional rollback backend. TLS is always required.
#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresSettings {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_dbname")]
    pub dbname: String,

    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

fn default_port() -> u16 {
    5432
}

fn default_dbname() -> String {
    "postgres".to_owned()
}

fn default_connect_timeout() -> u64 {
    10
}

impl PostgresSettings {
    /// Read `DB_HOST`, `DB_NAME`, `DB_USER_RO`, `DB_PASS_RO` and `DB_PORT`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingCredential(key.to_owned()))
        };

        let port = match lookup("DB_PORT") {
            Some(port) => port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("DB_PORT '{port}' is not a port")))?,
            None => default_port(),
        };

        Ok(Self {
            host: required("DB_HOST")?,
            port,
            dbname: lookup("DB_NAME").unwrap_or_else(default_dbname),
            user: required("DB_USER_RO")?,
            password: lookup("DB_PASS_RO").unwrap_or_default(),
            connect_timeout: default_connect_timeout(),
        })
    }
}

impl std::fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn from_lookup_applies_defaults() {
        let settings =
            PostgresSettings::from_lookup(lookup(&[("DB_HOST", "db"), ("DB_USER_RO", "ro")]))
                .unwrap();
        assert_eq!(settings.host, "db");
        assert_eq!(settings.port, 5432);
        assert_eq!(settings.dbname, "postgres");
        assert_eq!(settings.connect_timeout, 10);
    }

    #[test]
    fn from_lookup_missing_host() {
        let result = PostgresSettings::from_lookup(lookup(&[("DB_USER_RO", "ro")]));
        assert!(matches!(result, Err(ConfigError::MissingCredential(k)) if k == "DB_HOST"));
    }

    #[test]
    fn from_lookup_bad_port() {
        let result = PostgresSettings::from_lookup(lookup(&[
            ("DB_HOST", "db"),
            ("DB_USER_RO", "ro"),
            ("DB_PORT", "abc"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn debug_redacts_password() {
        let settings = PostgresSettings::from_lookup(lookup(&[
            ("DB_HOST", "db"),
            ("DB_USER_RO", "ro"),
            ("DB_PASS_RO", "hunter2"),
        ]))
        .unwrap();
        let printed = format!("{settings:?}");
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn sql_settings_defaults() {
        let settings = SqlSettings::default();
        assert_eq!(settings.max_rows, 1000);
        assert_eq!(settings.max_query_bytes, 10_000);
        assert_eq!(settings.max_subqueries, 5);
        assert_eq!(settings.statement_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn statement_timeout_saturates_instead_of_panicking() {
        let timeout = |seconds: f64| {
            SqlSettings {
                statement_timeout: seconds,
                ..SqlSettings::default()
            }
            .statement_timeout()
        };
        assert_eq!(timeout(f64::INFINITY), Duration::MAX);
        assert_eq!(timeout(1e300), Duration::MAX);
        assert_eq!(timeout(f64::NAN), Duration::from_secs(30));
        assert_eq!(timeout(-5.0), Duration::from_millis(1));
    }
}
