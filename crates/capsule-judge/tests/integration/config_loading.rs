use std::io::Write;

use capsule_judge::config::{Config, EntrypointKind, ExecutionMode};
use capsule_judge::EXAMPLE_CONFIG;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

#[test]
fn test_load_example_config() {
    let file = write_config(EXAMPLE_CONFIG);
    let config = Config::from_file(file.path()).expect("Failed to load config");

    assert_eq!(config.languages["java"].entrypoint, EntrypointKind::Java);
    assert_eq!(config.languages["go"].entrypoint, EntrypointKind::Go);
    assert_eq!(config.languages["csharp"].entrypoint, EntrypointKind::Csharp);
    assert_eq!(
        config.languages["python3-wasi"].mode,
        ExecutionMode::Restricted
    );
    assert_eq!(config.default_limits.time_limit, Some(10.0));
    assert_eq!(config.default_limits.memory_limit, Some(128));
    assert_eq!(config.ceilings.max_source_bytes, 50_000);
}

#[test]
fn test_load_minimal_config() {
    let file = write_config(
        r#"
[languages.sh]
name = "Shell"
extension = "sh"

[languages.sh.run]
command = ["/bin/sh", "{source}"]
"#,
    );
    let config = Config::from_file(file.path()).expect("Failed to load config");

    assert_eq!(config.languages.len(), 1);
    assert_eq!(config.sql.max_rows, 1000);
    assert_eq!(config.sql.max_subqueries, 5);
}

#[test]
fn test_load_invalid_empty_name() {
    let file = write_config(
        r#"
[languages.sh]
name = ""
extension = "sh"

[languages.sh.run]
command = ["/bin/sh", "{source}"]
"#,
    );
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_load_invalid_extension() {
    let file = write_config(
        r#"
[languages.sh]
name = "Shell"
extension = "tar.gz"

[languages.sh.run]
command = ["/bin/sh", "{source}"]
"#,
    );
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_load_restricted_without_interpreter() {
    let file = write_config(
        r#"
[languages.py]
name = "Python"
extension = "py"
mode = "restricted"

[languages.py.run]
command = ["python", "{source}"]
"#,
    );
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("no interpreter module"));
}

#[test]
fn test_load_missing_file() {
    assert!(Config::from_file("/nonexistent/capsule-judge.toml").is_err());
}
