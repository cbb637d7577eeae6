use once_cell::sync::Lazy;
use regex::Regex;

use crate::adapter::{
    AdapterError, LanguageAdapter, PreparedProgram, WRAPPER_MARKER, hoist_lines, indent,
};
use crate::config::EntrypointKind;

static MAIN_FUNC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*func\s+main\s*\(\s*\)").expect("valid regex"));

static PACKAGE_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*package\s+([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));

static SINGLE_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^import\s+"([^"]+)"$"#).expect("valid regex"));

/// Standard packages a wrapped snippet may use without importing them
const INFERRED_PACKAGES: [&str; 7] = ["bufio", "fmt", "math", "os", "sort", "strconv", "strings"];

#[derive(Debug, Default)]
pub struct GoAdapter;

impl LanguageAdapter for GoAdapter {
    fn kind(&self) -> EntrypointKind {
        EntrypointKind::Go
    }

    fn prepare(&self, source: &str, _extension: &str) -> Result<PreparedProgram, AdapterError> {
        let package = PACKAGE_CLAUSE
            .captures(source)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str());

        if MAIN_FUNC.is_match(source) {
            return match package {
                Some("main") => Ok(PreparedProgram::unmodified("main.go", source, "main")),
                Some(other) => Err(AdapterError::EntrypointNotFound(format!(
                    "package {other} cannot be run, use package main"
                ))),
                // The package clause is required by the language, not a wrapper
                None => Ok(PreparedProgram::unmodified(
                    "main.go",
                    &format!("package main\n\n{source}"),
                    "main",
                )),
            };
        }

        if let Some(package) = package {
            return Err(AdapterError::EntrypointNotFound(format!(
                "package {package} has no func main()"
            )));
        }

        Ok(wrap(source))
    }
}

fn wrap(source: &str) -> PreparedProgram {
    let (imports, body) = hoist_lines(source, |line| SINGLE_IMPORT.is_match(line));

    let mut packages: Vec<String> = imports
        .iter()
        .filter_map(|line| SINGLE_IMPORT.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_owned()))
        .collect();
    for package in INFERRED_PACKAGES {
        if uses_package(&body, package) {
            packages.push(package.to_owned());
        }
    }
    packages.sort();
    packages.dedup();

    let mut wrapped = format!("package main\n\n// {WRAPPER_MARKER}\n\n");
    if !packages.is_empty() {
        wrapped.push_str("import (\n");
        for package in &packages {
            wrapped.push_str(&format!("    \"{package}\"\n"));
        }
        wrapped.push_str(")\n\n");
    }
    wrapped.push_str(&format!("func main() {{\n{}\n}}\n", indent(&body, 4)));

    PreparedProgram {
        source_name: "main.go".to_owned(),
        source: wrapped,
        entry: "main".to_owned(),
        wrapped: true,
        support_files: Vec::new(),
    }
}

/// Whether `body` references `package.` as a qualified identifier
fn uses_package(body: &str, package: &str) -> bool {
    let needle = format!("{package}.");
    body.match_indices(&needle).any(|(at, _)| {
        body[..at]
            .chars()
            .next_back()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_' || c == '.'))
    })
}
