//! Language adapters
//!
//! An adapter inspects submitted source, decides whether it already is a
//! runnable unit, and otherwise wraps bare statements in a generated
//! entrypoint. It also produces the compile and run invocations from the
//! language's command templates.

use std::path::Path;

use thiserror::Error;

use crate::config::{CommandContext, EntrypointKind, Language};

pub use crate::adapter::csharp::CsharpAdapter;
pub use crate::adapter::go::GoAdapter;
pub use crate::adapter::java::JavaAdapter;
pub use crate::adapter::passthrough::PassthroughAdapter;

mod csharp;
mod go;
mod java;
mod passthrough;

/// Comment placed in every generated entrypoint shell
pub const WRAPPER_MARKER: &str = "capsule-judge: generated entrypoint";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("no runnable entrypoint: {0}")]
    EntrypointNotFound(String),
}

/// Source turned into something the runner can compile and run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedProgram {
    /// File name the source is written to
    pub source_name: String,

    /// Source text, possibly wrapped
    pub source: String,

    /// Entry name substituted for `{main}`
    pub entry: String,

    /// Whether an entrypoint shell was generated
    pub wrapped: bool,

    /// Extra files written beside the source (name, content)
    pub support_files: Vec<(String, String)>,
}

impl PreparedProgram {
    /// A program that runs as submitted
    pub fn unmodified(source_name: impl Into<String>, source: &str, entry: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            source: source.to_owned(),
            entry: entry.into(),
            wrapped: false,
            support_files: Vec::new(),
        }
    }

    /// Placeholder values for this program's command templates
    pub fn command_context(
        &self,
        language: &Language,
        memory_mb: u64,
        workspace: &Path,
    ) -> CommandContext {
        let output = language
            .compile
            .as_ref()
            .map(|c| c.output_name.clone())
            .unwrap_or_default();
        CommandContext {
            source: self.source_name.clone(),
            output,
            main: self.entry.clone(),
            memory_mb,
            workspace: workspace.to_string_lossy().into_owned(),
        }
    }
}

/// Per-language preparation of submitted source
pub trait LanguageAdapter: Send + Sync {
    fn kind(&self) -> EntrypointKind;

    /// Detect or synthesize a runnable unit.
    ///
    /// Fails with [`AdapterError::EntrypointNotFound`] before anything is compiled.
    fn prepare(&self, source: &str, extension: &str) -> Result<PreparedProgram, AdapterError>;

    /// Expanded compile command, or `None` for interpreted languages
    fn compile_invocation(&self, language: &Language, ctx: &CommandContext) -> Option<Vec<String>> {
        language
            .compile
            .as_ref()
            .map(|compile| Language::expand_command(&compile.command, ctx))
    }

    /// Expanded run command
    fn run_invocation(&self, language: &Language, ctx: &CommandContext) -> Vec<String> {
        Language::expand_command(&language.run.command, ctx)
    }
}

static JAVA: JavaAdapter = JavaAdapter;
static GO: GoAdapter = GoAdapter;
static CSHARP: CsharpAdapter = CsharpAdapter;
static PASSTHROUGH: PassthroughAdapter = PassthroughAdapter;

/// The adapter for an entrypoint strategy
pub fn adapter_for(kind: EntrypointKind) -> &'static dyn LanguageAdapter {
    match kind {
        EntrypointKind::Java => &JAVA,
        EntrypointKind::Go => &GO,
        EntrypointKind::Csharp => &CSHARP,
        EntrypointKind::Passthrough => &PASSTHROUGH,
    }
}

/// Indent every non-blank line by `spaces`; blank lines are kept as they are
pub(crate) fn indent(code: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    code.lines()
        .map(|line| {
            if line.trim().is_empty() {
                line.to_owned()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split leading directive lines (imports, usings) from the statement body
pub(crate) fn hoist_lines(code: &str, is_directive: impl Fn(&str) -> bool) -> (Vec<String>, String) {
    let mut directives = Vec::new();
    let mut body = Vec::new();
    for line in code.lines() {
        if body.iter().all(|l: &&str| l.trim().is_empty()) && is_directive(line.trim()) {
            directives.push(line.trim().to_owned());
        } else {
            body.push(line);
        }
    }
    (directives, body.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indent_skips_blank_lines() {
        let code = "a;\n\n  b;";
        assert_eq!(indent(code, 4), "    a;\n\n      b;");
    }

    #[test]
    fn indent_is_deterministic_width() {
        for line in indent("x\ny\nz", 8).lines() {
            assert!(line.starts_with("        "));
            assert!(!line.starts_with("         "));
        }
    }

    #[test]
    fn hoist_only_leading_directives() {
        let code = "import java.util.*;\n\nint x = 1;\nimport_later();";
        let (directives, body) = hoist_lines(code, |l| l.starts_with("import "));
        assert_eq!(directives, vec!["import java.util.*;"]);
        assert_eq!(body, "\nint x = 1;\nimport_later();");
    }

    #[test]
    fn adapter_for_each_kind() {
        for kind in [
            EntrypointKind::Java,
            EntrypointKind::Go,
            EntrypointKind::Csharp,
            EntrypointKind::Passthrough,
        ] {
            assert_eq!(adapter_for(kind).kind(), kind);
        }
    }
}
