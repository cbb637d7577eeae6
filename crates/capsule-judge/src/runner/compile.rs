//! Compilation step
//!
//! Runs the language's build command inside the call's workspace with the
//! compile ceiling, which is shorter than the run ceiling.

use tracing::{debug, instrument};

use crate::adapter::LanguageAdapter;
use crate::config::{CommandContext, Config, Language};
use crate::runner::CompileError;
use crate::sandbox::{SandboxCommand, Workspace, format_seconds, run_with_output};
use crate::types::{CompileOutcome, ExecutionOutcome, TerminationReason};

/// Result of a compilation
#[derive(Debug, Clone)]
pub struct CompileResult {
    pub outcome: CompileOutcome,

    /// The compiler process itself
    pub execution: ExecutionOutcome,
}

impl CompileResult {
    /// Check if compilation was successful
    pub fn is_success(&self) -> bool {
        self.outcome.success
    }
}

/// Compile the prepared source already written into `workspace`
#[instrument(skip_all, fields(language = %language.name))]
pub async fn compile(
    workspace: &Workspace,
    config: &Config,
    language: &Language,
    adapter: &dyn LanguageAdapter,
    ctx: &CommandContext,
) -> Result<CompileResult, CompileError> {
    let compile_config = language
        .compile
        .as_ref()
        .ok_or_else(|| CompileError::NotCompiled(language.name.clone()))?;
    let argv = adapter
        .compile_invocation(language, ctx)
        .ok_or_else(|| CompileError::NotCompiled(language.name.clone()))?;
    let limits = config.effective_compile_limits(compile_config);

    let command = SandboxCommand::new(workspace.path())
        .command(argv)
        .path(&compile_config.path)
        .envs(Language::expand_env(&compile_config.env, ctx))
        .limits(&limits);

    let (execution, mut diagnostics) = run_with_output(command).await?;

    if execution.termination == TerminationReason::TimedOut {
        debug!(wall_time_ms = execution.wall_time_ms, "compilation timed out");
        return Err(CompileError::Timeout {
            seconds: format_seconds(limits.wall_time()),
            partial: diagnostics,
        });
    }

    let success = execution.is_success();
    // A compiler killed by a signal may print nothing at all
    if !success
        && diagnostics.is_empty()
        && let Some(ref message) = execution.message
    {
        diagnostics = message.clone();
    }

    debug!(
        success,
        exit_code = execution.exit_code,
        wall_time_ms = execution.wall_time_ms,
        "compilation complete"
    );

    Ok(CompileResult {
        outcome: CompileOutcome {
            success,
            diagnostics: if success { String::new() } else { diagnostics },
            wall_time_ms: execution.wall_time_ms,
        },
        execution,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::adapter_for;
    use crate::adapter::PreparedProgram;

    fn shell_language(script: &str, time_limit: f64) -> Language {
        let toml = format!(
            r#"
            [languages.shc]
            name = "shell compiled"
            extension = "sh"

            [languages.shc.compile]
            command = ["sh", "-c", "{script}"]
            output_name = "out"

            [languages.shc.compile.limits]
            time_limit = {time_limit}

            [languages.shc.run]
            command = ["sh", "{{output}}"]
            "#
        );
        let config = Config::parse_toml(&toml).unwrap();
        config.get_language("shc").unwrap().clone()
    }

    async fn compile_script(script: &str, time_limit: f64) -> Result<CompileResult, CompileError> {
        let language = shell_language(script, time_limit);
        let config = Config::empty();
        let workspace = Workspace::create(None).unwrap();
        let prepared = PreparedProgram::unmodified("main.sh", "echo hi", "main");
        let ctx = prepared.command_context(&language, 64, workspace.path());
        let adapter = adapter_for(language.entrypoint);
        compile(&workspace, &config, &language, adapter, &ctx).await
    }

    #[tokio::test]
    async fn successful_compile_has_no_diagnostics() {
        let result = compile_script("echo building; touch out", 5.0).await.unwrap();
        assert!(result.is_success());
        assert!(result.outcome.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn failed_compile_keeps_combined_output() {
        let result = compile_script("echo to-stdout; echo to-stderr >&2; exit 2", 5.0)
            .await
            .unwrap();
        assert!(!result.is_success());
        assert_eq!(result.execution.exit_code, 2);
        assert_eq!(result.outcome.diagnostics, "to-stdout\nto-stderr\n");
    }

    #[tokio::test]
    async fn compile_timeout_is_an_error() {
        match compile_script("sleep 30", 1.0).await {
            Err(CompileError::Timeout { seconds, .. }) => assert_eq!(seconds, "1"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn interpreted_language_cannot_compile() {
        let config = Config::default();
        let language = config.get_language("python3").unwrap();
        let workspace = Workspace::create(None).unwrap();
        let prepared = PreparedProgram::unmodified("main.py", "print(1)", "main");
        let ctx = prepared.command_context(language, 64, workspace.path());
        let err = compile(&workspace, &config, language, adapter_for(language.entrypoint), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::NotCompiled(_)));
    }
}
