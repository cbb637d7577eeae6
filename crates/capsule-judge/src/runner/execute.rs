//! Execution step
//!
//! Runs a prepared program either as a child process in the call's workspace
//! or, for restricted languages, inside the in-process interpreter.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::adapter::LanguageAdapter;
use crate::config::{CommandContext, Language};
use crate::interpreter::{GuestCall, RestrictedInterpreter};
use crate::runner::ExecuteError;
use crate::sandbox::{SandboxCommand, Workspace, run};
use crate::types::{ExecutionOutcome, ResourceLimits};

/// Run a compiled artifact or a script as a child process
#[instrument(skip_all, fields(language = %language.name))]
pub async fn execute(
    workspace: &Workspace,
    language: &Language,
    adapter: &dyn LanguageAdapter,
    ctx: &CommandContext,
    limits: &ResourceLimits,
    stdin: &[u8],
) -> Result<ExecutionOutcome, ExecuteError> {
    // The artifact name may itself be a template, like "{main}.class"
    let artifact = if language.is_compiled() {
        ctx.expand(&ctx.output)
    } else {
        ctx.source.clone()
    };
    if !workspace.file_exists(&artifact).await? {
        return Err(ExecuteError::NotStarted(format!(
            "'{artifact}' not found in workspace"
        )));
    }

    let argv = adapter.run_invocation(language, ctx);
    debug!(?argv, "executing program");

    let command = SandboxCommand::new(workspace.path())
        .command(argv)
        .path(&language.run.path)
        .envs(Language::expand_env(&language.run.env, ctx))
        .stdin(stdin)
        .limits(limits);

    let mut outcome = run(command).await?;
    outcome.memory_enforced = language.enforces_memory();
    if !outcome.memory_enforced {
        debug!(memory_mb = ctx.memory_mb, "memory ceiling is advisory for this language");
    }

    Ok(outcome)
}

/// Evaluate a script in the restricted interpreter
///
/// The host workspace holding the source is pre-opened at the interpreter's
/// guest workspace path; `ctx` must already use guest paths.
#[instrument(skip_all, fields(language = %language.name))]
pub async fn execute_restricted(
    interpreter: Arc<RestrictedInterpreter>,
    workspace: &Workspace,
    language: &Language,
    adapter: &dyn LanguageAdapter,
    ctx: &CommandContext,
    limits: &ResourceLimits,
    stdin: &[u8],
) -> Result<ExecutionOutcome, ExecuteError> {
    let call = GuestCall {
        argv: adapter.run_invocation(language, ctx),
        env: Language::expand_env(&language.run.env, ctx),
        stdin: stdin.to_vec(),
        workspace: workspace.path().to_path_buf(),
        time_limit: limits.wall_time(),
        memory_limit_bytes: usize::try_from(limits.memory_mb() * ResourceLimits::MB)
            .unwrap_or(usize::MAX),
        max_output: limits.output_cap(),
    };
    debug!(argv = ?call.argv, "evaluating in restricted interpreter");

    let outcome = tokio::task::spawn_blocking(move || interpreter.evaluate(call))
        .await
        .map_err(|e| {
            warn!(error = %e, "interpreter task failed");
            ExecuteError::Join(e.to_string())
        })??;

    Ok(outcome)
}
