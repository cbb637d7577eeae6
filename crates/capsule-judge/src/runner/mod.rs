//! Judge pipeline
//!
//! Ties the pieces together for one request: validate, prepare the source,
//! compile if needed, execute or evaluate, then normalize the outcome.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

pub use crate::runner::compile::{CompileResult, compile};
pub use crate::runner::execute::{execute, execute_restricted};

mod compile;
mod execute;

use crate::adapter::{AdapterError, PreparedProgram, adapter_for};
use crate::config::{CommandContext, Config, ConfigError, ExecutionMode, Language};
use crate::interpreter::{CapabilityTable, InterpreterError, RestrictedInterpreter};
use crate::normalize;
use crate::sandbox::{SandboxError, Workspace, find_in_path};
use crate::types::{
    ErrorKind, ExecutionOutcome, ExecutionRequest, JudgeResponse, ResourceLimits,
    TerminationReason,
};

/// Errors that occur during compilation
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compilation timed out after {seconds}s")]
    Timeout { seconds: String, partial: String },

    #[error("language '{0}' does not support compilation")]
    NotCompiled(String),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Errors that occur during execution
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("execution not started: {0}")]
    NotStarted(String),

    #[error("no interpreter configured for language '{0}'")]
    NoInterpreter(String),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("interpreter error: {0}")]
    Interpreter(#[from] InterpreterError),

    #[error("interpreter task failed: {0}")]
    Join(String),
}

/// Every way a judge request can fail, by failure class
#[derive(Debug, Error)]
pub enum JudgeError {
    /// Empty or oversized submission, or unknown language
    #[error("{0}")]
    InputValidation(String),

    /// Missing compiler, interpreter or credentials. The detail is logged, not returned.
    #[error("toolchain configuration error: {0}")]
    ToolchainConfiguration(String),

    #[error("{0}")]
    EntrypointNotFound(String),

    /// Toolchain diagnostics, surfaced verbatim
    #[error("{message}")]
    Compile {
        message: String,
        diagnostics: String,
        exit_code: i32,
    },

    #[error("{0}")]
    Timeout(String),

    /// The program ran and exited non-zero
    #[error("{0}")]
    Runtime(String),

    #[error("{0}")]
    Crashed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl JudgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JudgeError::InputValidation(_) => ErrorKind::InputValidation,
            JudgeError::ToolchainConfiguration(_) => ErrorKind::ToolchainConfiguration,
            JudgeError::EntrypointNotFound(_) => ErrorKind::EntrypointNotFound,
            JudgeError::Compile { .. } => ErrorKind::CompileError,
            JudgeError::Timeout(_) => ErrorKind::Timeout,
            JudgeError::Runtime(_) => ErrorKind::RuntimeError,
            JudgeError::Crashed(_) => ErrorKind::Crashed,
            JudgeError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Classify a finished run; `None` for a clean exit
    pub fn from_outcome(outcome: &ExecutionOutcome) -> Option<JudgeError> {
        match outcome.termination {
            TerminationReason::Completed if outcome.exit_code == 0 => None,
            TerminationReason::Completed => Some(JudgeError::Runtime(format!(
                "Process exited with code {}",
                outcome.exit_code
            ))),
            TerminationReason::TimedOut => Some(JudgeError::Timeout(
                outcome
                    .message
                    .clone()
                    .unwrap_or_else(|| "Execution timed out".to_owned()),
            )),
            TerminationReason::Crashed => Some(JudgeError::Crashed(
                outcome
                    .message
                    .clone()
                    .unwrap_or_else(|| "Process crashed".to_owned()),
            )),
        }
    }
}

impl From<AdapterError> for JudgeError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::EntrypointNotFound(detail) => {
                JudgeError::EntrypointNotFound(format!("No runnable entrypoint: {detail}"))
            }
        }
    }
}

impl From<SandboxError> for JudgeError {
    fn from(e: SandboxError) -> Self {
        match e {
            SandboxError::ToolchainNotFound(_) => JudgeError::ToolchainConfiguration(e.to_string()),
            other => JudgeError::Internal(other.to_string()),
        }
    }
}

impl From<InterpreterError> for JudgeError {
    fn from(e: InterpreterError) -> Self {
        match e {
            InterpreterError::ModuleLoad { .. }
            | InterpreterError::ForbiddenImport { .. }
            | InterpreterError::MissingStart => JudgeError::ToolchainConfiguration(e.to_string()),
            InterpreterError::Setup(_) | InterpreterError::Join(_) => {
                JudgeError::Internal(e.to_string())
            }
        }
    }
}

impl From<CompileError> for JudgeError {
    fn from(e: CompileError) -> Self {
        match e {
            CompileError::Timeout { seconds, partial } => JudgeError::Compile {
                message: format!("Compilation timed out after {seconds}s"),
                diagnostics: partial,
                exit_code: crate::types::TIMEOUT_EXIT_CODE,
            },
            CompileError::NotCompiled(language) => {
                JudgeError::Internal(format!("language '{language}' has no compile step"))
            }
            CompileError::Sandbox(e) => e.into(),
        }
    }
}

impl From<ExecuteError> for JudgeError {
    fn from(e: ExecuteError) -> Self {
        match e {
            ExecuteError::NoInterpreter(_) => JudgeError::ToolchainConfiguration(e.to_string()),
            ExecuteError::Sandbox(e) => e.into(),
            ExecuteError::Interpreter(e) => e.into(),
            ExecuteError::NotStarted(_) | ExecuteError::Join(_) => {
                JudgeError::Internal(e.to_string())
            }
        }
    }
}

/// A finished run plus anything the caller should be told about it
#[derive(Debug, Clone)]
pub struct Verdict {
    pub outcome: ExecutionOutcome,
    pub warnings: Vec<String>,
}

/// Reachability of one configured language
#[derive(Debug, Clone, Serialize)]
pub struct LanguageHealth {
    pub id: String,
    pub name: String,
    pub mode: ExecutionMode,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<String>,
}

/// Service health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub service: &'static str,
    pub version: &'static str,
    pub languages: Vec<LanguageHealth>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.languages.iter().all(|l| l.available)
    }
}

/// High-level runner for judge requests
#[derive(Debug, Clone)]
pub struct Runner {
    config: Arc<Config>,
    capabilities: Arc<CapabilityTable>,
    interpreters: HashMap<String, Arc<RestrictedInterpreter>>,
}

impl Runner {
    /// Create a runner; restricted interpreters are set up here, once
    pub fn new(config: Config) -> Self {
        let capabilities = Arc::new(CapabilityTable::standard());
        let mut interpreters = HashMap::new();
        for (id, language) in &config.languages {
            let Some(ref interpreter) = language.interpreter else {
                continue;
            };
            if !language.is_restricted() {
                continue;
            }
            match RestrictedInterpreter::new(interpreter.clone(), Arc::clone(&capabilities)) {
                Ok(interp) => {
                    interpreters.insert(id.clone(), Arc::new(interp));
                }
                Err(e) => error!(language = %id, error = %e, "failed to set up interpreter"),
            }
        }

        Self {
            config: Arc::new(config),
            capabilities,
            interpreters,
        }
    }

    /// Create a runner with the embedded default configuration
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The capability table shared by every restricted evaluation
    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Judge one request. Never fails: every error becomes a response.
    #[instrument(skip_all, fields(language = %request.language))]
    pub async fn judge(&self, request: &ExecutionRequest) -> JudgeResponse {
        match self.try_judge(request).await {
            Ok(verdict) => normalize::outcome_response(&verdict.outcome, verdict.warnings),
            Err(e) => {
                if matches!(
                    e,
                    JudgeError::ToolchainConfiguration(_) | JudgeError::Internal(_)
                ) {
                    error!(error = %e, "judge request failed");
                } else {
                    debug!(kind = ?e.kind(), "judge request rejected");
                }
                normalize::error_response(&e)
            }
        }
    }

    /// Run the whole pipeline, keeping failures typed
    pub async fn try_judge(&self, request: &ExecutionRequest) -> Result<Verdict, JudgeError> {
        self.validate(request)?;
        let language = self.config.get_language(&request.language).map_err(|e| match e {
            ConfigError::LanguageNotFound(id) => {
                JudgeError::InputValidation(format!("Unsupported language: {id}"))
            }
            other => JudgeError::Internal(other.to_string()),
        })?;
        let limits = self.config.effective_limits(language, Some(&request.limits()));
        let adapter = adapter_for(language.entrypoint);

        // Entrypoint detection runs before any workspace or process exists
        let prepared = adapter.prepare(&request.code, language.extension.as_str())?;
        debug!(
            source_name = %prepared.source_name,
            wrapped = prepared.wrapped,
            "source prepared"
        );

        let mut warnings = Vec::new();
        if !language.is_restricted() && !language.enforces_memory() {
            warn!(
                language = %language.name,
                memory_mb = limits.memory_mb(),
                "memory ceiling is advisory"
            );
            warnings.push(format!(
                "Memory limit of {} MB is advisory for {}",
                limits.memory_mb(),
                language.name
            ));
        }

        let workspace = Workspace::create(self.config.workspace_root.as_deref())?;
        write_program(&workspace, &prepared).await?;
        let stdin = request.test_input.as_deref().unwrap_or_default().as_bytes();

        let outcome = if language.is_restricted() {
            self.evaluate(&request.language, &workspace, language, &prepared, &limits, stdin)
                .await?
        } else {
            let ctx = prepared.command_context(language, limits.memory_mb(), workspace.path());
            if language.is_compiled() {
                let result = self.compile(&workspace, language, &ctx).await?;
                if !result.is_success() {
                    return Err(JudgeError::Compile {
                        message: "Compilation failed".to_owned(),
                        diagnostics: result.outcome.diagnostics,
                        exit_code: result.execution.exit_code,
                    });
                }
            }
            self.run(&workspace, language, &ctx, &limits, stdin).await?
        };

        if outcome.stdout_truncated || outcome.stderr_truncated {
            warnings.push(format!(
                "Output truncated at {} bytes per stream",
                limits.output_cap()
            ));
        }

        if let Err(e) = workspace.close() {
            warn!(error = %e, "failed to remove workspace");
        }

        Ok(Verdict { outcome, warnings })
    }

    fn validate(&self, request: &ExecutionRequest) -> Result<(), JudgeError> {
        if request.code.trim().is_empty() {
            return Err(JudgeError::InputValidation("No code provided".to_owned()));
        }
        let max = self.config.ceilings.max_source_bytes;
        if request.code.len() > max {
            return Err(JudgeError::InputValidation(format!(
                "Code too large (max {}KB)",
                max / 1000
            )));
        }
        Ok(())
    }

    /// Compile a prepared program already written into `workspace`
    pub async fn compile(
        &self,
        workspace: &Workspace,
        language: &Language,
        ctx: &CommandContext,
    ) -> Result<CompileResult, CompileError> {
        compile::compile(
            workspace,
            &self.config,
            language,
            adapter_for(language.entrypoint),
            ctx,
        )
        .await
    }

    /// Run a compiled artifact or script as a child process
    pub async fn run(
        &self,
        workspace: &Workspace,
        language: &Language,
        ctx: &CommandContext,
        limits: &ResourceLimits,
        stdin: &[u8],
    ) -> Result<ExecutionOutcome, ExecuteError> {
        execute::execute(
            workspace,
            language,
            adapter_for(language.entrypoint),
            ctx,
            limits,
            stdin,
        )
        .await
    }

    /// Evaluate a script in the language's restricted interpreter
    pub async fn evaluate(
        &self,
        id: &str,
        workspace: &Workspace,
        language: &Language,
        prepared: &PreparedProgram,
        limits: &ResourceLimits,
        stdin: &[u8],
    ) -> Result<ExecutionOutcome, ExecuteError> {
        let interpreter = self
            .interpreters
            .get(id)
            .cloned()
            .ok_or_else(|| ExecuteError::NoInterpreter(id.to_owned()))?;

        // The guest sees the workspace at its own mount point
        let guest = interpreter.guest_workspace().trim_end_matches('/').to_owned();
        let ctx = CommandContext {
            source: format!("{guest}/{}", prepared.source_name),
            output: String::new(),
            main: prepared.entry.clone(),
            memory_mb: limits.memory_mb(),
            workspace: guest,
        };

        execute::execute_restricted(
            interpreter,
            workspace,
            language,
            adapter_for(language.entrypoint),
            &ctx,
            limits,
            stdin,
        )
        .await
    }

    /// Report, per configured language, whether its toolchain is reachable
    pub fn health(&self) -> HealthReport {
        let mut languages: Vec<LanguageHealth> = self
            .config
            .languages
            .iter()
            .map(|(id, language)| {
                let missing = match language.mode {
                    ExecutionMode::Restricted => match self.interpreters.get(id) {
                        Some(interp) if interp.is_available() => None,
                        Some(interp) => Some(interp.module_path().display().to_string()),
                        None => Some("interpreter".to_owned()),
                    },
                    ExecutionMode::Process => missing_toolchain(language),
                };
                LanguageHealth {
                    id: id.clone(),
                    name: language.name.clone(),
                    mode: language.mode,
                    available: missing.is_none(),
                    missing,
                }
            })
            .collect();
        languages.sort_by(|a, b| a.id.cmp(&b.id));

        HealthReport {
            service: "capsule-judge",
            version: env!("CARGO_PKG_VERSION"),
            languages,
        }
    }
}

/// First toolchain program of a process-mode language that cannot be found
fn missing_toolchain(language: &Language) -> Option<String> {
    let compile = language
        .compile
        .as_ref()
        .and_then(|c| Some((c.command.first()?, c.path.as_str())));
    let run = language
        .run
        .command
        .first()
        .map(|program| (program, language.run.path.as_str()));

    compile
        .into_iter()
        .chain(run)
        // Artifacts like ./{binary} only exist after compiling
        .filter(|(program, _)| !program.contains('/') && !program.contains('{'))
        .find(|(program, path)| find_in_path(program, path).is_none())
        .map(|(program, _)| program.clone())
}

async fn write_program(workspace: &Workspace, prepared: &PreparedProgram) -> Result<(), JudgeError> {
    workspace
        .write_file(&prepared.source_name, prepared.source.as_bytes())
        .await?;
    for (name, content) in &prepared.support_files {
        workspace.write_file(name, content.as_bytes()).await?;
    }
    Ok(())
}
