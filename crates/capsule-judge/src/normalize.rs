//! Result normalization
//!
//! Turns raw outcomes and pipeline errors into the one response shape callers
//! see. Messages are a single bounded line; only compiler diagnostics pass
//! through verbatim.

use crate::runner::JudgeError;
use crate::types::{ExecutionOutcome, JudgeResponse};

/// Longest `error` message returned to a caller
pub const MAX_MESSAGE_CHARS: usize = 200;

/// Exit code reported when the program never ran
pub const NOT_RUN_EXIT_CODE: i32 = -1;

const TOOLCHAIN_MESSAGE: &str = "Execution environment is not configured for this language";

/// Response for a program that ran (to completion, timeout or crash)
pub fn outcome_response(outcome: &ExecutionOutcome, warnings: Vec<String>) -> JudgeResponse {
    let error = JudgeError::from_outcome(outcome);
    JudgeResponse {
        success: error.is_none(),
        stdout: outcome.stdout.clone(),
        stderr: outcome.stderr.clone(),
        execution_time: outcome.wall_time_ms,
        memory_used: outcome.peak_memory_mb(),
        exit_code: outcome.exit_code,
        error: error.as_ref().map(|e| summarize(&e.to_string())),
        error_kind: error.as_ref().map(JudgeError::kind),
        warnings,
    }
}

/// Response for a request that failed before or instead of running
pub fn error_response(error: &JudgeError) -> JudgeResponse {
    let (message, stderr, exit_code) = match error {
        JudgeError::Compile {
            message,
            diagnostics,
            exit_code,
        } => (summarize(message), diagnostics.clone(), *exit_code),
        // Paths and program names stay in the logs
        JudgeError::ToolchainConfiguration(_) => {
            (TOOLCHAIN_MESSAGE.to_owned(), String::new(), NOT_RUN_EXIT_CODE)
        }
        other => (summarize(&other.to_string()), String::new(), NOT_RUN_EXIT_CODE),
    };

    JudgeResponse {
        success: false,
        stdout: String::new(),
        stderr,
        execution_time: 0,
        memory_used: 0,
        exit_code,
        error: Some(message),
        error_kind: Some(error.kind()),
        warnings: Vec::new(),
    }
}

/// First non-blank line, cut to [`MAX_MESSAGE_CHARS`]
pub fn summarize(message: &str) -> String {
    let line = message
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("Unknown error");
    if line.chars().count() <= MAX_MESSAGE_CHARS {
        return line.to_owned();
    }
    let mut cut: String = line.chars().take(MAX_MESSAGE_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, TerminationReason};

    #[test]
    fn clean_exit_is_success() {
        let outcome = ExecutionOutcome {
            stdout: "ok\n".to_owned(),
            wall_time_ms: 12,
            peak_memory_kb: Some(2048),
            ..Default::default()
        };
        let response = outcome_response(&outcome, Vec::new());
        assert!(response.success);
        assert_eq!(response.execution_time, 12);
        assert_eq!(response.memory_used, 2);
        assert!(response.error.is_none());
        assert!(response.error_kind.is_none());
    }

    #[test]
    fn timeout_keeps_partial_output() {
        let outcome = ExecutionOutcome {
            stdout: "partial".to_owned(),
            exit_code: 124,
            termination: TerminationReason::TimedOut,
            message: Some("Execution timed out after 2s".to_owned()),
            ..Default::default()
        };
        let response = outcome_response(&outcome, Vec::new());
        assert!(!response.success);
        assert_eq!(response.stdout, "partial");
        assert_eq!(response.exit_code, 124);
        assert_eq!(response.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(response.error.as_deref(), Some("Execution timed out after 2s"));
    }

    #[test]
    fn compile_diagnostics_are_verbatim() {
        let diagnostics = "Main.java:3: error: ';' expected\n    int x = 1\n             ^\n1 error\n";
        let response = error_response(&JudgeError::Compile {
            message: "Compilation failed".to_owned(),
            diagnostics: diagnostics.to_owned(),
            exit_code: 1,
        });
        assert!(response.stdout.is_empty());
        assert_eq!(response.stderr, diagnostics);
        assert_eq!(response.exit_code, 1);
        assert_eq!(response.error_kind, Some(ErrorKind::CompileError));
    }

    #[test]
    fn toolchain_details_are_not_leaked() {
        let response = error_response(&JudgeError::ToolchainConfiguration(
            "toolchain '/opt/secret/javac' not found".to_owned(),
        ));
        let message = response.error.unwrap();
        assert!(!message.contains("/opt/secret"));
        assert_eq!(response.exit_code, NOT_RUN_EXIT_CODE);
    }

    #[test]
    fn internal_errors_are_one_line() {
        let response = error_response(&JudgeError::Internal(
            "boom\n   at frame 1\n   at frame 2".to_owned(),
        ));
        assert_eq!(response.error.as_deref(), Some("internal error: boom"));
    }

    #[test]
    fn summarize_truncates_long_lines() {
        let long = "x".repeat(500);
        let summary = summarize(&long);
        assert_eq!(summary.chars().count(), MAX_MESSAGE_CHARS);
        assert!(summary.ends_with("..."));
        assert_eq!(summarize("\n\n  first  \nsecond"), "first");
        assert_eq!(summarize(""), "Unknown error");
    }
}
