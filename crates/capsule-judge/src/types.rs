use serde::{Deserialize, Serialize};

/// Exit code reported for a run that was killed by the watchdog.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall clock time limit in seconds
    #[serde(default)]
    pub time_limit: Option<f64>,

    /// Memory limit in megabytes
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Maximum captured bytes per output stream
    #[serde(default)]
    pub max_output: Option<u64>,
}

impl ResourceLimits {
    /// 1 kilobyte in bytes
    pub const KB: u64 = 1024;
    /// 1 megabyte in bytes
    pub const MB: u64 = 1024 * 1024;

    /// Create new resource limits with the built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource limits with every field unset, for use as an override layer
    pub fn unset() -> Self {
        Self {
            time_limit: None,
            memory_limit: None,
            max_output: None,
        }
    }

    /// Set the wall clock time limit in seconds
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    /// Set the memory limit in megabytes
    pub fn with_memory_limit(mut self, mb: u64) -> Self {
        self.memory_limit = Some(mb);
        self
    }

    /// Set the maximum captured bytes per output stream
    pub fn with_max_output(mut self, bytes: u64) -> Self {
        self.max_output = Some(bytes);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    ///
    /// Returns a new ResourceLimits with values from `overrides` taking precedence
    /// over values from `self` when both are present.
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            time_limit: overrides.time_limit.or(self.time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            max_output: overrides.max_output.or(self.max_output),
        }
    }

    /// Clamp time and memory into `[1, ceiling]`.
    ///
    /// Values above the ceiling are capped, never rejected. Unset values stay unset.
    pub fn clamped(&self, ceilings: &Ceilings) -> ResourceLimits {
        ResourceLimits {
            time_limit: self
                .time_limit
                .map(|t| clamp_seconds(t, ceilings.max_time_limit)),
            memory_limit: self
                .memory_limit
                .map(|m| m.clamp(1, ceilings.max_memory_limit.max(1))),
            max_output: self.max_output,
        }
    }

    /// Wall time limit as a duration, falling back to the default
    pub fn wall_time(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.time_limit.unwrap_or(DEFAULT_TIME_LIMIT))
    }

    /// Memory limit in megabytes, falling back to the default
    pub fn memory_mb(&self) -> u64 {
        self.memory_limit.unwrap_or(DEFAULT_MEMORY_LIMIT)
    }

    /// Output cap in bytes, falling back to the default
    pub fn output_cap(&self) -> usize {
        usize::try_from(self.max_output.unwrap_or(DEFAULT_MAX_OUTPUT)).unwrap_or(usize::MAX)
    }
}

const DEFAULT_TIME_LIMIT: f64 = 10.0;
const DEFAULT_MEMORY_LIMIT: u64 = 128;
const DEFAULT_MAX_OUTPUT: u64 = ResourceLimits::MB;

fn clamp_seconds(value: f64, ceiling: f64) -> f64 {
    let ceiling = ceiling.max(1.0);
    if value.is_nan() {
        return ceiling;
    }
    value.clamp(1.0, ceiling)
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit: Some(DEFAULT_TIME_LIMIT),
            memory_limit: Some(DEFAULT_MEMORY_LIMIT),
            max_output: Some(DEFAULT_MAX_OUTPUT),
        }
    }
}

/// Server-side upper bounds applied to every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ceilings {
    /// Maximum wall time in seconds
    #[serde(default = "default_max_time_limit")]
    pub max_time_limit: f64,

    /// Maximum memory in megabytes
    #[serde(default = "default_max_memory_limit")]
    pub max_memory_limit: u64,

    /// Maximum accepted source size in bytes
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
}

fn default_max_time_limit() -> f64 {
    30.0
}

fn default_max_memory_limit() -> u64 {
    512
}

fn default_max_source_bytes() -> usize {
    50_000
}

impl Default for Ceilings {
    fn default() -> Self {
        Self {
            max_time_limit: default_max_time_limit(),
            max_memory_limit: default_max_memory_limit(),
            max_source_bytes: default_max_source_bytes(),
        }
    }
}

/// A single judge request in canonical form
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Language ID from the configuration (e.g. "java", "go")
    #[serde(default)]
    pub language: String,

    /// Submitted source text
    #[serde(alias = "source_code")]
    pub code: String,

    /// Payload fed to the program's standard input
    #[serde(default, alias = "input")]
    pub test_input: Option<String>,

    /// Requested wall time in seconds
    #[serde(default, alias = "time_limit")]
    pub timeout: Option<f64>,

    /// Requested memory in megabytes
    #[serde(default, rename = "memoryLimitMB", alias = "memory_limit")]
    pub memory_limit_mb: Option<u64>,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            test_input: None,
            timeout: None,
            memory_limit_mb: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.test_input = Some(input.into());
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_memory_limit(mut self, mb: u64) -> Self {
        self.memory_limit_mb = Some(mb);
        self
    }

    /// The requested limits as an override layer
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            time_limit: self.timeout,
            memory_limit: self.memory_limit_mb,
            max_output: None,
        }
    }
}

/// Result of a compilation step
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    /// Whether compilation succeeded
    pub success: bool,

    /// Combined toolchain output. Empty iff `success`.
    pub diagnostics: String,

    /// Wall time spent compiling in milliseconds
    pub wall_time_ms: u64,
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The program exited on its own, with any exit code
    Completed,

    /// The wall clock ceiling expired and the program was killed
    TimedOut,

    /// Signal death, out-of-memory kill or launch failure
    Crashed,
}

/// Result of an execution
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Captured standard output, bounded by the output cap
    pub stdout: String,

    /// Captured standard error, bounded by the output cap
    pub stderr: String,

    /// Exit code (124 on timeout, 128 + signal on signal death)
    pub exit_code: i32,

    /// Wall clock time in milliseconds
    pub wall_time_ms: u64,

    /// Peak memory in kilobytes, if it could be measured
    pub peak_memory_kb: Option<u64>,

    pub termination: TerminationReason,

    /// Signal number if the program was killed by a signal
    pub signal: Option<i32>,

    /// Diagnostic explaining a crash, when the cause is known
    pub message: Option<String>,

    /// Whether the memory ceiling was enforced (false means advisory only)
    pub memory_enforced: bool,

    pub stdout_truncated: bool,
    pub stderr_truncated: bool,

    /// Process group the run was placed in
    pub process_group: Option<i32>,
}

impl ExecutionOutcome {
    /// Check if the execution completed with exit code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.termination == TerminationReason::Completed && self.exit_code == 0
    }

    /// Peak memory rounded up to whole megabytes, 0 when unmeasured
    pub fn peak_memory_mb(&self) -> u64 {
        self.peak_memory_kb.map(|kb| kb.div_ceil(1024)).unwrap_or(0)
    }
}

impl Default for ExecutionOutcome {
    fn default() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            wall_time_ms: 0,
            peak_memory_kb: None,
            termination: TerminationReason::Completed,
            signal: None,
            message: None,
            memory_enforced: false,
            stdout_truncated: false,
            stderr_truncated: false,
            process_group: None,
        }
    }
}

/// Machine-readable name of a failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputValidation,
    ToolchainConfiguration,
    EntrypointNotFound,
    CompileError,
    Timeout,
    RuntimeError,
    Crashed,
    ValidationMismatch,
    SecurityRejection,
    InternalError,
}

/// The externally visible judge verdict, identical for every language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeResponse {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,

    /// Wall time in milliseconds
    pub execution_time: u64,

    /// Peak memory in megabytes, 0 when unmeasured
    pub memory_used: u64,

    pub exit_code: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ResourceLimits tests

    #[test]
    fn resource_limits_default_has_all_fields() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.time_limit, Some(10.0));
        assert_eq!(limits.memory_limit, Some(128));
        assert_eq!(limits.max_output, Some(ResourceLimits::MB));
    }

    #[test]
    fn resource_limits_builder_methods() {
        let limits = ResourceLimits::new()
            .with_time_limit(5.0)
            .with_memory_limit(256)
            .with_max_output(2048);

        assert_eq!(limits.time_limit, Some(5.0));
        assert_eq!(limits.memory_limit, Some(256));
        assert_eq!(limits.max_output, Some(2048));
    }

    #[test]
    fn with_overrides_empty_preserves_base() {
        let base = ResourceLimits::default();
        let result = base.with_overrides(&ResourceLimits::unset());
        assert_eq!(result.time_limit, base.time_limit);
        assert_eq!(result.memory_limit, base.memory_limit);
        assert_eq!(result.max_output, base.max_output);
    }

    #[test]
    fn with_overrides_partial_override() {
        let base = ResourceLimits::default();
        let overrides = ResourceLimits::unset().with_time_limit(3.0);
        let result = base.with_overrides(&overrides);
        assert_eq!(result.time_limit, Some(3.0));
        assert_eq!(result.memory_limit, base.memory_limit);
    }

    #[test]
    fn clamped_caps_values_above_ceiling() {
        let ceilings = Ceilings::default();
        let limits = ResourceLimits::unset()
            .with_time_limit(120.0)
            .with_memory_limit(4096);
        let clamped = limits.clamped(&ceilings);
        assert_eq!(clamped.time_limit, Some(30.0));
        assert_eq!(clamped.memory_limit, Some(512));
    }

    #[test]
    fn clamped_raises_values_below_one() {
        let ceilings = Ceilings::default();
        let limits = ResourceLimits::unset()
            .with_time_limit(0.01)
            .with_memory_limit(0);
        let clamped = limits.clamped(&ceilings);
        assert_eq!(clamped.time_limit, Some(1.0));
        assert_eq!(clamped.memory_limit, Some(1));
    }

    #[test]
    fn clamped_nan_time_becomes_ceiling() {
        let clamped = ResourceLimits::unset()
            .with_time_limit(f64::NAN)
            .clamped(&Ceilings::default());
        assert_eq!(clamped.time_limit, Some(30.0));
    }

    #[test]
    fn clamped_leaves_unset_fields_unset() {
        let clamped = ResourceLimits::unset().clamped(&Ceilings::default());
        assert!(clamped.time_limit.is_none());
        assert!(clamped.memory_limit.is_none());
    }

    // ExecutionRequest tests

    #[test]
    fn execution_request_canonical_fields() {
        let json = r#"{"language":"go","code":"x","testInput":"1 2","timeout":5,"memoryLimitMB":64}"#;
        let request: ExecutionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.language, "go");
        assert_eq!(request.test_input.as_deref(), Some("1 2"));
        assert_eq!(request.timeout, Some(5.0));
        assert_eq!(request.memory_limit_mb, Some(64));
    }

    #[test]
    fn execution_request_legacy_aliases() {
        let json = r#"{"language":"java","source_code":"x","input":"in","time_limit":7,"memory_limit":256}"#;
        let request: ExecutionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.code, "x");
        assert_eq!(request.test_input.as_deref(), Some("in"));
        assert_eq!(request.timeout, Some(7.0));
        assert_eq!(request.memory_limit_mb, Some(256));
    }

    // ExecutionOutcome tests

    #[test]
    fn execution_outcome_is_success() {
        let ok = ExecutionOutcome::default();
        assert!(ok.is_success());

        let non_zero = ExecutionOutcome {
            exit_code: 1,
            ..Default::default()
        };
        assert!(!non_zero.is_success());

        let timed_out = ExecutionOutcome {
            termination: TerminationReason::TimedOut,
            exit_code: 0,
            ..Default::default()
        };
        assert!(!timed_out.is_success());
    }

    #[test]
    fn peak_memory_mb_rounds_up() {
        let outcome = ExecutionOutcome {
            peak_memory_kb: Some(1025),
            ..Default::default()
        };
        assert_eq!(outcome.peak_memory_mb(), 2);
        assert_eq!(ExecutionOutcome::default().peak_memory_mb(), 0);
    }

    #[test]
    fn judge_response_serializes_camel_case() {
        let response = JudgeResponse {
            success: true,
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            execution_time: 12,
            memory_used: 3,
            exit_code: 0,
            error: None,
            error_kind: None,
            warnings: Vec::new(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["executionTime"], 12);
        assert_eq!(value["memoryUsed"], 3);
        assert_eq!(value["exitCode"], 0);
        assert!(value.get("error").is_none());
        assert!(value.get("warnings").is_none());
    }
}
