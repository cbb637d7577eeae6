//! Command builder for sandboxed child processes

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::DEFAULT_SANDBOX_PATH;
use crate::sandbox::{SandboxError, resolve_command};
use crate::types::ResourceLimits;

/// Builder for a single sandboxed invocation
#[derive(Debug, Clone)]
pub struct SandboxCommand {
    /// Program and arguments
    argv: Vec<String>,
    /// Extra environment; the child starts from an empty environment
    env: Vec<(String, String)>,
    /// PATH for the child, also used to resolve the program
    path: String,
    working_dir: PathBuf,
    /// Payload written to stdin, which is then closed
    stdin: Vec<u8>,
    time_limit: Duration,
    /// Cap per output stream in bytes
    max_output: usize,
}

impl SandboxCommand {
    /// Create a new command builder running in `working_dir`
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let defaults = ResourceLimits::default();
        Self {
            argv: Vec::new(),
            env: Vec::new(),
            path: DEFAULT_SANDBOX_PATH.to_owned(),
            working_dir: working_dir.into(),
            stdin: Vec::new(),
            time_limit: defaults.wall_time(),
            max_output: defaults.output_cap(),
        }
    }

    /// Set the command to run
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.argv = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set several environment variables
    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Set the PATH seen by the child
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the stdin payload
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = data.into();
        self
    }

    /// Set the wall clock ceiling
    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    /// Set the per-stream output cap
    pub fn max_output(mut self, bytes: usize) -> Self {
        self.max_output = bytes;
        self
    }

    /// Apply time and output limits
    pub fn limits(self, limits: &ResourceLimits) -> Self {
        let time = limits.wall_time();
        let output = limits.output_cap();
        self.time_limit(time).max_output(output)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn get_time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn get_max_output(&self) -> usize {
        self.max_output
    }

    pub fn get_stdin(&self) -> &[u8] {
        &self.stdin
    }

    /// Environment passed to the child, PATH included
    pub fn environment(&self) -> Vec<(String, String)> {
        let mut env = vec![("PATH".to_owned(), self.path.clone())];
        env.extend(self.env.iter().cloned());
        env
    }

    /// Build the argv with the program resolved to an absolute path
    pub fn build(&self) -> Result<Vec<String>, SandboxError> {
        let mut argv = self.argv.clone();
        resolve_command(&mut argv, &self.working_dir, &self.path)?;
        Ok(argv)
    }
}
