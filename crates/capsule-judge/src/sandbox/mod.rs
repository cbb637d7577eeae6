//! Child process sandbox
//!
//! Runs compile and run steps as child processes in their own process group,
//! inside a disposable per-call workspace. The whole group is killed and
//! confirmed gone before a run returns.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use crate::sandbox::command::SandboxCommand;
pub use crate::sandbox::process::{group_members, run, run_with_output};
pub use crate::sandbox::workspace::Workspace;

pub(crate) use crate::sandbox::process::format_seconds;

mod command;
mod process;
mod workspace;

/// Errors that occur while preparing or running a child process
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("toolchain '{0}' not found")]
    ToolchainNotFound(String),

    #[error("empty command")]
    EmptyCommand,

    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("processes of group {pgid} still alive after kill: {members:?}")]
    ReapFailed { pgid: i32, members: Vec<i32> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve the program in a command to an absolute path.
///
/// Relative paths containing a `/` (like `./main`) are resolved against
/// `working_dir`, since the child is spawned with a cleared environment and
/// an explicit working directory. Bare names (like `javac`) are searched for
/// in `search_path`, a colon-separated list of directories.
pub fn resolve_command(
    command: &mut [String],
    working_dir: &Path,
    search_path: &str,
) -> Result<(), SandboxError> {
    let first = match command.first_mut() {
        Some(first) => first,
        None => return Err(SandboxError::EmptyCommand),
    };

    if first.starts_with('/') {
        return Ok(());
    }

    if first.contains('/') {
        *first = working_dir.join(&*first).to_string_lossy().into_owned();
        return Ok(());
    }

    match find_in_path(first, search_path) {
        Some(found) => {
            *first = found.to_string_lossy().into_owned();
            Ok(())
        }
        None => Err(SandboxError::ToolchainNotFound(first.clone())),
    }
}

/// Look up an executable by name in a colon-separated search path
pub fn find_in_path(name: &str, search_path: &str) -> Option<PathBuf> {
    search_path
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(name))
        .find(|candidate| candidate.is_file())
}
