use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;
use crate::types::ResourceLimits;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// Placeholder that makes a memory ceiling enforceable inline
pub const MEMORY_PLACEHOLDER: &str = "{memory_mb}";

/// Configuration for a programming language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// Human-readable name for the language (e.g., "Java 17 (OpenJDK)")
    pub name: String,

    /// File extension
    pub extension: FileExtension,

    /// How the submitted source is turned into a runnable unit
    #[serde(default)]
    pub entrypoint: EntrypointKind,

    /// Whether the program runs as a child process or inside the judge
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Compilation configuration (None for interpreted languages)
    #[serde(default)]
    pub compile: Option<CompileConfig>,

    /// Execution configuration
    pub run: RunConfig,

    /// Interpreter module for restricted mode
    #[serde(default)]
    pub interpreter: Option<InterpreterConfig>,
}

impl Language {
    /// Check if the language is compiled
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Check if the language runs inside the restricted interpreter
    pub fn is_restricted(&self) -> bool {
        self.mode == ExecutionMode::Restricted
    }

    /// Expand placeholders in the given command
    pub fn expand_command(command: &[String], ctx: &CommandContext) -> Vec<String> {
        command.iter().map(|arg| ctx.expand(arg)).collect()
    }

    /// Expand placeholders inside environment values
    ///
    /// Names are upper-cased since config sources may fold key case.
    pub fn expand_env(env: &HashMap<String, String>, ctx: &CommandContext) -> Vec<(String, String)> {
        let mut expanded: Vec<(String, String)> = env
            .iter()
            .map(|(key, value)| (key.to_ascii_uppercase(), ctx.expand(value)))
            .collect();
        expanded.sort();
        expanded
    }

    /// Whether the run step carries the memory ceiling inline
    pub fn enforces_memory(&self) -> bool {
        self.run
            .command
            .iter()
            .chain(self.run.env.values())
            .any(|arg| arg.contains(MEMORY_PLACEHOLDER))
    }
}

/// Values substituted into command templates
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    /// `{source}`: source file name
    pub source: String,

    /// `{output}` and `{binary}`: compiled artifact name
    pub output: String,

    /// `{main}`: entry name chosen by the adapter (class or project name)
    pub main: String,

    /// `{memory_mb}`: effective memory ceiling in megabytes
    pub memory_mb: u64,

    /// `{workspace}`: absolute path of the per-call workspace
    pub workspace: String,
}

impl CommandContext {
    pub fn expand(&self, template: &str) -> String {
        // `{output}` may itself reference `{main}`, so it is substituted first
        template
            .replace("{output}", &self.output)
            .replace("{binary}", &self.output)
            .replace("{source}", &self.source)
            .replace("{main}", &self.main)
            .replace(MEMORY_PLACEHOLDER, &self.memory_mb.to_string())
            .replace("{workspace}", &self.workspace)
    }
}

/// Entrypoint detection and wrapping strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrypointKind {
    /// Public class with `public static void main`
    Java,

    /// `package main` with `func main()`
    Go,

    /// Class with a static `Main` method, built as an SDK project
    Csharp,

    /// Source is run as given
    #[default]
    Passthrough,
}

/// Where the program executes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// A child process in its own process group
    #[default]
    Process,

    /// A WASI module evaluated inside the judge process
    Restricted,
}

/// File extension without dot (e.g., "java")
#[derive(Debug, Clone, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        let contains_invalid = extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for the compilation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Command and arguments with placeholders
    pub command: Vec<String>,

    /// Compiled artifact name, relative to the workspace (may use `{main}`)
    #[serde(default = "default_output_name")]
    pub output_name: String,

    /// Environment variables to set during compilation
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// PATH for the compiler
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    /// Resource limits for compilation (overrides compile defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

fn default_output_name() -> String {
    "main".to_owned()
}

/// Default PATH for spawned programs
pub const DEFAULT_SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command and arguments with placeholders
    ///
    /// In restricted mode this is the guest argv.
    pub command: Vec<String>,

    /// Environment Variables to set
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// PATH environment variable for the program
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    /// Resource limits for execution (overrides defaults, still clamped)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

fn default_sandbox_path() -> String {
    DEFAULT_SANDBOX_PATH.to_owned()
}

/// WASI interpreter module hosting a restricted language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Path to the `.wasm` (or `.wat`) module
    pub module: PathBuf,

    /// Host directories pre-opened for the guest
    #[serde(default)]
    pub lib_dirs: Vec<LibraryDir>,

    /// Guest path where the per-call workspace is mounted
    #[serde(default = "default_guest_workspace")]
    pub guest_workspace: String,
}

fn default_guest_workspace() -> String {
    "/sandbox".to_owned()
}

/// An allow-listed library directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryDir {
    pub host: PathBuf,
    pub guest: String,
}
