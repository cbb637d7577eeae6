//! Restricted in-process interpreter
//!
//! Interpreted languages in restricted mode run as a WASI guest inside the
//! judge process instead of a forked child. The guest only sees what the
//! [`CapabilityTable`] grants, its stdio is redirected into per-call buffers
//! owned by the store, and epoch interruption preempts it at the wall clock
//! ceiling no matter what it is executing.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use wasi_common::I32Exit;
use wasi_common::pipe::{ReadPipe, WritePipe};
use wasmtime::{
    Config as EngineConfig, Engine, Linker, Module, Store, StoreLimits, StoreLimitsBuilder, Trap,
    Val,
};
use wasmtime_wasi::WasiCtx;
use wasmtime_wasi::sync::{Dir, WasiCtxBuilder, ambient_authority};

use crate::config::InterpreterConfig;
use crate::types::{ExecutionOutcome, TIMEOUT_EXIT_CODE, TerminationReason};

pub use crate::interpreter::capability::{
    CAPABILITY_TABLE_VERSION, Capability, CapabilityTable, DeniedImport, ERRNO_NOTCAPABLE,
    WASI_MODULE,
};

mod capability;

/// Epoch tick period; deadlines are rounded up to whole ticks
const EPOCH_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("failed to load interpreter module {path}: {message}")]
    ModuleLoad { path: PathBuf, message: String },

    #[error("module imports {module}::{name}, which is not in the capability table")]
    ForbiddenImport { module: String, name: String },

    #[error("failed to set up guest: {0}")]
    Setup(String),

    #[error("module has no _start export")]
    MissingStart,

    #[error("evaluation task failed: {0}")]
    Join(String),
}

/// Inputs for one guest evaluation
#[derive(Debug, Clone)]
pub struct GuestCall {
    /// Guest argv, already expanded
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Vec<u8>,
    /// Host directory pre-opened at the interpreter's guest workspace path
    pub workspace: PathBuf,
    pub time_limit: Duration,
    pub memory_limit_bytes: usize,
    pub max_output: usize,
}

struct GuestState {
    wasi: WasiCtx,
    limits: StoreLimits,
}

/// Module and linker, built on first use and reused by every call
struct LoadedModule {
    module: Module,
    linker: Linker<GuestState>,
}

/// A restricted interpreter for one language
pub struct RestrictedInterpreter {
    engine: Engine,
    config: InterpreterConfig,
    capabilities: Arc<CapabilityTable>,
    loaded: OnceCell<LoadedModule>,
    ticker: EpochTicker,
}

impl std::fmt::Debug for RestrictedInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestrictedInterpreter")
            .field("module", &self.config.module)
            .field("capabilities", &self.capabilities.version())
            .field("loaded", &self.loaded.get().is_some())
            .finish()
    }
}

impl RestrictedInterpreter {
    /// Create the interpreter; the module itself is compiled on first use
    pub fn new(
        config: InterpreterConfig,
        capabilities: Arc<CapabilityTable>,
    ) -> Result<Self, InterpreterError> {
        let mut engine_config = EngineConfig::new();
        engine_config.epoch_interruption(true);
        let engine =
            Engine::new(&engine_config).map_err(|e| InterpreterError::Setup(e.to_string()))?;
        let ticker = EpochTicker::start(engine.clone());

        Ok(Self {
            engine,
            config,
            capabilities,
            loaded: OnceCell::new(),
            ticker,
        })
    }

    /// Path of the interpreter module
    pub fn module_path(&self) -> &Path {
        &self.config.module
    }

    /// Whether the module file is present
    pub fn is_available(&self) -> bool {
        self.config.module.is_file()
    }

    /// Guest path where the per-call workspace appears
    pub fn guest_workspace(&self) -> &str {
        &self.config.guest_workspace
    }

    fn load(&self) -> Result<&LoadedModule, InterpreterError> {
        self.loaded.get_or_try_init(|| {
            let path = &self.config.module;
            debug!(path = %path.display(), "compiling interpreter module");
            let module = Module::from_file(&self.engine, path).map_err(|e| {
                InterpreterError::ModuleLoad {
                    path: path.clone(),
                    message: e.to_string(),
                }
            })?;

            let denied = self.capabilities.screen(&module)?;

            let mut linker: Linker<GuestState> = Linker::new(&self.engine);
            wasmtime_wasi::add_to_linker(&mut linker, |state: &mut GuestState| &mut state.wasi)
                .map_err(|e| InterpreterError::Setup(e.to_string()))?;
            linker.allow_shadowing(true);
            for import in denied {
                debug!(name = %import.name, "stubbing denied import");
                linker
                    .func_new(WASI_MODULE, &import.name, import.ty, |_caller, _params, results| {
                        if let Some(errno) = results.first_mut() {
                            *errno = Val::I32(ERRNO_NOTCAPABLE);
                        }
                        Ok(())
                    })
                    .map_err(|e| InterpreterError::Setup(e.to_string()))?;
            }

            Ok(LoadedModule { module, linker })
        })
    }

    /// Evaluate a guest program to completion or until its deadline.
    ///
    /// Blocks the calling thread; async callers should use `spawn_blocking`.
    #[instrument(skip(self, call), fields(module = %self.config.module.display()))]
    pub fn evaluate(&self, call: GuestCall) -> Result<ExecutionOutcome, InterpreterError> {
        let loaded = self.load()?;

        let stdout = WritePipe::new(CappedBuffer::new(call.max_output));
        let stderr = WritePipe::new(CappedBuffer::new(call.max_output));
        let wasi = self.guest_context(&call, stdout.clone(), stderr.clone())?;

        let limits = StoreLimitsBuilder::new()
            .memory_size(call.memory_limit_bytes)
            .instances(1)
            .build();
        let mut store = Store::new(&self.engine, GuestState { wasi, limits });
        store.limiter(|state| &mut state.limits);
        store.set_epoch_deadline(deadline_ticks(call.time_limit));
        store.epoch_deadline_trap();

        let started = Instant::now();
        let (result, memory_bytes) = match loaded.linker.instantiate(&mut store, &loaded.module) {
            Ok(instance) => {
                let start = instance
                    .get_typed_func::<(), ()>(&mut store, "_start")
                    .map_err(|_| InterpreterError::MissingStart)?;
                let result = start.call(&mut store, ());
                let memory = instance
                    .get_memory(&mut store, "memory")
                    .map(|m| m.data_size(&store));
                (result, memory)
            }
            Err(e) => (Err(e), None),
        };
        let wall_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        // Dropping the store releases the guest's handles on the pipes
        drop(store);
        let (stdout, stdout_truncated) = into_output(stdout);
        let (stderr, stderr_truncated) = into_output(stderr);

        let (termination, exit_code, message) = match result {
            Ok(()) => (TerminationReason::Completed, 0, None),
            Err(e) => classify(&e, call.time_limit),
        };

        debug!(?termination, exit_code, wall_time_ms, "guest finished");

        Ok(ExecutionOutcome {
            stdout,
            stderr,
            exit_code,
            wall_time_ms,
            peak_memory_kb: memory_bytes.map(|b| (b as u64).div_ceil(1024)),
            termination,
            signal: None,
            message,
            memory_enforced: true,
            stdout_truncated,
            stderr_truncated,
            process_group: None,
        })
    }

    fn guest_context(
        &self,
        call: &GuestCall,
        stdout: WritePipe<CappedBuffer>,
        stderr: WritePipe<CappedBuffer>,
    ) -> Result<WasiCtx, InterpreterError> {
        let open = |path: &Path| {
            Dir::open_ambient_dir(path, ambient_authority()).map_err(|e| {
                InterpreterError::Setup(format!("cannot open {}: {e}", path.display()))
            })
        };

        let mut builder = WasiCtxBuilder::new();
        builder
            .args(&call.argv)
            .map_err(setup_error)?
            .envs(&call.env)
            .map_err(setup_error)?
            .stdin(Box::new(ReadPipe::new(Cursor::new(call.stdin.clone()))))
            .stdout(Box::new(stdout))
            .stderr(Box::new(stderr));
        builder
            .preopened_dir(open(&call.workspace)?, &self.config.guest_workspace)
            .map_err(setup_error)?;
        for lib in &self.config.lib_dirs {
            builder
                .preopened_dir(open(&lib.host)?, &lib.guest)
                .map_err(setup_error)?;
        }
        Ok(builder.build())
    }
}

impl Drop for RestrictedInterpreter {
    fn drop(&mut self) {
        self.ticker.stop();
    }
}

fn setup_error(e: impl std::fmt::Display) -> InterpreterError {
    InterpreterError::Setup(e.to_string())
}

fn deadline_ticks(limit: Duration) -> u64 {
    let ticks = limit.as_nanos().div_ceil(EPOCH_TICK.as_nanos());
    u64::try_from(ticks).unwrap_or(u64::MAX).max(1)
}

/// Map a guest error onto a termination reason
fn classify(error: &anyhow::Error, time_limit: Duration) -> (TerminationReason, i32, Option<String>) {
    if let Some(exit) = error.downcast_ref::<I32Exit>() {
        return (TerminationReason::Completed, exit.0, None);
    }
    if let Some(Trap::Interrupt) = error.downcast_ref::<Trap>() {
        let secs = crate::sandbox::format_seconds(time_limit);
        return (
            TerminationReason::TimedOut,
            TIMEOUT_EXIT_CODE,
            Some(format!("Execution timed out after {secs}s")),
        );
    }
    let summary = error.to_string();
    let first_line = summary.lines().next().unwrap_or("guest trapped");
    (
        TerminationReason::Crashed,
        1,
        Some(format!("Interpreter crashed: {first_line}")),
    )
}

fn into_output(pipe: WritePipe<CappedBuffer>) -> (String, bool) {
    match pipe.try_into_inner() {
        Ok(buffer) => (
            String::from_utf8_lossy(&buffer.data).into_owned(),
            buffer.truncated,
        ),
        Err(_) => {
            warn!("guest output pipe still shared after store drop");
            (String::new(), true)
        }
    }
}

/// In-memory sink that keeps at most `cap` bytes and swallows the rest
#[derive(Debug)]
struct CappedBuffer {
    data: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl CappedBuffer {
    fn new(cap: usize) -> Self {
        Self {
            data: Vec::new(),
            cap,
            truncated: false,
        }
    }
}

impl Write for CappedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let room = self.cap.saturating_sub(self.data.len());
        if buf.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&buf[..buf.len().min(room)]);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Background thread advancing the engine epoch every tick
struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: Engine) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("capsule-epoch".to_owned())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(EPOCH_TICK);
                    engine.increment_epoch();
                }
            })
            .map_err(|e| warn!(error = %e, "failed to start epoch ticker"))
            .ok();
        Self { stop, handle }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("epoch ticker panicked");
        }
    }
}
