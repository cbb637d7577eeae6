//! Process spawning, supervision and reaping
//!
//! A child is spawned as the leader of a new process group and raced against
//! the wall clock ceiling. Whichever settles first, the whole group is killed
//! along with any descendant that left it, and the judge waits until no live
//! member remains.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, warn};

use crate::sandbox::{SandboxCommand, SandboxError};
use crate::types::{ExecutionOutcome, TIMEOUT_EXIT_CODE, TerminationReason};

/// How often the process tree is scanned while the child runs
const SAMPLE_INTERVAL: Duration = Duration::from_millis(25);

/// How long a killed group may take to disappear from the process table
const REAP_GRACE: Duration = Duration::from_secs(2);

/// How long output readers may take to hit EOF once the group is dead
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Run a command to completion or until its wall clock ceiling expires
#[instrument(skip(command), fields(time_limit = ?command.get_time_limit()))]
pub async fn run(command: SandboxCommand) -> Result<ExecutionOutcome, SandboxError> {
    let argv = command.build()?;
    let program = argv.first().ok_or(SandboxError::EmptyCommand)?;
    debug!(?argv, cwd = %command.working_dir().display(), "spawning child process");

    let mut cmd = Command::new(program);
    cmd.args(&argv[1..])
        .env_clear()
        .envs(command.environment())
        .current_dir(command.working_dir())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .process_group(0);

    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return Ok(launch_failure(program, &e)),
    };
    let pgid = child.id().and_then(|id| i32::try_from(id).ok());
    let mut lineage = Lineage::new(pgid);

    let stdin_task = child.stdin.take().map(|mut stdin| {
        let data = command.get_stdin().to_vec();
        tokio::spawn(async move {
            // A program that never reads its input closes the pipe early
            if let Err(e) = stdin.write_all(&data).await
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                debug!(error = %e, "failed to write stdin");
            }
        })
    });
    let cap = command.get_max_output();
    let stdout_reader = child.stdout.take().map(|out| OutputReader::spawn(out, cap));
    let stderr_reader = child.stderr.take().map(|err| OutputReader::spawn(err, cap));

    let deadline = tokio::time::sleep(command.get_time_limit());
    tokio::pin!(deadline);
    let mut sampler = tokio::time::interval(SAMPLE_INTERVAL);
    sampler.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut peak_kb: Option<u64> = None;

    let (status, timed_out) = loop {
        tokio::select! {
            biased;
            status = child.wait() => match status {
                Ok(status) => break (status, false),
                Err(e) => return Err(abandon(&mut child, pgid, &mut lineage, e.into()).await),
            },
            () = &mut deadline => {
                debug!(?pgid, "wall clock ceiling expired, killing process group");
                match pgid {
                    Some(pgid) => {
                        lineage.observe(&process_table());
                        kill_group(pgid);
                    }
                    None => {
                        if let Err(e) = child.start_kill() {
                            return Err(abandon(&mut child, pgid, &mut lineage, e.into()).await);
                        }
                    }
                }
                match child.wait().await {
                    Ok(status) => break (status, true),
                    Err(e) => return Err(abandon(&mut child, pgid, &mut lineage, e.into()).await),
                }
            }
            _ = sampler.tick() => {
                let table = process_table();
                lineage.observe(&table);
                if let Some(pgid) = pgid {
                    let sample = lineage
                        .resident_kb(pgid, &table)
                        .max(status_kb(pgid, "VmHWM:"));
                    peak_kb = peak_kb.max(sample);
                }
            }
        }
    };
    let wall_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    lineage.leader_reaped();

    // Descendants may outlive the leader even on a normal exit
    let mut reap_failure = None;
    if let Some(pgid) = pgid
        && let Err(e) = ensure_gone(pgid, &mut lineage).await
    {
        reap_failure = Some(e.to_string());
    }

    if let Some(task) = stdin_task {
        task.abort();
    }
    let (stdout, stdout_truncated) = drain(stdout_reader).await;
    let (stderr, stderr_truncated) = drain(stderr_reader).await;

    let signal = {
        use std::os::unix::process::ExitStatusExt as _;
        status.signal()
    };

    let (termination, exit_code, message) = if timed_out {
        let message = format!(
            "Execution timed out after {}s",
            format_seconds(command.get_time_limit())
        );
        (TerminationReason::TimedOut, TIMEOUT_EXIT_CODE, Some(message))
    } else if let Some(sig) = signal {
        (TerminationReason::Crashed, 128 + sig, Some(describe_signal(sig)))
    } else {
        (TerminationReason::Completed, status.code().unwrap_or(1), None)
    };

    debug!(
        ?termination,
        exit_code,
        wall_time_ms,
        peak_kb,
        "child process finished"
    );

    Ok(ExecutionOutcome {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
        wall_time_ms,
        peak_memory_kb: peak_kb,
        termination,
        signal: if timed_out { None } else { signal },
        message: with_note(message, reap_failure),
        memory_enforced: false,
        stdout_truncated,
        stderr_truncated,
        process_group: pgid,
    })
}

/// Run a command and combine its output (for compiler diagnostics)
#[instrument(skip(command))]
pub async fn run_with_output(
    command: SandboxCommand,
) -> Result<(ExecutionOutcome, String), SandboxError> {
    let outcome = run(command).await?;

    let mut combined = String::new();
    combined.push_str(&outcome.stdout);
    if !combined.is_empty() && !outcome.stderr.is_empty() && !combined.ends_with('\n') {
        combined.push('\n');
    }
    combined.push_str(&outcome.stderr);

    Ok((outcome, combined))
}

/// PIDs of live (non-zombie) processes in a process group
pub fn group_members(pgid: i32) -> Vec<i32> {
    process_table()
        .into_iter()
        .filter(|proc| proc.is_live() && proc.pgrp == pgid)
        .map(|proc| proc.pid)
        .collect()
}

/// The fields of `/proc/<pid>/stat` the supervisor cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcStat {
    pid: i32,
    state: char,
    ppid: i32,
    pgrp: i32,
    /// Clock ticks after boot; tells a reused pid apart from the original
    start_time: u64,
}

impl ProcStat {
    fn is_live(&self) -> bool {
        !matches!(self.state, 'Z' | 'X')
    }
}

fn process_table() -> Vec<ProcStat> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
        })
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
        .filter_map(|stat| parse_stat(&stat))
        .collect()
}

fn parse_stat(stat: &str) -> Option<ProcStat> {
    let (pid, _) = stat.split_once(' ')?;
    // comm may contain spaces and parentheses, so split after the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    Some(ProcStat {
        pid: pid.parse().ok()?,
        state: fields.first()?.chars().next()?,
        ppid: fields.get(1)?.parse().ok()?,
        pgrp: fields.get(2)?.parse().ok()?,
        start_time: fields.get(19)?.parse().ok()?,
    })
}

/// Every process seen descending from one leader
///
/// A descendant that calls `setsid()` or `setpgid()` leaves the leader's
/// group and survives `killpg`. Once seen it is tracked by pid and start
/// time, so it can still be found after its parent dies and it is
/// reparented elsewhere.
#[derive(Debug, Default)]
struct Lineage {
    leader: Option<i32>,
    known: HashMap<i32, u64>,
}

impl Lineage {
    fn new(leader: Option<i32>) -> Self {
        Self {
            leader,
            known: HashMap::new(),
        }
    }

    /// The leader's pid may be reused once it has been waited on
    fn leader_reaped(&mut self) {
        self.leader = None;
    }

    /// Record descendants of the leader and of every process already known
    fn observe(&mut self, table: &[ProcStat]) {
        let current: HashMap<i32, u64> = table.iter().map(|p| (p.pid, p.start_time)).collect();
        self.known.retain(|pid, start| current.get(pid) == Some(start));

        let mut children: HashMap<i32, Vec<&ProcStat>> = HashMap::new();
        for proc in table {
            children.entry(proc.ppid).or_default().push(proc);
        }

        let mut pending: Vec<i32> = self
            .leader
            .into_iter()
            .chain(self.known.keys().copied())
            .collect();
        while let Some(parent) = pending.pop() {
            for child in children.get(&parent).into_iter().flatten() {
                if Some(child.pid) != self.leader
                    && self.known.insert(child.pid, child.start_time).is_none()
                {
                    pending.push(child.pid);
                }
            }
        }
    }

    /// Live processes in the group or known to descend from the leader
    fn members(&self, pgid: i32, table: &[ProcStat]) -> Vec<i32> {
        table
            .iter()
            .filter(|p| {
                p.is_live() && (p.pgrp == pgid || self.known.get(&p.pid) == Some(&p.start_time))
            })
            .map(|p| p.pid)
            .collect()
    }

    fn kill_known(&self, table: &[ProcStat]) {
        let targets: HashSet<i32> = table
            .iter()
            .filter(|p| p.is_live() && self.known.get(&p.pid) == Some(&p.start_time))
            .map(|p| p.pid)
            .collect();
        for pid in targets {
            match signal::kill(Pid::from_raw(pid), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(pid, error = %e, "failed to signal descendant"),
            }
        }
    }

    /// Resident memory summed over every live member
    fn resident_kb(&self, pgid: i32, table: &[ProcStat]) -> Option<u64> {
        self.members(pgid, table)
            .into_iter()
            .filter_map(|pid| status_kb(pid, "VmRSS:"))
            .reduce(u64::saturating_add)
    }
}

fn kill_group(pgid: i32) {
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "failed to signal process group"),
    }
}

/// Kill the group and every known descendant, then wait until none is left
async fn ensure_gone(pgid: i32, lineage: &mut Lineage) -> Result<(), SandboxError> {
    let started = Instant::now();
    loop {
        let table = process_table();
        lineage.observe(&table);
        kill_group(pgid);
        lineage.kill_known(&table);

        let members = lineage.members(pgid, &process_table());
        if members.is_empty() {
            return Ok(());
        }
        if started.elapsed() >= REAP_GRACE {
            warn!(pgid, ?members, "processes survived SIGKILL");
            return Err(SandboxError::ReapFailed { pgid, members });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Clean up after a failed wait so nothing outlives the call
async fn abandon(
    child: &mut Child,
    pgid: Option<i32>,
    lineage: &mut Lineage,
    error: SandboxError,
) -> SandboxError {
    warn!(error = %error, "lost track of child process");
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "failed to kill child");
    }
    if let Some(pgid) = pgid
        && let Err(e) = ensure_gone(pgid, lineage).await
    {
        warn!(error = %e, "cleanup after failed wait was incomplete");
    }
    error
}

/// Append a note to an outcome message
fn with_note(message: Option<String>, note: Option<String>) -> Option<String> {
    match (message, note) {
        (Some(message), Some(note)) => Some(format!("{message}; {note}")),
        (message, note) => message.or(note),
    }
}

/// A kilobyte field such as `VmHWM` or `VmRSS` from `/proc/<pid>/status`
fn status_kb(pid: i32, field: &str) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix(field))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

/// Bytes read from one output stream so far
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A reader task whose captured bytes outlive it
struct OutputReader {
    captured: Arc<Mutex<Captured>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl OutputReader {
    fn spawn<R>(reader: R, cap: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let task = tokio::spawn(read_capped(reader, cap, Arc::clone(&captured)));
        Self { captured, task }
    }
}

/// Read a stream to EOF, keeping at most `cap` bytes
///
/// Bytes past the cap are read and discarded so the writer never blocks.
async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    cap: usize,
    sink: Arc<Mutex<Captured>>,
) -> std::io::Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let mut captured = sink.lock().await;
        let room = cap.saturating_sub(captured.bytes.len());
        if n > room {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&buf[..n.min(room)]);
    }
}

/// Wait for a reader to finish and take whatever it captured
async fn drain(reader: Option<OutputReader>) -> (Vec<u8>, bool) {
    let Some(OutputReader { captured, mut task }) = reader else {
        return (Vec::new(), false);
    };
    let mut cut_short = false;
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "failed to read child output"),
        Ok(Err(e)) => warn!(error = %e, "output reader task failed"),
        Err(_) => {
            warn!("output pipe still open after process group exited");
            task.abort();
            cut_short = true;
        }
    }
    let mut captured = captured.lock().await;
    (
        std::mem::take(&mut captured.bytes),
        captured.truncated || cut_short,
    )
}

fn launch_failure(program: &str, error: &std::io::Error) -> ExecutionOutcome {
    let exit_code = if error.kind() == std::io::ErrorKind::NotFound {
        127
    } else {
        126
    };
    warn!(program, error = %error, "failed to launch program");
    ExecutionOutcome {
        exit_code,
        termination: TerminationReason::Crashed,
        message: Some(format!("Failed to launch program: {error}")),
        ..Default::default()
    }
}

fn describe_signal(sig: i32) -> String {
    match Signal::try_from(sig) {
        Ok(Signal::SIGKILL) => "Killed by SIGKILL (likely out of memory)".to_owned(),
        Ok(Signal::SIGSEGV) => "Segmentation fault (SIGSEGV)".to_owned(),
        Ok(Signal::SIGABRT) => "Aborted (SIGABRT)".to_owned(),
        Ok(Signal::SIGFPE) => "Arithmetic exception (SIGFPE)".to_owned(),
        Ok(signal) => format!("Killed by signal {}", signal.as_str()),
        Err(_) => format!("Killed by signal {sig}"),
    }
}

/// Whole seconds without a fraction, otherwise one decimal place
pub(crate) fn format_seconds(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("{secs:.0}")
    } else {
        format!("{secs:.1}")
    }
}
