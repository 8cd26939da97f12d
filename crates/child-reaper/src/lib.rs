//! # child-reaper
//!
//! Run child processes under a hard wall-clock deadline and take them down
//! in two phases when they overstay it: a graceful stop request first, then
//! a forced kill once a grace window has elapsed.
//!
//! ## How it works
//!
//! 1. [`isolate`] puts the child in its own process group (unix) so that a
//!    stop request also reaches any grandchildren holding the output pipes.
//! 2. [`communicate`] feeds the child's stdin, closes it, drains stdout and
//!    stderr concurrently and waits for exit, bounded by `timeout`.
//! 3. On expiry, [`terminate`] sends `SIGTERM` to the group, waits up to
//!    `grace`, then escalates to `SIGKILL`.
//!
//! The caller is never blocked longer than `timeout + grace` plus a short,
//! fixed pipe-drain bound ([`DRAIN_BOUND`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use child_reaper::{communicate, isolate, Limits};
//! use std::process::Stdio;
//! use std::time::Duration;
//! use tokio::process::Command;
//!
//! # async fn demo() -> Result<(), child_reaper::ReapError> {
//! let mut cmd = Command::new("ollama");
//! cmd.args(["run", "glm-ocr"])
//!     .stdin(Stdio::piped())
//!     .stdout(Stdio::piped())
//!     .stderr(Stdio::piped());
//! isolate(&mut cmd);
//!
//! let child = child_reaper::spawn(&mut cmd)?;
//! let limits = Limits::new(Duration::from_secs(180), Duration::from_secs(5));
//! let finished = communicate(child, Some(b"hello\n".to_vec()), limits).await?;
//! println!("exit {} timed_out={}", finished.code(), finished.timed_out);
//! # Ok(())
//! # }
//! ```

use std::ffi::OsStr;
use std::io;
use std::process::{ExitStatus, Output, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// ── Public constants ─────────────────────────────────────────────────────────

/// Exit code reported for a child that was stopped because it overran its
/// deadline. Matches the convention of coreutils `timeout(1)`.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Upper bound on how long output pipes are drained after the child exits.
///
/// A grandchild that escaped the process group can keep a pipe open
/// indefinitely; past this bound whatever was read so far is discarded.
pub const DRAIN_BOUND: Duration = Duration::from_millis(250);

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by child-reaper operations.
#[derive(Error, Debug)]
pub enum ReapError {
    /// The program could not be started at all (missing binary, permissions).
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// A bounded query did not finish before its deadline and was killed.
    #[error("'{program}' did not finish within {}ms", .limit.as_millis())]
    TimedOut { program: String, limit: Duration },

    /// Waiting on the child failed.
    #[error("I/O error while supervising child: {0}")]
    Io(#[from] io::Error),
}

// ── Types ────────────────────────────────────────────────────────────────────

/// Deadline and grace window for one supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Wall-clock budget for the child to exit on its own.
    pub timeout: Duration,
    /// Time allowed between the stop request and the forced kill.
    pub grace: Duration,
}

impl Limits {
    pub fn new(timeout: Duration, grace: Duration) -> Self {
        Self { timeout, grace }
    }
}

/// How a child was brought down after overrunning its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the grace window after the stop request.
    Graceful,
    /// Still alive when the grace window closed; killed.
    Forced,
}

/// Everything observed about a supervised child once it is gone.
#[derive(Debug)]
pub struct Finished {
    /// Exit status reported by the OS.
    pub status: ExitStatus,
    /// Bytes read from stdout (possibly partial when `timed_out`).
    pub stdout: Vec<u8>,
    /// Bytes read from stderr (possibly partial when `timed_out`).
    pub stderr: Vec<u8>,
    /// `true` when the deadline expired and the child had to be stopped.
    pub timed_out: bool,
    /// Set only when `timed_out` is `true`.
    pub termination: Option<Termination>,
}

impl Finished {
    /// Process-level exit code: [`TIMEOUT_EXIT_CODE`] after a deadline
    /// overrun, otherwise [`exit_code`] of the real status.
    pub fn code(&self) -> i32 {
        if self.timed_out {
            TIMEOUT_EXIT_CODE
        } else {
            exit_code(&self.status)
        }
    }
}

// ── Spawning ─────────────────────────────────────────────────────────────────

/// Place the child in a fresh process group so [`request_stop`] reaches the
/// whole tree. No-op on non-unix platforms.
pub fn isolate(cmd: &mut Command) -> &mut Command {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    cmd
}

/// Spawn `cmd`, mapping failure to [`ReapError::Spawn`] with the program name.
pub fn spawn(cmd: &mut Command) -> Result<Child, ReapError> {
    cmd.spawn().map_err(|source| ReapError::Spawn {
        program: program_name(cmd.as_std().get_program()),
        source,
    })
}

/// Start a long-running background process that outlives the caller.
///
/// Stdio is redirected to the null device and the child is moved into its
/// own session (unix) or a detached process group (Windows). The child is
/// never waited on; its pid is returned for logging.
pub fn detach(cmd: &mut std::process::Command) -> Result<u32, ReapError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: the hook only calls setsid(2), which is async-signal-safe.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let child = cmd.spawn().map_err(|source| ReapError::Spawn {
        program: program_name(cmd.get_program()),
        source,
    })?;
    let pid = child.id();
    debug!(pid, "Detached background process");
    Ok(pid)
}

// ── Bounded queries ──────────────────────────────────────────────────────────

/// Run a short, non-interactive query and collect its output, killing it if
/// it has not finished within `limit`.
pub async fn output_within(cmd: &mut Command, limit: Duration) -> Result<Output, ReapError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = program_name(cmd.as_std().get_program());
    match tokio::time::timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) if is_spawn_error(&source) => Err(ReapError::Spawn { program, source }),
        Ok(Err(e)) => Err(ReapError::Io(e)),
        Err(_) => Err(ReapError::TimedOut { program, limit }),
    }
}

// ── Supervised communication ─────────────────────────────────────────────────

/// Feed `input` to the child, close its stdin and wait for it to exit within
/// `limits.timeout`, draining stdout and stderr concurrently.
///
/// On deadline expiry the child is stopped via [`terminate`] and whatever
/// output had been produced is returned with `timed_out = true`.
pub async fn communicate(
    mut child: Child,
    input: Option<Vec<u8>>,
    limits: Limits,
) -> Result<Finished, ReapError> {
    let writer = child.stdin.take().map(|mut stdin| {
        tokio::spawn(async move {
            if let Some(bytes) = input {
                if let Err(e) = stdin.write_all(&bytes).await {
                    // A child that exits without reading its input is not an error.
                    if e.kind() != io::ErrorKind::BrokenPipe {
                        warn!("Failed to write child stdin: {}", e);
                    }
                }
            }
            // Dropping `stdin` closes the pipe so the child sees EOF.
        })
    });

    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let started = Instant::now();
    let (status, timed_out, termination) =
        match tokio::time::timeout(limits.timeout, child.wait()).await {
            Ok(status) => (status?, false, None),
            Err(_) => {
                warn!(
                    "Child exceeded {}ms; requesting stop",
                    limits.timeout.as_millis()
                );
                let (status, how) = terminate(&mut child, limits.grace).await?;
                (status, true, Some(how))
            }
        };

    if let Some(writer) = writer {
        writer.abort();
    }

    let (stdout, stderr) = tokio::join!(drain(stdout), drain(stderr));
    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        stdout_bytes = stdout.len(),
        stderr_bytes = stderr.len(),
        timed_out,
        "Child finished"
    );

    Ok(Finished {
        status,
        stdout,
        stderr,
        timed_out,
        termination,
    })
}

// ── Two-phase termination ────────────────────────────────────────────────────

/// Ask the child (and its process group) to stop.
///
/// Sends `SIGTERM` on unix. Other platforms have no graceful equivalent for
/// console children, so the child is killed outright.
pub fn request_stop(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        signal_tree(child, libc::SIGTERM)
    }
    #[cfg(not(unix))]
    {
        child.start_kill()
    }
}

/// Stop the child: graceful request, bounded grace window, forced kill.
pub async fn terminate(
    child: &mut Child,
    grace: Duration,
) -> io::Result<(ExitStatus, Termination)> {
    if let Err(e) = request_stop(child) {
        warn!("Stop request failed ({}); killing immediately", e);
    } else if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return Ok((status?, Termination::Graceful));
    }

    force_kill(child)?;
    let status = child.wait().await?;
    Ok((status, Termination::Forced))
}

fn force_kill(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        // The group may still hold stragglers even if the leader is gone.
        let _ = signal_tree(child, libc::SIGKILL);
    }
    match child.start_kill() {
        Ok(()) => Ok(()),
        // Already exited and reaped between the checks.
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn signal_tree(child: &Child, signal: libc::c_int) -> io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = pid as libc::pid_t;

    // SAFETY: kill(2) has no memory-safety preconditions.
    if unsafe { libc::kill(-pid, signal) } == 0 {
        return Ok(());
    }
    // Not a group leader (spawned without `isolate`): signal the pid alone.
    if unsafe { libc::kill(pid, signal) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Conventional shell exit code for a status: the real code when there is
/// one, `128 + signal` for a signal death (unix), otherwise 1.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    1
}

/// A pipe being read by a background task into a buffer shared with the
/// caller, so bytes read before an abort are never lost.
struct PipeReader {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

fn spawn_reader<R>(mut pipe: R) -> PipeReader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buf);
    let task = tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => lock(&sink).extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Pipe read failed: {}", e);
                    break;
                }
            }
        }
    });
    PipeReader { buf, task }
}

/// Wait up to [`DRAIN_BOUND`] for the reader to hit EOF, then return
/// everything read so far.
///
/// A pipe can outlive the child when a grandchild inherited it; the reader
/// is abandoned in that case but its bytes are kept.
async fn drain(reader: Option<PipeReader>) -> Vec<u8> {
    let Some(PipeReader { buf, mut task }) = reader else {
        return Vec::new();
    };
    match tokio::time::timeout(DRAIN_BOUND, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Pipe reader task failed: {}", e),
        Err(_) => {
            task.abort();
            warn!(
                "Pipe still open {}ms after exit; keeping output read so far",
                DRAIN_BOUND.as_millis()
            );
        }
    }
    let bytes = std::mem::take(&mut *lock(&buf));
    bytes
}

fn lock(buf: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    // A panicking reader leaves a valid buffer behind.
    buf.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_spawn_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

fn program_name(program: &OsStr) -> String {
    program.to_string_lossy().into_owned()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate(&mut cmd);
        cmd
    }

    fn short(timeout_ms: u64, grace_ms: u64) -> Limits {
        Limits::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(grace_ms),
        )
    }

    #[tokio::test]
    async fn communicate_feeds_stdin_and_collects_stdout() {
        let child = spawn(&mut shell("cat")).unwrap();
        let done = communicate(child, Some(b"hello\n".to_vec()), short(5_000, 500))
            .await
            .unwrap();
        assert!(!done.timed_out);
        assert_eq!(done.code(), 0);
        assert_eq!(done.stdout, b"hello\n");
        assert!(done.termination.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_verbatim() {
        let child = spawn(&mut shell("echo boom >&2; exit 7")).unwrap();
        let done = communicate(child, None, short(5_000, 500)).await.unwrap();
        assert_eq!(done.code(), 7);
        assert_eq!(String::from_utf8_lossy(&done.stderr).trim(), "boom");
    }

    #[tokio::test]
    async fn overrun_is_stopped_gracefully_within_bound() {
        let start = Instant::now();
        let child = spawn(&mut shell("sleep 30")).unwrap();
        let done = communicate(child, None, short(300, 1_000)).await.unwrap();
        let elapsed = start.elapsed();

        assert!(done.timed_out);
        assert_eq!(done.code(), TIMEOUT_EXIT_CODE);
        assert_eq!(done.termination, Some(Termination::Graceful));
        assert!(
            elapsed < Duration::from_millis(300 + 1_000) + DRAIN_BOUND + Duration::from_millis(500),
            "took {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn ignored_sigterm_escalates_to_kill() {
        let start = Instant::now();
        let child = spawn(&mut shell("trap '' TERM; sleep 30")).unwrap();
        let done = communicate(child, None, short(300, 400)).await.unwrap();

        assert!(done.timed_out);
        assert_eq!(done.termination, Some(Termination::Forced));
        assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
    }

    #[tokio::test]
    async fn partial_output_survives_timeout() {
        let child = spawn(&mut shell("printf partial; sleep 30")).unwrap();
        let done = communicate(child, None, short(500, 1_000)).await.unwrap();
        assert!(done.timed_out);
        assert_eq!(done.stdout, b"partial");
    }

    #[tokio::test]
    async fn output_is_kept_when_a_grandchild_holds_the_pipe() {
        let start = Instant::now();
        let child = spawn(&mut shell("printf x; sleep 3 &")).unwrap();
        let done = communicate(child, None, short(5_000, 500)).await.unwrap();

        assert!(!done.timed_out);
        assert_eq!(done.code(), 0);
        assert_eq!(done.stdout, b"x");
        assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    }

    #[tokio::test]
    async fn output_within_times_out() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30"]);
        let err = output_within(&mut cmd, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ReapError::TimedOut { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let mut cmd = Command::new("/definitely/not/a/real/binary");
        let err = output_within(&mut cmd, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ReapError::Spawn { .. }), "got {err:?}");
        assert!(err.to_string().contains("/definitely/not/a/real/binary"));
    }

    #[test]
    fn detach_returns_pid() {
        let mut cmd = std::process::Command::new("sh");
        cmd.args(["-c", "exit 0"]);
        let pid = detach(&mut cmd).unwrap();
        assert!(pid > 0);
    }

    #[test]
    fn detached_child_leads_its_own_session() {
        let mut cmd = std::process::Command::new("sleep");
        cmd.arg("5");
        let pid = detach(&mut cmd).unwrap() as libc::pid_t;

        let sid = unsafe { libc::getsid(pid) };
        unsafe { libc::kill(pid, libc::SIGKILL) };
        assert_eq!(sid, pid);
        assert_ne!(sid, unsafe { libc::getsid(0) });
    }

    #[test]
    fn signal_death_maps_to_128_plus_signal() {
        use std::os::unix::process::ExitStatusExt;
        let status = ExitStatus::from_raw(libc::SIGKILL);
        assert_eq!(exit_code(&status), 128 + libc::SIGKILL);
    }
}
