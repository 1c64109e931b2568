//! Subprocess execution helper (exec-style, no shell).
//!
//! Spawns child processes directly via `execvp` semantics, with no
//! intermediate shell, and either captures stdout/stderr into bounded buffers or discards
//! them. Every child runs under a hard deadline and, on Unix, in its own
//! process group so a terminal interrupt aimed at fanout does not reach it.

use std::ffi::OsStr;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Upper bound on bytes read from each of stdout / stderr to prevent
/// unbounded memory use (10 MiB).
const MAX_OUTPUT_BYTES: u64 = 10 * 1024 * 1024;

/// Polling interval while waiting for a child process with a timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured output from a subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed due to timeout or the OS did not
    /// report an exit code (e.g. signal termination on Unix).
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CommandResult {
    /// Returns `true` when the process exited with code 0 and was not killed
    /// by timeout.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Exit information for a child whose output was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResult {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl StatusResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Run `program` with `args`, killing the child after `timeout`.
///
/// `envs` are added to the child's environment only. Stdin is closed;
/// stdout and stderr are each capped at 10 MiB.
pub fn run_command<S: AsRef<OsStr>>(
    program: &OsStr,
    args: &[S],
    envs: &[(&str, &str)],
    timeout: Duration,
) -> std::io::Result<CommandResult> {
    let mut child = build(program, args, envs)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Take the pipe handles so we can read them on dedicated threads,
    // avoiding deadlock when both pipes fill their OS buffers.
    // We set Stdio::piped() above, so take() always returns Some.
    let child_stdout = child.stdout.take().expect("stdout was piped");
    let child_stderr = child.stderr.take().expect("stderr was piped");

    let stdout_handle = std::thread::spawn(move || read_bounded(child_stdout));
    let stderr_handle = std::thread::spawn(move || read_bounded(child_stderr));

    let (timed_out, exit_code) = wait_with_timeout(&mut child, timeout)?;

    let stdout = stdout_handle
        .join()
        .map_err(|e| std::io::Error::other(format!("stdout reader thread panicked: {e:?}")))??;
    let stderr = stderr_handle
        .join()
        .map_err(|e| std::io::Error::other(format!("stderr reader thread panicked: {e:?}")))??;

    Ok(CommandResult {
        stdout,
        stderr,
        exit_code,
        timed_out,
    })
}

/// Run `program` with all stdio attached to the null device, killing the
/// child after `timeout`.
///
/// Used for children that may leave a daemonized descendant behind (an SSH
/// control master), where waiting for pipe EOF could block forever.
pub fn run_status<S: AsRef<OsStr>>(
    program: &OsStr,
    args: &[S],
    envs: &[(&str, &str)],
    timeout: Duration,
) -> std::io::Result<StatusResult> {
    let mut child = build(program, args, envs)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    let (timed_out, exit_code) = wait_with_timeout(&mut child, timeout)?;
    Ok(StatusResult {
        exit_code,
        timed_out,
    })
}

fn build<S: AsRef<OsStr>>(program: &OsStr, args: &[S], envs: &[(&str, &str)]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    for (key, value) in envs {
        cmd.env(key, value);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd
}

/// Poll the child with `try_wait` and kill it once the deadline passes.
///
/// # Race Condition Note
///
/// There is a theoretical race where the child exits successfully just as we
/// decide to kill it due to timeout. In this case, we might report a timeout
/// even if the process finished. If it's that close to the deadline, treating
/// it as a timeout is fine: the outcome is retryable either way.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<(bool, Option<i32>)> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((false, status.code()));
        }
        if Instant::now() >= deadline {
            kill_tree(child);
            let _ = child.wait();
            return Ok((true, None));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Kill the child and everything in its process group, so a wrapper such as
/// `sshpass` does not leave its `ssh` behind holding our pipes open.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: the child leads its own process group (see `build`), so
            // `-pid` addresses only that group.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
}

/// Read up to [`MAX_OUTPUT_BYTES`] from `reader`, returning the result as a
/// (possibly lossy) UTF-8 string.
fn read_bounded(reader: impl Read) -> std::io::Result<String> {
    let mut buf = Vec::new();
    reader.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
