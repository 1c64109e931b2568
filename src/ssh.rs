//! OpenSSH-backed [`SessionClient`].
//!
//! `connect` authenticates once by starting a control master in the
//! background; `execute` and `close` reuse its socket, so the command runs
//! over an already-authenticated connection and a slow handshake is charged
//! to the connect deadline, never to the exec deadline.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::FanoutError;
use crate::hosts::HostTarget;
use crate::session::{ExecOutput, RemoteSession, SessionClient, SessionError};
use crate::subprocess;

const SERVER_ALIVE_INTERVAL_SECS: u64 = 30;

/// Deadline for `ssh -O exit`; the master is local so this is generous.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How the client proves its identity.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Private key file; only this identity is offered.
    Key(PathBuf),
    /// Password, fed to `sshpass` through its environment.
    Password(String),
    /// Whatever the SSH agent and default identity files provide.
    Ambient,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Key(path) => f.debug_tuple("Key").field(path).finish(),
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::Ambient => f.write_str("Ambient"),
        }
    }
}

/// What to do with a host key that is not in `known_hosts`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Record unknown keys, reject changed ones.
    #[default]
    AcceptNew,
    /// Reject any key not already known.
    Strict,
}

impl HostKeyPolicy {
    fn option(self) -> &'static str {
        match self {
            HostKeyPolicy::AcceptNew => "StrictHostKeyChecking=accept-new",
            HostKeyPolicy::Strict => "StrictHostKeyChecking=yes",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub ssh_program: PathBuf,
    /// Required when `credential` is a password.
    pub sshpass_program: Option<PathBuf>,
    /// Login user for entries that do not name one. `None` lets ssh decide.
    pub user: Option<String>,
    /// Port for entries that do not name one.
    pub port: u16,
    pub credential: Credential,
    pub host_key_policy: HostKeyPolicy,
    /// Extra time allowed on top of the connect timeout for the server
    /// banner and authentication to complete.
    pub banner_timeout: Duration,
    /// Request a remote PTY (`-tt`). Merges the remote stderr into stdout.
    pub pty: bool,
}

/// Opens sessions through OpenSSH control masters.
#[derive(Debug)]
pub struct OpenSshClient {
    options: SshOptions,
    control_dir: tempfile::TempDir,
    next_socket: AtomicUsize,
}

impl OpenSshClient {
    /// Create the client and its private control socket directory, under
    /// `control_parent` or the system temp dir. The directory is removed when
    /// the client is dropped.
    pub fn new(options: SshOptions, control_parent: Option<&Path>) -> Result<Self, FanoutError> {
        let parent = control_parent
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let control_dir = tempfile::Builder::new()
            .prefix("fanout-")
            .tempdir_in(&parent)
            .map_err(|e| FanoutError::ControlDirFailed {
                path: parent.clone(),
                detail: e.to_string(),
            })?;

        tracing::debug!(dir = %control_dir.path().display(), "control socket directory created");
        Ok(Self {
            options,
            control_dir,
            next_socket: AtomicUsize::new(0),
        })
    }

    pub fn control_dir(&self) -> &Path {
        self.control_dir.path()
    }

    /// Socket paths stay short: Unix socket paths are limited to ~100 bytes.
    fn allocate_socket(&self) -> PathBuf {
        let n = self.next_socket.fetch_add(1, Ordering::Relaxed);
        self.control_dir.path().join(format!("cm-{n}"))
    }

    /// `-l user -p port -- host` for a host entry, applying per-entry
    /// overrides over the configured defaults.
    fn destination_args(&self, target: &HostTarget) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(user) = target.user.as_ref().or(self.options.user.as_ref()) {
            args.push("-l".into());
            args.push(user.into());
        }
        args.push("-p".into());
        args.push(target.port.unwrap_or(self.options.port).to_string().into());
        args.push("--".into());
        args.push((&target.host).into());
        args
    }

    /// Full argv (after the program name) that starts a control master.
    fn master_args(
        &self,
        target: &HostTarget,
        socket: &Path,
        log: &Path,
        connect_timeout: Duration,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-M".into(),
            "-S".into(),
            socket.into(),
            "-f".into(),
            "-N".into(),
            "-E".into(),
            log.into(),
        ];
        push_opt(&mut args, "ControlPersist=yes");
        push_opt(&mut args, format!("ConnectTimeout={}", whole_secs(connect_timeout)));
        push_opt(&mut args, format!("ServerAliveInterval={SERVER_ALIVE_INTERVAL_SECS}"));
        push_opt(&mut args, self.options.host_key_policy.option());

        match &self.options.credential {
            Credential::Key(key) => {
                push_opt(&mut args, "BatchMode=yes");
                push_opt(&mut args, "IdentitiesOnly=yes");
                args.push("-i".into());
                args.push(key.into());
            }
            Credential::Password(_) => {
                push_opt(&mut args, "PreferredAuthentications=password,keyboard-interactive");
                push_opt(&mut args, "PubkeyAuthentication=no");
                push_opt(&mut args, "NumberOfPasswordPrompts=1");
            }
            Credential::Ambient => push_opt(&mut args, "BatchMode=yes"),
        }

        args.extend(self.destination_args(target));
        args
    }
}

impl SessionClient for OpenSshClient {
    fn connect(
        &self,
        host: &str,
        connect_timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, SessionError> {
        let target = HostTarget::parse(host)
            .ok_or_else(|| SessionError::Connect(format!("invalid host entry '{host}'")))?;
        let socket = self.allocate_socket();
        let log = socket.with_extension("log");
        let args = self.master_args(&target, &socket, &log, connect_timeout);
        let deadline = connect_timeout + self.options.banner_timeout;

        let ssh = self.options.ssh_program.as_os_str();
        let status = match &self.options.credential {
            Credential::Password(password) => {
                let sshpass = self.options.sshpass_program.as_deref().ok_or_else(|| {
                    SessionError::Connect("password auth requires sshpass".to_owned())
                })?;
                let mut wrapped: Vec<OsString> = vec!["-e".into(), ssh.to_owned()];
                wrapped.extend(args);
                subprocess::run_status(
                    sshpass.as_os_str(),
                    &wrapped,
                    &[("SSHPASS", password.as_str())],
                    deadline,
                )
            }
            _ => subprocess::run_status(ssh, &args, &[], deadline),
        }
        .map_err(|e| SessionError::Connect(format!("failed to spawn ssh: {e}")))?;

        let session = OpenSshSession {
            ssh_program: self.options.ssh_program.clone(),
            socket,
            log,
            destination: self.destination_args(&target),
            pty: self.options.pty,
        };

        if !status.success() {
            let detail = if status.timed_out {
                // A master killed right after it daemonized has left our
                // process group and survives the kill; ask it to exit.
                session.stop_master();
                format!("timed out after {}s", deadline.as_secs_f64())
            } else {
                let password_auth = matches!(self.options.credential, Credential::Password(_));
                failure_detail(status.exit_code, password_auth, &read_last_line(&session.log))
            };
            session.remove_files();
            return Err(SessionError::Connect(detail));
        }

        tracing::trace!(host, socket = %session.socket.display(), "control master up");
        Ok(Box::new(session))
    }
}

/// A live control master for one host.
#[derive(Debug)]
struct OpenSshSession {
    ssh_program: PathBuf,
    socket: PathBuf,
    log: PathBuf,
    destination: Vec<OsString>,
    pty: bool,
}

impl OpenSshSession {
    fn exec_args(&self, command: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-S".into(),
            (&self.socket).into(),
            "-o".into(),
            "ControlMaster=no".into(),
        ];
        args.push(if self.pty { "-tt" } else { "-T" }.into());
        args.extend(self.destination.iter().cloned());
        args.push(command.into());
        args
    }

    fn exit_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> =
            vec!["-S".into(), (&self.socket).into(), "-O".into(), "exit".into()];
        args.extend(self.destination.iter().cloned());
        args
    }

    /// Best-effort `-O exit`; failures are only logged.
    fn stop_master(&self) {
        match subprocess::run_status(
            self.ssh_program.as_os_str(),
            &self.exit_args(),
            &[],
            CLOSE_TIMEOUT,
        ) {
            Ok(status) if !status.success() => {
                tracing::debug!(socket = %self.socket.display(), ?status, "control master exit failed");
            }
            Err(e) => {
                tracing::debug!(socket = %self.socket.display(), error = %e, "control master exit failed");
            }
            Ok(_) => {}
        }
    }

    fn remove_files(&self) {
        let _ = std::fs::remove_file(&self.socket);
        let _ = std::fs::remove_file(&self.log);
    }
}

impl RemoteSession for OpenSshSession {
    fn execute(
        &mut self,
        command: &str,
        exec_timeout: Duration,
    ) -> Result<ExecOutput, SessionError> {
        let result = subprocess::run_command(
            self.ssh_program.as_os_str(),
            &self.exec_args(command),
            &[],
            exec_timeout,
        )
        .map_err(|e| SessionError::Exec(format!("failed to spawn ssh: {e}")))?;

        if result.timed_out {
            return Err(SessionError::Exec(format!(
                "timed out after {}s",
                exec_timeout.as_secs_f64()
            )));
        }
        // ssh reports a remote exit of 255 the same way as its own failures;
        // both are recorded as the command's exit code.
        let exit_code = result
            .exit_code
            .ok_or_else(|| SessionError::Exec("ssh terminated by signal".to_owned()))?;

        Ok(ExecOutput {
            exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }

    fn close(self: Box<Self>) {
        self.stop_master();
        self.remove_files();
    }
}

fn push_opt(args: &mut Vec<OsString>, value: impl Into<OsString>) {
    args.push("-o".into());
    args.push(value.into());
}

/// OpenSSH takes whole seconds; round up so a sub-second timeout is not 0
/// (which would mean "no timeout").
fn whole_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

fn read_last_line(path: &Path) -> String {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.lines().rev().map(str::trim).find(|l| !l.is_empty()).map(str::to_owned))
        .unwrap_or_default()
}

/// Human-readable reason a control master failed to start.
fn failure_detail(exit_code: Option<i32>, password_auth: bool, diagnostic: &str) -> String {
    if password_auth {
        match exit_code {
            Some(5) => return "authentication failed: invalid password".to_owned(),
            Some(6) => return "host key unknown; refusing to confirm it".to_owned(),
            _ => {}
        }
    }
    if !diagnostic.is_empty() {
        return diagnostic.to_owned();
    }
    match exit_code {
        Some(code) => format!("ssh exited with status {code}"),
        None => "ssh terminated by signal".to_owned(),
    }
}
