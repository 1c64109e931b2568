//! Remote session capability consumed by the dispatcher.
//!
//! The dispatcher and task executor only see these traits. The shipped
//! transport is [`crate::ssh::OpenSshClient`]; tests use scripted in-memory
//! clients.

use std::time::Duration;

/// Per-host transport failure. Both variants are retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Authentication, reachability or negotiation failed before any command
    /// ran, including the connect deadline expiring.
    #[error("connect_error: {0}")]
    Connect(String),

    /// The command channel failed during or after dispatch, including the
    /// exec deadline expiring. The command may have partially run.
    #[error("exec_error: {0}")]
    Exec(String),
}

/// Result of a command that ran to completion on the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Opens sessions to hosts. Shared by every worker thread.
pub trait SessionClient: Sync {
    fn connect(
        &self,
        host: &str,
        connect_timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, SessionError>;
}

/// An established session to one host.
pub trait RemoteSession: Send {
    fn execute(
        &mut self,
        command: &str,
        exec_timeout: Duration,
    ) -> Result<ExecOutput, SessionError>;

    /// Tear the session down. Consumes the session, so it runs at most once.
    fn close(self: Box<Self>);
}
