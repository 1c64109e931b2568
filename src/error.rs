use std::path::PathBuf;

/// Run-fatal errors. Anything here stops the run before the first dispatch,
/// except `ReportWriteFailed`, which is raised after the run.
///
/// Per-host transport failures are not in this enum; they are recorded on the
/// host's outcome (see [`crate::session::SessionError`]).
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("Hosts file does not exist: {path}")]
    HostsFileNotFound { path: PathBuf },

    #[error("Failed to read hosts file {path}: {detail}")]
    HostsFileReadFailed { path: PathBuf, detail: String },

    #[error("Invalid host entry '{entry}' at {path}:{line} (expected [user@]host[:port])")]
    InvalidHostEntry {
        path: PathBuf,
        line: usize,
        entry: String,
    },

    #[error("Private key file does not exist: {path}")]
    KeyFileNotFound { path: PathBuf },

    #[error(
        "No credential configured: pass --key or --password (or FANOUT_PASSWORD), \
         or --look-for-keys to use the SSH agent and default identities"
    )]
    MissingCredential,

    #[error("Concurrency must be greater than zero")]
    InvalidConcurrency,

    #[error("Timeout must be greater than zero: {setting}")]
    InvalidTimeout { setting: &'static str },

    #[error("Command must not be empty")]
    EmptyCommand,

    #[error("Failed to parse environment variable '{var}': {detail}")]
    ConfigEnvParseError { var: String, detail: String },

    #[error("Transport command '{cmd}' not found on PATH")]
    TransportCmdNotFound { cmd: String },

    #[error("Failed to install interrupt handler: {detail}")]
    SignalHandlerFailed { detail: String },

    #[error("Failed to create control socket directory {path}: {detail}")]
    ControlDirFailed { path: PathBuf, detail: String },

    #[error("Failed to write report {path}: {detail}")]
    ReportWriteFailed { path: PathBuf, detail: String },
}
