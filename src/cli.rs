use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// fanout: run one shell command on many hosts over SSH.
///
/// Hosts are worked through in parallel under a concurrency bound; each
/// host's outcome lands in a JSON report.
#[derive(Debug, Parser)]
#[command(name = "fanout", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a command on every host in a hosts file.
    Run(RunArgs),
}

/// Arguments for the `run` subcommand.
///
/// Everything except `--config` can also be set in the config file or via
/// `FANOUT_*` env vars. Precedence: CLI > env > file.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct RunArgs {
    /// File with one `[user@]host[:port]` entry per line.
    #[arg(long)]
    pub hosts: Option<PathBuf>,

    /// Command to run on every host (quote it).
    #[arg(long)]
    pub cmd: Option<String>,

    /// Path to a TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Login user for entries that do not name one.
    #[arg(long)]
    pub user: Option<String>,

    /// SSH port for entries that do not name one (default: 22).
    #[arg(long)]
    pub port: Option<u16>,

    /// Private key file. Wins over --password when both are set.
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Password auth via sshpass. Prefer FANOUT_PASSWORD to keep it out of
    /// the process list.
    #[arg(long)]
    pub password: Option<String>,

    /// Allow the SSH agent and default identities when no key or password is
    /// given.
    #[arg(long, default_value_t = false)]
    pub look_for_keys: bool,

    /// Wrap the command in `sudo -n bash -lc`.
    #[arg(long, default_value_t = false)]
    pub sudo: bool,

    /// Run the command under `bash -lc` to load login profile semantics.
    #[arg(long, default_value_t = false)]
    pub login_shell: bool,

    /// Allocate a remote PTY. Remote stderr is then merged into stdout.
    #[arg(long, default_value_t = false)]
    pub pty: bool,

    /// Maximum hosts worked on at once (default: 20).
    #[arg(long)]
    pub concurrency: Option<u32>,

    /// Extra attempts per host after a failure (default: 0).
    #[arg(long)]
    pub retries: Option<u32>,

    /// TCP connect timeout in seconds (default: 15).
    #[arg(long = "timeout")]
    pub connect_timeout: Option<u64>,

    /// Seconds allowed for the server banner and auth after TCP connect
    /// (default: 15).
    #[arg(long)]
    pub banner_timeout: Option<u64>,

    /// Per-command timeout in seconds (default: 180).
    #[arg(long)]
    pub exec_timeout: Option<u64>,

    /// Report path (default: report.json).
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Refuse hosts whose key is not already in known_hosts.
    #[arg(long, default_value_t = false)]
    pub strict_host_keys: bool,

    /// ssh binary name or path (default: "ssh").
    #[arg(long)]
    pub ssh_cmd: Option<String>,

    /// sshpass binary name or path (default: "sshpass").
    #[arg(long)]
    pub sshpass_cmd: Option<String>,

    /// Parent directory for control sockets (default: system temp dir).
    #[arg(long)]
    pub control_dir: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "fanout=trace").
    #[arg(long)]
    pub log_level: Option<String>,

    /// Append JSON logs to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse_run(args: &[&str]) -> RunArgs {
        let mut argv = vec!["fanout", "run"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).expect("should parse").command {
            Commands::Run(args) => args,
        }
    }

    #[test]
    fn minimal_run_parses() {
        let args = parse_run(&["--hosts", "hosts.txt", "--cmd", "uname -a"]);
        assert_eq!(args.hosts, Some(PathBuf::from("hosts.txt")));
        assert_eq!(args.cmd.as_deref(), Some("uname -a"));
        assert!(!args.sudo);
        assert!(!args.login_shell);
        assert!(!args.look_for_keys);
        assert_eq!(args.concurrency, None);
    }

    #[test]
    fn all_flags_parse() {
        let args = parse_run(&[
            "--hosts",
            "h.txt",
            "--cmd",
            "systemctl restart nginx",
            "--config",
            "fanout.toml",
            "--user",
            "ubuntu",
            "--port",
            "2222",
            "--key",
            "/keys/id",
            "--look-for-keys",
            "--sudo",
            "--login-shell",
            "--pty",
            "--concurrency",
            "10",
            "--retries",
            "2",
            "--timeout",
            "5",
            "--banner-timeout",
            "7",
            "--exec-timeout",
            "60",
            "--out",
            "out/report.json",
            "--strict-host-keys",
            "--ssh-cmd",
            "/usr/bin/ssh",
            "--sshpass-cmd",
            "/opt/sshpass",
            "--control-dir",
            "/run/fanout",
            "--log-level",
            "debug",
            "--log-file",
            "fanout.log",
        ]);

        assert_eq!(args.config, Some(PathBuf::from("fanout.toml")));
        assert_eq!(args.user.as_deref(), Some("ubuntu"));
        assert_eq!(args.port, Some(2222));
        assert_eq!(args.key, Some(PathBuf::from("/keys/id")));
        assert!(args.look_for_keys && args.sudo && args.login_shell && args.pty);
        assert_eq!(args.concurrency, Some(10));
        assert_eq!(args.retries, Some(2));
        assert_eq!(args.connect_timeout, Some(5));
        assert_eq!(args.banner_timeout, Some(7));
        assert_eq!(args.exec_timeout, Some(60));
        assert_eq!(args.out, Some(PathBuf::from("out/report.json")));
        assert!(args.strict_host_keys);
        assert_eq!(args.ssh_cmd.as_deref(), Some("/usr/bin/ssh"));
        assert_eq!(args.sshpass_cmd.as_deref(), Some("/opt/sshpass"));
        assert_eq!(args.control_dir, Some(PathBuf::from("/run/fanout")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.log_file, Some(PathBuf::from("fanout.log")));
    }

    #[test]
    fn password_flag_parses() {
        let args = parse_run(&["--password", "s3cret"]);
        assert_eq!(args.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn port_out_of_range_rejected() {
        let result = Cli::try_parse_from(["fanout", "run", "--port", "70000"]);
        let err = result.expect_err("port must fit in u16");
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn non_numeric_concurrency_rejected() {
        let result = Cli::try_parse_from(["fanout", "run", "--concurrency", "many"]);
        let err = result.expect_err("concurrency must be numeric");
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn no_subcommand_shows_error() {
        let err = Cli::try_parse_from(["fanout"]).expect_err("should fail without subcommand");
        assert_eq!(err.kind(), ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand);
    }

    #[test]
    fn unknown_subcommand_rejected() {
        let err = Cli::try_parse_from(["fanout", "deploy"]).expect_err("should reject");
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }
}
