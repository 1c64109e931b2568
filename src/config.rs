use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::cli::RunArgs;
use crate::error::FanoutError;
use crate::ssh::{Credential, HostKeyPolicy};
use crate::wrap::WrapMode;

// Precedence: CLI > env > file > defaults.

const DEFAULT_PORT: u16 = 22;
const DEFAULT_CONCURRENCY: u32 = 20;
const DEFAULT_CONNECT_TIMEOUT_SEC: u64 = 15;
const DEFAULT_BANNER_TIMEOUT_SEC: u64 = 15;
const DEFAULT_EXEC_TIMEOUT_SEC: u64 = 180;
const DEFAULT_RETRIES: u32 = 0;
const DEFAULT_OUT: &str = "report.json";
const DEFAULT_SSH_CMD: &str = "ssh";
const DEFAULT_SSHPASS_CMD: &str = "sshpass";

const ENV_PREFIX: &str = "FANOUT_";

/// Resolved configuration for a fanout run.
///
/// Built from three layers with precedence CLI > env > file > defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutConfig {
    pub hosts_path: PathBuf,
    pub command: String,
    pub user: Option<String>,
    pub port: u16,
    /// Key beats password; ambient identities only with `look_for_keys`.
    /// `None` when nothing usable was configured.
    pub credential: Option<Credential>,
    pub privileged: bool,
    pub login_shell: bool,
    pub pty: bool,
    pub concurrency: u32,
    pub retries: u32,
    pub connect_timeout_sec: u64,
    pub banner_timeout_sec: u64,
    pub exec_timeout_sec: u64,
    pub out: PathBuf,
    pub host_key_policy: HostKeyPolicy,
    pub ssh_cmd: String,
    pub sshpass_cmd: String,
    pub control_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
}

/// TOML-deserializable config file representation. All fields optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    hosts: Option<PathBuf>,
    cmd: Option<String>,
    user: Option<String>,
    port: Option<u16>,
    key: Option<PathBuf>,
    password: Option<String>,
    look_for_keys: Option<bool>,
    sudo: Option<bool>,
    login_shell: Option<bool>,
    pty: Option<bool>,
    concurrency: Option<u32>,
    retries: Option<u32>,
    connect_timeout: Option<u64>,
    banner_timeout: Option<u64>,
    exec_timeout: Option<u64>,
    out: Option<PathBuf>,
    strict_host_keys: Option<bool>,
    ssh_cmd: Option<String>,
    sshpass_cmd: Option<String>,
    control_dir: Option<PathBuf>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

/// Intermediate layer where every field is optional, used to merge sources.
#[derive(Debug, Default)]
struct ConfigLayer {
    hosts: Option<PathBuf>,
    cmd: Option<String>,
    user: Option<String>,
    port: Option<u16>,
    key: Option<PathBuf>,
    password: Option<String>,
    look_for_keys: Option<bool>,
    sudo: Option<bool>,
    login_shell: Option<bool>,
    pty: Option<bool>,
    concurrency: Option<u32>,
    retries: Option<u32>,
    connect_timeout: Option<u64>,
    banner_timeout: Option<u64>,
    exec_timeout: Option<u64>,
    out: Option<PathBuf>,
    strict_host_keys: Option<bool>,
    ssh_cmd: Option<String>,
    sshpass_cmd: Option<String>,
    control_dir: Option<PathBuf>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

impl FanoutConfig {
    /// Load configuration with precedence: CLI > env > file > defaults.
    ///
    /// `config_path` is an optional TOML config file; `cli_args` are the
    /// values given on the command line.
    pub fn load(config_path: Option<&Path>, cli_args: &RunArgs) -> anyhow::Result<Self> {
        Self::load_with_env(config_path, cli_args, real_env_var)
    }

    /// Check everything that can be checked before any host is contacted.
    pub fn validate(&self) -> Result<(), FanoutError> {
        if self.concurrency == 0 {
            return Err(FanoutError::InvalidConcurrency);
        }
        if self.exec_timeout_sec == 0 {
            return Err(FanoutError::InvalidTimeout {
                setting: "exec_timeout",
            });
        }
        // The connect deadline is the sum of the two.
        if self.connect_timeout_sec == 0 && self.banner_timeout_sec == 0 {
            return Err(FanoutError::InvalidTimeout {
                setting: "timeout + banner_timeout",
            });
        }
        if self.command.trim().is_empty() {
            return Err(FanoutError::EmptyCommand);
        }
        if !self.hosts_path.is_file() {
            return Err(FanoutError::HostsFileNotFound {
                path: self.hosts_path.clone(),
            });
        }
        match &self.credential {
            None => return Err(FanoutError::MissingCredential),
            Some(Credential::Key(key)) if !key.is_file() => {
                return Err(FanoutError::KeyFileNotFound { path: key.clone() });
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }

    pub fn banner_timeout(&self) -> Duration {
        Duration::from_secs(self.banner_timeout_sec)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_sec)
    }

    pub fn wrap_mode(&self) -> WrapMode {
        WrapMode {
            privileged: self.privileged,
            login_shell: self.login_shell,
        }
    }

    /// Internal constructor that accepts an env-var lookup function,
    /// enabling deterministic testing without process-global mutation.
    fn load_with_env(
        config_path: Option<&Path>,
        cli_args: &RunArgs,
        env_fn: fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let file_layer = match config_path {
            Some(path) => load_file_layer(path)?,
            None => ConfigLayer::default(),
        };
        let env_layer = load_env_layer(env_fn)?;
        let cli_layer = cli_layer_from(cli_args);

        let merged = merge_layers(file_layer, env_layer, cli_layer);

        let hosts_path = merged.hosts.ok_or_else(|| {
            anyhow::anyhow!("hosts file is required (via --hosts, FANOUT_HOSTS, or config file)")
        })?;
        let command = merged.cmd.ok_or_else(|| {
            anyhow::anyhow!("command is required (via --cmd, FANOUT_CMD, or config file)")
        })?;

        let credential = match (merged.key, merged.password) {
            (Some(key), _) => Some(Credential::Key(key)),
            (None, Some(password)) => Some(Credential::Password(password)),
            (None, None) if merged.look_for_keys.unwrap_or(false) => Some(Credential::Ambient),
            (None, None) => None,
        };

        Ok(FanoutConfig {
            hosts_path,
            command,
            user: merged.user,
            port: merged.port.unwrap_or(DEFAULT_PORT),
            credential,
            privileged: merged.sudo.unwrap_or(false),
            login_shell: merged.login_shell.unwrap_or(false),
            pty: merged.pty.unwrap_or(false),
            concurrency: merged.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
            retries: merged.retries.unwrap_or(DEFAULT_RETRIES),
            connect_timeout_sec: merged
                .connect_timeout
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SEC),
            banner_timeout_sec: merged
                .banner_timeout
                .unwrap_or(DEFAULT_BANNER_TIMEOUT_SEC),
            exec_timeout_sec: merged.exec_timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT_SEC),
            out: merged.out.unwrap_or_else(|| PathBuf::from(DEFAULT_OUT)),
            host_key_policy: if merged.strict_host_keys.unwrap_or(false) {
                HostKeyPolicy::Strict
            } else {
                HostKeyPolicy::AcceptNew
            },
            ssh_cmd: merged
                .ssh_cmd
                .unwrap_or_else(|| DEFAULT_SSH_CMD.to_owned()),
            sshpass_cmd: merged
                .sshpass_cmd
                .unwrap_or_else(|| DEFAULT_SSHPASS_CMD.to_owned()),
            control_dir: merged.control_dir,
            log_level: merged.log_level,
            log_file: merged.log_file,
        })
    }
}

fn load_file_layer(path: &Path) -> anyhow::Result<ConfigLayer> {
    let contents = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
    let fc: FileConfig = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
    Ok(ConfigLayer {
        hosts: fc.hosts,
        cmd: fc.cmd,
        user: fc.user,
        port: fc.port,
        key: fc.key,
        password: fc.password,
        look_for_keys: fc.look_for_keys,
        sudo: fc.sudo,
        login_shell: fc.login_shell,
        pty: fc.pty,
        concurrency: fc.concurrency,
        retries: fc.retries,
        connect_timeout: fc.connect_timeout,
        banner_timeout: fc.banner_timeout,
        exec_timeout: fc.exec_timeout,
        out: fc.out,
        strict_host_keys: fc.strict_host_keys,
        ssh_cmd: fc.ssh_cmd,
        sshpass_cmd: fc.sshpass_cmd,
        control_dir: fc.control_dir,
        log_level: fc.log_level,
        log_file: fc.log_file,
    })
}

fn real_env_var(suffix: &str) -> Option<String> {
    let key = format!("{ENV_PREFIX}{suffix}");
    env::var(&key).ok().filter(|v| !v.is_empty())
}

fn load_env_layer(env_fn: fn(&str) -> Option<String>) -> Result<ConfigLayer, FanoutError> {
    Ok(ConfigLayer {
        hosts: env_fn("HOSTS").map(PathBuf::from),
        cmd: env_fn("CMD"),
        user: env_fn("USER"),
        port: parse_env(env_fn, "PORT")?,
        key: env_fn("KEY").map(PathBuf::from),
        password: env_fn("PASSWORD"),
        look_for_keys: parse_env(env_fn, "LOOK_FOR_KEYS")?,
        sudo: parse_env(env_fn, "SUDO")?,
        login_shell: parse_env(env_fn, "LOGIN_SHELL")?,
        pty: parse_env(env_fn, "PTY")?,
        concurrency: parse_env(env_fn, "CONCURRENCY")?,
        retries: parse_env(env_fn, "RETRIES")?,
        connect_timeout: parse_env(env_fn, "CONNECT_TIMEOUT")?,
        banner_timeout: parse_env(env_fn, "BANNER_TIMEOUT")?,
        exec_timeout: parse_env(env_fn, "EXEC_TIMEOUT")?,
        out: env_fn("OUT").map(PathBuf::from),
        strict_host_keys: parse_env(env_fn, "STRICT_HOST_KEYS")?,
        ssh_cmd: env_fn("SSH_CMD"),
        sshpass_cmd: env_fn("SSHPASS_CMD"),
        control_dir: env_fn("CONTROL_DIR").map(PathBuf::from),
        log_level: env_fn("LOG_LEVEL"),
        log_file: env_fn("LOG_FILE").map(PathBuf::from),
    })
}

fn parse_env<T>(env_fn: fn(&str) -> Option<String>, suffix: &str) -> Result<Option<T>, FanoutError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_fn(suffix) {
        Some(s) => s
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| FanoutError::ConfigEnvParseError {
                var: format!("{ENV_PREFIX}{suffix}"),
                detail: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn flag(set: bool) -> Option<bool> {
    if set { Some(true) } else { None }
}

fn cli_layer_from(args: &RunArgs) -> ConfigLayer {
    ConfigLayer {
        hosts: args.hosts.clone(),
        cmd: args.cmd.clone(),
        user: args.user.clone(),
        port: args.port,
        key: args.key.clone(),
        password: args.password.clone(),
        look_for_keys: flag(args.look_for_keys),
        sudo: flag(args.sudo),
        login_shell: flag(args.login_shell),
        pty: flag(args.pty),
        concurrency: args.concurrency,
        retries: args.retries,
        connect_timeout: args.connect_timeout,
        banner_timeout: args.banner_timeout,
        exec_timeout: args.exec_timeout,
        out: args.out.clone(),
        strict_host_keys: flag(args.strict_host_keys),
        ssh_cmd: args.ssh_cmd.clone(),
        sshpass_cmd: args.sshpass_cmd.clone(),
        control_dir: args.control_dir.clone(),
        log_level: args.log_level.clone(),
        log_file: args.log_file.clone(),
    }
}

/// Merge three layers. For each field, pick CLI first, then env, then file.
fn merge_layers(file: ConfigLayer, env: ConfigLayer, cli: ConfigLayer) -> ConfigLayer {
    ConfigLayer {
        hosts: cli.hosts.or(env.hosts).or(file.hosts),
        cmd: cli.cmd.or(env.cmd).or(file.cmd),
        user: cli.user.or(env.user).or(file.user),
        port: cli.port.or(env.port).or(file.port),
        key: cli.key.or(env.key).or(file.key),
        password: cli.password.or(env.password).or(file.password),
        look_for_keys: cli
            .look_for_keys
            .or(env.look_for_keys)
            .or(file.look_for_keys),
        sudo: cli.sudo.or(env.sudo).or(file.sudo),
        login_shell: cli.login_shell.or(env.login_shell).or(file.login_shell),
        pty: cli.pty.or(env.pty).or(file.pty),
        concurrency: cli.concurrency.or(env.concurrency).or(file.concurrency),
        retries: cli.retries.or(env.retries).or(file.retries),
        connect_timeout: cli
            .connect_timeout
            .or(env.connect_timeout)
            .or(file.connect_timeout),
        banner_timeout: cli
            .banner_timeout
            .or(env.banner_timeout)
            .or(file.banner_timeout),
        exec_timeout: cli.exec_timeout.or(env.exec_timeout).or(file.exec_timeout),
        out: cli.out.or(env.out).or(file.out),
        strict_host_keys: cli
            .strict_host_keys
            .or(env.strict_host_keys)
            .or(file.strict_host_keys),
        ssh_cmd: cli.ssh_cmd.or(env.ssh_cmd).or(file.ssh_cmd),
        sshpass_cmd: cli.sshpass_cmd.or(env.sshpass_cmd).or(file.sshpass_cmd),
        control_dir: cli.control_dir.or(env.control_dir).or(file.control_dir),
        log_level: cli.log_level.or(env.log_level).or(file.log_level),
        log_file: cli.log_file.or(env.log_file).or(file.log_file),
    }
}
