//! Run orchestration: turn a validated config into a written report.
//!
//! Everything here that can fail does so before the first host is
//! contacted, except writing the report at the end.

use tracing::info;

use crate::binary;
use crate::cancel::CancellationController;
use crate::config::FanoutConfig;
use crate::dispatcher::{Dispatcher, RunParams};
use crate::error::FanoutError;
use crate::executor::Timeouts;
use crate::hosts;
use crate::report::{self, Report};
use crate::ssh::{Credential, OpenSshClient, SshOptions};
use crate::wrap;

/// Run the configured command on every host and write the report.
///
/// Returns the report that was written. Expects `config.validate()` to have
/// passed.
pub fn run_fanout(
    config: &FanoutConfig,
    cancel: &CancellationController,
) -> Result<Report, FanoutError> {
    let hosts = hosts::load_hosts(&config.hosts_path)?;
    info!(
        hosts = hosts.len(),
        path = %config.hosts_path.display(),
        "host list loaded"
    );

    let credential = config
        .credential
        .clone()
        .ok_or(FanoutError::MissingCredential)?;
    let ssh_program = binary::resolve_program(&config.ssh_cmd)?;
    let sshpass_program = match credential {
        Credential::Password(_) => Some(binary::resolve_program(&config.sshpass_cmd)?),
        _ => None,
    };

    let client = OpenSshClient::new(
        SshOptions {
            ssh_program,
            sshpass_program,
            user: config.user.clone(),
            port: config.port,
            credential,
            host_key_policy: config.host_key_policy,
            banner_timeout: config.banner_timeout(),
            pty: config.pty,
        },
        config.control_dir.as_deref(),
    )?;

    let params = RunParams {
        command: config.command.clone(),
        remote_command: wrap::build_remote_command(&config.command, config.wrap_mode()),
        concurrency: config.concurrency as usize,
        max_retries: config.retries,
        timeouts: Timeouts {
            connect: config.connect_timeout(),
            exec: config.exec_timeout(),
        },
    };

    let report = Dispatcher::new(&client, cancel).run(&hosts, &params);
    report::write_report(&report, &config.out)?;
    info!(path = %config.out.display(), interrupted = report.interrupted, "report written");

    Ok(report)
}
