use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use fanout::cancel::{self, CancellationController};
use fanout::cli::{Cli, Commands};
use fanout::config::FanoutConfig;
use fanout::runner;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => {
            let config_path = args.config.clone();
            let config = FanoutConfig::load(config_path.as_deref(), &args)?;

            fanout::logging::init(config.log_level.as_deref(), config.log_file.as_deref())?;

            config.validate()?;

            info!(
                hosts = %config.hosts_path.display(),
                concurrency = config.concurrency,
                retries = config.retries,
                connect_timeout_sec = config.connect_timeout_sec,
                exec_timeout_sec = config.exec_timeout_sec,
                privileged = config.privileged,
                login_shell = config.login_shell,
                out = %config.out.display(),
                "config loaded"
            );

            cancel::install_interrupt_handler()?;
            let cancel = CancellationController::with_process_signals();

            let report = runner::run_fanout(&config, &cancel)?;

            if report.interrupted {
                eprintln!("Interrupted by user.");
            }
            println!("{}; report -> {}", report.summary(), config.out.display());

            Ok(())
        }
    }
}
