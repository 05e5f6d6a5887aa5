use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;

use certflash::cli::Cli;
use certflash::config::{loader, validator};
use certflash::orchestrator::{EXIT_ABORTED, EXIT_INTERRUPTED};
use certflash::{
    Console, DeviceTarget, LogCollector, ProcessRunner, ProvisionOrchestrator, ToolRunner,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            ExitCode::from(EXIT_ABORTED)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    let config_path = loader::discover_config(cli.config.as_deref(), &cwd)
        .context("Failed to load configuration")?;
    let mut config = loader::load_or_default(config_path.as_deref(), &cwd)
        .context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.make_absolute().context("Failed to resolve configured directories")?;
    validator::validate_config(&config).context("Invalid configuration")?;

    let echo_level = cli.verbose.then_some(log::Level::Debug);
    let log_collector = LogCollector::new(&config.log_dir, echo_level)
        .map_err(anyhow::Error::msg)
        .context("Failed to start session log")?;
    let flusher = log_collector.clone();
    let session_log = log_collector.session_log_path().to_path_buf();
    log_collector.install().map_err(anyhow::Error::msg)?;
    log::info!("[Main] certflash {} session log: {}", certflash::VERSION, session_log.display());
    match &config_path {
        Some(path) => log::info!("[Main] Configuration loaded from {}", path.display()),
        None => log::info!("[Main] No configuration file found, using defaults"),
    }

    let target = DeviceTarget::new(&cli.port, &config.build_env)?;

    // Ctrl-C kills the running tool; the pipeline then stops as Interrupted
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("[Main] Interrupt received, stopping");
            let _ = cancel_tx.send(true);
            // Second Ctrl-C exits immediately
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(i32::from(EXIT_INTERRUPTED));
            }
        }
    });

    let runner: Arc<dyn ToolRunner> = Arc::new(ProcessRunner::new(cancel_rx));
    let log_dir = config.log_dir.clone();
    let orchestrator = ProvisionOrchestrator::new(
        config,
        target,
        cli.run_options(),
        runner,
        Console::stdout(),
    )?;

    let report = orchestrator.run().await;

    match report.write_summary(&log_dir) {
        Ok(path) => log::info!("[Main] Run summary written to {}", path.display()),
        Err(e) => log::warn!("[Main] Could not write run summary: {}", e),
    }

    if let Err(e) = flusher.wait_for_empty() {
        eprintln!("WARNING: session log may be incomplete: {}", e);
    }

    Ok(report.exit_code())
}
