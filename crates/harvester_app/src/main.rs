//! `harvester`: runs harvest cycles against a work queue and a remote
//! rendering service until the queue is empty or Ctrl-C is pressed.
mod cli;
mod settings;
mod wiring;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use engine_logging::{engine_error, engine_info, engine_warn, LogDestination};
use harvester_core::HaltReason;
use harvester_engine::Orchestrator;

use crate::cli::Cli;
use crate::settings::AppSettings;

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", AppSettings::default().to_ron()?);
        return Ok(());
    }

    let mut settings = AppSettings::load(&cli.config)?;
    if let Some(max) = cli.max_concurrency {
        settings.harvest.max_concurrency = max;
        settings.harvest.validate()?;
    }

    let destination = match &settings.log_file {
        Some(path) => LogDestination::Both(path),
        None => LogDestination::Terminal,
    };
    engine_logging::initialize(destination, cli.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;
    runtime.block_on(run(settings, Duration::from_secs(cli.status_interval)))
}

async fn run(settings: AppSettings, status_interval: Duration) -> Result<()> {
    let orchestrator = Orchestrator::new(wiring::capabilities(&settings)?);
    orchestrator
        .start(settings.harvest.clone())
        .context("could not start the harvest run")?;

    let mut status = tokio::time::interval(status_interval);
    // The first tick completes immediately.
    status.tick().await;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut signal_armed = true;

    loop {
        tokio::select! {
            _ = orchestrator.wait() => break,
            result = &mut ctrl_c, if signal_armed => {
                signal_armed = false;
                match result {
                    Ok(()) => {
                        engine_info!("ctrl-c received; draining live sessions");
                        let stopper = orchestrator.clone();
                        tokio::spawn(async move { stopper.stop().await });
                    }
                    Err(err) => engine_warn!("cannot listen for ctrl-c: {}", err),
                }
            }
            _ = status.tick() => log_status(&orchestrator),
        }
    }

    let summary = orchestrator.state();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.halt_reason == Some(HaltReason::FailureCeiling) {
        bail!(
            "run halted after {} consecutive work source failures",
            summary.consecutive_errors
        );
    }
    Ok(())
}

fn log_status(orchestrator: &Orchestrator) {
    let snapshot = orchestrator.state();
    match serde_json::to_string(&snapshot) {
        Ok(json) => engine_info!("status: {}", json),
        Err(err) => engine_error!("could not encode status: {}", err),
    }
}
