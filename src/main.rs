mod api;
mod cli;
mod config;
mod error;
mod log_sink;
mod metadata;
mod poller;
mod properties;
mod proxy;
mod quality_gate;
mod runner;
mod scanner;
mod status;
#[cfg(test)]
mod test_support;
mod tls;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use config::RunConfig;
use error::RunError;
use log_sink::Logger;
use runner::Run;
use status::TaskStatus;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("Invalid log level: {}", cli.log_level))?;
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    cli.validate()?;

    let config = RunConfig::from_cli(&cli);
    let run = Run::new(config, Logger::tracing("sonar-scanner"))
        .context("Failed to prepare the sonar scanner run")?;

    let wait = cli
        .wait_for_quality_gate
        .then_some(cli.quality_gate_wait_timeout);

    let outcome = tokio::select! {
        outcome = run.execute(wait) => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping the sonar scanner");
            anyhow::bail!("Interrupted");
        }
    };

    let status = match outcome {
        Ok(status) => status,
        Err(RunError::WaitTimeout) => {
            error!(
                timeout = ?cli.quality_gate_wait_timeout,
                "Timed out waiting for the quality gate"
            );
            anyhow::bail!("Timed out waiting for the quality gate");
        }
        Err(e) => return Err(e).context("Sonar scanner run failed"),
    };

    let Some(status) = status else {
        info!("Not waiting for the quality gate, scanner finished");
        return Ok(());
    };

    if status.task_status != TaskStatus::Success {
        anyhow::bail!(
            "Analysis task failed with the status '{}'",
            status.task_status
        );
    }
    if !status.passed() {
        anyhow::bail!(
            "Quality gate failed with the status '{}'",
            status.analysis_status
        );
    }

    info!(
        quality_gate = %status.analysis_status,
        "Quality gate passed"
    );
    Ok(())
}
