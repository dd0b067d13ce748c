use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use argus_metrics::{Config, Engine};

#[derive(Debug, Parser)]
#[command(name = "argus", about = "Metrics aggregation and alert evaluation engine")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "argus.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let grace = config.settings().shutdown_grace;
    let engine = Engine::start(config).context("starting engine")?;

    let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        .context("installing SIGHUP handler")?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                break;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading configuration");
                match Config::load(&args.config) {
                    Ok(config) => {
                        if let Err(err) = engine.reload(config) {
                            error!(error = %err, "reload failed, keeping previous configuration");
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "cannot read configuration, keeping previous");
                    }
                }
            }
        }
    }

    engine.shutdown(grace).await;
    Ok(())
}
