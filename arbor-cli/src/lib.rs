//! Command-line entrypoint wiring for the arbor pipeline.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use arbor_bus::ShutdownSignal;
use arbor_config::{load_config, AppConfig};
use arbor_core::TradeMode;

pub mod feed;
pub mod pipeline;
pub mod telemetry;

#[derive(Parser)]
#[command(name = "arbor", about = "Cross-venue arbitrage paper pipeline", version)]
pub struct Cli {
    /// Configuration environment (merges config/{env}.toml).
    #[arg(long, global = true)]
    pub env: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the full pipeline in-process on the memory bus.
    Run {
        /// Override the default auto-trade toggle.
        #[arg(long)]
        auto_trade: Option<bool>,
        /// Override the default paper/live mode toggle.
        #[arg(long)]
        mode: Option<TradeMode>,
        /// Publish a synthetic top-of-book feed instead of waiting on
        /// external adapters.
        #[arg(long)]
        demo: bool,
    },
}

/// Parse arguments, load configuration and dispatch.
pub async fn run_app() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.env.as_deref())?;
    telemetry::init_tracing(&config.log_level)?;

    match cli.command {
        Command::Run {
            auto_trade,
            mode,
            demo,
        } => {
            if let Some(auto_trade) = auto_trade {
                config.toggles.auto_trade = auto_trade;
            }
            if let Some(mode) = mode {
                config.toggles.mode = mode.to_string();
            }
            run_pipeline(config, demo).await
        }
    }
}

async fn run_pipeline(config: AppConfig, demo: bool) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    shutdown.listen_for_ctrl_c();
    let pipeline = pipeline::Pipeline::spawn(&config, demo, shutdown.clone()).await?;
    info!("pipeline running, ctrl-c to stop");
    shutdown.wait().await;
    pipeline.join().await;
    Ok(())
}
