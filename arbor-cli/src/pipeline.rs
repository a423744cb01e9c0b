//! In-process assembly of the full paper pipeline on one memory bus.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use arbor_assembler::{TradeAssembler, TradeStore};
use arbor_bus::{toggles, Bus, MemoryBus, ShutdownSignal};
use arbor_config::AppConfig;
use arbor_executor::RouterExecutor;
use arbor_paper::OrderSimulator;
use arbor_risk::RiskEngine;
use arbor_scanner::Scanner;

use crate::feed::SyntheticFeed;

/// Handles to the spawned component tasks.
pub struct Pipeline {
    pub bus: Arc<MemoryBus>,
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl Pipeline {
    /// Seed the toggle store from configuration, build every component, and
    /// spawn each as its own task.
    pub async fn spawn(
        config: &AppConfig,
        demo_feed: bool,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        let bus = Arc::new(MemoryBus::new());
        let defaults = config.toggles.resolve();
        toggles::store_auto_trade(bus.as_ref(), defaults.auto_trade).await?;
        toggles::store_mode(bus.as_ref(), defaults.mode).await?;

        fs::create_dir_all(&config.data_path)
            .with_context(|| format!("failed to create data directory {:?}", config.data_path))?;
        let store = TradeStore::open(config.data_path.join("trades.db"))
            .context("failed to open trade store")?;

        let scanner = Scanner::new(bus.clone() as Arc<dyn Bus>, config.scanner.clone(), defaults)?;
        let risk = RiskEngine::new(bus.clone() as Arc<dyn Bus>, config.risk.clone());
        let executor = RouterExecutor::new(
            bus.clone() as Arc<dyn Bus>,
            config.executor.clone(),
            defaults,
        );
        let simulator = OrderSimulator::new(bus.clone() as Arc<dyn Bus>);
        let assembler = TradeAssembler::new(bus.clone() as Arc<dyn Bus>, store);

        let mut tasks: Vec<(&'static str, JoinHandle<Result<()>>)> = Vec::new();
        if demo_feed {
            let venues: [String; 2] = config
                .scanner
                .venues
                .clone()
                .try_into()
                .map_err(|_| anyhow::anyhow!("demo feed requires exactly two venues"))?;
            let feed = SyntheticFeed::new(bus.clone() as Arc<dyn Bus>, venues);
            let sd = shutdown.clone();
            tasks.push(("feed", tokio::spawn(async move { feed.run(sd).await })));
        }
        {
            let sd = shutdown.clone();
            tasks.push(("scanner", tokio::spawn(async move { scanner.run(sd).await })));
        }
        {
            let sd = shutdown.clone();
            tasks.push(("risk", tokio::spawn(async move { risk.run(sd).await })));
        }
        {
            let sd = shutdown.clone();
            tasks.push(("executor", tokio::spawn(async move { executor.run(sd).await })));
        }
        {
            let sd = shutdown.clone();
            tasks.push(("simulator", tokio::spawn(async move { simulator.run(sd).await })));
        }
        {
            let sd = shutdown.clone();
            tasks.push(("assembler", tokio::spawn(async move { assembler.run(sd).await })));
        }

        info!(auto_trade = defaults.auto_trade, mode = %defaults.mode, "pipeline spawned");
        Ok(Self { bus, tasks })
    }

    /// Wait for every component to wind down.
    pub async fn join(self) {
        for (name, task) in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(component = name, error = %err, "component failed"),
                Err(err) => warn!(component = name, error = %err, "component task panicked"),
            }
        }
    }
}
