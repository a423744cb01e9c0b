//! Arbor aggregate crate that re-exports the main components for downstream
//! users.

pub use arbor_assembler as assembler;
pub use arbor_bus as bus;
pub use arbor_cli as cli;
pub use arbor_config as config;
pub use arbor_core as core;
pub use arbor_executor as executor;
pub use arbor_paper as paper;
pub use arbor_risk as risk;
pub use arbor_scanner as scanner;

/// Convenience entrypoint to run the CLI directly from the facade crate.
pub async fn run_cli() -> anyhow::Result<()> {
    arbor_cli::run_app().await
}

/// Convenience prelude to pull commonly used items into scope.
pub mod prelude {
    pub use arbor_assembler::{TradeAssembler, TradeStore};
    pub use arbor_bus::{Bus, BusError, BusResult, MemoryBus, ShutdownSignal, StreamEntry};
    pub use arbor_config::{load_config, AppConfig};
    pub use arbor_core::*;
    pub use arbor_executor::{protective_reorder, realized_pnl, RouterExecutor, StreamSelection};
    pub use arbor_paper::OrderSimulator;
    pub use arbor_risk::{Reason, RiskEngine, Verdict};
    pub use arbor_scanner::{Scanner, TokenBucket};
}
