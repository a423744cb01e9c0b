//! Layered configuration loading utilities.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use arbor_core::{Toggles, TradeMode};

/// Root application configuration deserialized from layered sources.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub toggles: TogglesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            log_level: default_log_level(),
            scanner: ScannerConfig::default(),
            risk: RiskConfig::default(),
            executor: ExecutorConfig::default(),
            toggles: TogglesConfig::default(),
        }
    }
}

/// Scanner cadence, universe bounds, admission thresholds and emit limits.
#[derive(Clone, Debug, Deserialize)]
pub struct ScannerConfig {
    /// The two venues whose books are compared.
    #[serde(default = "default_venues")]
    pub venues: Vec<String>,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_max_symbols")]
    pub max_symbols: usize,
    #[serde(default = "default_discover_every_sec")]
    pub discover_every_sec: u64,
    #[serde(default = "default_min_gross_bps")]
    pub min_gross_bps: Decimal,
    #[serde(default = "default_min_net_bps")]
    pub min_net_bps: Decimal,
    #[serde(default)]
    pub min_abs_spread: Decimal,
    #[serde(default)]
    pub min_notional: Decimal,
    #[serde(default = "default_max_book_age_ms")]
    pub max_book_age_ms: i64,
    #[serde(default = "default_emit_rate_per_sec")]
    pub emit_rate_per_sec: f64,
    #[serde(default = "default_emit_burst")]
    pub emit_burst: u32,
    /// Per-venue taker fee in bps, stamped on emitted legs.
    #[serde(default)]
    pub taker_bps: HashMap<String, Decimal>,
    /// Size stamped on each emitted leg.
    #[serde(default = "default_order_size")]
    pub order_size: Decimal,
    /// Stream candidate opportunities are appended to; point this at
    /// `scanner.to.risk` to route the output through the risk engine.
    #[serde(default = "default_scanner_output")]
    pub output_stream: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            venues: default_venues(),
            scan_interval_ms: default_scan_interval_ms(),
            max_symbols: default_max_symbols(),
            discover_every_sec: default_discover_every_sec(),
            min_gross_bps: default_min_gross_bps(),
            min_net_bps: default_min_net_bps(),
            min_abs_spread: Decimal::ZERO,
            min_notional: Decimal::ZERO,
            max_book_age_ms: default_max_book_age_ms(),
            emit_rate_per_sec: default_emit_rate_per_sec(),
            emit_burst: default_emit_burst(),
            taker_bps: HashMap::new(),
            order_size: default_order_size(),
            output_stream: default_scanner_output(),
        }
    }
}

impl ScannerConfig {
    /// Taker fee for one venue; venues without an entry trade free.
    #[must_use]
    pub fn taker_fee_bps(&self, venue: &str) -> Decimal {
        self.taker_bps.get(venue).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Risk-engine policy values.
#[derive(Clone, Debug, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_edge_min_bps")]
    pub edge_min_bps: Decimal,
    #[serde(default)]
    pub net_min_bps: Decimal,
    #[serde(default = "default_max_total_size")]
    pub max_total_size: Decimal,
    #[serde(default = "default_true")]
    pub require_both_sides: bool,
    /// When false, paper-mode opportunities are rejected. The name is
    /// inherited from the deployment's option table; see DESIGN.md.
    #[serde(default = "default_true")]
    pub allow_paper_only: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            edge_min_bps: default_edge_min_bps(),
            net_min_bps: Decimal::ZERO,
            max_total_size: default_max_total_size(),
            require_both_sides: true,
            allow_paper_only: true,
        }
    }
}

/// Executor thresholds and cadences.
#[derive(Clone, Debug, Deserialize)]
pub struct ExecutorConfig {
    /// Trades are emitted only when realized PnL strictly exceeds this.
    #[serde(default)]
    pub min_realized_pnl: Decimal,
    /// Entries whose first fill never arrives are abandoned after this long.
    #[serde(default = "default_inflight_ttl_ms")]
    pub inflight_ttl_ms: i64,
    #[serde(default = "default_toggle_refresh_ms")]
    pub toggle_refresh_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_realized_pnl: Decimal::ZERO,
            inflight_ttl_ms: default_inflight_ttl_ms(),
            toggle_refresh_ms: default_toggle_refresh_ms(),
        }
    }
}

/// Default toggle values applied when the store keys are unset.
#[derive(Clone, Debug, Deserialize)]
pub struct TogglesConfig {
    #[serde(default)]
    pub auto_trade: bool,
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl Default for TogglesConfig {
    fn default() -> Self {
        Self {
            auto_trade: false,
            mode: default_mode(),
        }
    }
}

impl TogglesConfig {
    /// Resolve into the runtime toggle pair; an unparseable mode string
    /// degrades to paper.
    #[must_use]
    pub fn resolve(&self) -> Toggles {
        Toggles {
            auto_trade: self.auto_trade,
            mode: self.mode.parse().unwrap_or(TradeMode::Paper),
        }
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_venues() -> Vec<String> {
    vec!["binance".to_string(), "bybit".to_string()]
}

fn default_scan_interval_ms() -> u64 {
    250
}

fn default_max_symbols() -> usize {
    50
}

fn default_discover_every_sec() -> u64 {
    30
}

fn default_min_gross_bps() -> Decimal {
    Decimal::from(10)
}

fn default_min_net_bps() -> Decimal {
    Decimal::ONE
}

fn default_max_book_age_ms() -> i64 {
    5_000
}

fn default_emit_rate_per_sec() -> f64 {
    5.0
}

fn default_emit_burst() -> u32 {
    10
}

fn default_order_size() -> Decimal {
    Decimal::ONE
}

fn default_scanner_output() -> String {
    "arb.opportunities".to_string()
}

fn default_edge_min_bps() -> Decimal {
    Decimal::from(20)
}

fn default_max_total_size() -> Decimal {
    Decimal::from(10)
}

fn default_inflight_ttl_ms() -> i64 {
    60_000
}

fn default_toggle_refresh_ms() -> u64 {
    500
}

fn default_mode() -> String {
    "paper".to_string()
}

fn default_true() -> bool {
    true
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `ARBOR__`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    let base_path = Path::new("config");

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(false));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("ARBOR")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.scanner.venues.len(), 2);
        assert_eq!(cfg.scanner.min_gross_bps, dec!(10));
        assert_eq!(cfg.risk.edge_min_bps, dec!(20));
        assert!(cfg.risk.allow_paper_only);
        assert!(!cfg.toggles.auto_trade);
        assert_eq!(cfg.toggles.resolve().mode, TradeMode::Paper);
    }

    #[test]
    fn missing_taker_entry_means_free_venue() {
        let mut cfg = ScannerConfig::default();
        cfg.taker_bps.insert("binance".into(), dec!(7.5));
        assert_eq!(cfg.taker_fee_bps("binance"), dec!(7.5));
        assert_eq!(cfg.taker_fee_bps("kraken"), Decimal::ZERO);
    }

    #[test]
    fn unparseable_mode_degrades_to_paper() {
        let cfg = TogglesConfig {
            auto_trade: true,
            mode: "turbo".into(),
        };
        let toggles = cfg.resolve();
        assert!(toggles.auto_trade);
        assert_eq!(toggles.mode, TradeMode::Paper);
    }
}
