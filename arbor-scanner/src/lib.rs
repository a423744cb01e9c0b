//! Cross-venue opportunity scanner.
//!
//! On a fixed cadence the scanner reads the shared top-of-book view for its
//! discovered universe, evaluates both directional paths per instrument, and
//! appends qualifying opportunities to its output stream. Nothing in here
//! aborts the loop: bad quotes, stale books and bus hiccups become counters
//! and the tick moves on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use arbor_bus::{quote_key, toggles, Bus, ShutdownSignal};
use arbor_config::ScannerConfig;
use arbor_core::edge::{evaluate_path, EdgeBreakdown};
use arbor_core::{
    Leg, Opportunity, OpportunityPayload, Px, QuoteSnapshot, Side, TimestampMs, Toggles, TradeMode,
};

mod limiter;
mod universe;

pub use limiter::TokenBucket;
pub use universe::{discover, Universe, UniverseEntry};

const READ_BACKOFF: Duration = Duration::from_millis(300);

/// Counters exposed by the scanner.
pub struct ScannerMetrics {
    registry: Registry,
    opportunities_total: IntCounter,
    drops_total: IntCounterVec,
}

impl ScannerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let opportunities_total =
            IntCounter::new("opportunities_total", "Opportunities appended to the bus").unwrap();
        let drops_total = IntCounterVec::new(
            Opts::new("drops_total", "Candidate paths dropped before emission"),
            &["reason"],
        )
        .unwrap();
        registry
            .register(Box::new(opportunities_total.clone()))
            .unwrap();
        registry.register(Box::new(drops_total.clone())).unwrap();
        Self {
            registry,
            opportunities_total,
            drops_total,
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    fn inc_opportunity(&self) {
        self.opportunities_total.inc();
    }

    fn inc_drop(&self, reason: &str) {
        self.drops_total.with_label_values(&[reason]).inc();
    }

    /// Current value of one drop counter (used by tests and health checks).
    #[must_use]
    pub fn drops(&self, reason: &str) -> u64 {
        self.drops_total.with_label_values(&[reason]).get()
    }

    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.opportunities_total.get()
    }
}

impl Default for ScannerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// One directional round trip under evaluation.
struct PathCandidate<'a> {
    buy_venue: &'a str,
    sell_venue: &'a str,
    buy_px: Px,
    sell_px: Px,
}

/// The scanner service. Single-threaded over its own state; all shared data
/// lives on the bus.
pub struct Scanner {
    bus: Arc<dyn Bus>,
    config: ScannerConfig,
    venues: [String; 2],
    metrics: ScannerMetrics,
    universe: Universe,
    limiter: TokenBucket,
    last_discover_ms: Option<TimestampMs>,
    mode: TradeMode,
    default_auto_trade: bool,
}

impl Scanner {
    pub fn new(bus: Arc<dyn Bus>, config: ScannerConfig, defaults: Toggles) -> Result<Self> {
        let venues: [String; 2] = config
            .venues
            .clone()
            .try_into()
            .map_err(|v: Vec<String>| anyhow!("scanner requires exactly two venues, got {}", v.len()))?;
        let limiter = TokenBucket::new(config.emit_burst, config.emit_rate_per_sec);
        Ok(Self {
            bus,
            config,
            venues,
            metrics: ScannerMetrics::new(),
            universe: Universe::default(),
            limiter,
            last_discover_ms: None,
            mode: defaults.mode,
            default_auto_trade: defaults.auto_trade,
        })
    }

    #[must_use]
    pub fn metrics(&self) -> &ScannerMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    /// Re-intersect the venues' symbol lists.
    pub async fn refresh_universe(&mut self, now: TimestampMs) {
        self.universe = universe::discover(
            self.bus.as_ref(),
            &self.venues,
            self.config.max_symbols,
        )
        .await;
        self.last_discover_ms = Some(now);
    }

    fn discovery_due(&self, now: TimestampMs) -> bool {
        // Keep looking every tick until adapters publish something.
        if self.universe.is_empty() {
            return true;
        }
        match self.last_discover_ms {
            None => true,
            Some(last) => now - last >= (self.config.discover_every_sec as i64) * 1000,
        }
    }

    /// One scan tick over the current universe.
    pub async fn scan_once(&mut self, now: TimestampMs) {
        if self.universe.is_empty() {
            self.metrics.inc_drop("no_universe");
            return;
        }

        // The mode toggle decides the paper flag stamped on each emission.
        let toggles = toggles::load(
            self.bus.as_ref(),
            Toggles {
                auto_trade: self.default_auto_trade,
                mode: self.mode,
            },
        )
        .await;
        self.mode = toggles.mode;

        let mut keys = Vec::with_capacity(self.universe.len() * 2);
        for entry in &self.universe.entries {
            keys.push(quote_key(&self.venues[0], &entry.natives[0]));
            keys.push(quote_key(&self.venues[1], &entry.natives[1]));
        }
        let values = match self.bus.kv_mget(&keys).await {
            Ok(values) => values,
            Err(err) => {
                warn!(error = %err, "quote multi-get failed");
                return;
            }
        };

        let [venue_first, venue_second] = self.venues.clone();
        let entries: Vec<UniverseEntry> = self.universe.entries.clone();
        for (entry, pair) in entries.iter().zip(values.chunks(2)) {
            let (Some(raw_first), Some(raw_second)) = (&pair[0], &pair[1]) else {
                self.metrics.inc_drop("missing_quote");
                continue;
            };
            let (first, second) = match (
                serde_json::from_str::<QuoteSnapshot>(raw_first),
                serde_json::from_str::<QuoteSnapshot>(raw_second),
            ) {
                (Ok(first), Ok(second)) => (first, second),
                _ => {
                    self.metrics.inc_drop("parse_error");
                    continue;
                }
            };
            if first.age_ms(now) > self.config.max_book_age_ms
                || second.age_ms(now) > self.config.max_book_age_ms
            {
                self.metrics.inc_drop("stale_book");
                continue;
            }

            let paths = [
                PathCandidate {
                    buy_venue: &venue_first,
                    sell_venue: &venue_second,
                    buy_px: first.ask,
                    sell_px: second.bid,
                },
                PathCandidate {
                    buy_venue: &venue_second,
                    sell_venue: &venue_first,
                    buy_px: second.ask,
                    sell_px: first.bid,
                },
            ];
            for path in paths {
                self.evaluate_and_emit(&entry.canonical, &path, now).await;
            }
        }
    }

    async fn evaluate_and_emit(&mut self, canonical: &str, path: &PathCandidate<'_>, now: TimestampMs) {
        let buy_fee = self.config.taker_fee_bps(path.buy_venue);
        let sell_fee = self.config.taker_fee_bps(path.sell_venue);
        let Some(edge) = evaluate_path(
            path.buy_px,
            path.sell_px,
            buy_fee + sell_fee,
            Decimal::ZERO,
            Decimal::ZERO,
        ) else {
            self.metrics.inc_drop("degenerate_book");
            return;
        };
        if !self.admits(&edge) {
            self.metrics.inc_drop("below_threshold");
            return;
        }
        if !self.limiter.try_acquire(now) {
            self.metrics.inc_drop("rate_limited");
            return;
        }

        let opportunity = self.build_opportunity(canonical, path, &edge, buy_fee, sell_fee, now);
        let encoded = match serde_json::to_string(&opportunity) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "opportunity encode failed");
                return;
            }
        };
        match self.bus.append(&self.config.output_stream, &encoded).await {
            Ok(_) => {
                self.metrics.inc_opportunity();
                info!(
                    instrument = canonical,
                    buy = %path.buy_venue,
                    sell = %path.sell_venue,
                    gross_bps = %edge.gross_bps.round_dp(2),
                    net_bps = %edge.net_bps.round_dp(2),
                    "opportunity emitted"
                );
            }
            Err(err) => {
                warn!(error = %err, stream = %self.config.output_stream, "opportunity append failed");
            }
        }
    }

    fn admits(&self, edge: &EdgeBreakdown) -> bool {
        edge.gross_bps >= self.config.min_gross_bps
            && edge.net_bps >= self.config.min_net_bps
            && edge.abs_spread >= self.config.min_abs_spread
            && edge.mid >= self.config.min_notional
    }

    fn build_opportunity(
        &self,
        canonical: &str,
        path: &PathCandidate<'_>,
        edge: &EdgeBreakdown,
        buy_fee: Decimal,
        sell_fee: Decimal,
        now: TimestampMs,
    ) -> Opportunity {
        let leg = |venue: &str, side: Side, est_px: Px, fee: Decimal| Leg {
            exchange: venue.to_string(),
            instrument_id: canonical.to_string(),
            side,
            est_px,
            size: Some(self.config.order_size),
            fee_bps: Some(fee),
        };
        Opportunity {
            id: Uuid::new_v4().to_string(),
            ts: now,
            approved: None,
            risk: None,
            payload: OpportunityPayload {
                paper: self.mode.is_paper(),
                edge_bps: Some(edge.gross_bps),
                legs: vec![
                    leg(path.buy_venue, Side::Buy, path.buy_px, buy_fee),
                    leg(path.sell_venue, Side::Sell, path.sell_px, sell_fee),
                ],
                costs: None,
            },
        }
    }

    /// Main service loop: discover on cadence, scan every interval.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<()> {
        info!(
            venues = ?self.venues,
            interval_ms = self.config.scan_interval_ms,
            output = %self.config.output_stream,
            "scanner started"
        );
        loop {
            if shutdown.triggered() {
                break;
            }
            let now = match self.bus.now_ms().await {
                Ok(now) => now,
                Err(err) => {
                    warn!(error = %err, "bus clock read failed");
                    if !shutdown.sleep(READ_BACKOFF).await {
                        break;
                    }
                    continue;
                }
            };
            if self.discovery_due(now) {
                self.refresh_universe(now).await;
            }
            self.scan_once(now).await;
            if !shutdown
                .sleep(Duration::from_millis(self.config.scan_interval_ms))
                .await
            {
                break;
            }
        }
        info!("scanner stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_bus::{symbols_key, MemoryBus};
    use rust_decimal_macros::dec;

    fn config() -> ScannerConfig {
        let mut cfg = ScannerConfig::default();
        cfg.min_gross_bps = dec!(10);
        cfg.min_net_bps = Decimal::ZERO;
        cfg.max_book_age_ms = 5_000;
        cfg
    }

    fn defaults() -> Toggles {
        Toggles {
            auto_trade: false,
            mode: TradeMode::Paper,
        }
    }

    async fn seed_universe(bus: &MemoryBus, symbol: &str) {
        for venue in ["binance", "bybit"] {
            bus.kv_set(
                &symbols_key(venue),
                &serde_json::to_string(&[symbol]).unwrap(),
                None,
            )
            .await
            .unwrap();
        }
    }

    async fn seed_quote(bus: &MemoryBus, venue: &str, symbol: &str, bid: Decimal, ask: Decimal, ts: i64) {
        let quote = QuoteSnapshot { bid, ask, ts };
        bus.kv_set(
            &quote_key(venue, symbol),
            &serde_json::to_string(&quote).unwrap(),
            None,
        )
        .await
        .unwrap();
    }

    async fn scanner_with_universe(bus: Arc<MemoryBus>, cfg: ScannerConfig) -> Scanner {
        let mut scanner = Scanner::new(bus.clone(), cfg, defaults()).unwrap();
        let now = bus.now_ms().await.unwrap();
        scanner.refresh_universe(now).await;
        scanner
    }

    async fn emitted(bus: &MemoryBus) -> Vec<Opportunity> {
        bus.range("arb.opportunities", 0)
            .await
            .unwrap()
            .iter()
            .map(|entry| serde_json::from_str(&entry.data).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn profitable_spread_emits_one_directional_opportunity() {
        let bus = Arc::new(MemoryBus::new());
        seed_universe(&bus, "BTCUSDT").await;
        let now = bus.now_ms().await.unwrap();
        // Buy binance at 100, sell bybit at 101: ~99.5 bps gross.
        seed_quote(&bus, "binance", "BTCUSDT", dec!(99.5), dec!(100), now).await;
        seed_quote(&bus, "bybit", "BTCUSDT", dec!(101), dec!(101.5), now).await;

        let mut cfg = config();
        cfg.taker_bps.insert("binance".into(), dec!(5));
        cfg.taker_bps.insert("bybit".into(), dec!(5));
        let mut scanner = scanner_with_universe(bus.clone(), cfg).await;
        scanner.scan_once(now).await;

        let opportunities = emitted(&bus).await;
        assert_eq!(opportunities.len(), 1);
        let opp = &opportunities[0];
        assert!(opp.payload.paper);
        let buy = opp.payload.buy_leg().unwrap();
        let sell = opp.payload.sell_leg().unwrap();
        assert_eq!(buy.exchange, "binance");
        assert_eq!(buy.est_px, dec!(100));
        assert_eq!(buy.fee_bps, Some(dec!(5)));
        assert_eq!(sell.exchange, "bybit");
        assert_eq!(sell.est_px, dec!(101));
        assert!(opp.payload.edge_bps.unwrap() > dec!(90));
        assert_eq!(scanner.metrics().emitted(), 1);
    }

    #[tokio::test]
    async fn reversed_spread_takes_the_other_path() {
        let bus = Arc::new(MemoryBus::new());
        seed_universe(&bus, "BTCUSDT").await;
        let now = bus.now_ms().await.unwrap();
        // Bybit is cheap: buy bybit at 100, sell binance at 101.
        seed_quote(&bus, "binance", "BTCUSDT", dec!(101), dec!(101.5), now).await;
        seed_quote(&bus, "bybit", "BTCUSDT", dec!(99.5), dec!(100), now).await;

        let mut scanner = scanner_with_universe(bus.clone(), config()).await;
        scanner.scan_once(now).await;

        let opportunities = emitted(&bus).await;
        assert_eq!(opportunities.len(), 1);
        let buy = opportunities[0].payload.buy_leg().unwrap();
        assert_eq!(buy.exchange, "bybit");
    }

    #[tokio::test]
    async fn stale_book_is_dropped_and_counted() {
        let bus = Arc::new(MemoryBus::new());
        seed_universe(&bus, "BTCUSDT").await;
        let now = bus.now_ms().await.unwrap();
        let cfg = config();
        let stale_ts = now - cfg.max_book_age_ms - 1;
        seed_quote(&bus, "binance", "BTCUSDT", dec!(99.5), dec!(100), stale_ts).await;
        seed_quote(&bus, "bybit", "BTCUSDT", dec!(101), dec!(101.5), now).await;

        let mut scanner = scanner_with_universe(bus.clone(), cfg).await;
        scanner.scan_once(now).await;

        assert!(emitted(&bus).await.is_empty());
        assert_eq!(scanner.metrics().drops("stale_book"), 1);
    }

    #[tokio::test]
    async fn age_exactly_at_limit_is_still_fresh() {
        let bus = Arc::new(MemoryBus::new());
        seed_universe(&bus, "BTCUSDT").await;
        let now = bus.now_ms().await.unwrap();
        let cfg = config();
        let boundary_ts = now - cfg.max_book_age_ms;
        seed_quote(&bus, "binance", "BTCUSDT", dec!(99.5), dec!(100), boundary_ts).await;
        seed_quote(&bus, "bybit", "BTCUSDT", dec!(101), dec!(101.5), boundary_ts).await;

        let mut scanner = scanner_with_universe(bus.clone(), cfg).await;
        scanner.scan_once(now).await;

        assert_eq!(emitted(&bus).await.len(), 1);
        assert_eq!(scanner.metrics().drops("stale_book"), 0);
    }

    #[tokio::test]
    async fn edge_exactly_at_threshold_admits() {
        let bus = Arc::new(MemoryBus::new());
        seed_universe(&bus, "BTCUSDT").await;
        let now = bus.now_ms().await.unwrap();
        // Buy at 99, sell at 101: mid 100, gross exactly 200 bps.
        seed_quote(&bus, "binance", "BTCUSDT", dec!(98), dec!(99), now).await;
        seed_quote(&bus, "bybit", "BTCUSDT", dec!(101), dec!(102), now).await;

        let mut cfg = config();
        cfg.min_gross_bps = dec!(200);
        cfg.min_net_bps = dec!(200);
        let mut scanner = scanner_with_universe(bus.clone(), cfg).await;
        scanner.scan_once(now).await;

        assert_eq!(emitted(&bus).await.len(), 1);
    }

    #[tokio::test]
    async fn thin_edges_are_counted_below_threshold() {
        let bus = Arc::new(MemoryBus::new());
        seed_universe(&bus, "BTCUSDT").await;
        let now = bus.now_ms().await.unwrap();
        seed_quote(&bus, "binance", "BTCUSDT", dec!(99.99), dec!(100), now).await;
        seed_quote(&bus, "bybit", "BTCUSDT", dec!(100.01), dec!(100.02), now).await;

        let mut cfg = config();
        cfg.min_gross_bps = dec!(50);
        let mut scanner = scanner_with_universe(bus.clone(), cfg).await;
        scanner.scan_once(now).await;

        assert!(emitted(&bus).await.is_empty());
        assert_eq!(scanner.metrics().drops("below_threshold"), 2);
    }

    #[tokio::test]
    async fn emit_rate_is_token_bucket_limited() {
        let bus = Arc::new(MemoryBus::new());
        for venue in ["binance", "bybit"] {
            bus.kv_set(
                &symbols_key(venue),
                &serde_json::to_string(&["AAAUSDT", "BBBUSDT", "CCCUSDT"]).unwrap(),
                None,
            )
            .await
            .unwrap();
        }
        let now = bus.now_ms().await.unwrap();
        for symbol in ["AAAUSDT", "BBBUSDT", "CCCUSDT"] {
            seed_quote(&bus, "binance", symbol, dec!(99.5), dec!(100), now).await;
            seed_quote(&bus, "bybit", symbol, dec!(101), dec!(101.5), now).await;
        }

        let mut cfg = config();
        cfg.emit_burst = 2;
        cfg.emit_rate_per_sec = 0.0;
        let mut scanner = scanner_with_universe(bus.clone(), cfg).await;
        scanner.scan_once(now).await;

        assert_eq!(emitted(&bus).await.len(), 2);
        assert_eq!(scanner.metrics().drops("rate_limited"), 1);
    }

    #[tokio::test]
    async fn live_mode_toggle_stamps_live_opportunities() {
        let bus = Arc::new(MemoryBus::new());
        seed_universe(&bus, "BTCUSDT").await;
        bus.kv_set("toggles:mode", "live", None).await.unwrap();
        let now = bus.now_ms().await.unwrap();
        seed_quote(&bus, "binance", "BTCUSDT", dec!(99.5), dec!(100), now).await;
        seed_quote(&bus, "bybit", "BTCUSDT", dec!(101), dec!(101.5), now).await;

        let mut scanner = scanner_with_universe(bus.clone(), config()).await;
        scanner.scan_once(now).await;

        let opportunities = emitted(&bus).await;
        assert_eq!(opportunities.len(), 1);
        assert!(!opportunities[0].payload.paper);
    }

    #[tokio::test]
    async fn options_universe_emits_canonical_instrument_ids() {
        let bus = Arc::new(MemoryBus::new());
        bus.kv_set(
            &symbols_key("binance"),
            &serde_json::to_string(&["BTC-240927-19000-C"]).unwrap(),
            None,
        )
        .await
        .unwrap();
        bus.kv_set(
            &symbols_key("bybit"),
            &serde_json::to_string(&["BTC-27SEP24-19000-C"]).unwrap(),
            None,
        )
        .await
        .unwrap();
        let now = bus.now_ms().await.unwrap();
        seed_quote(&bus, "binance", "BTC-240927-19000-C", dec!(990), dec!(1000), now).await;
        seed_quote(&bus, "bybit", "BTC-27SEP24-19000-C", dec!(1010), dec!(1020), now).await;

        let mut scanner = scanner_with_universe(bus.clone(), config()).await;
        scanner.scan_once(now).await;

        let opportunities = emitted(&bus).await;
        assert_eq!(opportunities.len(), 1);
        for leg in &opportunities[0].payload.legs {
            assert_eq!(leg.instrument_id, "BTC-2024-09-27-19000-C");
        }
    }

    #[tokio::test]
    async fn empty_universe_does_no_work() {
        let bus = Arc::new(MemoryBus::new());
        let now = bus.now_ms().await.unwrap();
        let mut scanner = Scanner::new(bus.clone(), config(), defaults()).unwrap();
        scanner.refresh_universe(now).await;
        scanner.scan_once(now).await;
        assert!(emitted(&bus).await.is_empty());
        assert_eq!(scanner.metrics().drops("no_universe"), 1);
    }
}
