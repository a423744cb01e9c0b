//! Independent trade reconstruction from the fill stream.
//!
//! The assembler shadows the executor: it joins fills by correlation id
//! without assuming arrival order and emits the unfiltered trade record used
//! by downstream accounting. Unlike the executor it applies no PnL floor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{IntCounter, Registry};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use arbor_bus::{Bus, ShutdownSignal, GROUP_ASSEMBLER, STREAM_FILLS, STREAM_TRADES};
use arbor_core::{FillMsg, FillPayload, Side, TimestampMs, Trade, TradeMode, TradeSource};

mod store;

pub use store::{StoreResult, TradeStore};

const READ_BLOCK: Duration = Duration::from_millis(1000);
const READ_COUNT: usize = 50;
const READ_BACKOFF: Duration = Duration::from_millis(300);

/// Counters exposed by the assembler.
pub struct AssemblerMetrics {
    registry: Registry,
    trades_total: IntCounter,
    parse_failures_total: IntCounter,
    persist_failures_total: IntCounter,
}

impl AssemblerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let trades_total = IntCounter::new("assembled_trades_total", "Trades assembled").unwrap();
        let parse_failures_total =
            IntCounter::new("parse_failures_total", "Entries that failed to parse").unwrap();
        let persist_failures_total =
            IntCounter::new("persist_failures_total", "Trade store writes that failed").unwrap();
        registry.register(Box::new(trades_total.clone())).unwrap();
        registry
            .register(Box::new(parse_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(persist_failures_total.clone()))
            .unwrap();
        Self {
            registry,
            trades_total,
            parse_failures_total,
            persist_failures_total,
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    #[must_use]
    pub fn trades(&self) -> u64 {
        self.trades_total.get()
    }
}

impl Default for AssemblerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fills collected so far for one correlation id.
struct Pending {
    legs: Vec<FillPayload>,
    first_seen_ms: TimestampMs,
    mode: TradeMode,
}

/// The trade-assembler service.
pub struct TradeAssembler {
    bus: Arc<dyn Bus>,
    store: TradeStore,
    consumer: String,
    metrics: AssemblerMetrics,
    pending: HashMap<String, Pending>,
}

impl TradeAssembler {
    pub fn new(bus: Arc<dyn Bus>, store: TradeStore) -> Self {
        Self {
            bus,
            store,
            consumer: "asm-1".to_string(),
            metrics: AssemblerMetrics::new(),
            pending: HashMap::new(),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &AssemblerMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Fold one fill into the pending table; emits and persists a trade when
    /// the correlation holds a BUY/SELL pair.
    pub async fn process_fill(&mut self, data: &str) {
        let msg: FillMsg = match serde_json::from_str(data) {
            Ok(msg) => msg,
            Err(err) => {
                self.metrics.parse_failures_total.inc();
                warn!(error = %err, "dropping unparseable fill");
                return;
            }
        };
        let fill = msg.payload;
        let corr_id = fill.corr_id.clone();
        let entry = self.pending.entry(corr_id.clone()).or_insert_with(|| Pending {
            legs: Vec::new(),
            first_seen_ms: msg.ts,
            mode: fill.mode.unwrap_or(TradeMode::Paper),
        });
        if let Some(mode) = fill.mode {
            entry.mode = mode;
        }
        entry.legs.push(fill);

        let joined = {
            let entry = &self.pending[&corr_id];
            entry.legs.len() >= 2
                && entry.legs.iter().any(|leg| leg.side == Side::Buy)
                && entry.legs.iter().any(|leg| leg.side == Side::Sell)
        };
        if !joined {
            debug!(corr_id = %corr_id, "fill parked, waiting for the other side");
            return;
        }
        let Some(entry) = self.pending.remove(&corr_id) else {
            return;
        };
        self.emit(corr_id, entry).await;
    }

    async fn emit(&mut self, corr_id: String, entry: Pending) {
        let buy = entry.legs.iter().find(|leg| leg.side == Side::Buy);
        let sell = entry.legs.iter().find(|leg| leg.side == Side::Sell);
        let (Some(buy), Some(sell)) = (buy, sell) else {
            return;
        };
        let size = buy.filled_size.min(sell.filled_size);
        let pnl = (sell.px - buy.px) * size;

        let ts = self.bus.now_ms().await.unwrap_or(entry.first_seen_ms);
        let trade = Trade {
            ts,
            mode: entry.mode,
            legs: entry.legs.clone(),
            realized_pnl: pnl,
            taken: false,
            approved: false,
            source: TradeSource::Assembler,
        };
        if let Err(err) = self.store.insert(&trade) {
            self.metrics.persist_failures_total.inc();
            warn!(error = %err, corr_id = %corr_id, "trade persist failed");
        }
        match serde_json::to_string(&trade) {
            Ok(encoded) => {
                if let Err(err) = self.bus.append(STREAM_TRADES, &encoded).await {
                    warn!(error = %err, corr_id = %corr_id, "trade append failed");
                } else {
                    self.metrics.trades_total.inc();
                    info!(corr_id = %corr_id, pnl = %pnl, "trade assembled");
                }
            }
            Err(err) => warn!(error = %err, "trade encode failed"),
        }
    }

    /// Main consumer loop over `orders.fills`.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<()> {
        self.bus.create_group(STREAM_FILLS, GROUP_ASSEMBLER).await?;
        info!("trade assembler started");
        loop {
            if shutdown.triggered() {
                break;
            }
            let batch = tokio::select! {
                batch = self.bus.read_group(
                    STREAM_FILLS,
                    GROUP_ASSEMBLER,
                    &self.consumer,
                    READ_COUNT,
                    READ_BLOCK,
                ) => batch,
                _ = shutdown.wait() => break,
            };
            let entries = match batch {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(error = %err, "assembler read failed");
                    if !shutdown.sleep(READ_BACKOFF).await {
                        break;
                    }
                    continue;
                }
            };
            for entry in entries {
                self.process_fill(&entry.data).await;
                if let Err(err) = self.bus.ack(STREAM_FILLS, GROUP_ASSEMBLER, &entry.id).await {
                    warn!(error = %err, id = %entry.id, "assembler ack failed");
                }
            }
        }
        info!("trade assembler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_bus::MemoryBus;
    use arbor_core::FillKind;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn fill(corr_id: &str, leg_index: usize, side: Side, px: Decimal, filled: Decimal) -> String {
        let msg = FillMsg {
            id: Uuid::new_v4().to_string(),
            ts: 10,
            kind: FillKind::Fill,
            payload: FillPayload {
                corr_id: corr_id.to_string(),
                leg_index,
                exchange: "binance".to_string(),
                instrument_id: "BTCUSDT".to_string(),
                side,
                px,
                requested_size: filled,
                filled_size: filled,
                mode: Some(TradeMode::Paper),
            },
        };
        serde_json::to_string(&msg).unwrap()
    }

    fn assembler(bus: Arc<MemoryBus>) -> TradeAssembler {
        TradeAssembler::new(bus, TradeStore::open_in_memory().unwrap())
    }

    async fn trades(bus: &MemoryBus) -> Vec<Trade> {
        bus.range(STREAM_TRADES, 0)
            .await
            .unwrap()
            .iter()
            .map(|entry| serde_json::from_str(&entry.data).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn buy_sell_pair_joins_into_one_trade() {
        let bus = Arc::new(MemoryBus::new());
        let mut asm = assembler(bus.clone());
        asm.process_fill(&fill("corr-1", 0, Side::Sell, dec!(101), dec!(1)))
            .await;
        assert!(trades(&bus).await.is_empty());
        asm.process_fill(&fill("corr-1", 1, Side::Buy, dec!(100), dec!(1)))
            .await;

        let emitted = trades(&bus).await;
        assert_eq!(emitted.len(), 1);
        let trade = &emitted[0];
        assert_eq!(trade.realized_pnl, dec!(1));
        assert_eq!(trade.source, TradeSource::Assembler);
        assert_eq!(trade.mode, TradeMode::Paper);
        assert!(!trade.taken);
        assert_eq!(trade.legs.len(), 2);
        assert_eq!(asm.pending_len(), 0);
        assert_eq!(asm.store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn arrival_order_does_not_matter() {
        let bus = Arc::new(MemoryBus::new());
        let mut asm = assembler(bus.clone());
        // Second leg lands first.
        asm.process_fill(&fill("corr-2", 1, Side::Buy, dec!(100), dec!(1)))
            .await;
        asm.process_fill(&fill("corr-2", 0, Side::Sell, dec!(101), dec!(1)))
            .await;
        assert_eq!(trades(&bus).await.len(), 1);
    }

    #[tokio::test]
    async fn pnl_uses_the_smaller_filled_size() {
        let bus = Arc::new(MemoryBus::new());
        let mut asm = assembler(bus.clone());
        asm.process_fill(&fill("corr-3", 0, Side::Sell, dec!(103), dec!(2)))
            .await;
        asm.process_fill(&fill("corr-3", 1, Side::Buy, dec!(100), dec!(0.5)))
            .await;
        let emitted = trades(&bus).await;
        assert_eq!(emitted[0].realized_pnl, dec!(1.5));
    }

    #[tokio::test]
    async fn losing_pairs_are_still_recorded() {
        let bus = Arc::new(MemoryBus::new());
        let mut asm = assembler(bus.clone());
        asm.process_fill(&fill("corr-4", 0, Side::Sell, dec!(99), dec!(1)))
            .await;
        asm.process_fill(&fill("corr-4", 1, Side::Buy, dec!(100), dec!(1)))
            .await;
        let emitted = trades(&bus).await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].realized_pnl, dec!(-1));
    }

    #[tokio::test]
    async fn same_side_fills_keep_waiting() {
        let bus = Arc::new(MemoryBus::new());
        let mut asm = assembler(bus.clone());
        asm.process_fill(&fill("corr-5", 0, Side::Buy, dec!(100), dec!(1)))
            .await;
        asm.process_fill(&fill("corr-5", 1, Side::Buy, dec!(100), dec!(1)))
            .await;
        assert!(trades(&bus).await.is_empty());
        assert_eq!(asm.pending_len(), 1);
    }

    #[tokio::test]
    async fn consumer_acks_every_fill_including_poison() {
        let bus = Arc::new(MemoryBus::new());
        bus.create_group(STREAM_FILLS, GROUP_ASSEMBLER).await.unwrap();
        bus.append(STREAM_FILLS, "garbage").await.unwrap();
        bus.append(STREAM_FILLS, &fill("corr-6", 0, Side::Sell, dec!(101), dec!(1)))
            .await
            .unwrap();
        bus.append(STREAM_FILLS, &fill("corr-6", 1, Side::Buy, dec!(100), dec!(1)))
            .await
            .unwrap();

        let asm = assembler(bus.clone());
        let shutdown = ShutdownSignal::new();
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { asm.run(shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.trigger();
        handle.await.unwrap().unwrap();

        assert_eq!(bus.pending(STREAM_FILLS, GROUP_ASSEMBLER).await.unwrap(), 0);
        assert_eq!(trades(&bus).await.len(), 1);
    }
}
