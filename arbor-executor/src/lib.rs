//! Router-executor: drives the multi-leg state machine from opportunity to
//! trade.
//!
//! The executor consumes one of two input streams depending on the
//! auto-trade toggle, sends legs protective-side-first as IOC orders, joins
//! the returning fills by correlation id, and emits a trade when the round
//! trip clears the PnL floor. All per-correlation state lives in a
//! process-local inflight table owned by this single loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use prometheus::{IntCounter, Registry};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use arbor_bus::{
    toggles, Bus, ShutdownSignal, GROUP_EXECUTOR, STREAM_APPROVED, STREAM_FILLS, STREAM_ORDERS,
    STREAM_OPPORTUNITIES, STREAM_TRADES,
};
use arbor_config::ExecutorConfig;
use arbor_core::{
    FillMsg, FillPayload, Leg, Opportunity, OrderKind, OrderMsg, OrderPayload, TimeInForce,
    TimestampMs, Toggles, Trade, TradeSource,
};

mod pnl;
mod reorder;

pub use pnl::realized_pnl;
pub use reorder::protective_reorder;

const FILL_READ_BLOCK: Duration = Duration::from_millis(100);
const FILL_READ_COUNT: usize = 50;
const OPP_READ_BLOCK: Duration = Duration::from_millis(300);
const OPP_READ_COUNT: usize = 10;
const READ_BACKOFF: Duration = Duration::from_millis(300);

/// Which stream the executor is currently consuming; a pure function of the
/// auto-trade toggle so the two inputs are never raced against each other.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamSelection {
    /// Auto-trade on: consume candidates straight from the scanners.
    PreRisk,
    /// Auto-trade off: consume only what the risk engine approved.
    Approved,
}

impl StreamSelection {
    #[must_use]
    pub fn for_toggles(toggles: &Toggles) -> Self {
        if toggles.auto_trade {
            Self::PreRisk
        } else {
            Self::Approved
        }
    }

    #[must_use]
    pub fn stream(self) -> &'static str {
        match self {
            Self::PreRisk => STREAM_OPPORTUNITIES,
            Self::Approved => STREAM_APPROVED,
        }
    }
}

/// Counters exposed by the executor.
pub struct ExecutorMetrics {
    registry: Registry,
    orders_total: IntCounter,
    order_failures_total: IntCounter,
    trades_total: IntCounter,
    discarded_trades_total: IntCounter,
    zero_fill_aborts_total: IntCounter,
    unknown_corr_total: IntCounter,
    evictions_total: IntCounter,
    flushes_total: IntCounter,
    parse_failures_total: IntCounter,
}

impl ExecutorMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let orders_total = IntCounter::new("orders_total", "Orders sent to the venue").unwrap();
        let order_failures_total =
            IntCounter::new("order_failures_total", "Order appends that failed").unwrap();
        let trades_total = IntCounter::new("trades_total", "Trades emitted").unwrap();
        let discarded_trades_total = IntCounter::new(
            "discarded_trades_total",
            "Round trips discarded below the PnL floor",
        )
        .unwrap();
        let zero_fill_aborts_total = IntCounter::new(
            "zero_fill_aborts_total",
            "Round trips abandoned on an unfilled first leg",
        )
        .unwrap();
        let unknown_corr_total = IntCounter::new(
            "unknown_corr_total",
            "Fills without a matching inflight entry",
        )
        .unwrap();
        let evictions_total = IntCounter::new(
            "inflight_evictions_total",
            "Inflight entries expired without a terminal fill",
        )
        .unwrap();
        let flushes_total = IntCounter::new(
            "inflight_flushes_total",
            "Inflight table flushes on input switches",
        )
        .unwrap();
        let parse_failures_total =
            IntCounter::new("parse_failures_total", "Entries that failed to parse").unwrap();
        registry.register(Box::new(orders_total.clone())).unwrap();
        registry
            .register(Box::new(order_failures_total.clone()))
            .unwrap();
        registry.register(Box::new(trades_total.clone())).unwrap();
        registry
            .register(Box::new(discarded_trades_total.clone()))
            .unwrap();
        registry
            .register(Box::new(zero_fill_aborts_total.clone()))
            .unwrap();
        registry
            .register(Box::new(unknown_corr_total.clone()))
            .unwrap();
        registry.register(Box::new(evictions_total.clone())).unwrap();
        registry.register(Box::new(flushes_total.clone())).unwrap();
        registry
            .register(Box::new(parse_failures_total.clone()))
            .unwrap();
        Self {
            registry,
            orders_total,
            order_failures_total,
            trades_total,
            discarded_trades_total,
            zero_fill_aborts_total,
            unknown_corr_total,
            evictions_total,
            flushes_total,
            parse_failures_total,
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }
}

impl Default for ExecutorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-correlation state between the first order and the terminal fill.
struct Inflight {
    opportunity: Opportunity,
    /// Legs in protective order; `legIndex` on orders and fills refers to
    /// positions in this list.
    legs: Vec<Leg>,
    fills: Vec<Option<FillPayload>>,
    started_ms: TimestampMs,
}

enum FillOutcome {
    Ignore,
    Abort,
    SendLeg(usize),
    Finalize,
}

/// The router-executor service.
pub struct RouterExecutor {
    bus: Arc<dyn Bus>,
    config: ExecutorConfig,
    consumer: String,
    metrics: ExecutorMetrics,
    toggles: Toggles,
    selection: StreamSelection,
    inflight: HashMap<String, Inflight>,
}

impl RouterExecutor {
    pub fn new(bus: Arc<dyn Bus>, config: ExecutorConfig, defaults: Toggles) -> Self {
        let selection = StreamSelection::for_toggles(&defaults);
        Self {
            bus,
            config,
            consumer: "exec-1".to_string(),
            metrics: ExecutorMetrics::new(),
            toggles: defaults,
            selection,
            inflight: HashMap::new(),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &ExecutorMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    async fn now_or(&self, fallback: TimestampMs) -> TimestampMs {
        self.bus.now_ms().await.unwrap_or(fallback)
    }

    /// Re-read the toggle keys; an input switch flushes the inflight table
    /// so a pause never leaves half-opened round trips tracked.
    async fn refresh_toggles(&mut self) {
        let next = toggles::load(self.bus.as_ref(), self.toggles).await;
        if next != self.toggles {
            info!(auto_trade = next.auto_trade, mode = %next.mode, "toggles updated");
        }
        let next_selection = StreamSelection::for_toggles(&next);
        if next_selection != self.selection {
            let flushed = self.inflight.len();
            self.inflight.clear();
            self.metrics.flushes_total.inc();
            info!(
                input = next_selection.stream(),
                flushed, "input stream switched, inflight table flushed"
            );
        }
        self.toggles = next;
        self.selection = next_selection;
    }

    async fn handle_opportunity(&mut self, data: &str) {
        let opportunity: Opportunity = match serde_json::from_str(data) {
            Ok(opportunity) => opportunity,
            Err(err) => {
                self.metrics.parse_failures_total.inc();
                warn!(error = %err, "dropping unparseable opportunity");
                return;
            }
        };
        if opportunity.payload.legs.is_empty() {
            self.metrics.parse_failures_total.inc();
            warn!(id = %opportunity.id, "opportunity has no legs");
            return;
        }
        let legs = protective_reorder(&opportunity.payload.legs);
        let corr_id = Uuid::new_v4().to_string();
        let started_ms = self.now_or(opportunity.ts).await;
        debug!(id = %opportunity.id, corr_id = %corr_id, legs = legs.len(), "round trip started");
        self.inflight.insert(
            corr_id.clone(),
            Inflight {
                opportunity,
                fills: vec![None; legs.len()],
                legs,
                started_ms,
            },
        );
        self.send_leg(&corr_id, 0).await;
    }

    /// Emit the IOC order for one leg. A failed append leaves the inflight
    /// entry in place; IOC semantics forbid replaying orders, so the entry
    /// simply ages out.
    async fn send_leg(&self, corr_id: &str, leg_index: usize) {
        let Some(entry) = self.inflight.get(corr_id) else {
            return;
        };
        let leg = &entry.legs[leg_index];
        let ts = self.now_or(entry.opportunity.ts).await;
        let order = OrderMsg {
            id: Uuid::new_v4().to_string(),
            ts,
            kind: OrderKind::New,
            payload: OrderPayload {
                corr_id: corr_id.to_string(),
                leg_index,
                tif: TimeInForce::ImmediateOrCancel,
                exchange: leg.exchange.clone(),
                instrument_id: leg.instrument_id.clone(),
                side: leg.side,
                est_px: leg.est_px,
                size: leg.size.unwrap_or(Decimal::ONE),
                mode: Some(entry.opportunity.mode()),
            },
        };
        let encoded = match serde_json::to_string(&order) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "order encode failed");
                return;
            }
        };
        match self.bus.append(STREAM_ORDERS, &encoded).await {
            Ok(_) => {
                self.metrics.orders_total.inc();
                debug!(
                    corr_id,
                    leg_index,
                    side = ?leg.side,
                    venue = %leg.exchange,
                    "leg order sent"
                );
            }
            Err(err) => {
                self.metrics.order_failures_total.inc();
                warn!(error = %err, corr_id, leg_index, "order append failed");
            }
        }
    }

    async fn handle_fill(&mut self, data: &str) {
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

        let outcome = {
            let Some(entry) = self.inflight.get_mut(&corr_id) else {
                // Expected after a toggle flush; the fill is acked upstream.
                self.metrics.unknown_corr_total.inc();
                debug!(corr_id = %corr_id, "fill without inflight entry, dropped");
                return;
            };
            if fill.leg_index >= entry.legs.len() {
                warn!(corr_id = %corr_id, leg_index = fill.leg_index, "fill for unknown leg");
                FillOutcome::Ignore
            } else if entry.fills[fill.leg_index].is_some() {
                debug!(corr_id = %corr_id, leg_index = fill.leg_index, "duplicate fill ignored");
                FillOutcome::Ignore
            } else if fill.leg_index == 0 && fill.filled_size.is_zero() {
                FillOutcome::Abort
            } else {
                let leg_index = fill.leg_index;
                entry.fills[leg_index] = Some(fill);
                if leg_index + 1 < entry.legs.len() {
                    FillOutcome::SendLeg(leg_index + 1)
                } else {
                    FillOutcome::Finalize
                }
            }
        };

        match outcome {
            FillOutcome::Ignore => {}
            FillOutcome::Abort => {
                self.inflight.remove(&corr_id);
                self.metrics.zero_fill_aborts_total.inc();
                info!(corr_id = %corr_id, "protective leg unfilled, round trip abandoned");
            }
            FillOutcome::SendLeg(next) => self.send_leg(&corr_id, next).await,
            FillOutcome::Finalize => self.finalize(&corr_id).await,
        }
    }

    /// Terminal leg observed: price the round trip and emit when it clears
    /// the floor (strictly).
    async fn finalize(&mut self, corr_id: &str) {
        let Some(entry) = self.inflight.remove(corr_id) else {
            return;
        };
        let fills: Vec<FillPayload> = entry.fills.into_iter().flatten().collect();
        let pnl = realized_pnl(&entry.opportunity.payload, &fills);
        if pnl <= self.config.min_realized_pnl {
            self.metrics.discarded_trades_total.inc();
            debug!(corr_id, pnl = %pnl, "round trip below emission floor, discarded");
            return;
        }
        let ts = self.now_or(entry.opportunity.ts).await;
        let trade = Trade {
            ts,
            mode: entry.opportunity.mode(),
            legs: fills,
            realized_pnl: pnl,
            taken: true,
            approved: entry.opportunity.is_approved(),
            source: TradeSource::Executor,
        };
        let encoded = match serde_json::to_string(&trade) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "trade encode failed");
                return;
            }
        };
        match self.bus.append(STREAM_TRADES, &encoded).await {
            Ok(_) => {
                self.metrics.trades_total.inc();
                info!(corr_id, pnl = %pnl, mode = %trade.mode, "trade emitted");
            }
            Err(err) => warn!(error = %err, corr_id, "trade append failed"),
        }
    }

    /// Drop entries whose terminal fill never arrived.
    async fn evict_expired(&mut self) {
        if self.inflight.is_empty() {
            return;
        }
        let Ok(now) = self.bus.now_ms().await else {
            return;
        };
        let ttl = self.config.inflight_ttl_ms;
        let expired: Vec<String> = self
            .inflight
            .iter()
            .filter(|(_, entry)| now - entry.started_ms > ttl)
            .map(|(corr_id, _)| corr_id.clone())
            .collect();
        for corr_id in expired {
            self.inflight.remove(&corr_id);
            self.metrics.evictions_total.inc();
            warn!(corr_id = %corr_id, ttl_ms = ttl, "inflight entry expired, evicted");
        }
    }

    /// Main service loop. Fills are drained before new opportunities so leg
    /// sequencing and trade emission stay ahead of fresh work.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<()> {
        self.bus
            .create_group(STREAM_OPPORTUNITIES, GROUP_EXECUTOR)
            .await?;
        self.bus.create_group(STREAM_APPROVED, GROUP_EXECUTOR).await?;
        self.bus.create_group(STREAM_FILLS, GROUP_EXECUTOR).await?;
        info!(input = self.selection.stream(), "router-executor started");

        let refresh_every = Duration::from_millis(self.config.toggle_refresh_ms);
        let mut last_refresh: Option<Instant> = None;
        loop {
            if shutdown.triggered() {
                break;
            }
            if last_refresh.map_or(true, |at| at.elapsed() >= refresh_every) {
                self.refresh_toggles().await;
                last_refresh = Some(Instant::now());
            }

            match self
                .bus
                .read_group(
                    STREAM_FILLS,
                    GROUP_EXECUTOR,
                    &self.consumer,
                    FILL_READ_COUNT,
                    FILL_READ_BLOCK,
                )
                .await
            {
                Ok(entries) => {
                    for entry in entries {
                        self.handle_fill(&entry.data).await;
                        if let Err(err) =
                            self.bus.ack(STREAM_FILLS, GROUP_EXECUTOR, &entry.id).await
                        {
                            warn!(error = %err, id = %entry.id, "fill ack failed");
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "fill read failed");
                    if !shutdown.sleep(READ_BACKOFF).await {
                        break;
                    }
                    continue;
                }
            }

            let input = self.selection.stream();
            match self
                .bus
                .read_group(
                    input,
                    GROUP_EXECUTOR,
                    &self.consumer,
                    OPP_READ_COUNT,
                    OPP_READ_BLOCK,
                )
                .await
            {
                Ok(entries) => {
                    for entry in entries {
                        self.handle_opportunity(&entry.data).await;
                        if let Err(err) = self.bus.ack(input, GROUP_EXECUTOR, &entry.id).await {
                            warn!(error = %err, id = %entry.id, "opportunity ack failed");
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, input, "opportunity read failed");
                    if !shutdown.sleep(READ_BACKOFF).await {
                        break;
                    }
                    continue;
                }
            }

            self.evict_expired().await;
        }
        info!("router-executor stopped");
        Ok(())
    }
}
