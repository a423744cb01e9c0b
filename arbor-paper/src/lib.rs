//! Stand-in venue used by the paper pipeline.
//!
//! Every order is answered with exactly one full fill at the order's
//! estimated price. That keeps the executor's state machine exercisable end
//! to end without modeling venue liquidity.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{IntCounter, Registry};
use tracing::{debug, info, warn};

use arbor_bus::{Bus, ShutdownSignal, GROUP_SIM, STREAM_FILLS, STREAM_ORDERS};
use arbor_core::{FillKind, FillMsg, FillPayload, OrderMsg};
use uuid::Uuid;

const READ_BLOCK: Duration = Duration::from_millis(1000);
const READ_COUNT: usize = 50;
const READ_BACKOFF: Duration = Duration::from_millis(300);

/// Counters exposed by the simulator.
pub struct SimMetrics {
    registry: Registry,
    fills_total: IntCounter,
    parse_failures_total: IntCounter,
    duplicates_total: IntCounter,
}

impl SimMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let fills_total = IntCounter::new("fills_total", "Fills emitted").unwrap();
        let parse_failures_total =
            IntCounter::new("parse_failures_total", "Orders that failed to parse").unwrap();
        let duplicates_total = IntCounter::new(
            "duplicate_orders_total",
            "Orders ignored because their leg already filled",
        )
        .unwrap();
        registry.register(Box::new(fills_total.clone())).unwrap();
        registry
            .register(Box::new(parse_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(duplicates_total.clone()))
            .unwrap();
        Self {
            registry,
            fills_total,
            parse_failures_total,
            duplicates_total,
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    #[must_use]
    pub fn fills(&self) -> u64 {
        self.fills_total.get()
    }
}

impl Default for SimMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// The order-simulator service.
pub struct OrderSimulator {
    bus: Arc<dyn Bus>,
    consumer: String,
    metrics: SimMetrics,
    /// Legs already answered; the venue contract is at most one fill per
    /// `(corrId, legIndex)`.
    filled: HashSet<(String, usize)>,
}

impl OrderSimulator {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            consumer: "sim-1".to_string(),
            metrics: SimMetrics::new(),
            filled: HashSet::new(),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Answer one order. Returns the emitted fill for observability.
    pub async fn process_order(&mut self, data: &str) -> Option<FillMsg> {
        let order: OrderMsg = match serde_json::from_str(data) {
            Ok(order) => order,
            Err(err) => {
                self.metrics.parse_failures_total.inc();
                warn!(error = %err, "dropping unparseable order");
                return None;
            }
        };
        let key = (order.payload.corr_id.clone(), order.payload.leg_index);
        if !self.filled.insert(key) {
            self.metrics.duplicates_total.inc();
            debug!(
                corr_id = %order.payload.corr_id,
                leg_index = order.payload.leg_index,
                "leg already filled, ignoring order"
            );
            return None;
        }

        let ts = match self.bus.now_ms().await {
            Ok(ts) => ts,
            Err(err) => {
                warn!(error = %err, "bus clock read failed");
                order.ts
            }
        };
        let fill = FillMsg {
            id: Uuid::new_v4().to_string(),
            ts,
            kind: FillKind::Fill,
            payload: FillPayload {
                corr_id: order.payload.corr_id.clone(),
                leg_index: order.payload.leg_index,
                exchange: order.payload.exchange.clone(),
                instrument_id: order.payload.instrument_id.clone(),
                side: order.payload.side,
                px: order.payload.est_px,
                requested_size: order.payload.size,
                filled_size: order.payload.size,
                mode: order.payload.mode,
            },
        };
        let encoded = match serde_json::to_string(&fill) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "fill encode failed");
                return None;
            }
        };
        if let Err(err) = self.bus.append(STREAM_FILLS, &encoded).await {
            warn!(error = %err, "fill append failed");
            return None;
        }
        self.metrics.fills_total.inc();
        Some(fill)
    }

    /// Main consumer loop over `orders.new`.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<()> {
        self.bus.create_group(STREAM_ORDERS, GROUP_SIM).await?;
        info!("order simulator started");
        loop {
            if shutdown.triggered() {
                break;
            }
            let batch = tokio::select! {
                batch = self.bus.read_group(
                    STREAM_ORDERS,
                    GROUP_SIM,
                    &self.consumer,
                    READ_COUNT,
                    READ_BLOCK,
                ) => batch,
                _ = shutdown.wait() => break,
            };
            let entries = match batch {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(error = %err, "simulator read failed");
                    if !shutdown.sleep(READ_BACKOFF).await {
                        break;
                    }
                    continue;
                }
            };
            for entry in entries {
                self.process_order(&entry.data).await;
                if let Err(err) = self.bus.ack(STREAM_ORDERS, GROUP_SIM, &entry.id).await {
                    warn!(error = %err, id = %entry.id, "simulator ack failed");
                }
            }
        }
        info!("order simulator stopped");
        Ok(())
    }
}
