//! Synthetic market-data feed for demo runs.
//!
//! Stands in for the external venue adapters: publishes symbol lists and
//! top-of-book snapshots into the key-value view. Prices follow a
//! deterministic triangle wave with the two venues out of phase, so
//! cross-venue windows open and close every few seconds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_decimal::Decimal;
use tracing::{info, warn};

use arbor_bus::{quote_key, symbols_key, Bus, ShutdownSignal};
use arbor_core::QuoteSnapshot;

const QUOTE_TTL: Duration = Duration::from_secs(30);
const SYMBOLS_TTL: Duration = Duration::from_secs(600);
/// Republish the symbol lists every this many ticks.
const META_EVERY: u64 = 50;

/// One synthetic instrument with its resting price level.
struct Instrument {
    symbol: &'static str,
    base: Decimal,
}

/// The demo feed service.
pub struct SyntheticFeed {
    bus: Arc<dyn Bus>,
    venues: [String; 2],
    instruments: Vec<Instrument>,
    period: Duration,
    tick: u64,
}

impl SyntheticFeed {
    pub fn new(bus: Arc<dyn Bus>, venues: [String; 2]) -> Self {
        Self {
            bus,
            venues,
            instruments: vec![
                Instrument {
                    symbol: "BTCUSDT",
                    base: Decimal::from(60_000),
                },
                Instrument {
                    symbol: "ETHUSDT",
                    base: Decimal::from(2_500),
                },
            ],
            period: Duration::from_millis(200),
            tick: 0,
        }
    }

    async fn publish_meta(&self) -> Result<()> {
        let symbols: Vec<&str> = self.instruments.iter().map(|i| i.symbol).collect();
        let encoded = serde_json::to_string(&symbols)?;
        for venue in &self.venues {
            self.bus
                .kv_set(&symbols_key(venue), &encoded, Some(SYMBOLS_TTL))
                .await?;
        }
        Ok(())
    }

    async fn publish_quotes(&self) -> Result<()> {
        let now = self.bus.now_ms().await?;
        // Triangle wave over 40 ticks; venues move in opposite directions so
        // the books periodically cross by more than the synthetic spread.
        let phase = (self.tick % 40) as i64;
        let triangle = (phase - 20).abs() - 10;
        for instrument in &self.instruments {
            let offset = instrument.base * Decimal::from(triangle) / Decimal::from(4_000);
            let half_spread = instrument.base / Decimal::from(10_000);
            let mids = [instrument.base + offset, instrument.base - offset];
            for (venue, mid) in self.venues.iter().zip(mids) {
                let quote = QuoteSnapshot {
                    bid: mid - half_spread,
                    ask: mid + half_spread,
                    ts: now,
                };
                self.bus
                    .kv_set(
                        &quote_key(venue, instrument.symbol),
                        &serde_json::to_string(&quote)?,
                        Some(QUOTE_TTL),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Main feed loop.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<()> {
        info!(venues = ?self.venues, "synthetic feed started");
        loop {
            if shutdown.triggered() {
                break;
            }
            if self.tick % META_EVERY == 0 {
                if let Err(err) = self.publish_meta().await {
                    warn!(error = %err, "symbol list publish failed");
                }
            }
            if let Err(err) = self.publish_quotes().await {
                warn!(error = %err, "quote publish failed");
            }
            self.tick += 1;
            if !shutdown.sleep(self.period).await {
                break;
            }
        }
        info!("synthetic feed stopped");
        Ok(())
    }
}
