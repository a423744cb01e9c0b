//! Fundamental data types shared across the entire workspace.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod edge;
pub mod options;

/// Alias for price precision.
pub type Px = Decimal;
/// Alias for quantity precision.
pub type Qty = Decimal;
/// Milliseconds since the Unix epoch, sourced from the bus wall-clock.
pub type TimestampMs = i64;
/// Human-readable venue name (e.g. `binance`).
pub type Venue = String;
/// Instrument identifier, native or canonical depending on context.
pub type InstrumentId = String;

/// The side of an order leg.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side (buy <-> sell).
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Sign convention used in cash-flow arithmetic: sells are inflows.
    #[must_use]
    pub fn cash_sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::NEGATIVE_ONE,
            Self::Sell => Decimal::ONE,
        }
    }
}

/// Time-in-force constraints understood by the execution layer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TimeInForce {
    #[serde(rename = "GTC")]
    GoodTilCanceled,
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
    #[serde(rename = "FOK")]
    FillOrKill,
}

/// Whether a trade was executed against the paper venue or a live one.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Paper,
    Live,
}

impl TradeMode {
    /// Translate the opportunity-level `paper` flag into a mode.
    #[must_use]
    pub fn from_paper_flag(paper: bool) -> Self {
        if paper {
            Self::Paper
        } else {
            Self::Live
        }
    }

    #[must_use]
    pub fn is_paper(self) -> bool {
        matches!(self, Self::Paper)
    }
}

impl fmt::Display for TradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Paper => "paper",
            Self::Live => "live",
        })
    }
}

impl FromStr for TradeMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "paper" => Ok(Self::Paper),
            "live" => Ok(Self::Live),
            other => Err(format!("unsupported trade mode '{other}'")),
        }
    }
}

/// Which component produced a trade record.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSource {
    Executor,
    Assembler,
}

/// Most recent top-of-book for one `(venue, instrument)`, as written by the
/// market-data adapters into the key-value view.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct QuoteSnapshot {
    pub bid: Px,
    pub ask: Px,
    pub ts: TimestampMs,
}

impl QuoteSnapshot {
    /// Age relative to `now`; a book is stale when the age strictly exceeds
    /// the configured maximum.
    #[must_use]
    pub fn age_ms(&self, now: TimestampMs) -> i64 {
        now - self.ts
    }
}

/// One side of a multi-venue round trip, immutable inside its opportunity.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    pub exchange: Venue,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub est_px: Px,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Qty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_bps: Option<Decimal>,
}

/// Optional per-opportunity cost estimates, each expressed as a fraction of
/// notional (not bps).
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Costs {
    #[serde(default)]
    pub fees: Decimal,
    #[serde(default)]
    pub slippage: Decimal,
    #[serde(default)]
    pub borrow: Decimal,
}

impl Costs {
    /// Sum of all cost fractions.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.fees + self.slippage + self.borrow
    }
}

/// Inner payload of an [`Opportunity`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityPayload {
    #[serde(default)]
    pub paper: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_bps: Option<Decimal>,
    pub legs: Vec<Leg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub costs: Option<Costs>,
}

impl OpportunityPayload {
    /// First BUY leg, if any.
    #[must_use]
    pub fn buy_leg(&self) -> Option<&Leg> {
        self.legs.iter().find(|leg| leg.side == Side::Buy)
    }

    /// First SELL leg, if any.
    #[must_use]
    pub fn sell_leg(&self) -> Option<&Leg> {
        self.legs.iter().find(|leg| leg.side == Side::Sell)
    }

    /// Sum of all supplied leg sizes; `None` when no leg carries a size.
    #[must_use]
    pub fn total_size(&self) -> Option<Qty> {
        let supplied: Vec<Qty> = self.legs.iter().filter_map(|leg| leg.size).collect();
        if supplied.is_empty() {
            None
        } else {
            Some(supplied.into_iter().sum())
        }
    }
}

/// Policy values in force when the risk engine approved an opportunity.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySnapshot {
    pub edge_min_bps: Decimal,
    pub net_min_bps: Decimal,
    pub max_total_size: Decimal,
    pub allow_paper_only: bool,
}

/// Risk-engine annotation attached to approved opportunities.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskBlock {
    pub net_bps: Decimal,
    pub total_fees_like_bps: Decimal,
    pub policy: PolicySnapshot,
}

/// A candidate or approved cross-venue arbitrage opportunity.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Opportunity {
    pub id: String,
    pub ts: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskBlock>,
    pub payload: OpportunityPayload,
}

impl Opportunity {
    /// An absent `approved` flag counts as not approved.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.approved.unwrap_or(false)
    }

    #[must_use]
    pub fn mode(&self) -> TradeMode {
        TradeMode::from_paper_flag(self.payload.paper)
    }
}

/// Payload of an order emitted by the executor.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub corr_id: String,
    pub leg_index: usize,
    pub tif: TimeInForce,
    pub exchange: Venue,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub est_px: Px,
    pub size: Qty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<TradeMode>,
}

/// Tag value pinning the order stream's message schema.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OrderKind {
    #[serde(rename = "order.new")]
    New,
}

/// Envelope carried on `orders.new`; unknown `type` tags are rejected at
/// parse time.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderMsg {
    pub id: String,
    pub ts: TimestampMs,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    pub payload: OrderPayload,
}

/// Payload of a fill reported by a venue (here, the simulator).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillPayload {
    pub corr_id: String,
    pub leg_index: usize,
    pub exchange: Venue,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub px: Px,
    pub requested_size: Qty,
    pub filled_size: Qty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<TradeMode>,
}

/// Tag value pinning the fill stream's message schema.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FillKind {
    #[serde(rename = "order.fill")]
    Fill,
}

/// Envelope carried on `orders.fills`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FillMsg {
    pub id: String,
    pub ts: TimestampMs,
    #[serde(rename = "type")]
    pub kind: FillKind,
    pub payload: FillPayload,
}

/// Completed round trip, reconstructed either by the executor or the
/// assembler (the `source` field records which).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub ts: TimestampMs,
    pub mode: TradeMode,
    pub legs: Vec<FillPayload>,
    pub realized_pnl: Decimal,
    #[serde(default)]
    pub taken: bool,
    #[serde(default)]
    pub approved: bool,
    pub source: TradeSource,
}

/// Externally-mutable execution switches held in the key-value view.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Toggles {
    pub auto_trade: bool,
    pub mode: TradeMode,
}

/// Parse a toggle flag, accepting the synonyms operators actually type.
#[must_use]
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Canonical serialization of a toggle flag.
#[must_use]
pub fn flag_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
