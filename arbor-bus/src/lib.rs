//! Stream, consumer-group and key-value operations shared by every
//! component.
//!
//! The source deployment speaks to a Redis-Streams-shaped store; everything
//! the pipeline needs from it is hidden behind the [`Bus`] trait so the
//! backend stays replaceable. The [`MemoryBus`] backend ships with the
//! workspace and backs both the paper pipeline and the test suites.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use arbor_core::TimestampMs;

mod memory;
mod shutdown;
pub mod toggles;

pub use memory::MemoryBus;
pub use shutdown::ShutdownSignal;

/// Convenience alias for bus results.
pub type BusResult<T> = Result<T, BusError>;

/// Common error type returned by bus backends.
#[derive(Debug, Error)]
pub enum BusError {
    /// Transport-level failures (network, timeouts, etc.).
    #[error("transport error: {0}")]
    Transport(String),
    /// A group was addressed before being created on its stream.
    #[error("no such group '{group}' on stream '{stream}'")]
    NoGroup { stream: String, group: String },
    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

/// One entry of an append-only stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEntry {
    /// Backend-assigned id, strictly increasing within its stream.
    pub id: String,
    /// JSON document carried in the entry's single `data` field.
    pub data: String,
}

/// The log backend contract: ordered streams with consumer groups, a
/// key-value view with TTLs, and the wall-clock every producer must stamp
/// timestamps from.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Append a JSON document to a stream, creating the stream on demand.
    async fn append(&self, stream: &str, data: &str) -> BusResult<String>;

    /// Idempotently create a consumer group (and the stream when missing).
    async fn create_group(&self, stream: &str, group: &str) -> BusResult<()>;

    /// Deliver up to `count` unseen entries to `consumer`, blocking up to
    /// `block` when none are available. Delivered entries stay pending until
    /// acknowledged; within a group each entry reaches exactly one consumer.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> BusResult<Vec<StreamEntry>>;

    /// Acknowledge a delivered entry; unknown ids are a no-op.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> BusResult<()>;

    /// Number of delivered-but-unacknowledged entries for a group.
    async fn pending(&self, stream: &str, group: &str) -> BusResult<usize>;

    /// Read entries by position, outside any group (XRANGE-shaped; used by
    /// tails and tests).
    async fn range(&self, stream: &str, start: usize) -> BusResult<Vec<StreamEntry>>;

    /// Set a key in the key-value view, with an optional TTL.
    async fn kv_set(&self, key: &str, value: &str, ttl: Option<Duration>) -> BusResult<()>;

    /// Read a key; expired or missing keys read as `None`.
    async fn kv_get(&self, key: &str) -> BusResult<Option<String>>;

    /// Batched read preserving input order.
    async fn kv_mget(&self, keys: &[String]) -> BusResult<Vec<Option<String>>>;

    /// Monotonic non-decreasing wall-clock in milliseconds since epoch.
    async fn now_ms(&self) -> BusResult<TimestampMs>;
}

/// Stream carrying candidate opportunities from the scanners.
pub const STREAM_OPPORTUNITIES: &str = "arb.opportunities";
/// Alternate scanner output routed through the risk engine.
pub const STREAM_TO_RISK: &str = "scanner.to.risk";
/// Stream carrying risk-approved opportunities.
pub const STREAM_APPROVED: &str = "arb.approved";
/// Stream carrying orders from the executor to the venue.
pub const STREAM_ORDERS: &str = "orders.new";
/// Stream carrying fills back from the venue.
pub const STREAM_FILLS: &str = "orders.fills";
/// Stream carrying completed trades.
pub const STREAM_TRADES: &str = "arb.trades";

/// Consumer-group names, one per reader role.
pub const GROUP_RISK: &str = "risk";
pub const GROUP_EXECUTOR: &str = "executor";
pub const GROUP_SIM: &str = "sim";
pub const GROUP_ASSEMBLER: &str = "asm";

/// Key of the adapter-maintained top-of-book snapshot for one instrument.
#[must_use]
pub fn quote_key(venue: &str, instrument: &str) -> String {
    format!("quote:{venue}:{instrument}")
}

/// Key of the adapter-published tradable-symbol list for one venue.
#[must_use]
pub fn symbols_key(venue: &str) -> String {
    format!("meta:{venue}:symbols")
}

/// Mirror stream of raw book snapshots for one venue.
#[must_use]
pub fn orderbook_stream(venue: &str) -> String {
    format!("md.orderbook.{venue}")
}
