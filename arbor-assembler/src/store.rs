//! SQLite-backed trade persistence.

use std::path::Path;

use rusqlite::{params, Connection};

use arbor_core::{Trade, TradeSource};

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, rusqlite::Error>;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    mode TEXT NOT NULL,
    source TEXT NOT NULL,
    realized_pnl TEXT NOT NULL,
    legs TEXT NOT NULL
)";

/// Durable record of every assembled trade.
pub struct TradeStore {
    conn: Connection,
}

impl TradeStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self { conn })
    }

    /// Append one trade.
    pub fn insert(&self, trade: &Trade) -> StoreResult<()> {
        let legs = serde_json::to_string(&trade.legs).unwrap_or_else(|_| "[]".to_string());
        let source = match trade.source {
            TradeSource::Executor => "executor",
            TradeSource::Assembler => "assembler",
        };
        self.conn.execute(
            "INSERT INTO trades (ts, mode, source, realized_pnl, legs) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                trade.ts,
                trade.mode.to_string(),
                source,
                trade.realized_pnl.to_string(),
                legs,
            ],
        )?;
        Ok(())
    }

    /// Number of persisted trades.
    pub fn count(&self) -> StoreResult<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM trades", [], |row| row.get::<_, i64>(0))
            .map(|count| count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::TradeMode;
    use rust_decimal_macros::dec;

    #[test]
    fn trades_survive_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.db");
        let trade = Trade {
            ts: 42,
            mode: TradeMode::Paper,
            legs: Vec::new(),
            realized_pnl: dec!(1.5),
            taken: false,
            approved: false,
            source: TradeSource::Assembler,
        };
        {
            let store = TradeStore::open(&path).unwrap();
            store.insert(&trade).unwrap();
            assert_eq!(store.count().unwrap(), 1);
        }
        let reopened = TradeStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
