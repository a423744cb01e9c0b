//! Helpers over the externally-mutable toggle keys.
//!
//! Operators and the UI may rewrite these keys at any moment; readers poll
//! them on a short cadence and fall back to their last-known value when a
//! read fails.

use tracing::warn;

use arbor_core::{flag_str, parse_flag, Toggles, TradeMode};

use crate::{Bus, BusResult};

/// Key holding the auto-trade switch.
pub const KEY_AUTO_TRADE: &str = "toggles:autoTrade";
/// Key holding the paper/live mode switch.
pub const KEY_MODE: &str = "toggles:mode";

/// Read both toggles, substituting `fallback` per key when a key is absent,
/// unparseable, or the read fails.
pub async fn load(bus: &dyn Bus, fallback: Toggles) -> Toggles {
    let auto_trade = match bus.kv_get(KEY_AUTO_TRADE).await {
        Ok(Some(raw)) => parse_flag(&raw).unwrap_or_else(|| {
            warn!(key = KEY_AUTO_TRADE, raw = %raw, "unparseable toggle value");
            fallback.auto_trade
        }),
        Ok(None) => fallback.auto_trade,
        Err(err) => {
            warn!(key = KEY_AUTO_TRADE, error = %err, "toggle read failed");
            fallback.auto_trade
        }
    };
    let mode = match bus.kv_get(KEY_MODE).await {
        Ok(Some(raw)) => raw.parse::<TradeMode>().unwrap_or_else(|_| {
            warn!(key = KEY_MODE, raw = %raw, "unparseable toggle value");
            fallback.mode
        }),
        Ok(None) => fallback.mode,
        Err(err) => {
            warn!(key = KEY_MODE, error = %err, "toggle read failed");
            fallback.mode
        }
    };
    Toggles { auto_trade, mode }
}

/// Write the auto-trade switch in its canonical string form.
pub async fn store_auto_trade(bus: &dyn Bus, enabled: bool) -> BusResult<()> {
    bus.kv_set(KEY_AUTO_TRADE, flag_str(enabled), None).await
}

/// Write the mode switch.
pub async fn store_mode(bus: &dyn Bus, mode: TradeMode) -> BusResult<()> {
    bus.kv_set(KEY_MODE, &mode.to_string(), None).await
}
