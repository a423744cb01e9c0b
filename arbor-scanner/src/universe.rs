//! Instrument-universe discovery.
//!
//! The tradable universe is the intersection of the two venues' published
//! symbol lists. Intersection happens on canonical ids so that option
//! contracts match across venues with different native date encodings; the
//! native id per venue is retained for quote-key lookups.

use std::collections::HashMap;

use tracing::{debug, warn};

use arbor_bus::{symbols_key, Bus};
use arbor_core::options::canonical_option_id;

/// One instrument tradable on both venues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniverseEntry {
    /// Canonical id carried on emitted opportunities.
    pub canonical: String,
    /// Native id per venue, aligned with the configured venue order.
    pub natives: [String; 2],
}

/// Snapshot of the discovered universe.
#[derive(Clone, Debug, Default)]
pub struct Universe {
    pub entries: Vec<UniverseEntry>,
}

impl Universe {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Intersect the venues' symbol lists, capped at `max_symbols`. Either list
/// being absent or empty yields an empty universe.
pub async fn discover(bus: &dyn Bus, venues: &[String; 2], max_symbols: usize) -> Universe {
    let keys = vec![symbols_key(&venues[0]), symbols_key(&venues[1])];
    let raw = match bus.kv_mget(&keys).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, "symbol list read failed");
            return Universe::default();
        }
    };
    let first = parse_symbols(raw[0].as_deref(), &venues[0]);
    let second = parse_symbols(raw[1].as_deref(), &venues[1]);
    if first.is_empty() || second.is_empty() {
        return Universe::default();
    }

    let mut by_canonical: HashMap<String, String> = HashMap::new();
    for native in first {
        by_canonical
            .entry(canonical_option_id(&native))
            .or_insert(native);
    }

    let mut entries = Vec::new();
    for native in second {
        let canonical = canonical_option_id(&native);
        if let Some(native_first) = by_canonical.get(&canonical) {
            entries.push(UniverseEntry {
                canonical,
                natives: [native_first.clone(), native],
            });
        }
    }
    entries.sort_by(|a, b| a.canonical.cmp(&b.canonical));
    entries.dedup_by(|a, b| a.canonical == b.canonical);
    entries.truncate(max_symbols);
    debug!(size = entries.len(), "universe discovered");
    Universe { entries }
}

fn parse_symbols(raw: Option<&str>, venue: &str) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(symbols) => symbols,
        Err(err) => {
            warn!(venue, error = %err, "unparseable symbol list");
            Vec::new()
        }
    }
}
