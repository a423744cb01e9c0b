//! In-process bus backend used by the paper pipeline and the test suites.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::timeout;

use arbor_core::TimestampMs;

use crate::{Bus, BusError, BusResult, StreamEntry};

/// Upper bound on how long a blocked reader sleeps between polls; keeps the
/// notify race window bounded without busy-spinning.
const POLL_CAP: Duration = Duration::from_millis(20);

#[derive(Default)]
struct GroupState {
    /// Index of the next undelivered entry.
    cursor: usize,
    /// Delivered-but-unacknowledged entry ids.
    pending: HashSet<String>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<StreamEntry>,
    groups: HashMap<String, GroupState>,
}

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, StreamState>,
    kv: HashMap<String, KvEntry>,
}

/// Single-process implementation of [`Bus`] backed by plain maps.
///
/// Blocking group reads are emulated with a notify-plus-short-poll loop; the
/// real backend blocks server-side instead. Everything else matches the
/// contract exactly, including exclusive per-group delivery and the
/// monotonic clock.
pub struct MemoryBus {
    inner: Mutex<Inner>,
    notify: Notify,
    clock_ms: AtomicI64,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            clock_ms: AtomicI64::new(0),
        }
    }

    fn tick(&self) -> TimestampMs {
        let wall = Utc::now().timestamp_millis();
        let prev = self.clock_ms.fetch_max(wall, Ordering::SeqCst);
        prev.max(wall)
    }

    fn take_ready(
        inner: &mut Inner,
        stream: &str,
        group: &str,
        count: usize,
    ) -> BusResult<Vec<StreamEntry>> {
        let state = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| BusError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;
        let group_state = state.groups.get_mut(group).ok_or_else(|| BusError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        })?;
        let available = state.entries.len().saturating_sub(group_state.cursor);
        let take = available.min(count);
        let mut batch = Vec::with_capacity(take);
        for entry in state.entries[group_state.cursor..group_state.cursor + take].iter() {
            group_state.pending.insert(entry.id.clone());
            batch.push(entry.clone());
        }
        group_state.cursor += take;
        Ok(batch)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn append(&self, stream: &str, data: &str) -> BusResult<String> {
        let ts = self.tick();
        let mut inner = self.inner.lock();
        let state = inner.streams.entry(stream.to_string()).or_default();
        let id = format!("{ts}-{}", state.entries.len());
        state.entries.push(StreamEntry {
            id: id.clone(),
            data: data.to_string(),
        });
        drop(inner);
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str) -> BusResult<()> {
        let mut inner = self.inner.lock();
        let state = inner.streams.entry(stream.to_string()).or_default();
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        count: usize,
        block: Duration,
    ) -> BusResult<Vec<StreamEntry>> {
        let deadline = Instant::now() + block;
        loop {
            {
                let mut inner = self.inner.lock();
                let batch = Self::take_ready(&mut inner, stream, group, count)?;
                if !batch.is_empty() {
                    return Ok(batch);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let wait = (deadline - now).min(POLL_CAP);
            let _ = timeout(wait, self.notify.notified()).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> BusResult<()> {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.streams.get_mut(stream) {
            if let Some(group_state) = state.groups.get_mut(group) {
                group_state.pending.remove(id);
            }
        }
        Ok(())
    }

    async fn pending(&self, stream: &str, group: &str) -> BusResult<usize> {
        let inner = self.inner.lock();
        Ok(inner
            .streams
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .map_or(0, |group_state| group_state.pending.len()))
    }

    async fn range(&self, stream: &str, start: usize) -> BusResult<Vec<StreamEntry>> {
        let inner = self.inner.lock();
        Ok(inner
            .streams
            .get(stream)
            .map(|state| state.entries.iter().skip(start).cloned().collect())
            .unwrap_or_default())
    }

    async fn kv_set(&self, key: &str, value: &str, ttl: Option<Duration>) -> BusResult<()> {
        let mut inner = self.inner.lock();
        inner.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> BusResult<Option<String>> {
        let mut inner = self.inner.lock();
        match inner.kv.get(key) {
            Some(entry) if entry.expired() => {
                inner.kv.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn kv_mget(&self, keys: &[String]) -> BusResult<Vec<Option<String>>> {
        let mut inner = self.inner.lock();
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = match inner.kv.get(key) {
                Some(entry) if entry.expired() => {
                    inner.kv.remove(key);
                    None
                }
                Some(entry) => Some(entry.value.clone()),
                None => None,
            };
            values.push(value);
        }
        Ok(values)
    }

    async fn now_ms(&self) -> BusResult<TimestampMs> {
        Ok(self.tick())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_read_ack_round_trip() {
        let bus = MemoryBus::new();
        bus.create_group("s", "g").await.unwrap();
        bus.append("s", "one").await.unwrap();
        bus.append("s", "two").await.unwrap();

        let batch = bus
            .read_group("s", "g", "c1", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].data, "one");
        assert_eq!(bus.pending("s", "g").await.unwrap(), 2);

        for entry in &batch {
            bus.ack("s", "g", &entry.id).await.unwrap();
        }
        assert_eq!(bus.pending("s", "g").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn each_entry_is_delivered_to_one_consumer_per_group() {
        let bus = MemoryBus::new();
        bus.create_group("s", "g").await.unwrap();
        bus.append("s", "only").await.unwrap();

        let first = bus
            .read_group("s", "g", "c1", 10, Duration::from_millis(10))
            .await
            .unwrap();
        let second = bus
            .read_group("s", "g", "c2", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn independent_groups_each_see_every_entry() {
        let bus = MemoryBus::new();
        bus.create_group("s", "a").await.unwrap();
        bus.create_group("s", "b").await.unwrap();
        bus.append("s", "x").await.unwrap();

        let a = bus
            .read_group("s", "a", "c", 10, Duration::from_millis(10))
            .await
            .unwrap();
        let b = bus
            .read_group("s", "b", "c", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn group_creation_is_idempotent_and_required() {
        let bus = MemoryBus::new();
        let err = bus
            .read_group("s", "g", "c", 1, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoGroup { .. }));

        bus.create_group("s", "g").await.unwrap();
        bus.create_group("s", "g").await.unwrap();
        let batch = bus
            .read_group("s", "g", "c", 1, Duration::from_millis(5))
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn blocked_read_wakes_on_append() {
        let bus = std::sync::Arc::new(MemoryBus::new());
        bus.create_group("s", "g").await.unwrap();

        let reader = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.read_group("s", "g", "c", 1, Duration::from_secs(2))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        bus.append("s", "late").await.unwrap();
        let batch = reader.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].data, "late");
    }

    #[tokio::test]
    async fn kv_ttl_expires_entries() {
        let bus = MemoryBus::new();
        bus.kv_set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(bus.kv_get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(bus.kv_get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mget_preserves_order_and_gaps() {
        let bus = MemoryBus::new();
        bus.kv_set("a", "1", None).await.unwrap();
        bus.kv_set("c", "3", None).await.unwrap();
        let values = bus
            .kv_mget(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![Some("1".to_string()), None, Some("3".to_string())]
        );
    }

    #[tokio::test]
    async fn clock_is_monotonic_nondecreasing() {
        let bus = MemoryBus::new();
        let mut last = 0;
        for _ in 0..1000 {
            let now = bus.now_ms().await.unwrap();
            assert!(now >= last);
            last = now;
        }
    }

    #[tokio::test]
    async fn entry_ids_increase_within_a_stream() {
        let bus = MemoryBus::new();
        bus.append("s", "a").await.unwrap();
        bus.append("s", "b").await.unwrap();
        let all = bus.range("s", 0).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_ne!(all[0].id, all[1].id);
        let seq = |id: &str| id.rsplit('-').next().unwrap().parse::<usize>().unwrap();
        assert!(seq(&all[1].id) > seq(&all[0].id));
    }
}
