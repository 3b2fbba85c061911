//! src/automod/window.rs
//! Sliding Window Tracker – per-key logi zdarzeń w oknie czasowym.
//!
//! - `SlidingLog` = kolejka rekordów w kolejności wstawiania + "zatrzask" progu
//! - `WindowStore` = get-or-create slotu dla klucza (pamięć / cache z TTL)
//! - `SlidingWindowTracker` = record / trim / record_with pod blokadą klucza
//!
//! Every key owns its own `tokio::sync::Mutex`, so two events for the same
//! (guild, user) are serialized while different keys never wait on each other.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::sync::Cache;
use tokio::sync::Mutex;
use tracing::error;

use super::error::AutomodError;

/// How far back (ms) a record may land behind the tail before the log is
/// considered corrupted. Smaller gaps are clamped to the tail timestamp.
pub const MAX_CLOCK_SKEW_MS: i64 = 2_000;

pub trait Timestamped {
    /// Epoch millis.
    fn timestamp(&self) -> i64;
    fn set_timestamp(&mut self, ts: i64);
}

/// (guild, user) – klucz okna wiadomości.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorKey {
    pub community_id: u64,
    pub actor_id: u64,
}

impl ActorKey {
    pub fn new(community_id: u64, actor_id: u64) -> Self {
        Self {
            community_id,
            actor_id,
        }
    }
}

/// guild – klucz okna joinów.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommunityKey(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observation {
    pub count: usize,
    /// True only for the event that pushed an armed log to the threshold.
    pub crossed: bool,
}

/* ==============================
   SlidingLog
   ============================== */

#[derive(Debug)]
pub struct SlidingLog<R> {
    records: VecDeque<R>,
    /// Timestamp of the newest record when the threshold last fired.
    /// The latch stays closed until that record leaves the window.
    fired_at: Option<i64>,
}

impl<R> Default for SlidingLog<R> {
    fn default() -> Self {
        Self {
            records: VecDeque::with_capacity(16),
            fired_at: None,
        }
    }
}

impl<R: Timestamped> SlidingLog<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &R> + ExactSizeIterator {
        self.records.iter()
    }

    /// The `n` most recent records, newest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &R> {
        self.records.iter().rev().take(n)
    }

    pub fn is_armed(&self) -> bool {
        self.fired_at.is_none()
    }

    /// Drops the prefix older than `window_ms` relative to `now`.
    /// Records are insertion-ordered, so this stops at the first survivor.
    pub fn trim(&mut self, now: i64, window_ms: i64) -> usize {
        while let Some(front) = self.records.front() {
            if now - front.timestamp() > window_ms {
                self.records.pop_front();
            } else {
                break;
            }
        }
        self.records.len()
    }

    /// Checks that `record` may be appended without breaking the order.
    /// Small skew is clamped in place; anything bigger is an invariant violation.
    pub fn admit(&self, record: &mut R) -> Result<(), AutomodError> {
        let Some(tail) = self.records.back() else {
            return Ok(());
        };
        let tail_ts = tail.timestamp();
        let ts = record.timestamp();
        if ts >= tail_ts {
            return Ok(());
        }
        if tail_ts - ts > MAX_CLOCK_SKEW_MS {
            return Err(AutomodError::InvariantViolation {
                detail: format!("record at {ts} behind tail at {tail_ts}"),
            });
        }
        record.set_timestamp(tail_ts);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.fired_at = None;
    }

    fn push(&mut self, record: R) -> usize {
        self.records.push_back(record);
        self.records.len()
    }
}

/* ==============================
   Store: get-or-create slotu
   ============================== */

pub type LogSlot<R> = Arc<Mutex<SlidingLog<R>>>;

pub trait WindowStore<K, R>: Send + Sync {
    fn slot(&self, key: &K) -> LogSlot<R>;
    fn tracked_keys(&self) -> usize;
}

/// Zwykła mapa w pamięci – klucze żyją do końca procesu.
pub struct InMemoryWindows<K, R> {
    slots: DashMap<K, LogSlot<R>>,
}

impl<K: Eq + Hash, R> Default for InMemoryWindows<K, R> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash, R> InMemoryWindows<K, R> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, R> WindowStore<K, R> for InMemoryWindows<K, R>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Timestamped + Send,
{
    fn slot(&self, key: &K) -> LogSlot<R> {
        if let Some(slot) = self.slots.get(key) {
            return slot.clone();
        }
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SlidingLog::new())))
            .clone()
    }

    fn tracked_keys(&self) -> usize {
        self.slots.len()
    }
}

/// Cache z TTL (time-to-idle): nieaktywne klucze wypadają same.
pub struct EvictingWindows<K, R> {
    slots: Cache<K, LogSlot<R>>,
}

impl<K, R> EvictingWindows<K, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(idle: Duration, max_keys: u64) -> Self {
        Self {
            slots: Cache::builder()
                .time_to_idle(idle)
                .max_capacity(max_keys)
                .build(),
        }
    }
}

impl<K, R> WindowStore<K, R> for EvictingWindows<K, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: Timestamped + Send + 'static,
{
    fn slot(&self, key: &K) -> LogSlot<R> {
        self.slots
            .get_with(key.clone(), || Arc::new(Mutex::new(SlidingLog::new())))
    }

    fn tracked_keys(&self) -> usize {
        self.slots.entry_count() as usize
    }
}

/* ==============================
   Tracker
   ============================== */

pub struct SlidingWindowTracker<K, R> {
    store: Arc<dyn WindowStore<K, R>>,
}

impl<K, R> Clone for SlidingWindowTracker<K, R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<K, R> SlidingWindowTracker<K, R>
where
    K: Debug + Send + Sync + 'static,
    R: Timestamped + Send + 'static,
{
    pub fn new(store: Arc<dyn WindowStore<K, R>>) -> Self {
        Self { store }
    }

    /// Trim to the record's own timestamp, append, return the window count.
    pub async fn record(&self, key: &K, record: R, window_ms: i64) -> usize {
        let slot = self.store.slot(key);
        let mut log = slot.lock().await;
        log.trim(record.timestamp(), window_ms);
        append(key, &mut log, record)
    }

    /// Records the event, runs the threshold latch and hands the log to
    /// `inspect` while the key is still locked.
    pub async fn record_with<T>(
        &self,
        key: &K,
        record: R,
        window_ms: i64,
        threshold: usize,
        inspect: impl FnOnce(&SlidingLog<R>, Observation) -> T,
    ) -> T {
        let slot = self.store.slot(key);
        let mut log = slot.lock().await;

        let now = record.timestamp();
        log.trim(now, window_ms);
        // re-arm only after the window rolled past the record that fired
        if log.fired_at.is_some_and(|ts| now - ts > window_ms) {
            log.fired_at = None;
        }
        let count = append(key, &mut log, record);
        let crossed = log.fired_at.is_none() && count >= threshold;
        if crossed {
            log.fired_at = log.records.back().map(|r| r.timestamp());
        }

        inspect(&log, Observation { count, crossed })
    }

    /// Idempotent for a fixed `now`.
    pub async fn trim(&self, key: &K, now: i64, window_ms: i64) -> usize {
        let slot = self.store.slot(key);
        let mut log = slot.lock().await;
        log.trim(now, window_ms)
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.tracked_keys()
    }
}

impl<K, R> SlidingWindowTracker<K, R>
where
    K: Debug + Eq + Hash + Clone + Send + Sync + 'static,
    R: Timestamped + Send + 'static,
{
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryWindows::<K, R>::new()))
    }

    pub fn evicting(idle: Duration, max_keys: u64) -> Self {
        Self::new(Arc::new(EvictingWindows::<K, R>::new(idle, max_keys)))
    }
}

fn append<K: Debug, R: Timestamped>(key: &K, log: &mut SlidingLog<R>, mut record: R) -> usize {
    if let Err(e) = log.admit(&mut record) {
        error!(?key, error = %e, "sliding log out of order – resetting key");
        log.reset();
    }
    log.push(record)
}
