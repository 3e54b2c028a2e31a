//! Aggregation Buffer: groups history events by (entity, correlation id) and
//! flushes each group once, a fixed window after its first event.
//!
//! - `ingest` is synchronous and never fails; it only touches the group map.
//! - The map lock is held for map operations only, never across `.await`.
//! - Flush tasks run on the runtime captured at construction, detached from
//!   whatever task called `ingest`.
//! - There is no timer cancellation: a flush that finds its key already gone
//!   is a no-op. Groups still pending when the process exits are lost.
//! - Each group keeps its timer task. Flushing never aborts it (the task is
//!   the flush); `abort_pending` does, on interrupted shutdown.

use std::{
    collections::{hash_map::Entry, HashMap},
    str::FromStr,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, warn};

use crate::{
    errors::Error,
    events::{EventGroupKey, HistoryEvent},
    ports::FlushHandler,
    Result,
};

/// What to do with events that carry no correlation id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UncorrelatedPolicy {
    /// Flush as a singleton right away.
    #[default]
    Immediate,
    /// Singleton group, but still wait out the window.
    Debounce,
}

impl FromStr for UncorrelatedPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "debounce" => Ok(Self::Debounce),
            other => Err(Error::Config(format!(
                "unknown uncorrelated policy {other:?} (expected immediate|debounce)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AggregationConfig {
    pub window: Duration,
    pub uncorrelated: UncorrelatedPolicy,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(2),
            uncorrelated: UncorrelatedPolicy::Immediate,
        }
    }
}

#[derive(Debug, Default)]
struct BufferStats {
    ingested: AtomicU64,
    groups_opened: AtomicU64,
    groups_flushed: AtomicU64,
    duplicate_flushes: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ingested: u64,
    pub groups_opened: u64,
    pub groups_flushed: u64,
    pub duplicate_flushes: u64,
}

struct EventGroup {
    events: Vec<HistoryEvent>,
    opened_at: Instant,
    timer: JoinHandle<()>,
}

pub struct AggregationBuffer {
    cfg: AggregationConfig,
    handler: Arc<dyn FlushHandler>,
    runtime: Handle,
    groups: Mutex<HashMap<EventGroupKey, EventGroup>>,
    arrivals: AtomicU64,
    in_flight: AtomicUsize,
    stats: BufferStats,
}

impl AggregationBuffer {
    /// Build a buffer bound to the current tokio runtime.
    pub fn new(cfg: AggregationConfig, handler: Arc<dyn FlushHandler>) -> Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|e| {
            Error::Config(format!("aggregation buffer needs a tokio runtime: {e}"))
        })?;
        Ok(Self::with_runtime(cfg, handler, runtime))
    }

    pub fn with_runtime(
        cfg: AggregationConfig,
        handler: Arc<dyn FlushHandler>,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            handler,
            runtime,
            groups: Mutex::new(HashMap::new()),
            arrivals: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            stats: BufferStats::default(),
        })
    }

    /// Fire-and-forget: append to the event's group, opening it if needed.
    pub fn ingest(self: &Arc<Self>, event: HistoryEvent) {
        self.stats.ingested.fetch_add(1, Ordering::Relaxed);

        let key = EventGroupKey::for_event(&event, || {
            self.arrivals.fetch_add(1, Ordering::Relaxed)
        });

        // The timer is spawned under the lock so the group never exists without one;
        // a timer that fires early just waits for the lock.
        let opened = {
            let mut groups = self.lock_groups();
            match groups.entry(key.clone()) {
                Entry::Occupied(mut e) => {
                    e.get_mut().events.push(event);
                    None
                }
                Entry::Vacant(v) => {
                    let delay = self.delay_for(&key);
                    v.insert(EventGroup {
                        events: vec![event],
                        opened_at: Instant::now(),
                        timer: self.schedule(key.clone(), delay),
                    });
                    Some(delay)
                }
            }
        };

        match opened {
            None => debug!(group = %key, "event joined open group"),
            Some(delay) => {
                self.stats.groups_opened.fetch_add(1, Ordering::Relaxed);
                debug!(group = %key, delay_ms = delay.as_millis() as u64, "group opened");
            }
        }
    }

    /// Drop every group still collecting events and cancel its timer.
    ///
    /// Groups already flushing are not touched. Returns the number discarded;
    /// once this returns their in-flight slots are released.
    pub async fn abort_pending(&self) -> usize {
        let drained: Vec<(EventGroupKey, EventGroup)> = self.lock_groups().drain().collect();
        let count = drained.len();
        for (key, group) in drained {
            group.timer.abort();
            warn!(group = %key, events = group.events.len(), "pending group discarded");
            let _ = group.timer.await;
        }
        count
    }

    /// Groups currently collecting events.
    pub fn pending_groups(&self) -> usize {
        self.lock_groups().len()
    }

    /// Scheduled flushes that have not finished (waiting or delivering).
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            ingested: self.stats.ingested.load(Ordering::Relaxed),
            groups_opened: self.stats.groups_opened.load(Ordering::Relaxed),
            groups_flushed: self.stats.groups_flushed.load(Ordering::Relaxed),
            duplicate_flushes: self.stats.duplicate_flushes.load(Ordering::Relaxed),
        }
    }

    fn delay_for(&self, key: &EventGroupKey) -> Duration {
        if key.is_solo() && self.cfg.uncorrelated == UncorrelatedPolicy::Immediate {
            Duration::ZERO
        } else {
            self.cfg.window
        }
    }

    fn schedule(self: &Arc<Self>, key: EventGroupKey, delay: Duration) -> JoinHandle<()> {
        let deadline = Instant::now() + delay;
        let guard = InFlight::enter(Arc::clone(self));
        self.runtime.spawn(async move {
            if !delay.is_zero() {
                sleep_until(deadline).await;
            }
            guard.buffer.flush(&key).await;
            drop(guard);
        })
    }

    async fn flush(&self, key: &EventGroupKey) {
        let group = { self.lock_groups().remove(key) };

        let Some(group) = group else {
            self.stats.duplicate_flushes.fetch_add(1, Ordering::Relaxed);
            warn!(group = %key, "flush for unknown group ignored");
            return;
        };

        self.stats.groups_flushed.fetch_add(1, Ordering::Relaxed);
        debug!(
            group = %key,
            events = group.events.len(),
            age_ms = group.opened_at.elapsed().as_millis() as u64,
            "flushing group"
        );
        self.handler.handle(key.clone(), group.events).await;
    }

    fn lock_groups(&self) -> MutexGuard<'_, HashMap<EventGroupKey, EventGroup>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts one scheduled flush; released on drop, so a panicking handler
/// cannot leave the count stuck.
struct InFlight {
    buffer: Arc<AggregationBuffer>,
}

impl InFlight {
    fn enter(buffer: Arc<AggregationBuffer>) -> Self {
        buffer.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { buffer }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.buffer.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityId;
    use crate::events::fixtures::{at, event};
    use crate::events::{Correlation, EventKind};
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    type Flushed = (EventGroupKey, Vec<HistoryEvent>, Instant);

    struct Recorder {
        tx: mpsc::UnboundedSender<Flushed>,
    }

    #[async_trait]
    impl FlushHandler for Recorder {
        async fn handle(&self, key: EventGroupKey, events: Vec<HistoryEvent>) {
            let _ = self.tx.send((key, events, Instant::now()));
        }
    }

    fn buffer(cfg: AggregationConfig) -> (Arc<AggregationBuffer>, mpsc::UnboundedReceiver<Flushed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let buf = AggregationBuffer::new(cfg, Arc::new(Recorder { tx })).unwrap();
        (buf, rx)
    }

    fn correlated(entity: i64, corr: &str, secs: i64) -> HistoryEvent {
        let mut ev = event(entity, 7, EventKind::Comment, Some(corr));
        ev.comment = Some(format!("c{secs}"));
        ev.created_at = at(secs);
        ev
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_flushes_once_after_fixed_window() {
        let (buf, mut rx) = buffer(AggregationConfig::default());
        let start = Instant::now();

        buf.ingest(correlated(42, "tx", 0));
        sleep(Duration::from_millis(1500)).await;
        buf.ingest(correlated(42, "tx", 1));
        buf.ingest(correlated(42, "tx", 2));
        assert_eq!(buf.pending_groups(), 1);

        let (key, events, flushed_at) = rx.recv().await.unwrap();
        assert_eq!(key.correlation, Correlation::Shared("tx".into()));
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].created_at, at(0));
        // Window counts from the first event; later events do not push it out.
        assert_eq!(flushed_at.duration_since(start), Duration::from_secs(2));

        sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(buf.pending_groups(), 0);
        assert_eq!(buf.in_flight(), 0);
        assert_eq!(
            buf.stats(),
            StatsSnapshot {
                ingested: 3,
                groups_opened: 1,
                groups_flushed: 1,
                duplicate_flushes: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn different_correlation_ids_never_share_a_group() {
        let (buf, mut rx) = buffer(AggregationConfig::default());
        buf.ingest(correlated(42, "a", 0));
        buf.ingest(correlated(42, "b", 0));
        buf.ingest(correlated(43, "a", 0));
        assert_eq!(buf.pending_groups(), 3);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let (key, events, _) = rx.recv().await.unwrap();
            assert_eq!(events.len(), 1);
            seen.push(key.to_string());
        }
        seen.sort();
        assert_eq!(seen, vec!["42/a", "42/b", "43/a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn uncorrelated_events_flush_immediately_as_singletons() {
        let (buf, mut rx) = buffer(AggregationConfig::default());
        let start = Instant::now();
        buf.ingest(event(42, 7, EventKind::Comment, None));
        buf.ingest(event(42, 7, EventKind::Comment, None));

        for _ in 0..2 {
            let (key, events, flushed_at) = rx.recv().await.unwrap();
            assert!(key.is_solo());
            assert_eq!(events.len(), 1);
            assert_eq!(flushed_at, start);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_policy_delays_uncorrelated_singletons() {
        let (buf, mut rx) = buffer(AggregationConfig {
            window: Duration::from_millis(500),
            uncorrelated: UncorrelatedPolicy::Debounce,
        });
        let start = Instant::now();
        buf.ingest(event(42, 7, EventKind::Comment, None));
        buf.ingest(event(42, 7, EventKind::Comment, None));

        for _ in 0..2 {
            let (_, events, flushed_at) = rx.recv().await.unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(flushed_at.duration_since(start), Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_flush_of_same_key_is_ignored() {
        let (buf, mut rx) = buffer(AggregationConfig::default());
        buf.ingest(correlated(42, "tx", 0));
        let key = EventGroupKey {
            entity_id: EntityId(42),
            correlation: Correlation::Shared("tx".into()),
        };

        buf.flush(&key).await;
        buf.flush(&key).await;
        let (_, events, _) = rx.recv().await.unwrap();
        assert_eq!(events.len(), 1);

        // The scheduled timer still fires and hits the guard too.
        sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(buf.stats().groups_flushed, 1);
        assert_eq!(buf.stats().duplicate_flushes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn event_after_flush_opens_a_new_group() {
        let (buf, mut rx) = buffer(AggregationConfig::default());
        buf.ingest(correlated(42, "tx", 0));
        let _ = rx.recv().await.unwrap();

        buf.ingest(correlated(42, "tx", 5));
        let (_, events, _) = rx.recv().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].created_at, at(5));
        assert_eq!(buf.stats().groups_opened, 2);
    }

    struct Panicking;

    #[async_trait]
    impl FlushHandler for Panicking {
        async fn handle(&self, key: EventGroupKey, _events: Vec<HistoryEvent>) {
            panic!("handler blew up on {key}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_releases_in_flight() {
        let buf = AggregationBuffer::new(AggregationConfig::default(), Arc::new(Panicking)).unwrap();

        buf.ingest(correlated(42, "tx", 0));
        assert_eq!(buf.in_flight(), 1);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(buf.in_flight(), 0);
        assert_eq!(buf.pending_groups(), 0);
        assert_eq!(buf.stats().groups_flushed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_pending_cancels_timers_and_releases_in_flight() {
        let (buf, mut rx) = buffer(AggregationConfig::default());
        buf.ingest(correlated(42, "a", 0));
        buf.ingest(correlated(43, "b", 0));
        assert_eq!(buf.in_flight(), 2);

        assert_eq!(buf.abort_pending().await, 2);
        assert_eq!(buf.in_flight(), 0);
        assert_eq!(buf.pending_groups(), 0);

        sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(buf.stats().groups_flushed, 0);
        assert_eq!(buf.stats().duplicate_flushes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_outlives_the_ingesting_task() {
        let (buf, mut rx) = buffer(AggregationConfig::default());
        let producer = {
            let buf = Arc::clone(&buf);
            tokio::spawn(async move {
                buf.ingest(correlated(42, "tx", 0));
            })
        };
        producer.await.unwrap();

        let (_, events, _) = rx.recv().await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn parses_policy() {
        assert_eq!(
            "Debounce".parse::<UncorrelatedPolicy>().unwrap(),
            UncorrelatedPolicy::Debounce
        );
        assert_eq!(
            " immediate ".parse::<UncorrelatedPolicy>().unwrap(),
            UncorrelatedPolicy::Immediate
        );
        assert!("later".parse::<UncorrelatedPolicy>().is_err());
    }

    #[test]
    fn new_outside_runtime_is_a_config_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let res = AggregationBuffer::new(AggregationConfig::default(), Arc::new(Recorder { tx }));
        assert!(matches!(res, Err(Error::Config(_))));
    }
}
