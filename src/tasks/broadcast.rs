use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::connection_manager::{
    ConnectionHandle, ConnectionManager, ConnectionManagerError, OperatorConnectObserver, Room,
};
use crate::health::HealthCollector;
use crate::metrics::SchedulerMetrics;
use crate::stats::StatsAggregator;
use crate::websocket::Topic;

/// Counters exposed by [`BroadcastScheduler::stats`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub running: bool,
    pub ticks: u64,
    pub skipped_ticks: u64,
    /// Snapshots actually handed to the operator room
    pub broadcasts: u64,
    pub immediate_broadcasts: u64,
    pub failures: u64,
    pub in_flight: usize,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    broadcasts: AtomicU64,
    immediate_broadcasts: AtomicU64,
    failures: AtomicU64,
}

/// Periodically publishes health and stats snapshots to the operator room.
///
/// Ticks that find the operator room empty are skipped without invoking either
/// producer. Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct BroadcastScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    manager: Arc<ConnectionManager>,
    collector: Arc<HealthCollector>,
    aggregator: Arc<StatsAggregator>,
    interval: Duration,
    /// Running timer task. Also held while publishing so `stop` and a send
    /// never interleave.
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by `stop`; work started under an older value is discarded
    generation: AtomicU64,
    in_flight: AtomicUsize,
    counters: Counters,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl BroadcastScheduler {
    pub fn new(
        manager: Arc<ConnectionManager>,
        collector: Arc<HealthCollector>,
        aggregator: Arc<StatsAggregator>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                manager,
                collector,
                aggregator,
                interval,
                timer: Mutex::new(None),
                generation: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Start the periodic timer. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut timer = self.inner.lock_timer();
        if timer.is_some() {
            tracing::info!("Broadcast scheduler already running, ignoring start");
            return false;
        }

        let generation = self.inner.generation.load(Ordering::Acquire);
        let inner = self.inner.clone();
        *timer = Some(tokio::spawn(async move { inner.run(generation).await }));

        tracing::info!(
            interval_secs = self.inner.interval.as_secs_f64(),
            "Broadcast scheduler started"
        );
        true
    }

    /// Cancel the timer. No broadcast from this scheduler reaches clients
    /// after `stop` returns, including work that was already in flight.
    /// Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        let mut timer = self.inner.lock_timer();
        self.inner.generation.fetch_add(1, Ordering::AcqRel);

        match timer.take() {
            Some(handle) => {
                handle.abort();
                tracing::info!("Broadcast scheduler stopped");
                true
            }
            None => {
                tracing::debug!("Broadcast scheduler not running, nothing to stop");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_timer().is_some()
    }

    /// Produce and send both snapshots now, outside the timer cadence.
    ///
    /// Failures are logged and swallowed.
    pub async fn broadcast_immediate(&self) {
        self.inner
            .counters
            .immediate_broadcasts
            .fetch_add(1, Ordering::Relaxed);
        let generation = self.inner.generation.load(Ordering::Acquire);
        self.inner.produce_and_send_guarded(generation, "broadcast_immediate").await;
    }

    /// Fire [`BroadcastScheduler::broadcast_immediate`] on the runtime without waiting
    pub fn trigger_immediate(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let scheduler = self.clone();
                runtime.spawn(async move { scheduler.broadcast_immediate().await });
            }
            Err(e) => {
                tracing::warn!(error = %e, "No runtime available for immediate broadcast");
            }
        }
    }

    /// Observer to register with the connection manager so newly connected
    /// operators get a snapshot right away
    pub fn operator_observer(&self) -> Arc<dyn OperatorConnectObserver> {
        Arc::new(ImmediateBroadcastTrigger {
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Number of produce-and-send runs currently executing
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.inner.counters;
        SchedulerStats {
            running: self.is_running(),
            ticks: counters.ticks.load(Ordering::Relaxed),
            skipped_ticks: counters.skipped_ticks.load(Ordering::Relaxed),
            broadcasts: counters.broadcasts.load(Ordering::Relaxed),
            immediate_broadcasts: counters.immediate_broadcasts.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }
}

impl SchedulerInner {
    fn lock_timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(self: Arc<Self>, generation: u64) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.tick(generation).await;
        }
    }

    #[tracing::instrument(name = "scheduler.tick", skip(self))]
    async fn tick(&self, generation: u64) {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let listeners = match self.manager.room_size(&Room::Operators) {
            Ok(size) => size,
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                SchedulerMetrics::record_failed();
                tracing::error!(error = %e, operation = "scheduler.tick", "Cannot read operator room size");
                return;
            }
        };

        if listeners == 0 {
            self.counters.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            SchedulerMetrics::record_skipped();
            tracing::trace!("No operators listening, skipping tick");
            return;
        }

        if self.produce_and_send_guarded(generation, "scheduler.tick").await {
            SchedulerMetrics::record_broadcast();
        } else {
            SchedulerMetrics::record_failed();
        }
    }

    /// Run one produce-and-send, containing errors and panics.
    /// Returns `true` when nothing failed.
    async fn produce_and_send_guarded(&self, generation: u64, operation: &'static str) -> bool {
        let _in_flight = InFlight::enter(&self.in_flight);

        match AssertUnwindSafe(self.produce_and_send(generation))
            .catch_unwind()
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(_) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(operation = operation, "Snapshot production panicked");
                false
            }
        }
    }

    async fn produce_and_send(&self, generation: u64) -> bool {
        let (health, stats) = tokio::join!(self.collector.collect(), self.aggregator.aggregate());

        let mut ok = self.publish(generation, Topic::HealthUpdate, &health).is_ok();

        match stats {
            Ok(stats) => ok &= self.publish(generation, Topic::StatsUpdate, &stats).is_ok(),
            Err(e) => {
                ok = false;
                tracing::error!(error = %e, operation = "stats.aggregate", "Stats snapshot failed");
            }
        }

        ok
    }

    /// Send one snapshot to the operator room unless the scheduler was
    /// stopped after `generation` was captured. `Ok(false)` means discarded.
    fn publish<T: Serialize>(
        &self,
        generation: u64,
        topic: Topic,
        payload: &T,
    ) -> Result<bool, ConnectionManagerError> {
        let _timer = self.lock_timer();
        if self.generation.load(Ordering::Acquire) != generation {
            tracing::debug!(topic = %topic, "Discarding snapshot produced before scheduler stop");
            return Ok(false);
        }

        match self.manager.broadcast(&Room::Operators, topic, payload) {
            Ok(_) => {
                self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) => {
                tracing::error!(error = %e, topic = %topic, "Snapshot broadcast failed");
                Err(e)
            }
        }
    }
}

/// Connection manager observer that requests an immediate broadcast.
///
/// Holds the scheduler weakly so the manager does not keep it alive.
struct ImmediateBroadcastTrigger {
    inner: Weak<SchedulerInner>,
}

impl OperatorConnectObserver for ImmediateBroadcastTrigger {
    fn on_operator_connected(&self, connection: &ConnectionHandle) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        tracing::debug!(connection_id = %connection.id, "Operator connected, broadcasting now");
        BroadcastScheduler { inner }.trigger_immediate();
    }
}
