//! Batched visit writes.
//!
//! `record_visit` never blocks on the store in the common case: events go
//! into a bounded queue and a background task flushes them in arrival order,
//! either when a batch fills up or when the flush interval ticks. When the
//! queue is full (or shutdown has begun) the event is written synchronously
//! instead of being dropped.

use crate::cache::CacheManager;
use crate::config::AggregatorConfig;
use crate::interface::{HistorySink, OmniResult, ShutdownReport};
use crate::models::VisitEvent;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Counters for the write path.
#[derive(Debug, Default)]
pub struct AggregatorCounters {
    pub enqueued: AtomicU64,
    pub flushed: AtomicU64,
    pub fallback_writes: AtomicU64,
    pub failed_flushes: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregatorStats {
    pub enqueued: u64,
    pub flushed: u64,
    pub fallback_writes: u64,
    pub failed_flushes: u64,
}

impl AggregatorCounters {
    fn snapshot(&self) -> AggregatorStats {
        AggregatorStats {
            enqueued: self.enqueued.load(Ordering::SeqCst),
            flushed: self.flushed.load(Ordering::SeqCst),
            fallback_writes: self.fallback_writes.load(Ordering::SeqCst),
            failed_flushes: self.failed_flushes.load(Ordering::SeqCst),
        }
    }
}

pub struct WriteAggregator {
    /// `None` once shutdown has begun.
    tx: RwLock<Option<mpsc::Sender<VisitEvent>>>,
    sink: Arc<dyn HistorySink>,
    cache: Arc<CacheManager>,
    counters: Arc<AggregatorCounters>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WriteAggregator {
    /// Start the flush loop on `runtime`.
    pub fn start(
        sink: Arc<dyn HistorySink>,
        cache: Arc<CacheManager>,
        config: &AggregatorConfig,
        runtime: &tokio::runtime::Handle,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let counters = Arc::new(AggregatorCounters::default());
        let cancel = CancellationToken::new();

        let flush_loop = FlushLoop {
            rx,
            sink: Arc::clone(&sink),
            cache: Arc::clone(&cache),
            counters: Arc::clone(&counters),
            cancel: cancel.clone(),
            batch_size: config.batch_size,
            interval: config.flush_interval(),
        };
        let task = runtime.spawn(flush_loop.run());

        Self {
            tx: RwLock::new(Some(tx)),
            sink,
            cache,
            counters,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn stats(&self) -> AggregatorStats {
        self.counters.snapshot()
    }

    /// Queue a visit. Falls back to a synchronous store write when the queue
    /// is full or closed; only that fallback can return an error.
    pub fn record_visit(&self, url: &str, title: &str) -> OmniResult<()> {
        let event = VisitEvent::new(url, title);

        let rejected = match self.tx.read().as_ref() {
            Some(tx) => match tx.try_send(event) {
                Ok(()) => {
                    self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                Err(TrySendError::Full(event)) => {
                    tracing::warn!(url = %event.url, "visit queue full, writing synchronously");
                    event
                }
                Err(TrySendError::Closed(event)) => event,
            },
            None => event,
        };

        self.write_through(&rejected)
    }

    fn write_through(&self, event: &VisitEvent) -> OmniResult<()> {
        self.sink.add_or_update(&event.url, &event.title)?;
        self.counters.fallback_writes.fetch_add(1, Ordering::SeqCst);
        self.cache.record_writes(1);
        Ok(())
    }

    /// Stop intake and flush everything queued, waiting at most `timeout`.
    ///
    /// Visits recorded after this call are written synchronously. A timeout
    /// cancels the flush loop and is reported rather than returned as an error.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let flushed_before = self.counters.flushed.load(Ordering::SeqCst);

        // Dropping the only sender lets the loop drain and exit on its own
        self.tx.write().take();
        let Some(task) = self.task.lock().take() else {
            return ShutdownReport::default();
        };

        let timed_out = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "visit flush task ended abnormally");
                false
            }
            Err(_) => {
                self.cancel.cancel();
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "visit queue drain timed out");
                true
            }
        };

        let flushed = self.counters.flushed.load(Ordering::SeqCst) - flushed_before;
        tracing::info!(flushed, timed_out, "visit aggregator stopped");
        ShutdownReport {
            flushed: flushed as usize,
            timed_out,
            ..ShutdownReport::default()
        }
    }
}

impl Drop for WriteAggregator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FLUSH LOOP
// ─────────────────────────────────────────────────────────────────────────────

struct FlushLoop {
    rx: mpsc::Receiver<VisitEvent>,
    sink: Arc<dyn HistorySink>,
    cache: Arc<CacheManager>,
    counters: Arc<AggregatorCounters>,
    cancel: CancellationToken,
    batch_size: usize,
    interval: Duration,
}

impl FlushLoop {
    async fn run(mut self) {
        let mut batch: Vec<VisitEvent> = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                maybe = self.rx.recv() => {
                    let Some(event) = maybe else { break; };
                    batch.push(event);
                    if batch.len() >= self.batch_size {
                        self.flush(&mut batch).await;
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut batch).await;
                    // Lets a quiet period after enough writes still trigger a rebuild
                    self.cache.maybe_refresh();
                }
            }
        }

        // Every sender is gone and the queue is empty
        self.flush(&mut batch).await;
    }

    async fn flush(&self, batch: &mut Vec<VisitEvent>) {
        if batch.is_empty() {
            return;
        }
        let events = std::mem::replace(batch, Vec::with_capacity(self.batch_size));
        let pending = events.len();
        let sink = Arc::clone(&self.sink);

        let result = tokio::task::spawn_blocking(move || sink.add_or_update_batch(&events)).await;
        match result {
            Ok(Ok(written)) => {
                self.counters.flushed.fetch_add(written as u64, Ordering::SeqCst);
                tracing::debug!(written, "flushed visit batch");
                self.cache.record_writes(written as u64);
            }
            Ok(Err(e)) => {
                self.counters.failed_flushes.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(error = %e, dropped = pending, "visit batch flush failed");
            }
            Err(e) => {
                self.counters.failed_flushes.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(error = %e, dropped = pending, "visit batch flush panicked");
            }
        }
    }
}
