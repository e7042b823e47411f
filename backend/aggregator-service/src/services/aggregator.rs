/// Aggregator coordinator: ingestion queue, worker pool, dedup store, stats
///
/// Architecture:
/// - `submit` counts the event as received and pushes it onto the queue; it
///   returns as soon as the event is queued (or suspends while a bounded
///   queue is full)
/// - N worker tasks drain the queue and call `DedupStore::mark_processed`;
///   the store's insert-if-absent is the only arbiter of which copy wins
/// - Reads (`get_events`, `get_stats`) bypass the queue entirely
/// - `stop` appends one shutdown sentinel per worker behind any queued
///   events, so shutdown drains the queue instead of purging it
use dedup_store::{DedupStore, NewEventRecord};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::queue::{IngestQueue, QueueItem};
use super::stats::StatsAccumulator;
use crate::error::Result;
use crate::metrics;
use crate::models::{Event, Stats, StoredEvent};

pub struct AggregatorService {
    store: DedupStore,
    queue: Arc<IngestQueue>,
    stats: Arc<StatsAccumulator>,
    worker_count: usize,
    started_at: Instant,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AggregatorService {
    /// Create the service and seed counters from the store.
    ///
    /// # Arguments
    /// * `store` - Durable dedup store
    /// * `worker_count` - Number of workers; values below 1 are clamped to 1
    /// * `queue_maxsize` - Queue bound; 0 = unbounded
    ///
    /// `received` and `unique_processed` resume from stored row counts;
    /// `duplicate_dropped` restarts at zero.
    pub async fn new(store: DedupStore, worker_count: i64, queue_maxsize: usize) -> Result<Self> {
        let worker_count = usize::try_from(worker_count.max(1)).unwrap_or(1);

        let counts = store.stats().await?;
        let topics = store.topics().await?;

        let stats = StatsAccumulator::new();
        stats.seed(
            u64::try_from(counts.processed_events).unwrap_or(0),
            u64::try_from(counts.dedup_records).unwrap_or(0),
            topics,
        );

        info!(
            worker_count,
            queue_maxsize,
            stored_events = counts.processed_events,
            "Aggregator initialized"
        );

        Ok(Self {
            store,
            queue: Arc::new(IngestQueue::new(queue_maxsize)),
            stats: Arc::new(stats),
            worker_count,
            started_at: Instant::now(),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the worker tasks. No-op if they are already running.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            warn!("Aggregator workers already running");
            return;
        }

        info!(worker_count = self.worker_count, "Starting aggregator workers");

        for worker_id in 0..self.worker_count {
            let worker = Worker {
                id: worker_id,
                queue: Arc::clone(&self.queue),
                store: self.store.clone(),
                stats: Arc::clone(&self.stats),
            };
            workers.push(tokio::spawn(worker.run()));
        }
    }

    /// Drain the queue and wait for every worker to exit.
    pub async fn stop(&self) {
        let handles = std::mem::take(&mut *self.workers.lock().await);
        if handles.is_empty() {
            return;
        }

        info!(
            worker_count = handles.len(),
            queue_depth = self.queue.depth(),
            "Stopping aggregator workers"
        );

        for _ in &handles {
            if let Err(e) = self.queue.push(QueueItem::Shutdown).await {
                error!(error = %e, "Failed to enqueue shutdown sentinel");
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Aggregator worker terminated abnormally");
            }
        }

        info!("Aggregator workers stopped");
    }

    /// Count the event as received and queue it for processing.
    ///
    /// Duplicates are accepted like any other event; the dedup decision is
    /// only visible later through stats and listings.
    pub async fn submit(&self, event: Event) -> Result<()> {
        self.stats.increment_received();
        metrics::EVENTS_RECEIVED_TOTAL.inc();
        self.queue.push(QueueItem::Event(event)).await
    }

    /// Submit events one by one, in order.
    pub async fn submit_batch<I>(&self, events: I) -> Result<()>
    where
        I: IntoIterator<Item = Event>,
    {
        for event in events {
            self.submit(event).await?;
        }
        Ok(())
    }

    /// Stored events, optionally for one topic, oldest first.
    pub async fn get_events(&self, topic: Option<&str>) -> Result<Vec<StoredEvent>> {
        self.store
            .load_events(topic)
            .await?
            .into_iter()
            .map(StoredEvent::try_from)
            .collect()
    }

    pub fn get_stats(&self) -> Stats {
        let snapshot = self.stats.snapshot();
        Stats {
            received: snapshot.received,
            unique_processed: snapshot.unique_processed,
            duplicate_dropped: snapshot.duplicate_dropped,
            topics: snapshot.topics,
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Queue bound, `None` when unbounded
    pub fn queue_capacity(&self) -> Option<usize> {
        self.queue.capacity()
    }
}

struct Worker {
    id: usize,
    queue: Arc<IngestQueue>,
    store: DedupStore,
    stats: Arc<StatsAccumulator>,
}

impl Worker {
    async fn run(self) {
        info!(worker_id = self.id, "Aggregator worker started");

        while let Some(item) = self.queue.pop().await {
            match item {
                QueueItem::Shutdown => break,
                QueueItem::Event(event) => self.process(&event).await,
            }
        }

        info!(worker_id = self.id, "Aggregator worker stopped");
    }

    /// Storage failures are logged and the event is left unprocessed; the
    /// worker moves on to the next item.
    async fn process(&self, event: &Event) {
        match self.mark_processed(event).await {
            Ok(true) => {
                self.stats.record_unique(&event.topic);
                metrics::EVENTS_UNIQUE_TOTAL.inc();
                debug!(
                    worker_id = self.id,
                    topic = %event.topic,
                    event_id = %event.event_id,
                    "Event processed"
                );
            }
            Ok(false) => {
                self.stats.record_duplicate();
                metrics::EVENTS_DUPLICATE_TOTAL.inc();
                info!(
                    topic = %event.topic,
                    event_id = %event.event_id,
                    "Duplicate detected"
                );
            }
            Err(e) => {
                metrics::STORAGE_ERRORS_TOTAL.inc();
                error!(
                    worker_id = self.id,
                    topic = %event.topic,
                    event_id = %event.event_id,
                    transient = e.is_transient(),
                    error = %e,
                    "Failed to process event; left unprocessed"
                );
            }
        }
    }

    async fn mark_processed(&self, event: &Event) -> Result<bool> {
        let payload_json = event.payload_json()?;
        let record = NewEventRecord {
            topic: &event.topic,
            event_id: &event.event_id,
            timestamp: event.timestamp,
            source: &event.source,
            payload_json: &payload_json,
        };
        Ok(self.store.mark_processed(&record).await?)
    }
}
