/// In-memory ingestion queue between the publish path and the workers
///
/// - FIFO, backed by a tokio MPSC channel
/// - Bounded when capacity > 0: `push` suspends while the queue is full
/// - Unbounded when capacity == 0
/// - The single receiver is shared by all workers behind an async mutex;
///   whichever worker holds it takes the next item
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{mpsc, Mutex, Semaphore};

use crate::error::{AggregatorError, Result};
use crate::models::Event;

/// Item carried by the queue
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Event(Event),
    /// Tells exactly one worker to exit after everything queued ahead of it
    Shutdown,
}

enum QueueSender {
    Bounded(mpsc::Sender<QueueItem>),
    Unbounded(mpsc::UnboundedSender<QueueItem>),
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<QueueItem>),
    Unbounded(mpsc::UnboundedReceiver<QueueItem>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<QueueItem> {
        match self {
            QueueReceiver::Bounded(rx) => rx.recv().await,
            QueueReceiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

pub struct IngestQueue {
    sender: QueueSender,
    receiver: Mutex<QueueReceiver>,
    depth: AtomicI64,
    capacity: usize,
}

impl IngestQueue {
    /// Create a queue holding at most `capacity` items (0 = unbounded).
    ///
    /// Capacities above tokio's channel limit are clamped to that limit.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(Semaphore::MAX_PERMITS);
        let (sender, receiver) = if capacity > 0 {
            let (tx, rx) = mpsc::channel(capacity);
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        };

        Self {
            sender,
            receiver: Mutex::new(receiver),
            depth: AtomicI64::new(0),
            capacity,
        }
    }

    /// Append an item, waiting for space if the queue is bounded and full
    pub async fn push(&self, item: QueueItem) -> Result<()> {
        let sent = match &self.sender {
            QueueSender::Bounded(tx) => tx.send(item).await.is_ok(),
            QueueSender::Unbounded(tx) => tx.send(item).is_ok(),
        };

        if !sent {
            return Err(AggregatorError::Internal(
                "ingest queue receiver closed".to_string(),
            ));
        }

        self.depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Take the next item, waiting while the queue is empty
    pub async fn pop(&self) -> Option<QueueItem> {
        let item = self.receiver.lock().await.recv().await;
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// Items accepted but not yet taken by a worker.
    ///
    /// Approximate while pushes and pops race: a pop may be counted before
    /// its push.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst).max(0) as usize
    }

    /// Configured bound, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        (self.capacity > 0).then_some(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use serde_json::Map;
    use std::time::Duration;

    fn event(id: &str) -> Event {
        Event {
            topic: "orders".to_string(),
            event_id: id.to_string(),
            timestamp: Utc::now(),
            source: "test".to_string(),
            payload: Map::new(),
        }
    }

    fn event_id(item: Option<QueueItem>) -> String {
        match item {
            Some(QueueItem::Event(e)) => e.event_id,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = IngestQueue::new(0);
        queue.push(QueueItem::Event(event("evt-1"))).await.unwrap();
        queue.push(QueueItem::Event(event("evt-2"))).await.unwrap();
        queue.push(QueueItem::Shutdown).await.unwrap();

        assert_eq!(queue.depth(), 3);
        assert_eq!(event_id(queue.pop().await), "evt-1");
        assert_eq!(event_id(queue.pop().await), "evt-2");
        assert_eq!(queue.pop().await, Some(QueueItem::Shutdown));
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_capacity() {
        assert_eq!(IngestQueue::new(0).capacity(), None);
        assert_eq!(IngestQueue::new(16).capacity(), Some(16));
    }

    #[tokio::test]
    async fn test_oversized_capacity_is_clamped() {
        let queue = IngestQueue::new(usize::MAX);
        assert_eq!(queue.capacity(), Some(Semaphore::MAX_PERMITS));

        queue.push(QueueItem::Event(event("evt-1"))).await.unwrap();
        assert_eq!(event_id(queue.pop().await), "evt-1");
    }

    #[tokio::test]
    async fn test_bounded_push_waits_for_space() {
        let queue = Arc::new(IngestQueue::new(1));
        queue.push(QueueItem::Event(event("evt-1"))).await.unwrap();

        // Queue is full: the second push must not complete on its own
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            queue.push(QueueItem::Event(event("evt-2"))),
        )
        .await;
        assert!(blocked.is_err(), "push should suspend while full");

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(QueueItem::Event(event("evt-3"))).await })
        };

        assert_eq!(event_id(queue.pop().await), "evt-1");
        producer.await.unwrap().unwrap();
        assert_eq!(event_id(queue.pop().await), "evt-3");
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(IngestQueue::new(0));

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.push(QueueItem::Event(event("evt-1"))).await.unwrap();
        assert_eq!(event_id(consumer.await.unwrap()), "evt-1");
    }
}
