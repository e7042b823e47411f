//! Shared ingestion counters.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

/// Counter values and the topic set, without uptime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    pub topics: Vec<String>,
}

#[derive(Debug, Default)]
struct Counters {
    received: u64,
    unique_processed: u64,
    duplicate_dropped: u64,
    topics: BTreeSet<String>,
}

/// Counters mutated by workers and read by request handlers.
///
/// All fields sit behind one lock, so a snapshot never sees `unique_processed`
/// incremented without the matching topic.
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    inner: Mutex<Counters>,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore counters from durable state at startup.
    ///
    /// `duplicate_dropped` is not persisted and always restarts at zero.
    pub fn seed<I>(&self, received: u64, unique_processed: u64, topics: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut counters = self.lock();
        counters.received = received;
        counters.unique_processed = unique_processed;
        counters.duplicate_dropped = 0;
        counters.topics = topics.into_iter().collect();
    }

    pub fn increment_received(&self) {
        self.lock().received += 1;
    }

    pub fn record_unique(&self, topic: &str) {
        let mut counters = self.lock();
        counters.unique_processed += 1;
        if !counters.topics.contains(topic) {
            counters.topics.insert(topic.to_string());
        }
    }

    pub fn record_duplicate(&self) {
        self.lock().duplicate_dropped += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.lock();
        StatsSnapshot {
            received: counters.received,
            unique_processed: counters.unique_processed,
            duplicate_dropped: counters.duplicate_dropped,
            topics: counters.topics.iter().cloned().collect(),
        }
    }

    // No critical section can leave Counters half-updated; recover from poisoning.
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = StatsAccumulator::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_topics_are_sorted_and_distinct() {
        let stats = StatsAccumulator::new();
        stats.record_unique("b");
        stats.record_unique("a");
        stats.record_unique("b");
        stats.record_duplicate();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.unique_processed, 3);
        assert_eq!(snapshot.duplicate_dropped, 1);
        assert_eq!(snapshot.topics, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_seed_resets_duplicates() {
        let stats = StatsAccumulator::new();
        stats.record_duplicate();
        stats.seed(5, 5, vec!["orders".to_string()]);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 5);
        assert_eq!(snapshot.unique_processed, 5);
        assert_eq!(snapshot.duplicate_dropped, 0);
        assert_eq!(snapshot.topics, vec!["orders".to_string()]);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let stats = Arc::new(StatsAccumulator::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.increment_received();
                        if i % 2 == 0 {
                            stats.record_unique(&format!("topic-{}", i));
                        } else {
                            stats.record_duplicate();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 8000);
        assert_eq!(snapshot.unique_processed, 4000);
        assert_eq!(snapshot.duplicate_dropped, 4000);
        assert_eq!(
            snapshot.received,
            snapshot.unique_processed + snapshot.duplicate_dropped
        );
        assert_eq!(snapshot.topics.len(), 4);
    }
}
