mod event;

pub use event::{Event, PublishRequest, StoredEvent};

use serde::{Deserialize, Serialize};

/// Point-in-time view of the ingestion counters.
///
/// `received == unique_processed + duplicate_dropped` holds once the queue
/// has drained; `received` leads while events are still in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    /// Sorted
    pub topics: Vec<String>,
    pub uptime_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub accepted: usize,
}
