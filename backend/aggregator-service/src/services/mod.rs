pub mod aggregator;
pub mod queue;
pub mod stats;

pub use aggregator::AggregatorService;
pub use queue::{IngestQueue, QueueItem};
pub use stats::{StatsAccumulator, StatsSnapshot};
