pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::Config;
pub use error::{AggregatorError, Result};
pub use handlers::AppState;
pub use models::{Event, PublishRequest, PublishResponse, Stats, StoredEvent};
pub use services::AggregatorService;
