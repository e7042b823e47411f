use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use dedup_store::StorageError;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AggregatorError>;

#[derive(Debug, Error)]
pub enum AggregatorError {
    /// Malformed event shape; rejected before anything is enqueued
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored row could not be converted back into an event
    #[error("Corrupt record {topic}/{event_id}: {reason}")]
    CorruptRecord {
        topic: String,
        event_id: String,
        reason: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AggregatorError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, AggregatorError::Storage(e) if e.is_transient())
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ResponseError for AggregatorError {
    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        let message = match self {
            AggregatorError::Validation(msg) => msg.clone(),
            AggregatorError::Storage(e) => {
                tracing::error!(error = %e, "Storage error while serving request");
                self.to_string()
            }
            _ => self.to_string(),
        };

        HttpResponse::build(code).json(ErrorResponse {
            error: message,
            code: code.as_u16(),
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AggregatorError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for AggregatorError {
    fn from(err: serde_json::Error) -> Self {
        AggregatorError::Validation(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AggregatorError {
    fn from(err: validator::ValidationErrors) -> Self {
        AggregatorError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_422() {
        let err = AggregatorError::Validation("event_id: missing".to_string());
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_storage_maps_to_500() {
        let err = AggregatorError::from(StorageError::Other(anyhow::anyhow!("disk full")));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().starts_with("Storage error"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_validation_is_not_transient() {
        assert!(!AggregatorError::Validation("x".to_string()).is_transient());
    }
}
