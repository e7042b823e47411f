use chrono::{DateTime, NaiveDateTime, Utc};
use dedup_store::ProcessedEventRow;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::error::{AggregatorError, Result};

/// An incoming event as published by a producer.
///
/// Identity is `(topic, event_id)`; `event_id` is only unique within its topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Event {
    #[validate(length(min = 1, message = "topic must not be empty"))]
    pub topic: String,

    #[validate(length(min = 1, message = "event_id must not be empty"))]
    pub event_id: String,

    /// Producer-supplied; offsets are normalized to UTC, naive values are read as UTC
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,

    #[validate(length(min = 1, message = "source must not be empty"))]
    pub source: String,

    /// Opaque to the aggregator, but must be a JSON object
    pub payload: Map<String, Value>,
}

impl Event {
    /// Canonical JSON text of the payload (object keys sorted).
    pub fn payload_json(&self) -> Result<String> {
        serde_json::to_string(&self.payload)
            .map_err(|e| AggregatorError::Internal(format!("Failed to serialize payload: {}", e)))
    }
}

/// Layouts accepted for timestamps without an offset
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an RFC 3339 timestamp, or an ISO 8601 one without offset taken as UTC.
pub fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid timestamp {:?}: expected ISO 8601 date-time", raw))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Envelope for the publish endpoint: a single event or a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub events: Vec<Event>,
}

impl PublishRequest {
    /// Parse and validate a publish body.
    ///
    /// Accepts one event object or an array of them. A single malformed
    /// element rejects the whole request.
    pub fn from_payload(data: Value) -> Result<Self> {
        let events = match data {
            Value::Object(_) => vec![parse_event(data)?],
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| {
                    parse_event(item).map_err(|e| match e {
                        AggregatorError::Validation(msg) => {
                            AggregatorError::Validation(format!("events[{}]: {}", idx, msg))
                        }
                        other => other,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(AggregatorError::Validation(
                    "publish payload must be an object or an array of objects".to_string(),
                ))
            }
        };

        Ok(Self { events })
    }
}

fn parse_event(value: Value) -> Result<Event> {
    let event: Event = serde_json::from_value(value)?;
    event.validate()?;
    Ok(event)
}

/// A processed event as returned by listings (first-seen version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub topic: String,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub payload: Value,
}

impl TryFrom<ProcessedEventRow> for StoredEvent {
    type Error = AggregatorError;

    fn try_from(row: ProcessedEventRow) -> Result<Self> {
        let corrupt = |reason: String| AggregatorError::CorruptRecord {
            topic: row.topic.clone(),
            event_id: row.event_id.clone(),
            reason,
        };

        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|e| corrupt(format!("invalid timestamp: {}", e)))?
            .with_timezone(&Utc);
        let payload: Value = serde_json::from_str(&row.payload)
            .map_err(|e| corrupt(format!("invalid payload: {}", e)))?;

        Ok(Self {
            topic: row.topic,
            event_id: row.event_id,
            timestamp,
            source: row.source,
            payload,
        })
    }
}
