use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::Result;
use crate::metrics;
use crate::models::{PublishRequest, PublishResponse};
use crate::services::AggregatorService;

/// Largest accepted publish body.
pub const MAX_PUBLISH_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<AggregatorService>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub topic: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_PUBLISH_BODY_BYTES))
        .route("/publish", web::post().to(publish))
        .route("/events", web::get().to(list_events))
        .route("/stats", web::get().to(get_stats))
        .route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(metrics_handler));
}

/// POST /publish
///
/// Body is parsed by hand so malformed JSON is reported as 422 like any
/// other invalid payload.
pub async fn publish(state: web::Data<AppState>, body: web::Bytes) -> Result<HttpResponse> {
    let payload: Value = serde_json::from_slice(&body)?;
    let request = PublishRequest::from_payload(payload)?;
    let accepted = request.events.len();

    state.aggregator.submit_batch(request.events).await?;

    tracing::debug!(accepted, "Publish request queued");
    Ok(HttpResponse::Ok().json(PublishResponse { accepted }))
}

/// GET /events?topic=
pub async fn list_events(
    state: web::Data<AppState>,
    query: web::Query<EventsQuery>,
) -> Result<HttpResponse> {
    let events = state.aggregator.get_events(query.topic.as_deref()).await?;
    Ok(HttpResponse::Ok().json(events))
}

/// GET /stats
pub async fn get_stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.aggregator.get_stats())
}

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "workers": state.aggregator.worker_count(),
        "queue_depth": state.aggregator.queue_depth(),
        "queue_capacity": state.aggregator.queue_capacity(),
    }))
}

pub async fn metrics_handler(state: web::Data<AppState>) -> HttpResponse {
    metrics::QUEUE_DEPTH.set(i64::try_from(state.aggregator.queue_depth()).unwrap_or(i64::MAX));
    metrics::serve_metrics().await
}
