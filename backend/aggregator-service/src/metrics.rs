use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, TextEncoder};

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(name, help))
        .unwrap_or_else(|e| panic!("failed to create {}: {}", name, e));
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .unwrap_or_else(|e| panic!("failed to register {}: {}", name, e));
    counter
}

pub static EVENTS_RECEIVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "aggregator_events_received_total",
        "Total events accepted for ingestion",
    )
});

pub static EVENTS_UNIQUE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "aggregator_events_unique_total",
        "Total events recorded for the first time",
    )
});

pub static EVENTS_DUPLICATE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "aggregator_events_duplicate_total",
        "Total events dropped as duplicates",
    )
});

pub static STORAGE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "aggregator_storage_errors_total",
        "Total events left unprocessed because of a storage failure",
    )
});

pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::with_opts(Opts::new(
        "aggregator_queue_depth",
        "Events waiting in the ingestion queue",
    ))
    .expect("failed to create aggregator_queue_depth");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register aggregator_queue_depth");
    gauge
});

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
