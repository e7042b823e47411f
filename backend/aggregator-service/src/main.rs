use actix_web::{middleware::Logger, web, App, HttpServer};
use aggregator_service::{handlers, AggregatorService, AppState, Config};
use anyhow::{Context, Result};
use dedup_store::DedupStore;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,aggregator_service=debug,dedup_store=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting aggregator-service");

    let config = Config::from_env();
    let database_path = config
        .resolved_database_path()
        .context("Failed to resolve database path")?;

    tracing::info!(
        database_path = %database_path.display(),
        worker_count = config.worker_count,
        queue_maxsize = config.queue_maxsize,
        "Configuration loaded"
    );

    let store = DedupStore::open(&database_path)
        .await
        .context("Failed to open dedup store")?;

    let aggregator = Arc::new(
        AggregatorService::new(store.clone(), config.worker_count, config.queue_maxsize)
            .await
            .context("Failed to initialize aggregator")?,
    );

    let state = AppState {
        aggregator: Arc::clone(&aggregator),
    };

    let bind_addr = config.bind_addr();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind HTTP server to {}", bind_addr))?
    .run();

    aggregator.start().await;
    tracing::info!("HTTP server listening on {}", bind_addr);

    let served = server.await.context("HTTP server error");

    // Drain whatever was accepted before the server stopped
    aggregator.stop().await;
    store.close().await;

    tracing::info!("aggregator-service stopped");
    served
}
