pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod queue;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::{config::Settings, redis::RedisHandle, state::AppState, telemetry};
use crate::queue::producer::TaskProducer;
use crate::services::pipeline::RecognitionPipeline;
use crate::services::rasterize::PdfiumRasterizer;
use crate::services::recognition::OllamaClient;
use crate::services::storage::{FileStorage, StorageService};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; task dispatch unavailable");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let storage = StorageService::from_settings(&settings)
        .await?
        .map(|service| Arc::new(service) as Arc<dyn FileStorage>);
    let producer = TaskProducer::new(redis.clone());
    let state = AppState::new(settings, db_pool, redis.clone(), storage, producer);

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        "Document recognition API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

pub async fn run_worker() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    redis.connect().await?;
    tracing::info!("Redis connected successfully");

    let storage = StorageService::from_settings(&settings)
        .await?
        .ok_or_else(|| anyhow::anyhow!("S3 storage is not configured; worker cannot start"))?;

    let recognizer = OllamaClient::from_settings(&settings)?;
    if let Err(err) = recognizer.check_health().await {
        tracing::warn!(error = %err, "Ollama health check failed; is the server running?");
    } else {
        tracing::info!(
            host = %settings.ollama().host,
            model = %settings.ollama().model,
            "Ollama is healthy"
        );
    }

    let pipeline = Arc::new(RecognitionPipeline::new(
        db_pool,
        Arc::new(storage),
        Arc::new(recognizer),
        Arc::new(PdfiumRasterizer::new()),
    ));

    let result = queue::consumer::run(settings.queue().clone(), redis.clone(), pipeline).await;

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}
