use anyhow::{Context, Result};
use facereg_core::{DetectorKind, ExtractSettings, LandmarkMode, OnnxFaceModel};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod routes;
mod service;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("faceregd starting");

    let config = config::Config::load().context("loading configuration")?;
    tracing::info!(
        listen_addr = %config.listen_addr,
        model_dir = %config.model_dir.display(),
        db_path = %config.db_path.display(),
        threshold = config.match_threshold,
        strategy = %config.match_strategy,
        "configuration loaded"
    );

    let store = store::Store::open(&config.db_path)
        .await
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    tracing::info!(users = store.count_users().await?, "database opened");

    let model = OnnxFaceModel::load(&config.model_paths())
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    tracing::info!(fast_detector = model.has_fast_detector(), "models loaded");

    let settings = ExtractSettings {
        upsample_count: config.upsample_count,
        detector: DetectorKind::Accurate,
        landmarks: LandmarkMode::Large,
        jitter_count: config.jitter_count,
    };
    let engine = engine::spawn_engine(model, settings)?;

    let service = Arc::new(service::FaceService::new(
        store,
        engine,
        config.match_strategy,
        config.match_threshold,
    ));
    service.load_registry().await?;

    let app = routes::router(Arc::clone(&service), &config);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "faceregd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("faceregd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
