use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use facegate_core::OnnxFaceAnalyzer;
use facegate_store::{BlobStore, UserRegistry};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;
mod pipeline;

use config::Config;
use http::AppState;
use pipeline::Pipelines;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::from_env();

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let images = BlobStore::images(&config.data_dir);
    let signatures = BlobStore::signatures(&config.data_dir);
    images.ensure_dirs().await?;
    signatures.ensure_dirs().await?;

    let registry = UserRegistry::open(&config.db_path()).await?;

    // Load models synchronously before serving (fail-fast), then move
    // them onto the engine thread.
    let analyzer = OnnxFaceAnalyzer::load(&config.model_dir)?;
    let engine = engine::spawn_engine(Box::new(analyzer));

    let pipelines = Pipelines::new(
        registry.clone(),
        images,
        signatures,
        engine,
        config.match_threshold,
        config.signature_reads,
        Duration::from_secs(config.request_timeout_secs),
    );

    let state = Arc::new(AppState {
        pipelines,
        registry,
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "facegated ready");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("facegated shutting down");
        })
        .await?;

    Ok(())
}
