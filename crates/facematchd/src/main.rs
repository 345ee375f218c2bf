use anyhow::{Context, Result};
use facematch_core::{FaceEngine, Gallery, RecognitionPolicy, UNKNOWN_DISTANCE};
use facematch_vision::OnnxEngine;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod routes;
mod upload;

use config::Config;
use routes::AppState;
use upload::UploadStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(?config, "facematchd starting");
    if config.match_threshold >= UNKNOWN_DISTANCE {
        tracing::warn!(
            threshold = config.match_threshold,
            unknown_distance = UNKNOWN_DISTANCE,
            "match threshold is at or above the unknown distance; matches farther than it are still unknown"
        );
    }

    // Models and the gallery are ready before the first request is accepted.
    let model_dir = config.model_dir.clone();
    let known_faces_dir = config.known_faces_dir.clone();
    let (face_engine, gallery) = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut engine = OnnxEngine::load(&model_dir)
            .with_context(|| format!("loading models from {}", model_dir.display()))?;
        let gallery = Gallery::load(&known_faces_dir, &mut engine)?;
        Ok((engine, gallery))
    })
    .await
    .context("startup task panicked")??;

    if gallery.is_empty() {
        tracing::warn!(
            dir = %config.known_faces_dir.display(),
            "gallery is empty; every recognition will be unknown"
        );
    }
    tracing::info!(
        known = gallery.len(),
        expressions = face_engine.supports_expressions(),
        "models and gallery loaded"
    );

    let engine = engine::spawn_engine(Box::new(face_engine), config.request_timeout())
        .context("failed to spawn engine thread")?;
    let uploads = UploadStore::create(&config.upload_dir)
        .with_context(|| format!("creating upload dir {}", config.upload_dir.display()))?;

    let state = AppState {
        engine,
        gallery: Arc::new(gallery),
        policy: RecognitionPolicy::new(config.match_threshold),
        uploads: Arc::new(uploads),
    };
    let app = routes::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "facematchd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facematchd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
