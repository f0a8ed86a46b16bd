//! Murmur TTS Server - HTTP API for Qwen3-TTS model lifecycle and synthesis

use std::sync::Arc;

use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use murmur_core::backend::sidecar::SidecarBackend;
use murmur_core::backend::tone::ToneBackend;
use murmur_core::backend::TtsBackend;
use murmur_core::{BackendKind, ServerConfig};
use murmur_server::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "murmur_server=debug,murmur_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Murmur TTS Server");

    let config = ServerConfig::from_env();
    info!("Data directory: {:?}", config.data_dir);

    let backend: Arc<dyn TtsBackend> = match config.backend {
        BackendKind::Sidecar => Arc::new(SidecarBackend::new(&config)),
        BackendKind::Tone => Arc::new(ToneBackend::new()),
    };
    info!("Inference backend: {:?}", config.backend);

    let state = AppState::new(config, backend)?;
    if let Some(mb) = murmur_core::resident_memory_mb() {
        info!("Resident memory at startup: {mb:.1} MB");
    }

    // Build router
    let app = api::create_router(state.clone());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    info!("Server ready. Press Ctrl+C to stop.");
    server.await?;

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
}
