// Tabforge - Guitar Audio to Tablature
// Module declarations and service entry points

use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod fretboard;
pub mod pipeline;
pub mod separation;
pub mod server;
pub mod transcription;

#[cfg(test)]
mod testing;

use config::AppConfig;
use pipeline::{PipelineError, PipelineOrchestrator};
use separation::StemService;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Startup failed: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Install the log subscriber; `RUST_LOG` overrides the default `info` level
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Run the tab service until the process is stopped
pub async fn run(config: AppConfig) -> Result<(), ServeError> {
    tokio::fs::create_dir_all(config.runs_dir()).await?;

    let orchestrator = Arc::new(PipelineOrchestrator::from_config(&config)?);
    let app = server::router(server::AppState::new(orchestrator), config.max_upload_bytes);

    let listener = bind(config.tab_addr).await?;
    log::info!(
        "Tab service listening on {} (separator at {})",
        config.tab_addr,
        config.separator_url
    );
    axum::serve(listener, app).await?;
    Ok(())
}

/// Run the separation service until the process is stopped
pub async fn run_stem_service(config: AppConfig) -> Result<(), ServeError> {
    let service = Arc::new(StemService::from_config(&config));
    service.prepare().await?;
    let _sweeper = separation::spawn_download_sweeper(Arc::clone(&service), config.download_ttl);

    let app = separation::router(service, config.max_upload_bytes);
    let listener = bind(config.stem_addr).await?;
    log::info!("Separation service listening on {}", config.stem_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn bind(addr: std::net::SocketAddr) -> Result<tokio::net::TcpListener, ServeError> {
    tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { addr, source })
}
