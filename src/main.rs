use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use tenant_index_engine::capability::unconfigured::{UnconfiguredChatter, UnconfiguredEmbedder, UnconfiguredTextExtractor};
use tenant_index_engine::config::AppConfig;
use tenant_index_engine::state::{AppState, Capabilities};

/// Demonstrates wiring the engine's hub-and-spoke services together with
/// the ambient logging stack. Opens no sockets, defines no routes: the
/// request/transport layer is out of scope here, and a real deployment
/// embeds this crate behind its own HTTP layer, supplying real
/// `Embedder`/`Chatter`/`Reranker`/`TextExtractor` bindings in place of
/// the `unconfigured` placeholders below.
#[tokio::main]
async fn main() -> Result<()> {
    let log_dir = std::env::var("INDEX_ENGINE_LOG_DIR").unwrap_or_else(|_| {
        dirs::data_local_dir()
            .map(|d| d.join("tenant-index-engine").join("logs").to_string_lossy().to_string())
            .unwrap_or_else(|| ".tenant-index-engine/logs".to_string())
    });
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "tenant-index-engine.log");
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tenant_index_engine=info".into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info.location().map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())).unwrap_or_default();
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        error!(target: "tenant_index_engine::panic", location = %location, payload = %payload, "PANIC: thread panicked");
        default_panic(info);
    }));

    let config = AppConfig::from_env();
    info!(
        milvus_host = %config.milvus_host,
        milvus_port = config.milvus_port,
        minio_endpoint = %config.minio_endpoint,
        project_path = %config.project_path,
        progress_queue_capacity = config.progress_queue_capacity,
        broadcaster_tick_hz = config.broadcaster_tick_hz,
        log_dir = %log_dir,
        "tenant-index-engine starting"
    );

    let capabilities = Capabilities {
        embedder: Arc::new(UnconfiguredEmbedder),
        chatter: Arc::new(UnconfiguredChatter),
        reranker: None,
        extractor: Arc::new(UnconfiguredTextExtractor),
    };

    let app_state = AppState::new(config, capabilities).await?;
    info!(spaces = app_state.space_registry.list().len(), "space registry synced from object store");

    shutdown_signal().await;
    info!("tenant-index-engine shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    // On Windows, ctrl_c is the only shutdown signal; SIGTERM has no equivalent there.
    #[cfg(not(unix))]
    let terminate = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install secondary Ctrl+C handler");
    };

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, initiating shutdown"); },
        _ = terminate => { info!("Received terminate signal, initiating shutdown"); },
    }
}
