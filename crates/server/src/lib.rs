//! Luthien server library.
//!
//! Provides a reusable serve function used by the binary and by the
//! integration tests.

#![deny(missing_docs)]

mod logger;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::anyhow;
use config::Config;
use gateway::{policy::PolicyRegistry, store::{MemoryStore, TransactionStore}};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use logger::init as init_logger;

/// Configuration for serving Luthien.
pub struct ServeConfig {
    /// The socket address the server binds to.
    pub listen_address: SocketAddr,
    /// The deserialized luthien.toml configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// The version string to log on startup.
    pub version: String,
    /// Optional oneshot sender for the bound address (useful with port 0).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
    /// Transaction/event store; in-memory when not provided.
    pub store: Option<Arc<dyn TransactionStore>>,
    /// Policy registry; the built-in registry when not provided.
    pub registry: Option<PolicyRegistry>,
}

/// Starts and runs the Luthien gateway with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        version,
        bound_addr_sender,
        store,
        registry,
    }: ServeConfig,
) -> anyhow::Result<()> {
    log::info!("Luthien {version}");

    config.validate()?;

    let store = store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
    let registry = registry.unwrap_or_default();

    let app = gateway::router(&config, &registry, store)
        .await
        .map_err(|e| anyhow!("failed to initialize gateway: {e}"))?;

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("failed to bind to {listen_address}: {e}"))?;

    let bound = listener.local_addr()?;
    if let Some(sender) = bound_addr_sender
        && sender.send(bound).is_err()
    {
        log::warn!("nobody listening for the bound address");
    }

    log::info!("OpenAI ingress: http://{bound}/v1/chat/completions");
    log::info!("Anthropic ingress: http://{bound}/v1/messages");
    log::info!("Activity stream: http://{bound}/activity/stream");

    let shutdown_grace = Duration::from_millis(config.server.shutdown_grace_ms);
    let drain_signal = shutdown_signal.clone();

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { drain_signal.cancelled().await });

    tokio::select! {
        result = server => {
            result.map_err(|e| anyhow!("server failed: {e}"))?;
        }
        _ = async {
            shutdown_signal.cancelled().await;
            log::info!("received shutdown signal, draining for up to {shutdown_grace:?}");
            tokio::time::sleep(shutdown_grace).await;
        } => {
            log::warn!("shutdown grace elapsed; cancelling remaining transactions");
        }
    }

    Ok(())
}
