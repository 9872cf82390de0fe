//! Gateway server library.
//!
//! Provides a reusable server function to serve the gateway either for the
//! binary, or for the integration tests.

#![deny(missing_docs)]

mod access_gate;
mod dispatch;
mod error;
mod logger;
mod sink;
mod wire;

use std::net::SocketAddr;
use std::sync::Arc;

use access_gate::AccessGateLayer;
use anyhow::anyhow;
use config::{Config, TokenStore};
use core_engine::{ModelLifecycleManager, Scheduler};
use dispatch::AppState;
use generator::Generator;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

pub use error::Error;

/// Configuration for serving the gateway.
pub struct ServeConfig<G: Generator> {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The deserialized model configuration.
    pub config: Config,
    /// The bearer-token store; empty when `--require-token` is off and no
    /// tokens have been issued.
    pub tokens: TokenStore,
    /// Whether a valid bearer token is required for every request.
    pub require_token: bool,
    /// The inference backend.
    pub generator: Arc<G>,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Log filter string (e.g. "info" or "server=debug,core_engine=debug").
    pub log_filter: String,
    /// The version string to log on startup and serve from `/api/version`.
    pub version: String,
    /// Optional oneshot sender to send back the bound address (useful if
    /// port 0 was specified).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the gateway server with the provided configuration.
pub async fn serve<G: Generator + 'static>(
    ServeConfig {
        listen_address,
        config,
        tokens,
        require_token,
        generator,
        shutdown_signal,
        log_filter,
        version,
        bound_addr_sender,
    }: ServeConfig<G>,
) -> anyhow::Result<()> {
    logger::init(&log_filter);

    log::info!("kiln {version}");

    let configured_models: Vec<String> = config.model_names().map(str::to_string).collect();
    let lifecycle = Arc::new(ModelLifecycleManager::new(generator.clone(), config.models.clone()));
    let scheduler = Scheduler::new(lifecycle.clone());

    let state = Arc::new(AppState {
        lifecycle,
        scheduler,
        generator,
        config,
        version,
    });

    let access_gate = AccessGateLayer::new(tokens, require_token, configured_models);

    let app = dispatch::router(state.clone()).layer(access_gate).layer(CorsLayer::permissive());

    let listener = TcpListener::bind(listen_address).await.map_err(Error::Bind)?;

    if let Some(sender) = bound_addr_sender {
        let _ = sender.send(listener.local_addr()?);
    }

    log::info!("listening on http://{listen_address}");

    let result = tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result.map_err(Error::Server).map_err(anyhow::Error::from)
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("received shutdown signal, shutting down gracefully...");
            Ok(())
        }
    };

    state.lifecycle.shutdown().await;

    result.map_err(|err| anyhow!(err))
}
