pub mod error;
pub mod forward;
pub mod routes;

use crate::config::{Config, ConfigListener, ConfigStore};
use crate::llm::{CatalogAggregator, ModelListCache, UpstreamClients};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router as AxumRouter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, info, warn};

pub use error::ApiError;
pub use routes::AppState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct RunningListener {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// The proxy's HTTP listener and everything it owns.
///
/// Configuration lives in a [`ConfigStore`] that handlers read per request;
/// the catalog cache outlives restarts.
pub struct ProxyServer {
    config: ConfigStore,
    cache: Arc<ModelListCache>,
    running: Mutex<Option<RunningListener>>,
}

impl ProxyServer {
    pub fn new(config: Config) -> Self {
        Self::with_cache(config, Arc::new(ModelListCache::new()))
    }

    pub fn with_cache(config: Config, cache: Arc<ModelListCache>) -> Self {
        Self {
            config: ConfigStore::new(config),
            cache,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Build the Axum router for the given config's timeouts
    pub fn router(&self, config: &Config) -> Result<AxumRouter> {
        let clients = UpstreamClients::new(&config.timeouts)?;
        let state = AppState {
            config: self.config.clone(),
            catalog: CatalogAggregator::new(clients.clone(), self.cache.clone()),
            clients,
        };

        Ok(AxumRouter::new()
            .route("/", get(routes::root).fallback(routes::fallback))
            .route("/api/tags", get(routes::list_tags).fallback(routes::fallback))
            .route("/api/chat", post(routes::chat).fallback(routes::fallback))
            .route(
                "/v1/chat/completions",
                post(routes::chat).fallback(routes::fallback),
            )
            .fallback(routes::fallback)
            .with_state(state)
            .layer(DefaultBodyLimit::max(1024 * 1024 * 32)) // 32MB
            .layer(CatchPanicLayer::custom(routes::panic_response))
            .layer(axum::middleware::from_fn(logging_middleware)))
    }

    /// Bind and serve. A running listener is stopped first, so this doubles
    /// as a restart.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(listener) = running.take() {
            shutdown(listener).await;
        }

        let config = self.config.snapshot().await;
        let app = self.router(&config)?;
        let bind_addr = config.server.bind_addr();

        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind server on {}", bind_addr))?;
        let addr = listener
            .local_addr()
            .context("Failed to read bound address")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        });

        info!("{} on {}", config.proxy.status(), addr);
        info!("{}", config.proxy.mode_description());

        *running = Some(RunningListener {
            addr,
            shutdown: shutdown_tx,
            handle,
        });
        Ok(addr)
    }

    /// Stop the listener. No-op when already stopped.
    pub async fn stop(&self) {
        let listener = self.running.lock().await.take();
        if let Some(listener) = listener {
            shutdown(listener).await;
            info!("Server stopped");
        }
    }

    pub async fn restart(&self) -> Result<SocketAddr> {
        self.start().await
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|l| l.addr)
    }

    /// Drop the cached catalog; the next `/api/tags` refetches both sources
    pub async fn invalidate_catalog(&self) {
        self.cache.invalidate().await;
    }

    /// Swap in a new configuration, invalidating the catalog and restarting
    /// the listener when the change requires it.
    ///
    /// If the restart fails the previous configuration is put back and the
    /// listener restarted with it, and the bind error is returned.
    pub async fn apply_config(&self, config: Config) -> Result<()> {
        let previous = self.config.snapshot().await;
        let change = self.config.replace(config).await;
        if change.is_empty() {
            return Ok(());
        }

        if change.catalog {
            self.invalidate_catalog().await;
        }
        if change.restart && self.is_running().await {
            match self.restart().await {
                Ok(addr) => info!("Server restarted on {}", addr),
                Err(e) => {
                    error!("Restart failed, keeping previous configuration: {:#}", e);
                    self.config.replace(Config::clone(&previous)).await;
                    if change.catalog {
                        self.invalidate_catalog().await;
                    }
                    let addr = self
                        .start()
                        .await
                        .context("Failed to restore previous listener")?;
                    info!("Server restored on {}", addr);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigListener for ProxyServer {
    async fn on_config_change(&self, config: Config) -> Result<()> {
        self.apply_config(config).await
    }
}

async fn shutdown(mut listener: RunningListener) {
    let _ = listener.shutdown.send(());
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut listener.handle)
        .await
        .is_err()
    {
        warn!("Open connections did not close in time, aborting listener");
        listener.handle.abort();
        let _ = listener.handle.await;
    }
}

/// Logging middleware
async fn logging_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let status = response.status();
    tracing::info!("{} {} -> {}", method, uri, status);

    response
}
