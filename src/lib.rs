pub mod api;
pub mod config;
pub mod llm;

pub use api::ProxyServer;
pub use config::Config;

use anyhow::{Context, Result};
use config::ConfigWatcher;
use std::path::PathBuf;
use std::sync::Arc;

/// Run the proxy until Ctrl-C. With a config path, edits to that file are
/// applied while running.
pub async fn run(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let server = Arc::new(ProxyServer::new(config));
    let addr = server.start().await?;
    tracing::info!("Listening on http://{}", addr);

    let watcher = config_path.map(|path| {
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = ConfigWatcher::new(path).run(server.as_ref()).await {
                tracing::error!("Config watcher stopped: {:#}", e);
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    if let Some(watcher) = watcher {
        watcher.abort();
    }
    server.stop().await;

    Ok(())
}
