use super::{load_config, Config};
use anyhow::{Context, Result};
use async_trait::async_trait;
use notify_debouncer_mini::new_debouncer;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receives every configuration that survives parsing and validation
#[async_trait]
pub trait ConfigListener: Send + Sync {
    async fn on_config_change(&self, config: Config) -> Result<()>;
}

/// File system watcher for the config file
pub struct ConfigWatcher {
    path: PathBuf,
}

impl ConfigWatcher {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Watch until the debouncer channel closes
    pub async fn run<L: ConfigListener + ?Sized>(&self, listener: &L) -> Result<()> {
        // Editors often replace the file instead of writing it, so watch the parent
        let watch_dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(
            Duration::from_millis(250),
            move |res: notify_debouncer_mini::DebounceEventResult| {
                let _ = tx.send(res);
            },
        )
        .context("Failed to create debouncer")?;

        debouncer
            .watcher()
            .watch(&watch_dir, notify::RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", watch_dir.display()))?;

        info!("Config watcher started (watching: {})", self.path.display());

        while let Some(event_result) = rx.recv().await {
            match event_result {
                Ok(events) => {
                    if events.iter().any(|event| self.is_config_path(&event.path)) {
                        self.reload(listener).await;
                    }
                }
                Err(e) => {
                    warn!("Watcher error: {}", e);
                }
            }
        }

        Ok(())
    }

    fn is_config_path(&self, path: &Path) -> bool {
        path.file_name().is_some() && path.file_name() == self.path.file_name()
    }

    async fn reload<L: ConfigListener + ?Sized>(&self, listener: &L) {
        if !self.path.exists() {
            debug!("Config file {} removed, keeping current config", self.path.display());
            return;
        }

        match load_config(&self.path) {
            Ok(config) => {
                info!("Reloaded config from {}", self.path.display());
                if let Err(e) = listener.on_config_change(config).await {
                    warn!("Failed to apply reloaded config: {:#}", e);
                }
            }
            Err(e) => {
                warn!("Ignoring invalid config change: {:#}", e);
            }
        }
    }
}
