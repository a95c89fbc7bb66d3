mod loader;
mod schema;
mod store;
pub mod watcher;

pub use loader::{load_config, parse_config};
pub use schema::*;
pub use store::{ConfigChange, ConfigStore};
pub use watcher::{ConfigListener, ConfigWatcher};

use anyhow::Result;
use std::path::Path;

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        loader::load_config(path)
    }

    pub fn default_path() -> std::path::PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".ollama-openrouter-proxy")
            .join("config.yaml")
    }
}
