use crate::llm::ParameterPreset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// 0 binds an ephemeral port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Everything the request path reads. A fresh snapshot is taken per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// When false every chat goes to the local backend (bypass mode)
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_local_base_url")]
    pub local_base_url: String,
    #[serde(default = "default_remote_base_url")]
    pub remote_base_url: String,
    /// Empty means every model is allowed
    #[serde(default)]
    pub whitelist: BTreeSet<String>,
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub override_parameters: bool,
    #[serde(default)]
    pub parameters: ParameterPreset,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            local_base_url: default_local_base_url(),
            remote_base_url: default_remote_base_url(),
            whitelist: BTreeSet::new(),
            debug_logging: false,
            system_prompt: String::new(),
            override_parameters: false,
            parameters: ParameterPreset::default(),
        }
    }
}

impl ProxyConfig {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Local backend base URL without a trailing slash
    pub fn local_base(&self) -> &str {
        self.local_base_url.trim_end_matches('/')
    }

    /// Remote provider base URL without a trailing slash
    pub fn remote_base(&self) -> &str {
        self.remote_base_url.trim_end_matches('/')
    }

    pub fn status(&self) -> &'static str {
        if self.enabled {
            "Running (Proxy Mode)"
        } else {
            "Running (Bypass Mode)"
        }
    }

    pub fn mode_description(&self) -> String {
        if !self.enabled {
            format!("Mode: Bypass (Direct to {})", self.local_base())
        } else if !self.has_api_key() {
            "Mode: Proxy (OpenRouter API Key Required)".to_string()
        } else {
            "Mode: Proxy (OpenRouter + Ollama)".to_string()
        }
    }
}

/// Per-request resource bounds for outbound connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_local_connect_secs")]
    pub local_connect_secs: u64,
    #[serde(default = "default_local_read_secs")]
    pub local_read_secs: u64,
    #[serde(default = "default_remote_connect_secs")]
    pub remote_connect_secs: u64,
    #[serde(default = "default_remote_read_secs")]
    pub remote_read_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            local_connect_secs: default_local_connect_secs(),
            local_read_secs: default_local_read_secs(),
            remote_connect_secs: default_remote_connect_secs(),
            remote_read_secs: default_remote_read_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default functions
fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    11444
}

fn default_local_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_remote_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_local_connect_secs() -> u64 {
    5
}

fn default_local_read_secs() -> u64 {
    30
}

fn default_remote_connect_secs() -> u64 {
    15
}

fn default_remote_read_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
