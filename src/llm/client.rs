use super::ModelEntry;
use crate::config::TimeoutConfig;
use anyhow::{Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const APP_TITLE: &str = "Ollama OpenRouter Proxy";

const LOCAL_TAGS_TIMEOUT: Duration = Duration::from_secs(10);
const REMOTE_MODELS_TIMEOUT: Duration = Duration::from_secs(30);
const KEY_CHECK_CONNECT: Duration = Duration::from_secs(10);
const KEY_CHECK_READ: Duration = Duration::from_secs(15);

/// Account details reported by the provider's key endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub usage: f64,
    #[serde(default)]
    pub is_free_tier: bool,
    #[serde(default)]
    pub is_provisioning_key: bool,
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default)]
    pub limit_remaining: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct KeyInfoEnvelope {
    data: KeyInfo,
}

#[derive(Debug, Deserialize)]
struct LocalTags {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct RemoteModels {
    #[serde(default)]
    data: Vec<RemoteModel>,
}

#[derive(Debug, Deserialize)]
struct RemoteModel {
    id: String,
}

/// HTTP clients for both upstreams, built from the configured timeouts.
///
/// Rebuilt whenever the server (re)starts, so a timeout change needs a restart.
#[derive(Debug, Clone)]
pub struct UpstreamClients {
    local: reqwest::Client,
    remote: reqwest::Client,
    key_check: reqwest::Client,
}

impl UpstreamClients {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self> {
        let local = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.local_connect_secs))
            .read_timeout(Duration::from_secs(timeouts.local_read_secs))
            .build()
            .context("Failed to build local HTTP client")?;

        let remote = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.remote_connect_secs))
            .read_timeout(Duration::from_secs(timeouts.remote_read_secs))
            .build()
            .context("Failed to build remote HTTP client")?;

        let key_check = reqwest::Client::builder()
            .connect_timeout(KEY_CHECK_CONNECT)
            .read_timeout(KEY_CHECK_READ)
            .build()
            .context("Failed to build key check HTTP client")?;

        Ok(Self {
            local,
            remote,
            key_check,
        })
    }

    /// Client for transparent forwarding to the local backend
    pub fn local(&self) -> &reqwest::Client {
        &self.local
    }

    /// `GET {base}/api/tags`
    pub async fn fetch_local_models(&self, base: &str) -> Result<Vec<ModelEntry>> {
        let url = format!("{}/api/tags", base);
        let response = self
            .local
            .get(&url)
            .timeout(LOCAL_TAGS_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to reach local backend at {}", base))?
            .error_for_status()
            .context("Local backend rejected model list request")?;

        let tags: LocalTags = response
            .json()
            .await
            .context("Failed to parse local model list")?;
        Ok(tags.models)
    }

    /// `GET {base}/models`, returning the model ids
    pub async fn fetch_remote_models(&self, base: &str, api_key: &str) -> Result<Vec<String>> {
        let url = format!("{}/models", base);
        let response = self
            .remote
            .get(&url)
            .bearer_auth(api_key)
            .timeout(REMOTE_MODELS_TIMEOUT)
            .send()
            .await
            .context("Failed to reach remote provider")?
            .error_for_status()
            .context("Remote provider rejected model list request")?;

        let models: RemoteModels = response
            .json()
            .await
            .context("Failed to parse remote model list")?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }

    /// `GET {base}/key`. Any failure, including a non-2xx answer, is `None`.
    pub async fn key_info(&self, base: &str, api_key: &str) -> Option<KeyInfo> {
        if api_key.trim().is_empty() {
            return None;
        }
        let url = format!("{}/key", base);
        let response = match self.key_check.get(&url).bearer_auth(api_key).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Key check request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!("Key check returned {}", response.status());
            return None;
        }

        match response.json::<KeyInfoEnvelope>().await {
            Ok(envelope) => Some(envelope.data),
            Err(e) => {
                tracing::warn!("Key check response unreadable: {}", e);
                None
            }
        }
    }

    /// Streaming chat completion request to `{base}/chat/completions`
    pub async fn remote_chat_request(
        &self,
        base: &str,
        api_key: &str,
        body: Vec<u8>,
    ) -> reqwest::Result<reqwest::Response> {
        self.remote
            .post(format!("{}/chat/completions", base))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .bearer_auth(api_key)
            .header("HTTP-Referer", env!("CARGO_PKG_REPOSITORY"))
            .header("X-Title", APP_TITLE)
            .body(body)
            .send()
            .await
    }

    /// `POST {base}/api/chat` with the rewritten body
    pub async fn local_chat_request(
        &self,
        base: &str,
        body: impl Into<Bytes>,
    ) -> reqwest::Result<reqwest::Response> {
        self.local
            .post(format!("{}/api/chat", base))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .send()
            .await
    }
}
