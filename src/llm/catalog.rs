use super::cache::ModelListCache;
use super::client::UpstreamClients;
use super::routing::{BANNER_PREFIX, SEPARATOR_PREFIX};
use super::{now_rfc3339, ModelDetails, ModelEntry, TagsResponse, SYNTHETIC_FORMAT};
use crate::config::ProxyConfig;
use anyhow::{Context, Result};
use bytes::Bytes;
use serde_json::Map;
use std::collections::BTreeSet;
use std::sync::Arc;

const LOCAL_NAME_PREFIX: &str = "(local) ";

/// Builds the merged `/api/tags` document, served through the TTL cache
#[derive(Debug, Clone)]
pub struct CatalogAggregator {
    clients: UpstreamClients,
    cache: Arc<ModelListCache>,
}

impl CatalogAggregator {
    pub fn new(clients: UpstreamClients, cache: Arc<ModelListCache>) -> Self {
        Self { clients, cache }
    }

    /// Serialized catalog. A fresh cache entry is returned without any
    /// upstream call; otherwise both sources are fetched and the result cached.
    pub async fn get_catalog(&self, config: &ProxyConfig) -> Result<Bytes> {
        if let Some(payload) = self.cache.get().await {
            tracing::debug!("Serving model catalog from cache");
            return Ok(payload);
        }

        let generation = self.cache.generation().await;
        let (local, remote) = tokio::join!(self.local_models(config), self.remote_models(config));
        tracing::info!(
            "Fetched model catalog: {} local, {} remote",
            local.len(),
            remote.len()
        );

        let models = apply_whitelist(merge_catalog(local, remote), &config.whitelist);
        let payload = serde_json::to_vec(&TagsResponse { models })
            .context("Failed to serialize model catalog")?;
        let payload = Bytes::from(payload);

        self.cache.put_if_current(generation, payload.clone()).await;
        Ok(payload)
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }

    async fn local_models(&self, config: &ProxyConfig) -> Vec<ModelEntry> {
        match self.clients.fetch_local_models(config.local_base()).await {
            Ok(models) => models.into_iter().map(local_entry).collect(),
            Err(e) => {
                tracing::warn!(
                    "Could not list local models at {}: {:#}",
                    config.local_base(),
                    e
                );
                Vec::new()
            }
        }
    }

    async fn remote_models(&self, config: &ProxyConfig) -> Vec<ModelEntry> {
        if !config.has_api_key() {
            return Vec::new();
        }
        match self
            .clients
            .fetch_remote_models(config.remote_base(), config.api_key.trim())
            .await
        {
            Ok(ids) => ids.iter().map(|id| remote_entry(id)).collect(),
            Err(e) => {
                tracing::warn!("Could not list remote models: {:#}", e);
                Vec::new()
            }
        }
    }
}

/// `[banner, local.., separator, remote..]`. The banner needs at least one
/// real model, the separator needs both halves.
pub fn merge_catalog(local: Vec<ModelEntry>, remote: Vec<ModelEntry>) -> Vec<ModelEntry> {
    let mut models = Vec::with_capacity(local.len() + remote.len() + 2);
    if !local.is_empty() || !remote.is_empty() {
        models.push(synthetic_entry(&format!(
            "{} Local models are prefixed with (local). Refresh the model list if some are missing",
            BANNER_PREFIX
        )));
    }
    let both = !local.is_empty() && !remote.is_empty();
    models.extend(local);
    if both {
        models.push(synthetic_entry(&SEPARATOR_PREFIX.repeat(10)));
    }
    models.extend(remote);
    models
}

/// Keep whitelisted names plus every synthetic row. An empty whitelist keeps all.
pub fn apply_whitelist(models: Vec<ModelEntry>, whitelist: &BTreeSet<String>) -> Vec<ModelEntry> {
    if whitelist.is_empty() {
        return models;
    }
    models
        .into_iter()
        .filter(|m| m.is_synthetic() || whitelist.contains(&m.name))
        .collect()
}

fn local_entry(mut entry: ModelEntry) -> ModelEntry {
    entry.name = format!("{}{}", LOCAL_NAME_PREFIX, entry.name);
    entry.model = format!("{}{}", LOCAL_NAME_PREFIX, entry.model);
    entry
}

/// Local-dialect row for a provider model id. Size and parameter count are
/// guesses from the id; the provider does not report them.
pub fn remote_entry(id: &str) -> ModelEntry {
    let family = id.split('/').next().unwrap_or("unknown").to_string();
    ModelEntry {
        name: id.to_string(),
        model: id.to_string(),
        modified_at: now_rfc3339(),
        size: estimate_size(id),
        digest: format!("sha256:{:08x}{}", fnv1a(id), "a".repeat(56)),
        details: ModelDetails {
            format: "gguf".to_string(),
            family,
            parameter_size: parameter_size(id).to_string(),
            quantization_level: "Q4_0".to_string(),
            extra: Map::new(),
        },
        extra: Map::new(),
    }
}

pub fn synthetic_entry(name: &str) -> ModelEntry {
    ModelEntry {
        name: name.to_string(),
        model: name.to_string(),
        modified_at: now_rfc3339(),
        size: 0,
        digest: format!("dummy:{:08x}", fnv1a(name)),
        details: ModelDetails {
            format: SYNTHETIC_FORMAT.to_string(),
            family: "info".to_string(),
            parameter_size: "0B".to_string(),
            quantization_level: "N/A".to_string(),
            extra: Map::new(),
        },
        extra: Map::new(),
    }
}

fn estimate_size(id: &str) -> u64 {
    if id.contains("405b") {
        234_000_000_000
    } else if id.contains("70b") {
        40_000_000_000
    } else if id.contains("8b") {
        4_700_000_000
    } else if id.contains("7b") {
        3_800_000_000
    } else {
        5_000_000_000
    }
}

fn parameter_size(id: &str) -> &'static str {
    const TABLE: &[(&str, &str)] = &[
        ("8b", "8B"),
        ("7b", "7B"),
        ("13b", "13B"),
        ("70b", "70B"),
        ("405b", "405B"),
        ("gpt-4", "~1.7T"),
        ("gpt-3.5", "~175B"),
        ("claude", "~200B"),
        ("gemini", "~175B"),
    ];
    TABLE
        .iter()
        .find(|(needle, _)| id.contains(needle))
        .map(|(_, size)| *size)
        .unwrap_or("Unknown")
}

// 32-bit FNV-1a, stable across runs
fn fnv1a(s: &str) -> u32 {
    s.bytes().fold(0x811c_9dc5, |hash, b| {
        (hash ^ u32::from(b)).wrapping_mul(0x0100_0193)
    })
}
