mod cache;
mod catalog;
mod client;
pub mod params;
pub mod routing;
pub mod transcode;

pub use cache::{ModelListCache, CATALOG_CACHE_KEY, CATALOG_TTL};
pub use catalog::CatalogAggregator;
pub use client::{KeyInfo, UpstreamClients};
pub use params::{BuiltinPreset, ParameterPreset};
pub use routing::{ModelRouter, Route, RouteError};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `format` tag reserved for banner/separator rows in the catalog
pub const SYNTHETIC_FORMAT: &str = "dummy";

/// A chat message as received. Anything beyond `role`/`content` (tool calls,
/// images, names) is kept in `extra` and re-emitted untouched. A missing
/// `role` is not filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Some("system".to_string()),
            content: Some(Value::String(content.into())),
            extra: Map::new(),
        }
    }
}

/// Inbound chat request: a typed core plus every unrecognised field, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Prepend a system message. No-op for a blank prompt or a request without messages.
    pub fn prepend_system_prompt(&mut self, prompt: &str) {
        if prompt.trim().is_empty() {
            return;
        }
        if let Some(messages) = self.messages.as_mut() {
            messages.insert(0, ChatMessage::system(prompt));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMessage {
    pub role: String,
    pub content: String,
}

/// One line of a local-dialect streaming chat response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChunk {
    pub model: String,
    pub created_at: String,
    pub message: ChunkMessage,
    pub done: bool,
}

impl ChatChunk {
    pub fn new(model: &str, role: &str, content: &str) -> Self {
        Self {
            model: model.to_string(),
            created_at: now_rfc3339(),
            message: ChunkMessage {
                role: role.to_string(),
                content: content.to_string(),
            },
            done: false,
        }
    }
}

/// Closing line of a streaming chat response. No upstream timing data is
/// available, so every counter is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalChatChunk {
    #[serde(flatten)]
    pub chunk: ChatChunk,
    pub total_duration: u64,
    pub load_duration: u64,
    pub prompt_eval_count: u64,
    pub prompt_eval_duration: u64,
    pub eval_count: u64,
    pub eval_duration: u64,
}

impl FinalChatChunk {
    pub fn new(model: &str) -> Self {
        let mut chunk = ChatChunk::new(model, "assistant", "");
        chunk.done = true;
        Self {
            chunk,
            total_duration: 0,
            load_duration: 0,
            prompt_eval_count: 0,
            prompt_eval_duration: 0,
            eval_count: 0,
            eval_duration: 0,
        }
    }
}

/// Provider streaming chunk; only the first choice's delta matters here
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub delta: CompletionDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDetails {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub parameter_size: String,
    #[serde(default)]
    pub quantization_level: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A row in the local dialect's model list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub details: ModelDetails,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelEntry {
    pub fn is_synthetic(&self) -> bool {
        self.details.format == SYNTHETIC_FORMAT
    }
}

/// `GET /api/tags` body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
