use crate::config::ProxyConfig;
use std::collections::BTreeSet;

/// Model ids with this prefix are served by the local backend
pub const LOCAL_MARKER: &str = "(local)";

/// Name prefixes of the catalog's synthetic rows
pub const BANNER_PREFIX: &str = "ℹ️";
pub const SEPARATOR_PREFIX: &str = "═══";

const LATEST_SUFFIX: &str = ":latest";

/// Where a chat request goes, with the model id to send upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Local { model: String },
    Remote { model: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("This is an informational entry, not a usable model.")]
    SyntheticModel,

    #[error("OpenRouter API Key is not configured.")]
    MissingApiKey,

    #[error("Model '{0}' is not in your whitelist.")]
    NotWhitelisted(String),
}

pub fn is_synthetic_model(model: &str) -> bool {
    model.starts_with(BANNER_PREFIX) || model.starts_with(SEPARATOR_PREFIX)
}

pub fn is_local_model(model: &str) -> bool {
    model.starts_with(LOCAL_MARKER)
}

/// `"(local) llama3"` -> `"llama3"`; ids without the marker pass through
pub fn strip_local_marker(model: &str) -> &str {
    match model.strip_prefix(LOCAL_MARKER) {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => model,
    }
}

/// Drop one trailing `:latest`, which clients append to bare remote ids
pub fn normalize_remote_model(model: &str) -> &str {
    model.strip_suffix(LATEST_SUFFIX).unwrap_or(model)
}

/// Routing decision for one request, borrowed from a config snapshot
pub struct ModelRouter<'a> {
    proxy_enabled: bool,
    api_key: &'a str,
    whitelist: &'a BTreeSet<String>,
}

impl<'a> ModelRouter<'a> {
    pub fn new(config: &'a ProxyConfig) -> Self {
        Self {
            proxy_enabled: config.enabled,
            api_key: config.api_key.trim(),
            whitelist: &config.whitelist,
        }
    }

    /// Decide where `model` goes. Remote preconditions are checked in order:
    /// API key first, then whitelist membership.
    pub fn route(&self, model: &str) -> Result<Route, RouteError> {
        if is_synthetic_model(model) {
            return Err(RouteError::SyntheticModel);
        }

        if !self.proxy_enabled || is_local_model(model) {
            let model = strip_local_marker(model).to_string();
            tracing::debug!("Routing to local backend: '{}'", model);
            return Ok(Route::Local { model });
        }

        if self.api_key.is_empty() {
            return Err(RouteError::MissingApiKey);
        }

        if !self.whitelist.is_empty() && !self.whitelist.contains(model) {
            return Err(RouteError::NotWhitelisted(model.to_string()));
        }

        let model = normalize_remote_model(model).to_string();
        tracing::debug!("Routing to remote provider: '{}'", model);
        Ok(Route::Remote { model })
    }
}
