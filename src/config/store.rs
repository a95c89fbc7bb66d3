use super::Config;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared, swappable configuration.
///
/// Readers take an `Arc` snapshot at the start of a request and keep using it
/// until the request finishes; a concurrent [`ConfigStore::replace`] is only
/// observed by requests that start afterwards.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub async fn snapshot(&self) -> Arc<Config> {
        self.inner.read().await.clone()
    }

    /// Swap in a new configuration and report which parts changed
    pub async fn replace(&self, config: Config) -> ConfigChange {
        let mut guard = self.inner.write().await;
        let change = ConfigChange::between(&guard, &config);
        *guard = Arc::new(config);
        change
    }
}

/// What a configuration swap requires from the server
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConfigChange {
    /// The cached model catalog no longer matches the configuration
    pub catalog: bool,
    /// Listen address or outbound timeouts changed
    pub restart: bool,
}

impl ConfigChange {
    pub fn between(old: &Config, new: &Config) -> Self {
        let (a, b) = (&old.proxy, &new.proxy);
        let catalog = a.enabled != b.enabled
            || a.api_key != b.api_key
            || a.local_base_url != b.local_base_url
            || a.remote_base_url != b.remote_base_url
            || a.whitelist != b.whitelist;
        let restart = old.server != new.server || old.timeouts != new.timeouts;

        Self { catalog, restart }
    }

    pub fn is_empty(&self) -> bool {
        !self.catalog && !self.restart
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_survives_replace() {
        let store = ConfigStore::new(Config::default());
        let before = store.snapshot().await;

        let mut updated = Config::default();
        updated.proxy.system_prompt = "Be terse.".to_string();
        let change = store.replace(updated).await;

        assert!(change.is_empty());
        assert!(before.proxy.system_prompt.is_empty());
        assert_eq!(store.snapshot().await.proxy.system_prompt, "Be terse.");
    }

    #[test]
    fn test_catalog_fields_trigger_invalidation() {
        let old = Config::default();

        let mut new = old.clone();
        new.proxy.whitelist.insert("openai/gpt-4o".to_string());
        assert_eq!(
            ConfigChange::between(&old, &new),
            ConfigChange {
                catalog: true,
                restart: false
            }
        );

        let mut new = old.clone();
        new.proxy.api_key = "sk-or-new".to_string();
        assert!(ConfigChange::between(&old, &new).catalog);

        let mut new = old.clone();
        new.proxy.enabled = false;
        assert!(ConfigChange::between(&old, &new).catalog);
    }

    #[test]
    fn test_policy_fields_need_nothing() {
        let old = Config::default();
        let mut new = old.clone();
        new.proxy.debug_logging = true;
        new.proxy.override_parameters = true;
        new.proxy.parameters.temperature = Some(0.2);
        assert!(ConfigChange::between(&old, &new).is_empty());
    }

    #[test]
    fn test_port_change_requires_restart() {
        let old = Config::default();
        let mut new = old.clone();
        new.server.port = 12345;
        let change = ConfigChange::between(&old, &new);
        assert!(change.restart);
        assert!(!change.catalog);
    }
}
