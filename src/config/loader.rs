use super::{Config, TimeoutConfig};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const CONNECT_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 5..=15;
const READ_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 30..=60;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&contents)
        .with_context(|| format!("Failed to load config file: {}", path.display()))
}

/// Parse, substitute environment variables and validate a YAML document
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents).context("Failed to parse config")?;

    // Perform environment variable substitution
    let config = substitute_env_vars(config);

    // Validate configuration
    validate_config(&config)?;

    Ok(config)
}

fn substitute_env_vars(mut config: Config) -> Config {
    let key = config.proxy.api_key.trim();
    if key.starts_with("${") && key.ends_with('}') {
        let var_name = &key[2..key.len() - 1];
        config.proxy.api_key = std::env::var(var_name).unwrap_or_default();
    }

    config
}

fn validate_config(config: &Config) -> Result<()> {
    for (name, url) in [
        ("proxy.local_base_url", &config.proxy.local_base_url),
        ("proxy.remote_base_url", &config.proxy.remote_base_url),
    ] {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("{} must start with http:// or https://, got '{}'", name, url);
        }
    }

    if config.server.host.trim().is_empty() {
        anyhow::bail!("server.host must not be empty");
    }

    validate_timeouts(&config.timeouts)?;

    config
        .proxy
        .parameters
        .validate()
        .context("Invalid proxy.parameters")?;

    let valid_formats = ["pretty", "compact", "json"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        anyhow::bail!("Invalid logging format: {}", config.logging.format);
    }

    Ok(())
}

fn validate_timeouts(timeouts: &TimeoutConfig) -> Result<()> {
    for (name, secs) in [
        ("timeouts.local_connect_secs", timeouts.local_connect_secs),
        ("timeouts.remote_connect_secs", timeouts.remote_connect_secs),
    ] {
        if !CONNECT_TIMEOUT_RANGE.contains(&secs) {
            anyhow::bail!("{} must be between 5 and 15 seconds, got {}", name, secs);
        }
    }

    for (name, secs) in [
        ("timeouts.local_read_secs", timeouts.local_read_secs),
        ("timeouts.remote_read_secs", timeouts.remote_read_secs),
    ] {
        if !READ_TIMEOUT_RANGE.contains(&secs) {
            anyhow::bail!("{} must be between 30 and 60 seconds, got {}", name, secs);
        }
    }

    Ok(())
}
