use anyhow::Result;
use clap::{Parser, Subcommand};
use ollama_openrouter_proxy::llm::{CatalogAggregator, ModelListCache, UpstreamClients};
use ollama_openrouter_proxy::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ollama-openrouter-proxy")]
#[command(about = "Ollama-compatible proxy that mixes local models with OpenRouter", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve,

    /// Check the configured OpenRouter API key
    #[command(name = "check-key")]
    CheckKey,

    /// Print the proxy mode for the loaded configuration
    Status,

    /// Fetch the merged model list once and print it
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let (config, watched_path) = if config_path.exists() {
        (Config::load(&config_path)?, Some(config_path.clone()))
    } else {
        (Config::default(), None)
    };

    init_logging(&config.logging.level, &config.logging.format)?;

    match &watched_path {
        Some(path) => tracing::info!("Config loaded from: {}", path.display()),
        None => tracing::warn!(
            "Config file not found: {}. Using defaults",
            config_path.display()
        ),
    }

    match cli.command {
        Some(Commands::Serve) | None => {
            ollama_openrouter_proxy::run(config, watched_path).await?;
        }
        Some(Commands::CheckKey) => {
            let clients = UpstreamClients::new(&config.timeouts)?;
            match clients
                .key_info(config.proxy.remote_base(), config.proxy.api_key.trim())
                .await
            {
                Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
                None => println!("invalid key"),
            }
        }
        Some(Commands::Status) => {
            println!("{}", config.proxy.mode_description());
        }
        Some(Commands::Models) => {
            let clients = UpstreamClients::new(&config.timeouts)?;
            let catalog = CatalogAggregator::new(clients, Arc::new(ModelListCache::new()));
            let payload = catalog.get_catalog(&config.proxy).await?;
            let value: serde_json::Value = serde_json::from_slice(&payload)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
        _ => {
            // Default to pretty
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
