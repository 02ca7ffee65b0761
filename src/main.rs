//! chatrelay - streaming chat relay for OpenAI-compatible providers
//!
//! Serves the chat front-end's backend API: credential check, per-client
//! rate limiting, streamed chat replies and fine-tune management.

use std::path::Path;

use chatrelay::config::{Config, KeySource};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "Streaming chat relay for OpenAI-compatible providers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration and show where secrets come from
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("chatrelay={level},tower_http={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_key_sources(key_sources: &[(String, KeySource)]) {
    for (field, source) in key_sources {
        tracing::info!(field = %field, source = %source, "Secret resolved");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut loaded, key_sources) = Config::from_file_with_env(&config)?;
            init_tracing(&loaded.logging.level);

            if !Path::new(&config).exists() {
                tracing::info!(config = %config, "Config file not found, using environment");
            }
            log_key_sources(&key_sources);
            if loaded.provider.api_key.is_none() {
                tracing::warn!("No provider API key configured, upstream calls will be rejected");
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                loaded.server.listen = addr;
            }

            chatrelay::proxy::run_server(loaded).await
        }

        Commands::Check { config } => {
            let (loaded, key_sources) = Config::from_file_with_env(&config)?;
            init_tracing(&loaded.logging.level);

            println!("Configuration OK ({})", config);
            println!("  listen:      {}", loaded.server.listen);
            println!("  provider:    {}", loaded.provider.base_url);
            println!("  model:       {}", loaded.provider.model);
            println!("  auth:        {}", loaded.auth.is_enabled());
            println!(
                "  rate limit:  {} per {}s",
                loaded.rate_limit.max_requests, loaded.rate_limit.window_secs
            );
            for (field, source) in &key_sources {
                println!("  {:<16} {}", field, source);
            }
            Ok(())
        }
    }
}
