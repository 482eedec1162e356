//! Q&A relay binary entry point
//!
//! Loads configuration, initializes tracing and starts the HTTP server.

use anyhow::Result;
use clap::{Parser, Subcommand};
use repair_qa_api::QaServer;
use repair_qa_common::SystemConfig;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "qa-relay-server")]
#[command(version = "0.1.0")]
#[command(about = "Streaming multimodal Q&A relay for equipment repair")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, env = "RUST_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Server {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate configuration
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = SystemConfig::from_file(&cli.config);

    let (level, json) = match &loaded {
        Ok(config) => (
            cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone()),
            config.logging.json,
        ),
        Err(_) => (cli.log_level.clone().unwrap_or_else(|| "info".to_string()), false),
    };
    repair_qa_common::init_tracing_with_level(&level, json)?;

    let config = loaded.map_err(|e| {
        error!(path = %cli.config, error = %e, "Failed to load configuration");
        e
    })?;
    info!(path = %cli.config, "Configuration loaded successfully");
    if config.upstream.api_key.is_empty() {
        warn!(env = %config.upstream.api_key_env, "Upstream API key is empty");
    }

    match cli.command {
        Some(Commands::ValidateConfig) => {
            println!("✓ Configuration is valid");
            println!("  Upstream: {}", config.upstream.base_url);
            println!("  Images: {}", config.images.static_dir.display());
            println!("  Triples: {}", config.knowledge.triples_path.display());
            println!(
                "  Auth: {}",
                if config.server.api_key.is_some() { "bearer key" } else { "disabled" }
            );
            Ok(())
        }
        Some(Commands::Server { host, port }) => {
            let mut config = config;
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            start_server(config).await
        }
        None => start_server(config).await,
    }
}

async fn start_server(config: SystemConfig) -> Result<()> {
    info!(address = %config.bind_address(), "Starting Q&A relay");
    let server = QaServer::new(config).await?;
    server.run().await
}
