//! docbridge Server Binary
//!
//! Serves an in-memory document store over the docbridge protocol, for
//! development and integration testing of clients.

use std::sync::Arc;

use clap::Parser;
use docbridge::network::Server;
use docbridge::store::MemoryStore;
use docbridge::Config;
use tracing_subscriber::{fmt, EnvFilter};

/// docbridge development server
#[derive(Parser, Debug)]
#[command(name = "docbridge-server")]
#[command(about = "In-memory document store speaking the docbridge protocol")]
#[command(version)]
struct Args {
    /// Listen address (host:port) (default: $DOCBRIDGE_LISTEN_ADDR or 127.0.0.1:7450)
    #[arg(short, long)]
    listen: Option<String>,

    /// Project id clients must present (default: $DOCBRIDGE_PROJECT_ID)
    #[arg(short, long)]
    project: Option<String>,

    /// File holding the access token clients must present
    /// (default: $DOCBRIDGE_CREDENTIALS_PATH)
    #[arg(short, long)]
    credentials: Option<String>,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,docbridge=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    // Build config from the environment, then args
    let mut config = Config::from_env();
    if let Some(project) = args.project {
        config.project_id = project;
    }
    if let Some(credentials) = args.credentials {
        config.credentials_path = credentials.into();
    }
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    config.max_connections = args.max_connections;

    tracing::info!("docbridge server v{}", docbridge::VERSION);
    tracing::info!("Project: {}", config.project_id);
    tracing::info!("Listen address: {}", config.listen_addr);

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let store = Arc::new(MemoryStore::new());

    let mut server = match Server::new(config, store) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to create server: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
