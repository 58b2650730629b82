use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcphub_test_runtime::{McpServer, ProbeState, serve_stdio};

mod config;
mod http;

use config::{Cli, ServerConfig, Transport};
use http::{AppState, HostPolicy};

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Structured JSON logging on stderr; stdout belongs to the stdio transport.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mcphub_test_server=debug,mcphub_test_runtime=debug,tower_http=debug".into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ServerConfig::from(Cli::parse());
    let code = match run(config).await {
        Ok(()) => 0,
        Err(message) => {
            tracing::error!(event = "server_failed", error = %message);
            1
        }
    };
    std::process::exit(code);
}

async fn run(config: ServerConfig) -> Result<(), String> {
    let server = McpServer::new(Arc::new(ProbeState::new()))
        .map_err(|e| format!("Failed to register catalogue: {e}"))?;

    tracing::info!(
        event = "server_starting",
        transport = ?config.transport,
        store_path = %config.store_path.display(),
        assets_dir = %config.assets_dir.display(),
    );

    match config.transport {
        Transport::Stdio => serve_stdio(server).await,
        Transport::Http => {
            let state = AppState {
                server,
                host_policy: Arc::new(HostPolicy::new(
                    config.allowed_hosts.clone(),
                    &config.host,
                )),
            };
            http::serve(state, &config.bind_addr())
                .await
                .map_err(|e| e.to_string())
        }
    }
}
