use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "mcphub-test-server",
    version,
    about = "MCP test-double server for validating hubs and gateways (stdio or HTTP)"
)]
pub struct Cli {
    /// Serve streamable HTTP on POST /mcp instead of stdio
    #[arg(long)]
    pub http: bool,

    /// HTTP listen port
    #[arg(long, env = "MCPHUB_TEST_PORT", default_value_t = 3333)]
    pub port: u16,

    /// HTTP bind address
    #[arg(long, env = "MCPHUB_TEST_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Reserved store location (logged only)
    #[arg(long, env = "MCPHUB_TEST_STORE_PATH", default_value = ".mcphub-test-store.json")]
    pub store_path: PathBuf,

    /// Reserved assets directory (logged only)
    #[arg(long, env = "MCPHUB_TEST_ASSETS_DIR", default_value = ".mcphub-test-assets")]
    pub assets_dir: PathBuf,

    /// Comma-separated Host names accepted by the HTTP transport
    #[arg(long, env = "MCPHUB_TEST_ALLOWED_HOSTS", default_value = "")]
    pub allowed_hosts: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub store_path: PathBuf,
    pub assets_dir: PathBuf,
    pub allowed_hosts: Vec<String>,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        Self {
            transport: if cli.http {
                Transport::Http
            } else {
                Transport::Stdio
            },
            allowed_hosts: parse_allowed_hosts(&cli.allowed_hosts),
            host: cli.host,
            port: cli.port,
            store_path: cli.store_path,
            assets_dir: cli.assets_dir,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{ip}]:{}", self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

pub fn parse_allowed_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}
