use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use a3s_mcp_http::{DemoServer, MemoryMessageSource, Transport, TransportConfig};

/// A3S MCP HTTP - streamable HTTP transport serving the demo tools
#[derive(Debug, Parser)]
#[command(name = "a3s-mcp-http", version, about)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, default_value = "a3s-mcp-http.toml")]
    config: PathBuf,

    /// Host address to bind to (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = TransportConfig::load(&cli.config)?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let bus = Arc::new(MemoryMessageSource::new());
    let server = Arc::new(DemoServer::new(bus.clone(), config.request_timeout()));

    tracing::info!(
        tick_interval_ms = config.tick_interval_ms,
        request_timeout_secs = config.request_timeout_secs,
        "Starting a3s-mcp-http"
    );
    Transport::new(config, bus, server).serve().await?;

    Ok(())
}
