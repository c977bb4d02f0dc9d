//! conduit-mcp server entry point.
//!
//! Serves the built-in demonstration capabilities over stdio or HTTP.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use conduit_mcp::tools::{
    CounterTool, DelayedResponseTool, EchoTool, GreetingPrompt, GreetingResource,
};
use conduit_mcp::{Config, McpServer};

#[derive(Parser, Debug)]
#[command(name = "conduit-mcp")]
#[command(about = "Model Context Protocol server")]
#[command(version)]
struct Cli {
    /// Transport mode: stdio or http
    #[arg(long, default_value = "stdio")]
    transport: Transport,

    /// Bind address (only used with --transport http)
    #[arg(long, default_value = "127.0.0.1:3000", env = "MCP_ADDRESS")]
    address: String,

    /// Endpoint path for the streamable HTTP transport
    #[arg(long, default_value = "/mcp", env = "MCP_PATH")]
    path: String,

    /// Run without sessions; every request is self-contained
    #[arg(long)]
    stateless: bool,

    /// Session expiry window in seconds
    #[arg(long, default_value = "3600")]
    session_expiry: u64,

    /// Disable SSE replies to POST requests
    #[arg(long)]
    no_post_sse: bool,

    /// Serve the long-lived GET notification stream
    #[arg(long)]
    get_sse: bool,

    /// Base URL for legacy SSE endpoint announcements
    #[arg(long, env = "MCP_BASE_URL")]
    base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum Transport {
    /// Standard input/output (single session)
    #[default]
    Stdio,
    /// Streamable HTTP plus the legacy SSE endpoint pair
    Http,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // Logs always go to stderr; in stdio mode stdout carries the protocol.
    let subscriber = tracing_subscriber::registry().with(filter);
    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cli.transport,
        "Starting conduit-mcp server"
    );

    let mut config = Config::new()
        .with_path(cli.path)
        .stateless(cli.stateless)
        .post_sse(!cli.no_post_sse)
        .get_sse(cli.get_sse)
        .session_expiry(Duration::from_secs(cli.session_expiry));
    config.address = cli.address;
    config.base_url = cli.base_url;

    let server = McpServer::new("conduit-mcp", env!("CARGO_PKG_VERSION"), config)
        .with_instructions("Demonstration server with echo, counter, and delayedResponse tools.");
    server.register_tool(Arc::new(EchoTool));
    server.register_tool(Arc::new(CounterTool));
    server.register_tool(Arc::new(DelayedResponseTool));
    server.register_resource(Arc::new(GreetingResource));
    server.register_prompt(Arc::new(GreetingPrompt));

    match cli.transport {
        Transport::Stdio => server.run_stdio().await?,
        Transport::Http => server.run_http().await?,
    }

    Ok(())
}
