use anyhow::{Context, Result};
use clap::Parser;
use repograph::config::Config;
use repograph::mcp::server::{McpContext, McpServer};
use repograph::pipeline::Pipeline;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "repograph", version, about = "Code indexing and dependency-graph MCP server")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Starting repograph MCP server v{}", env!("CARGO_PKG_VERSION"));

    // 1. Load config
    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    // 2. Open store and pipeline
    let pipeline = Pipeline::open(config).context("failed to initialize pipeline")?;

    // 3. Serve
    McpServer::new(McpContext::new(pipeline)).start().await
}
