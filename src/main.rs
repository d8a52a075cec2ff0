mod mcp;

use std::path::PathBuf;

use cdpilot_agent::AgentConfig;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "cdpilot")]
#[command(about = "Browser control MCP server over the Chrome DevTools Protocol")]
#[command(version)]
struct Cli {
    /// DevTools endpoint: http://host:port or a page ws:// URL (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// YAML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,

    /// Validate config and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    if let Some(endpoint) = cli.endpoint {
        config.connection.endpoint = endpoint;
    }
    config.validate()?;

    if cli.check {
        eprintln!("Config valid");
        eprintln!("  Endpoint: {}", config.connection.endpoint);
        eprintln!("  Navigation timeout: {}ms", config.navigation.timeout_ms);
        eprintln!("  Chunk size: {} bytes", config.observation.chunk_size);
        return Ok(());
    }

    mcp::run_server(config).await
}

/// Logs go to stderr; stdout carries the MCP protocol.
fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    // RUST_LOG wins when set
    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => builder.with_max_level(level).init(),
    }
}
