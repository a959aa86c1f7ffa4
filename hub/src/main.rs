use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_hub::handlers;

#[derive(Parser)]
#[command(name = "hub")]
#[command(about = "Drive several MCP servers over stdio from one process")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to an .mcp.json file (default: search from the current directory)
    #[arg(long, short, env = "MCP_HUB_CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every configured server and report its state
    Status {
        /// Show server info, protocol version and uptime
        #[arg(short, long, action = ArgAction::SetTrue)]
        verbose: bool,
    },
    /// List available tools from MCP servers
    Tools {
        /// Only list tools from a specific server
        #[arg(long)]
        server: Option<String>,
    },
    /// Call a tool directly
    Call {
        /// Tool name
        tool: String,
        /// Server to call (default: whichever server advertises the tool)
        #[arg(long)]
        server: Option<String>,
        /// Arguments as JSON
        #[arg(long, short)]
        args: Option<String>,
        /// Request deadline in seconds (default: the server's configured timeout)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mcp_hub=info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = handlers::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Status { verbose } => handlers::run_status(&config, verbose).await?,
        Commands::Tools { server } => handlers::run_tools(&config, server).await?,
        Commands::Call {
            tool,
            server,
            args,
            timeout,
        } => handlers::run_call_tool(&config, &tool, server, args, timeout).await?,
    }

    Ok(())
}
