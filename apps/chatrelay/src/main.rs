//! Chat relay terminal entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(version)]
#[command(about = "Relay chat lines between TCP clients")]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server until Ctrl-C
    Server {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<String>,
        /// Read buffer size per connection
        #[arg(long)]
        buffer_size: Option<String>,
    },
    /// Join a relay server and chat from stdin (`/quit` leaves)
    Client {
        /// Display name
        #[arg(short, long)]
        name: Option<String>,
        /// Server IP address
        #[arg(short, long)]
        address: Option<String>,
        /// Server port
        #[arg(short, long)]
        port: Option<String>,
        /// Read buffer size
        #[arg(long)]
        buffer_size: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    // The transcript owns stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };
    tracing::debug!(name = %config.name, port = config.port, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Server { port, buffer_size } => {
            let port = port.unwrap_or_else(|| config.port.to_string());
            let buffer_size = buffer_size.unwrap_or_else(|| config.buffer_size.to_string());
            let server_config = chatrelay_server::ServerConfig::parse(&port, &buffer_size)?;
            rt.block_on(app::run_server(server_config))?;
        }
        Commands::Client {
            name,
            address,
            port,
            buffer_size,
        } => {
            let settings = chatrelay_client::ClientSettings::parse(
                name.as_deref().unwrap_or(&config.name),
                address.as_deref().unwrap_or(&config.address),
                &port.unwrap_or_else(|| config.port.to_string()),
                &buffer_size.unwrap_or_else(|| config.buffer_size.to_string()),
            )?;
            rt.block_on(app::run_client(settings))?;
        }
    }

    Ok(())
}
