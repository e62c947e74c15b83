use anyhow::{Context, Result};
use clap::Parser;
use icebridge_server::relay::WebRtcSpawner;
use icebridge_server::{AdapterOptions, IceAdapter};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

/// Per-client ICE adapter: accepts JSON-RPC control commands from the lobby
/// client, talks the game-control protocol to the local game, and maintains
/// one peer connection per remote player.
#[derive(Parser)]
#[command(name = "icebridge", version)]
struct Cli {
    /// Port of the loopback JSON-RPC control server (0 picks a free port)
    #[arg(long, default_value_t = 0)]
    rpc_port: u16,

    /// Port of the loopback game-control server (0 picks a free port)
    #[arg(long = "gpg-net-port", default_value_t = 0)]
    gpg_net_port: u16,

    /// UDP port the local game listens on for peer traffic
    #[arg(long, default_value_t = 0)]
    lobby_port: u16,

    /// Id of the local player
    #[arg(long)]
    id: i32,

    /// Login of the local player
    #[arg(long)]
    login: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,
}

// The whole core runs cooperatively on one executor thread; engine callbacks
// marshal into it over channels.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("icebridge: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    init_tracing(&cli)?;

    let mut options = AdapterOptions::new(cli.id, &cli.login);
    options.rpc_port = cli.rpc_port;
    options.gpgnet_port = cli.gpg_net_port;
    options.lobby_port = cli.lobby_port;
    options.log_file = cli
        .log_file
        .as_ref()
        .map(|p| p.display().to_string());

    let adapter = IceAdapter::bind(options, Arc::new(WebRtcSpawner)).await?;
    info!(
        rpc_port = adapter.rpc_port(),
        gpgnet_port = adapter.gpgnet_port(),
        "icebridge ready"
    );
    adapter.run().await;
    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let level: Level = cli
        .log_level
        .parse()
        .with_context(|| format!("invalid log level '{}'", cli.log_level))?;
    match &cli.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_max_level(level).init();
        }
    }
    Ok(())
}
