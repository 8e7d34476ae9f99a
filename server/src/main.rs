use arena_server::{Server, ServerConfig};
use clap::Parser;
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "5555")]
    port: u16,

    /// Milliseconds between two simulation steps
    #[arg(short, long, default_value = "100")]
    tick_ms: u64,

    /// Seconds between session formation and the first step
    #[arg(short, long, default_value = "6")]
    countdown: u64,

    /// Seconds a broadcast waits for every acknowledgement
    #[arg(long, default_value = "5")]
    ack_timeout: u64,

    /// Milliseconds one write may take before the peer is dropped
    #[arg(long, default_value = "1000")]
    send_timeout_ms: u64,

    /// Smallest number of ready players that starts a session
    #[arg(long, default_value = "2")]
    min_players: usize,

    /// Largest number of players placed in one session
    #[arg(long, default_value = "4")]
    max_players: usize,

    /// Maximum number of open connections
    #[arg(short, long, default_value = "32")]
    max_connections: usize,

    /// Seed for spawn and target placement
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        tick_interval: Duration::from_millis(args.tick_ms),
        countdown: Duration::from_secs(args.countdown),
        ack_timeout: Duration::from_secs(args.ack_timeout),
        send_timeout: Duration::from_millis(args.send_timeout_ms),
        min_players: args.min_players,
        max_players: args.max_players,
        max_connections: args.max_connections,
        seed: args.seed,
        ..ServerConfig::default()
    };

    let mut server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
