use arena_client::{Client, ClientError, ClientGameState, InputCommand, InputManager};
use arena_shared::Board;
use clap::Parser;
use log::{info, warn};
use std::time::Duration;
use tokio::io::BufReader;

/// Pause before retrying while the server runs another session
const BUSY_RETRY: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:5555")]
    server: String,

    /// Username to play under; asked for on stdin if omitted or taken
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Screen height in rows (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "24")]
    height: u16,

    /// Screen width in columns
    #[arg(short = 'w', long, default_value = "80")]
    width: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let mut input = InputManager::new(BufReader::new(tokio::io::stdin()));

    info!("Connecting to: {}", args.server);
    let mut client = Client::connect(&args.server).await?;

    let mut username = match args.username {
        Some(name) => name,
        None => prompt(&mut input, "Enter a username:").await?,
    };
    loop {
        match client.identify(&username).await {
            Ok(()) => break,
            Err(ClientError::IdUnavailable) => {
                let question = format!("Username {} is taken, enter another:", username);
                username = prompt(&mut input, &question).await?;
            }
            Err(ClientError::Busy) => {
                info!("Server is busy, retrying");
                tokio::time::sleep(BUSY_RETRY).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let screen = Board::new(args.height, args.width);
    loop {
        match client.identify_screen_size(screen).await {
            Ok(()) => break,
            Err(ClientError::Busy) => tokio::time::sleep(BUSY_RETRY).await,
            Err(e) => return Err(e.into()),
        }
    }

    info!("Waiting for opponents...");
    let setup = client.receive_setup().await?;
    let mut state = ClientGameState::from_setup(setup);
    eprintln!("Controls: w/a/s/d + Enter to steer, p to pause, q to quit");

    while !state.is_over() {
        tokio::select! {
            frame = client.recv_frame() => {
                let frame = frame?;
                match client.handle_frame(&frame).await {
                    Ok(frame) => state.apply(&frame),
                    Err(ClientError::Protocol(e)) => warn!("Ignoring frame {:?}: {}", frame, e),
                    Err(e) => return Err(e.into()),
                }
            }

            command = input.next_command() => {
                match command? {
                    Some(InputCommand::Move(direction)) => {
                        if let Some(direction) = state.steer(direction) {
                            client.send_move(direction).await?;
                        }
                    }
                    Some(InputCommand::TogglePause) => {
                        let paused = state.toggle_pause();
                        info!("{}", if paused { "Paused" } else { "Resumed" });
                    }
                    Some(InputCommand::Quit) | None => {
                        client.send_quit().await?;
                        info!("Left the session");
                        return Ok(());
                    }
                }
            }
        }
    }

    match state.result() {
        Some(result) => println!("Game over: {}", result.as_str()),
        None => println!("Your opponent left the game"),
    }

    Ok(())
}

async fn prompt<R>(input: &mut InputManager<R>, question: &str) -> Result<String, Box<dyn std::error::Error>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        eprintln!("{}", question);
        match input.read_line().await? {
            Some(line) if !line.is_empty() => return Ok(line),
            Some(_) => continue,
            None => return Err("stdin closed before a username was entered".into()),
        }
    }
}
