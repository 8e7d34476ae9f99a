//! # Snake Arena Client Library
//!
//! Headless client for the snake arena session server. It speaks the same
//! text protocol as the server, acknowledges every broadcast so the server's
//! barriers can complete, and keeps a local mirror of the session.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Connection handling and the client half of the protocol:
//! - username and screen-size negotiation, with retryable errors surfaced
//!   as distinct [`ClientError`] variants
//! - setup reception, decoding and acknowledgement of every frame
//! - cancel-safe frame reception for use inside `select!`
//!
//! ### Game Module (`game`)
//! The local mirror of the session state. Steering passes through a
//! reversal guard and a pause flag before anything reaches the server.
//!
//! ### Input Module (`input`)
//! Line-based commands from stdin or any other buffered reader.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use arena_client::{Client, ClientGameState};
//! use arena_shared::Board;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:5555").await?;
//!     client.identify("alice").await?;
//!     client.identify_screen_size(Board::new(24, 80)).await?;
//!
//!     let mut state = ClientGameState::from_setup(client.receive_setup().await?);
//!     while !state.is_over() {
//!         let frame = client.recv_frame().await?;
//!         state.apply(&client.handle_frame(&frame).await?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;

pub use game::ClientGameState;
pub use input::{InputCommand, InputManager};
pub use network::{Client, ClientError, GameSetup};
