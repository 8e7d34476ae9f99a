//! # Snake Arena Server Library
//!
//! Authoritative session server for the multiplayer snake arena. Clients
//! connect over TCP, negotiate a username and their screen size, and are
//! matched into a shared session once enough of them are ready. The server
//! owns every snake: it applies moves, advances the simulation on a fixed
//! tick, resolves collisions and keeps all clients consistent by waiting for
//! an acknowledgement of every broadcast.
//!
//! ## Architecture
//!
//! ### Single-Task Event Loop
//! The whole server runs on one tokio task. A `select!` loop multiplexes
//! `accept` with a short poll interval; all socket reads are non-blocking,
//! so no single peer can hold up the others except through a bounded
//! acknowledgement wait.
//!
//! ### Broadcast Then Acknowledge
//! Every state broadcast (board, positions, target, start time, results) is
//! a barrier: the server sends the frames and then waits until each
//! addressee has answered each frame with an ack digit. A missing or
//! failing acknowledgement ends the session instead of letting clients drift
//! apart.
//!
//! ## Module Organization
//!
//! ### Transport (`transport`)
//! The non-blocking frame stream seam, with the TCP implementation.
//!
//! ### Client Manager (`client_manager`)
//! Connection registry and the username/screen-size negotiation state
//! machine.
//!
//! ### Barrier (`barrier`)
//! Bounded broadcast-then-acknowledge delivery.
//!
//! ### Matchmaker (`matchmaker`)
//! Forms a session from ready connections: shared board, spawns, first
//! target and the start countdown.
//!
//! ### Session (`session`)
//! The tick engine: moves, growth, collisions and terminal outcomes.
//!
//! ### Network (`network`)
//! The listener and the server loop tying everything together.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use arena_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await
//! }
//! ```

pub mod barrier;
pub mod client_manager;
pub mod config;
pub mod matchmaker;
pub mod network;
pub mod session;
pub mod transport;

pub use barrier::BarrierError;
pub use config::ServerConfig;
pub use matchmaker::FormationError;
pub use network::Server;
pub use session::{SessionOutcome, SessionStatus};
