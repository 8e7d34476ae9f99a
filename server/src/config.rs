//! Runtime settings for the session server

use arena_shared::{MAX_SESSION_PLAYERS, TICK_INTERVAL_MS};
use std::time::Duration;

/// Settings the server loop, matchmaker and tick engine read
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Cadence of the outer loop (negotiation, matchmaking, session polling)
    pub poll_interval: Duration,
    /// Minimum time between two simulation steps
    pub tick_interval: Duration,
    /// How long a broadcast waits for every acknowledgement
    pub ack_timeout: Duration,
    /// How long one write may take before the peer is dropped
    pub send_timeout: Duration,
    /// Delay between session formation and the first simulation step
    pub countdown: Duration,
    pub min_players: usize,
    pub max_players: usize,
    pub max_connections: usize,
    /// Fixed RNG seed for reproducible spawn and target placement
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5555,
            poll_interval: Duration::from_millis(20),
            tick_interval: Duration::from_millis(TICK_INTERVAL_MS),
            ack_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(1),
            countdown: Duration::from_secs(6),
            min_players: 2,
            max_players: MAX_SESSION_PLAYERS,
            max_connections: 32,
            seed: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Clamps the player bounds so a session always has two to
    /// [`MAX_SESSION_PLAYERS`] participants
    pub fn normalized(mut self) -> Self {
        self.max_players = self.max_players.clamp(2, MAX_SESSION_PLAYERS);
        self.min_players = self.min_players.clamp(2, self.max_players);
        self
    }
}
