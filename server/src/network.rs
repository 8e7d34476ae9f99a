//! TCP front end and the single-task server loop

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::matchmaker;
use crate::session::Session;
use crate::transport::TcpTransport;
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, MissedTickBehavior};

/// Pause after a failed accept, e.g. while out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Session server: owns the listener, every connection and at most one
/// running session
///
/// Everything runs on one task. The loop multiplexes new connections with a
/// fixed poll interval; each poll drives the session, negotiates pending
/// connections, removes closed ones and forms a new session when idle.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    clients: ClientManager<TcpTransport>,
    session: Option<Session<TcpTransport>>,
    rng: StdRng,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let config = config.normalized();
        let listener = TcpListener::bind(config.bind_address()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            listener,
            clients: ClientManager::new(config.max_connections)
                .with_send_timeout(config.send_timeout),
            config,
            session: None,
            rng,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept/poll loop; only returns by being dropped
    pub async fn run(&mut self) -> io::Result<()> {
        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Server started: sessions of {}..={} players, {:?} ticks",
            self.config.min_players, self.config.max_players, self.config.tick_interval
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.admit(stream, addr),
                        Err(e) => {
                            error!("Accept failed: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }

                _ = poll.tick() => {
                    self.step().await;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.clients.add_connection(addr, TcpTransport::new(stream)).is_none() {
            warn!("Rejecting {}: {} connections already open", addr, self.clients.len());
        }
    }

    /// One iteration of the server loop
    pub async fn step(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.poll().await;
            if session.is_finished() {
                info!("Session {:?} closed", session.usernames());
                self.session = None;
            }
        }

        self.clients.poll_negotiations(self.session.is_some()).await;
        self.clients.compact();

        if self.session.is_none() {
            match matchmaker::try_form(&mut self.clients, &self.config, &mut self.rng).await {
                Ok(Some(session)) => self.session = Some(session),
                Ok(None) => {}
                Err(e) => warn!("Could not form a session: {}", e),
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let server = Server::bind(config).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.connection_count(), 0);
        assert!(!server.has_session());
    }

    #[tokio::test]
    async fn test_admit_respects_capacity() {
        let config = ServerConfig {
            port: 0,
            max_connections: 1,
            ..ServerConfig::default()
        };
        let mut server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();

        let _first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();
        for _ in 0..2 {
            let (stream, peer) = server.listener.accept().await.unwrap();
            server.admit(stream, peer);
        }
        assert_eq!(server.connection_count(), 1);
    }
}
