//! Connection registry and the pre-session negotiation state machine
//!
//! Every accepted socket becomes a [`Connection`] owned by the
//! [`ClientManager`]. Until a session takes it, the manager drives the
//! connection through username and screen-size negotiation:
//!
//! ```text
//! AwaitingUsername --username OK--> AwaitingScreenSize --screen_size OK--> Ready
//! ```
//!
//! Negotiation errors are either retryable (the connection keeps its state
//! and the client may resend) or fatal (the connection is marked closed).
//! Closed connections are not removed during the scan; [`ClientManager::compact`]
//! drops them once per server iteration.

use crate::transport::{Received, Transport};
use arena_shared::protocol::{decode_screen_size, decode_username, SCREEN_SIZE_PREFIX};
use arena_shared::{Board, ProtocolError, Reply, MAX_BOARD_DIM, MIN_BOARD_HEIGHT, MIN_BOARD_WIDTH};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;

/// Frames handled per connection in one pass, so a flooding peer cannot
/// hold up the loop
pub const MAX_FRAMES_PER_POLL: usize = 8;

/// Default limit on one write before the peer is considered gone
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Negotiation phase of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingUsername,
    AwaitingScreenSize,
    Ready,
}

/// One client socket plus everything negotiated over it
#[derive(Debug)]
pub struct Connection<T> {
    /// Accept-order identifier assigned by the manager
    pub id: u32,
    pub addr: SocketAddr,
    transport: T,
    username: Option<String>,
    screen: Option<Board>,
    state: ConnectionState,
    /// Frames read while waiting for acknowledgements, handled later
    backlog: VecDeque<String>,
    closed: bool,
    send_timeout: Duration,
}

impl<T: Transport> Connection<T> {
    /// Wraps a freshly accepted transport
    ///
    /// The connection starts in [`ConnectionState::AwaitingUsername`] with
    /// the [`DEFAULT_SEND_TIMEOUT`].
    pub fn new(id: u32, addr: SocketAddr, transport: T) -> Self {
        Self {
            id,
            addr,
            transport,
            username: None,
            screen: None,
            state: ConnectionState::AwaitingUsername,
            backlog: VecDeque::new(),
            closed: false,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Builds a connection that has already finished negotiation
    pub fn negotiated(
        id: u32,
        addr: SocketAddr,
        transport: T,
        username: &str,
        screen: Board,
    ) -> Self {
        let mut conn = Self::new(id, addr, transport);
        conn.username = Some(username.to_string());
        conn.screen = Some(screen);
        conn.state = ConnectionState::Ready;
        conn
    }

    /// Limits how long a single [`send`](Connection::send) may wait
    pub fn set_send_timeout(&mut self, limit: Duration) {
        self.send_timeout = limit;
    }

    /// The negotiated username, or a placeholder for log lines before
    /// negotiation
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or("<anonymous>")
    }

    /// The client's screen size, once negotiated
    pub fn screen(&self) -> Option<Board> {
        self.screen
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True once negotiation finished and the peer is still connected
    ///
    /// Only ready connections are considered by the matchmaker.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready && !self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flags the connection for removal
    ///
    /// Nothing is removed immediately; the owner drops closed connections
    /// on its next compaction.
    pub fn mark_closed(&mut self) {
        if !self.closed {
            debug!("Connection {} ({}) marked closed", self.id, self.addr);
        }
        self.closed = true;
    }

    /// Next inbound frame, deferred frames first
    pub fn next_inbound(&mut self) -> Received {
        if self.closed {
            return Received::Closed;
        }
        if let Some(frame) = self.backlog.pop_front() {
            return Received::Frame(frame);
        }
        self.read_transport()
    }

    /// Reads the socket directly, bypassing the backlog
    pub fn read_transport(&mut self) -> Received {
        if self.closed {
            return Received::Closed;
        }
        let received = self.transport.try_recv();
        if received == Received::Closed {
            self.mark_closed();
        }
        received
    }

    /// Queues a frame for the next [`next_inbound`](Connection::next_inbound)
    pub fn defer(&mut self, frame: String) {
        self.backlog.push_back(frame);
    }

    /// Sends one frame
    ///
    /// A write that fails or does not finish within the send timeout closes
    /// the connection.
    pub async fn send(&mut self, frame: &str) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            ));
        }
        debug!("-> {} {}", self.id, frame);
        let result = match timeout(self.send_timeout, self.transport.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write not finished after {:?}", self.send_timeout),
            )),
        };
        if let Err(e) = &result {
            warn!("Send to connection {} failed: {}", self.id, e);
            self.mark_closed();
        }
        result
    }

    /// Sends a reply; a failure has already closed the connection
    pub async fn reply(&mut self, reply: Reply) {
        let _ = self.send(&reply.to_string()).await;
    }

    /// Advances the negotiation state machine by one frame
    async fn negotiate(&mut self, frame: &str, busy: bool, taken: &mut HashSet<String>) {
        match self.state {
            ConnectionState::AwaitingUsername => {
                if busy {
                    self.reply(Reply::Busy).await;
                    return;
                }
                match decode_username(frame) {
                    Err(e) => {
                        info!("Connection {} sent an invalid id phrase: {}", self.id, e);
                        self.reply(Reply::InvalidIdPhrase).await;
                        self.mark_closed();
                    }
                    Ok(name) if taken.contains(&name) => {
                        info!("Connection {} asked for taken username {}", self.id, name);
                        self.reply(Reply::IdUnavailable).await;
                    }
                    Ok(name) => {
                        info!("Connection {} identified as {}", self.id, name);
                        taken.insert(name.clone());
                        self.username = Some(name);
                        self.state = ConnectionState::AwaitingScreenSize;
                        self.reply(Reply::Ok).await;
                    }
                }
            }
            ConnectionState::AwaitingScreenSize => {
                if busy {
                    self.reply(Reply::Busy).await;
                    return;
                }
                match decode_screen_size(frame, SCREEN_SIZE_PREFIX) {
                    Err(ProtocolError::UnrecognizedPrefix) => {
                        self.reply(Reply::InvalidScreenSizePhrase).await;
                    }
                    Err(_) => self.reply(Reply::InvalidScreenSize).await,
                    Ok(board) if !is_playable(board) => {
                        info!(
                            "{} sent unplayable screen size {}x{}",
                            self.username(),
                            board.height,
                            board.width
                        );
                        self.reply(Reply::InvalidScreenSize).await;
                    }
                    Ok(board) => {
                        info!(
                            "{} is ready with screen {}x{}",
                            self.username(),
                            board.height,
                            board.width
                        );
                        self.screen = Some(board);
                        self.state = ConnectionState::Ready;
                        self.reply(Reply::Ok).await;
                    }
                }
            }
            ConnectionState::Ready => {
                debug!("Ignoring frame from waiting {}: {}", self.username(), frame);
            }
        }
    }
}

/// True if every spawn fits and coordinates stay within three digits
pub fn is_playable(board: Board) -> bool {
    (MIN_BOARD_HEIGHT..=MAX_BOARD_DIM).contains(&board.height)
        && (MIN_BOARD_WIDTH..=MAX_BOARD_DIM).contains(&board.width)
}

/// Owns every connection that is not currently part of a session
///
/// Connections are keyed by accept order, so iteration and matchmaking are
/// deterministic. A session takes its participants out with
/// [`take`](ClientManager::take) and hands survivors of a failed formation
/// back with [`restore`](ClientManager::restore).
pub struct ClientManager<T> {
    connections: BTreeMap<u32, Connection<T>>,
    next_id: u32,
    max_connections: usize,
    send_timeout: Duration,
}

impl<T: Transport> ClientManager<T> {
    /// Creates an empty manager accepting at most `max_connections`
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            next_id: 1,
            max_connections,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Send timeout given to every connection accepted from now on
    pub fn with_send_timeout(mut self, limit: Duration) -> Self {
        self.send_timeout = limit;
        self
    }

    /// Registers a freshly accepted socket
    ///
    /// Returns the new connection id, or None when the manager is full.
    pub fn add_connection(&mut self, addr: SocketAddr, transport: T) -> Option<u32> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        info!("Connection {} accepted from {}", id, addr);
        let mut conn = Connection::new(id, addr, transport);
        conn.set_send_timeout(self.send_timeout);
        self.connections.insert(id, conn);
        Some(id)
    }

    /// Drops a connection immediately; false if the id is unknown
    pub fn remove_connection(&mut self, id: u32) -> bool {
        if let Some(conn) = self.connections.remove(&id) {
            info!("Connection {} ({}) removed", conn.id, conn.addr);
            true
        } else {
            false
        }
    }

    /// Looks up a connection the manager currently owns
    pub fn get(&self, id: u32) -> Option<&Connection<T>> {
        self.connections.get(&id)
    }

    /// True if a live connection already holds `name`
    pub fn username_taken(&self, name: &str) -> bool {
        self.connections
            .values()
            .any(|c| !c.is_closed() && c.username.as_deref() == Some(name))
    }

    /// Ids of up to `limit` ready connections in accept order
    pub fn ready_ids(&self, limit: usize) -> Vec<u32> {
        self.connections
            .values()
            .filter(|c| c.is_ready())
            .map(|c| c.id)
            .take(limit)
            .collect()
    }

    /// Moves the given connections out of the manager, in id order
    pub fn take(&mut self, ids: &[u32]) -> Vec<Connection<T>> {
        ids.iter()
            .filter_map(|id| self.connections.remove(id))
            .collect()
    }

    /// Returns connections to the manager, discarding closed ones
    pub fn restore(&mut self, conns: Vec<Connection<T>>) {
        for conn in conns {
            if conn.is_closed() {
                info!("Connection {} ({}) dropped", conn.id, conn.addr);
                continue;
            }
            self.connections.insert(conn.id, conn);
        }
    }

    /// Reads pending frames from every connection and negotiates
    ///
    /// At most [`MAX_FRAMES_PER_POLL`] frames are handled per connection;
    /// the rest wait for the next poll. While `busy` is set, any username or
    /// screen-size attempt is answered with `BUSY` and the connection keeps
    /// its state.
    pub async fn poll_negotiations(&mut self, busy: bool) {
        let mut taken: HashSet<String> = self
            .connections
            .values()
            .filter(|c| !c.is_closed())
            .filter_map(|c| c.username.clone())
            .collect();

        for conn in self.connections.values_mut() {
            for _ in 0..MAX_FRAMES_PER_POLL {
                match conn.next_inbound() {
                    Received::Frame(frame) => {
                        debug!("<- {} {}", conn.id, frame);
                        conn.negotiate(&frame, busy, &mut taken).await;
                        if conn.is_closed() {
                            break;
                        }
                    }
                    Received::Pending => break,
                    Received::Closed => {
                        info!("Connection {} ({}) closed by peer", conn.id, conn.addr);
                        break;
                    }
                }
            }
        }
    }

    /// Drops every connection marked closed during the last scan
    pub fn compact(&mut self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|id, conn| {
            if conn.is_closed() {
                info!("Connection {} ({}) removed", id, conn.addr);
                false
            } else {
                true
            }
        });
        before - self.connections.len()
    }

    /// Number of connections owned, closed ones included until compaction
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
