//! Client side of the arena protocol
//!
//! Mirrors the server's negotiation and acknowledges every broadcast it
//! receives with the decode result code, so the server's barriers can
//! complete.

use arena_shared::protocol::{
    ack_code, decode_coords, decode_screen_size, decode_target, decode_time, expects_ack,
    ENEMY_COORDS_PREFIX, SHARED_SCREEN_SIZE_PREFIX, YOUR_COORDS_PREFIX,
};
use arena_shared::{
    encode_frame, Board, ClientFrame, Coord, Direction, FrameBuffer, FramingError, ProtocolError,
    Reply, ServerFrame,
};
use log::{debug, info};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server is busy with another session")]
    Busy,
    #[error("username is already taken")]
    IdUnavailable,
    #[error("server rejected the request: {0}")]
    Rejected(String),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("connection closed by server")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Everything the server announces before a session starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSetup {
    pub board: Board,
    pub own: Vec<Coord>,
    pub enemies: Vec<Vec<Coord>>,
    pub target: Coord,
    /// Wall-clock second the server announced as the start
    pub start_second: u8,
}

/// One decoded setup frame
enum SetupFrame {
    Board(Board),
    Own(Vec<Coord>),
    Enemy(Vec<Coord>),
    Target(Coord),
    Time(u8),
}

/// How far the setup sequence has come
enum SetupProgress {
    Board,
    Own {
        board: Board,
    },
    Enemies {
        board: Board,
        own: Vec<Coord>,
        enemies: Vec<Vec<Coord>>,
    },
    Time {
        board: Board,
        own: Vec<Coord>,
        enemies: Vec<Vec<Coord>>,
        target: Coord,
    },
}

impl SetupProgress {
    /// Decodes `frame` as whatever this step expects
    ///
    /// A `shared_screen_size` frame is accepted at every step: the server
    /// resends the whole setup when a formation attempt failed part-way.
    fn decode(&self, frame: &str) -> Result<SetupFrame, ProtocolError> {
        if frame.starts_with(SHARED_SCREEN_SIZE_PREFIX) {
            return decode_screen_size(frame, SHARED_SCREEN_SIZE_PREFIX).map(SetupFrame::Board);
        }
        match self {
            SetupProgress::Board => {
                decode_screen_size(frame, SHARED_SCREEN_SIZE_PREFIX).map(SetupFrame::Board)
            }
            SetupProgress::Own { .. } => {
                decode_coords(frame, YOUR_COORDS_PREFIX).map(SetupFrame::Own)
            }
            SetupProgress::Enemies { .. } if frame.starts_with(ENEMY_COORDS_PREFIX) => {
                decode_coords(frame, ENEMY_COORDS_PREFIX).map(SetupFrame::Enemy)
            }
            SetupProgress::Enemies { .. } => decode_target(frame).map(SetupFrame::Target),
            SetupProgress::Time { .. } => decode_time(frame).map(SetupFrame::Time),
        }
    }
}

/// Client end of one server connection
///
/// Generic over the stream so tests can script the server side with
/// `tokio_test::io::Builder`.
pub struct Client<S> {
    stream: S,
    frames: FrameBuffer,
}

impl Client<TcpStream> {
    /// Opens a TCP connection to the server at `addr`
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", addr);
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            frames: FrameBuffer::new(),
        }
    }

    /// Writes one terminated frame
    pub async fn send(&mut self, frame: &ClientFrame) -> Result<(), ClientError> {
        let text = frame.to_string();
        debug!("-> {}", text);
        self.stream.write_all(&encode_frame(&text)).await?;
        Ok(())
    }

    /// Waits for the next complete frame
    ///
    /// Cancel-safe: bytes already read stay buffered for the next call.
    pub async fn recv_frame(&mut self) -> Result<String, ClientError> {
        let mut buffer = [0u8; 1024];
        loop {
            if let Some(frame) = self.frames.next_frame() {
                let frame = frame?;
                debug!("<- {}", frame);
                return Ok(frame);
            }

            let len = self.stream.read(&mut buffer).await?;
            if len == 0 {
                return Err(ClientError::Closed);
            }
            self.frames.extend(&buffer[..len]);
        }
    }

    async fn recv_reply(&mut self) -> Result<Reply, ClientError> {
        let frame = self.recv_frame().await?;
        match ServerFrame::parse(&frame) {
            Ok(ServerFrame::Reply(reply)) => Ok(reply),
            _ => Err(ClientError::Rejected(frame)),
        }
    }

    /// Sends the username; `Busy` and `IdUnavailable` may be retried
    pub async fn identify(&mut self, username: &str) -> Result<(), ClientError> {
        self.send(&ClientFrame::Username(username.to_string())).await?;
        match self.recv_reply().await? {
            Reply::Ok => {
                info!("Identified as {}", username);
                Ok(())
            }
            Reply::Busy => Err(ClientError::Busy),
            Reply::IdUnavailable => Err(ClientError::IdUnavailable),
            other => Err(ClientError::Rejected(other.to_string())),
        }
    }

    /// Sends the screen size; a rejected size may be corrected and resent
    pub async fn identify_screen_size(&mut self, board: Board) -> Result<(), ClientError> {
        self.send(&ClientFrame::ScreenSize(board)).await?;
        match self.recv_reply().await? {
            Reply::Ok => Ok(()),
            Reply::Busy => Err(ClientError::Busy),
            other => Err(ClientError::Rejected(other.to_string())),
        }
    }

    /// Receives the session setup: board, positions, target and start time
    ///
    /// Any number of `enemy_coords` frames may precede the target. Every frame
    /// is acknowledged with its decode result; a fresh `shared_screen_size`
    /// starts the sequence over.
    pub async fn receive_setup(&mut self) -> Result<GameSetup, ClientError> {
        let mut progress = SetupProgress::Board;

        loop {
            let frame = self.recv_frame().await?;
            let decoded = progress.decode(&frame);
            self.send(&ClientFrame::Ack(ack_code(&decoded))).await?;

            progress = match (progress, decoded?) {
                (previous, SetupFrame::Board(board)) => {
                    if !matches!(previous, SetupProgress::Board) {
                        info!("Server restarted the session setup");
                    }
                    SetupProgress::Own { board }
                }
                (SetupProgress::Own { board }, SetupFrame::Own(own)) => SetupProgress::Enemies {
                    board,
                    own,
                    enemies: Vec::new(),
                },
                (SetupProgress::Enemies { board, own, mut enemies }, SetupFrame::Enemy(body)) => {
                    enemies.push(body);
                    SetupProgress::Enemies { board, own, enemies }
                }
                (SetupProgress::Enemies { board, own, enemies }, SetupFrame::Target(target)) => {
                    SetupProgress::Time {
                        board,
                        own,
                        enemies,
                        target,
                    }
                }
                (
                    SetupProgress::Time {
                        board,
                        own,
                        enemies,
                        target,
                    },
                    SetupFrame::Time(start_second),
                ) => {
                    info!(
                        "Session set up on a {}x{} board with {} enemies, starting at second {}",
                        board.height,
                        board.width,
                        enemies.len(),
                        start_second
                    );
                    return Ok(GameSetup {
                        board,
                        own,
                        enemies,
                        target,
                        start_second,
                    });
                }
                // decode only yields the frame the current step expects
                (progress, _) => progress,
            };
        }
    }

    /// Decodes an in-game frame, acknowledging it if the server waits for one
    pub async fn handle_frame(&mut self, frame: &str) -> Result<ServerFrame, ClientError> {
        let parsed = ServerFrame::parse(frame);
        if expects_ack(frame) {
            self.send(&ClientFrame::Ack(ack_code(&parsed))).await?;
        }
        Ok(parsed?)
    }

    /// Sends a move as is; the reversal guard lives in the game state
    pub async fn send_move(&mut self, direction: Direction) -> Result<(), ClientError> {
        self.send(&ClientFrame::Move(direction)).await
    }

    pub async fn send_quit(&mut self) -> Result<(), ClientError> {
        self.send(&ClientFrame::Quit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::GameResult;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_identify_ok() {
        let stream = Builder::new()
            .write(b"username:alice\n")
            .read(b"OK\n")
            .write(b"screen_size:24x80\n")
            .read(b"OK\n")
            .build();
        let mut client = Client::new(stream);

        client.identify("alice").await.unwrap();
        client.identify_screen_size(Board::new(24, 80)).await.unwrap();
    }

    #[tokio::test]
    async fn test_identify_retryable_errors() {
        let stream = Builder::new()
            .write(b"username:alice\n")
            .read(b"ID UNAVAILABLE\n")
            .write(b"username:alice\n")
            .read(b"BUSY\n")
            .write(b"username:alice\n")
            .read(b"INVALID ID PHRASE\n")
            .build();
        let mut client = Client::new(stream);

        assert!(matches!(client.identify("alice").await, Err(ClientError::IdUnavailable)));
        assert!(matches!(client.identify("alice").await, Err(ClientError::Busy)));
        assert!(matches!(
            client.identify("alice").await,
            Err(ClientError::Rejected(reply)) if reply == "INVALID ID PHRASE"
        ));
    }

    #[tokio::test]
    async fn test_screen_size_rejected() {
        let stream = Builder::new()
            .write(b"screen_size:4x10\n")
            .read(b"INVALID SCREEN_SIZE\n")
            .build();
        let mut client = Client::new(stream);

        let result = client.identify_screen_size(Board::new(4, 10)).await;
        assert!(matches!(result, Err(ClientError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_receive_setup_acks_every_frame() {
        let stream = Builder::new()
            .read(b"shared_screen_size:20x40\n")
            .write(b"0\n")
            .read(b"your_coords:(10, 5)(9, 5)\n")
            .write(b"0\n")
            .read(b"enemy_coords:(10, 15)(9, 15)\n")
            .write(b"0\n")
            .read(b"enemy_coords:(20, 8)(19, 8)\n")
            .write(b"0\n")
            .read(b"target_coord:30,10\n")
            .write(b"0\n")
            .read(b"time:17\n")
            .write(b"0\n")
            .build();
        let mut client = Client::new(stream);

        let setup = client.receive_setup().await.unwrap();
        assert_eq!(setup.board, Board::new(20, 40));
        assert_eq!(setup.own, vec![Coord::new(10, 5), Coord::new(9, 5)]);
        assert_eq!(setup.enemies.len(), 2);
        assert_eq!(setup.enemies[1][0], Coord::new(20, 8));
        assert_eq!(setup.target, Coord::new(30, 10));
        assert_eq!(setup.start_second, 17);
    }

    #[tokio::test]
    async fn test_receive_setup_restarts_on_new_board() {
        let stream = Builder::new()
            .read(b"shared_screen_size:20x40\n")
            .write(b"0\n")
            .read(b"your_coords:(10, 5)(9, 5)\n")
            .write(b"0\n")
            // the first formation attempt failed; the server starts over
            .read(b"shared_screen_size:24x60\n")
            .write(b"0\n")
            .read(b"shared_screen_size:24x60\n")
            .write(b"0\n")
            .read(b"your_coords:(12, 7)(11, 7)\n")
            .write(b"0\n")
            .read(b"enemy_coords:(12, 17)(11, 17)\n")
            .write(b"0\n")
            .read(b"target_coord:30,10\n")
            .write(b"0\n")
            .read(b"time:3\n")
            .write(b"0\n")
            .build();
        let mut client = Client::new(stream);

        let setup = client.receive_setup().await.unwrap();
        assert_eq!(setup.board, Board::new(24, 60));
        assert_eq!(setup.own, vec![Coord::new(12, 7), Coord::new(11, 7)]);
        assert_eq!(setup.enemies, vec![vec![Coord::new(12, 17), Coord::new(11, 17)]]);
        assert_eq!(setup.start_second, 3);
    }

    #[tokio::test]
    async fn test_receive_setup_reports_decode_error_code() {
        let stream = Builder::new()
            .read(b"shared_screen_size:20y40\n")
            .write(b"2\n")
            .build();
        let mut client = Client::new(stream);

        let result = client.receive_setup().await;
        assert!(matches!(
            result,
            Err(ClientError::Protocol(ProtocolError::MalformedSeparator))
        ));
    }

    #[tokio::test]
    async fn test_handle_frame_acks_broadcasts_only() {
        let stream = Builder::new()
            .read(b"OK\nresult:win\n")
            .write(b"0\n")
            .build();
        let mut client = Client::new(stream);

        let frame = client.recv_frame().await.unwrap();
        assert_eq!(
            client.handle_frame(&frame).await.unwrap(),
            ServerFrame::Reply(Reply::Ok)
        );

        let frame = client.recv_frame().await.unwrap();
        assert_eq!(
            client.handle_frame(&frame).await.unwrap(),
            ServerFrame::Result(GameResult::Win)
        );
    }

    #[tokio::test]
    async fn test_moves_and_quit() {
        let stream = Builder::new()
            .write(b"my_move:up\n")
            .write(b"quitting\n")
            .build();
        let mut client = Client::new(stream);

        client.send_move(Direction::Up).await.unwrap();
        client.send_quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let stream = Builder::new().read(b"time:1").build();
        let mut client = Client::new(stream);
        assert!(matches!(client.recv_frame().await, Err(ClientError::Closed)));
    }
}
