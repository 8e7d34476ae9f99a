//! # Snake arena shared library
//!
//! Types used on both ends of the arena protocol: the integer grid, the snake
//! body model, the text codec and the newline framing.
//!
//! The server is authoritative over every snake; clients run the same
//! [`Snake`] model locally only to apply the reversal guard and pause flag
//! before a move is sent.

pub mod framing;
pub mod grid;
pub mod protocol;
pub mod snake;

pub use framing::{encode_frame, FrameBuffer, FramingError, MAX_FRAME_LEN};
pub use grid::{Board, Coord, Direction};
pub use protocol::{ClientFrame, GameResult, ProtocolError, Reply, ServerFrame, SessionCommand};
pub use snake::Snake;

pub const INITIAL_SNAKE_LENGTH: usize = 6;
pub const INITIAL_DIRECTION: Direction = Direction::Right;

/// Distance kept between spawn points/targets and the board edge
pub const SPAWN_MARGIN: i32 = 3;

/// Largest number of snakes placed in one session
pub const MAX_SESSION_PLAYERS: usize = 4;

/// Smallest board on which every participant gets its own spawn row
pub const MIN_BOARD_HEIGHT: u16 = (2 * SPAWN_MARGIN) as u16 + MAX_SESSION_PLAYERS as u16 - 1;

/// Smallest board on which a full-length snake fits between the spawn margins
pub const MIN_BOARD_WIDTH: u16 = 2 * INITIAL_SNAKE_LENGTH as u16 + (2 * SPAWN_MARGIN) as u16;

/// Coordinates travel with at most three digits per axis
pub const MAX_BOARD_DIM: u16 = 999;

pub const TICK_INTERVAL_MS: u64 = 100;
