//! Text wire protocol spoken between the session server and its clients
//!
//! Every message is a single newline-free frame, either a bare keyword
//! (`OK`, `quitting`, `enemy_quit`, an ack digit) or `<command>:<payload>`.
//! Decoders never panic on malformed input: they return a [`ProtocolError`]
//! whose [`code`](ProtocolError::code) is the digit the receiving peer sends
//! back as its acknowledgement.
//!
//! Error code vocabulary (both peers branch on these digits):
//!
//! | code | meaning |
//! |------|---------|
//! | `0`  | frame accepted |
//! | `1`  | unrecognized or truncated prefix |
//! | `2`  | recognized prefix, bad payload (length, separator, field) |

use crate::grid::{Board, Coord, Direction};
use std::fmt;

pub const USERNAME_PREFIX: &str = "username:";
pub const SCREEN_SIZE_PREFIX: &str = "screen_size:";
pub const SHARED_SCREEN_SIZE_PREFIX: &str = "shared_screen_size:";
pub const YOUR_COORDS_PREFIX: &str = "your_coords:";
pub const ENEMY_COORDS_PREFIX: &str = "enemy_coords:";
pub const TARGET_COORD_PREFIX: &str = "target_coord:";
pub const TIME_PREFIX: &str = "time:";
pub const MOVE_PREFIX: &str = "my_move:";
pub const RESULT_PREFIX: &str = "result:";
pub const QUITTING: &str = "quitting";
pub const ENEMY_QUIT: &str = "enemy_quit";

/// Ack digit for a successfully decoded frame
pub const ACK_OK: u8 = 0;

/// Why a frame was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unrecognized or truncated frame prefix")]
    UnrecognizedPrefix,
    #[error("frame length out of range")]
    LengthOutOfRange,
    #[error("separator missing or outside its expected position")]
    MalformedSeparator,
    #[error("field is not numeric")]
    NonNumericField,
    #[error("field value out of range")]
    ValueOutOfRange,
    #[error("username already in use")]
    IdUnavailable,
}

impl ProtocolError {
    /// Stable wire code sent back to the peer
    pub fn code(self) -> u8 {
        match self {
            ProtocolError::UnrecognizedPrefix => 1,
            ProtocolError::LengthOutOfRange
            | ProtocolError::MalformedSeparator
            | ProtocolError::NonNumericField
            | ProtocolError::ValueOutOfRange
            | ProtocolError::IdUnavailable => 2,
        }
    }
}

/// Ack digit for the outcome of decoding a frame
pub fn ack_code<T>(result: &Result<T, ProtocolError>) -> u8 {
    match result {
        Ok(_) => ACK_OK,
        Err(e) => e.code(),
    }
}

/// Final outcome delivered to each participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    Draw,
    Win,
    Loss,
}

impl GameResult {
    pub fn as_str(self) -> &'static str {
        match self {
            GameResult::Draw => "draw",
            GameResult::Win => "win",
            GameResult::Loss => "loss",
        }
    }
}

/// Fixed replies the server sends to client requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Busy,
    IdUnavailable,
    InvalidIdPhrase,
    InvalidScreenSizePhrase,
    InvalidScreenSize,
    InvalidMove,
    InvalidCommand(String),
}

impl Reply {
    fn parse(frame: &str) -> Option<Self> {
        let reply = match frame {
            "OK" => Reply::Ok,
            "BUSY" => Reply::Busy,
            "ID UNAVAILABLE" => Reply::IdUnavailable,
            "INVALID ID PHRASE" => Reply::InvalidIdPhrase,
            "INVALID SCREEN-SIZE PHRASE" => Reply::InvalidScreenSizePhrase,
            "INVALID SCREEN_SIZE" => Reply::InvalidScreenSize,
            "INVALID_MOVE" => Reply::InvalidMove,
            other => {
                let command = other
                    .strip_prefix("COMMAND ")?
                    .strip_suffix(" IS INVALID")?;
                Reply::InvalidCommand(command.to_string())
            }
        };
        Some(reply)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => f.write_str("OK"),
            Reply::Busy => f.write_str("BUSY"),
            Reply::IdUnavailable => f.write_str("ID UNAVAILABLE"),
            Reply::InvalidIdPhrase => f.write_str("INVALID ID PHRASE"),
            Reply::InvalidScreenSizePhrase => f.write_str("INVALID SCREEN-SIZE PHRASE"),
            Reply::InvalidScreenSize => f.write_str("INVALID SCREEN_SIZE"),
            Reply::InvalidMove => f.write_str("INVALID_MOVE"),
            Reply::InvalidCommand(command) => write!(f, "COMMAND {} IS INVALID", command),
        }
    }
}

/// Every frame the server can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Reply(Reply),
    SharedScreenSize(Board),
    YourCoords(Vec<Coord>),
    EnemyCoords(Vec<Coord>),
    TargetCoord(Coord),
    Time(u8),
    EnemyQuit,
    Result(GameResult),
}

impl ServerFrame {
    /// Decodes any server frame by its prefix
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        if frame.starts_with(SHARED_SCREEN_SIZE_PREFIX) {
            decode_screen_size(frame, SHARED_SCREEN_SIZE_PREFIX).map(ServerFrame::SharedScreenSize)
        } else if frame.starts_with(YOUR_COORDS_PREFIX) {
            decode_coords(frame, YOUR_COORDS_PREFIX).map(ServerFrame::YourCoords)
        } else if frame.starts_with(ENEMY_COORDS_PREFIX) {
            decode_coords(frame, ENEMY_COORDS_PREFIX).map(ServerFrame::EnemyCoords)
        } else if frame.starts_with(TARGET_COORD_PREFIX) {
            decode_target(frame).map(ServerFrame::TargetCoord)
        } else if frame.starts_with(TIME_PREFIX) {
            decode_time(frame).map(ServerFrame::Time)
        } else if frame.starts_with(RESULT_PREFIX) {
            decode_result(frame).map(ServerFrame::Result)
        } else if frame == ENEMY_QUIT {
            Ok(ServerFrame::EnemyQuit)
        } else {
            Reply::parse(frame)
                .map(ServerFrame::Reply)
                .ok_or(ProtocolError::UnrecognizedPrefix)
        }
    }

    /// True for the broadcasts a client must acknowledge
    pub fn expects_ack(&self) -> bool {
        !matches!(self, ServerFrame::Reply(_))
    }
}

impl fmt::Display for ServerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerFrame::Reply(reply) => write!(f, "{}", reply),
            ServerFrame::SharedScreenSize(board) => write!(
                f,
                "{}{}x{}",
                SHARED_SCREEN_SIZE_PREFIX, board.height, board.width
            ),
            ServerFrame::YourCoords(cells) => {
                f.write_str(YOUR_COORDS_PREFIX)?;
                write_cells(f, cells)
            }
            ServerFrame::EnemyCoords(cells) => {
                f.write_str(ENEMY_COORDS_PREFIX)?;
                write_cells(f, cells)
            }
            ServerFrame::TargetCoord(c) => write!(f, "{}{},{}", TARGET_COORD_PREFIX, c.x, c.y),
            ServerFrame::Time(second) => write!(f, "{}{}", TIME_PREFIX, second),
            ServerFrame::EnemyQuit => f.write_str(ENEMY_QUIT),
            ServerFrame::Result(result) => write!(f, "{}{}", RESULT_PREFIX, result.as_str()),
        }
    }
}

/// True if the raw server frame is one the client acknowledges
pub fn expects_ack(frame: &str) -> bool {
    [
        SHARED_SCREEN_SIZE_PREFIX,
        YOUR_COORDS_PREFIX,
        ENEMY_COORDS_PREFIX,
        TARGET_COORD_PREFIX,
        TIME_PREFIX,
        RESULT_PREFIX,
        ENEMY_QUIT,
    ]
    .iter()
    .any(|prefix| frame.starts_with(prefix))
}

/// Every frame a client can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Username(String),
    ScreenSize(Board),
    Move(Direction),
    Quit,
    Ack(u8),
}

impl fmt::Display for ClientFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientFrame::Username(name) => write!(f, "{}{}", USERNAME_PREFIX, name),
            ClientFrame::ScreenSize(board) => {
                write!(f, "{}{}x{}", SCREEN_SIZE_PREFIX, board.height, board.width)
            }
            ClientFrame::Move(direction) => write!(f, "{}{}", MOVE_PREFIX, direction),
            ClientFrame::Quit => f.write_str(QUITTING),
            ClientFrame::Ack(code) => write!(f, "{}", code),
        }
    }
}

/// In-game client frame, classified by the tick engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Move(Direction),
    InvalidMove,
    Quit,
    Other,
}

impl SessionCommand {
    pub fn parse(frame: &str) -> Self {
        if frame.starts_with(MOVE_PREFIX) {
            match decode_move(frame) {
                Ok(direction) => SessionCommand::Move(direction),
                Err(_) => SessionCommand::InvalidMove,
            }
        } else if frame.starts_with(QUITTING) {
            SessionCommand::Quit
        } else {
            SessionCommand::Other
        }
    }
}

fn write_cells(f: &mut fmt::Formatter<'_>, cells: &[Coord]) -> fmt::Result {
    for c in cells {
        write!(f, "({}, {})", c.x, c.y)?;
    }
    Ok(())
}

fn parse_number(field: &str) -> Result<u32, ProtocolError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::NonNumericField);
    }
    field.parse().map_err(|_| ProtocolError::ValueOutOfRange)
}

fn parse_dimension(field: &str) -> Result<u16, ProtocolError> {
    match u16::try_from(parse_number(field)?) {
        Ok(0) | Err(_) => Err(ProtocolError::ValueOutOfRange),
        Ok(value) => Ok(value),
    }
}

fn parse_axis(field: &str, max_digits: usize) -> Result<i32, ProtocolError> {
    let value = parse_number(field)?;
    if field.len() > max_digits {
        return Err(ProtocolError::ValueOutOfRange);
    }
    i32::try_from(value).map_err(|_| ProtocolError::ValueOutOfRange)
}

/// `username:<name>`; the name must be non-empty
///
/// Uniqueness is a property of the live connection set and is checked by
/// the server, not here.
pub fn decode_username(frame: &str) -> Result<String, ProtocolError> {
    match frame.strip_prefix(USERNAME_PREFIX) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(ProtocolError::UnrecognizedPrefix),
    }
}

/// `<prefix><h>x<w>` for both `screen_size:` and `shared_screen_size:`
///
/// The `x` must sit one to four bytes after the prefix and the whole frame
/// may not run more than nine bytes past it.
pub fn decode_screen_size(frame: &str, prefix: &str) -> Result<Board, ProtocolError> {
    let ln = prefix.len();
    if frame.len() < ln + 3 || !frame.starts_with(prefix) {
        return Err(ProtocolError::UnrecognizedPrefix);
    }
    if frame.len() > ln + 9 {
        return Err(ProtocolError::LengthOutOfRange);
    }

    let payload = &frame[ln..];
    let x_index = payload.find('x').ok_or(ProtocolError::MalformedSeparator)?;
    if !(1..=4).contains(&x_index) {
        return Err(ProtocolError::MalformedSeparator);
    }

    let height = parse_dimension(&payload[..x_index])?;
    let width = parse_dimension(&payload[x_index + 1..])?;
    Ok(Board::new(height, width))
}

/// `<prefix>(x, y)(x, y)...` for `your_coords:` and `enemy_coords:`
///
/// Cells carry no delimiter between them; each one ends at its closing
/// parenthesis and its comma must fall within the first four bytes.
pub fn decode_coords(frame: &str, prefix: &str) -> Result<Vec<Coord>, ProtocolError> {
    let mut rest = frame
        .strip_prefix(prefix)
        .ok_or(ProtocolError::UnrecognizedPrefix)?;
    if rest.len() < 5 {
        return Err(ProtocolError::LengthOutOfRange);
    }

    let mut cells = Vec::new();
    while !rest.is_empty() {
        let close = rest.find(')').ok_or(ProtocolError::MalformedSeparator)?;
        cells.push(decode_cell(&rest[..close])?);
        rest = &rest[close + 1..];
    }
    Ok(cells)
}

fn decode_cell(cell: &str) -> Result<Coord, ProtocolError> {
    let inner = cell
        .strip_prefix('(')
        .ok_or(ProtocolError::MalformedSeparator)?;
    let comma = cell.find(',').ok_or(ProtocolError::MalformedSeparator)?;
    if !(2..=4).contains(&comma) {
        return Err(ProtocolError::MalformedSeparator);
    }

    let x = parse_axis(&inner[..comma - 1], 3)?;
    let y_field = &cell[comma + 1..];
    let y = parse_axis(y_field.strip_prefix(' ').unwrap_or(y_field), 3)?;
    Ok(Coord::new(x, y))
}

/// `target_coord:<x>,<y>`
pub fn decode_target(frame: &str) -> Result<Coord, ProtocolError> {
    let ln = TARGET_COORD_PREFIX.len();
    let payload = frame
        .strip_prefix(TARGET_COORD_PREFIX)
        .ok_or(ProtocolError::UnrecognizedPrefix)?;
    if frame.len() < ln + 3 || frame.len() > ln + 9 {
        return Err(ProtocolError::LengthOutOfRange);
    }

    let comma = payload.find(',').ok_or(ProtocolError::MalformedSeparator)?;
    if !(1..=4).contains(&comma) {
        return Err(ProtocolError::MalformedSeparator);
    }

    let x = parse_axis(&payload[..comma], 3)?;
    let y = parse_axis(&payload[comma + 1..], 3)?;
    Ok(Coord::new(x, y))
}

/// `time:<second>` with the second in `0..=59`
pub fn decode_time(frame: &str) -> Result<u8, ProtocolError> {
    let field = frame
        .strip_prefix(TIME_PREFIX)
        .ok_or(ProtocolError::UnrecognizedPrefix)?;
    let second = parse_number(field)?;
    if field.len() > 2 || second > 59 {
        return Err(ProtocolError::ValueOutOfRange);
    }
    Ok(second as u8)
}

/// `my_move:<left|right|up|down>`
pub fn decode_move(frame: &str) -> Result<Direction, ProtocolError> {
    frame
        .strip_prefix(MOVE_PREFIX)
        .ok_or(ProtocolError::UnrecognizedPrefix)?
        .parse::<Direction>()
        .map_err(|_| ProtocolError::ValueOutOfRange)
}

/// `result:<draw|win|loss>`
pub fn decode_result(frame: &str) -> Result<GameResult, ProtocolError> {
    match frame.strip_prefix(RESULT_PREFIX) {
        Some("draw") => Ok(GameResult::Draw),
        Some("win") => Ok(GameResult::Win),
        Some("loss") => Ok(GameResult::Loss),
        Some(_) => Err(ProtocolError::ValueOutOfRange),
        None => Err(ProtocolError::UnrecognizedPrefix),
    }
}

/// A one-digit acknowledgement, or None if the frame is something else
pub fn decode_ack(frame: &str) -> Option<u8> {
    match frame.as_bytes() {
        [digit] if digit.is_ascii_digit() => Some(digit - b'0'),
        _ => None,
    }
}
