//! Integer grid model shared by server and client: cells, directions and the
//! session board.

use rand::Rng;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// A single cell on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Samples a cell uniformly from the given inclusive ranges
    pub fn random_within<R: Rng + ?Sized>(
        rng: &mut R,
        x_range: RangeInclusive<i32>,
        y_range: RangeInclusive<i32>,
    ) -> Self {
        Self {
            x: rng.gen_range(x_range),
            y: rng.gen_range(y_range),
        }
    }

    /// Returns the neighbouring cell one step along `direction`
    pub fn step(self, direction: Direction) -> Self {
        let (dx, dy) = direction.delta();
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// One of the four cardinal travel directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Right,
        Direction::Up,
        Direction::Down,
    ];

    /// Unit step in screen coordinates (y grows downwards)
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    pub fn is_opposite(self, other: Direction) -> bool {
        self.opposite() == other
    }

    /// Canonical wire token
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a token is not one of the four direction words
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown direction '{0}'")]
pub struct UnknownDirection(pub String);

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Direction::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| UnknownDirection(s.to_string()))
    }
}

/// Playing field dimensions in terminal rows/columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    pub height: u16,
    pub width: u16,
}

impl Board {
    pub fn new(height: u16, width: u16) -> Self {
        Self { height, width }
    }

    /// Componentwise minimum of every participant's screen, or None if empty
    pub fn shared<I: IntoIterator<Item = Board>>(screens: I) -> Option<Self> {
        screens.into_iter().reduce(|acc, b| Board {
            height: acc.height.min(b.height),
            width: acc.width.min(b.width),
        })
    }

    /// True if the cell lies on or beyond the frame: column 0 and `width`,
    /// rows 0..=1 and `height` are walls
    pub fn is_outside(&self, c: Coord) -> bool {
        c.x <= 0 || c.x >= i32::from(self.width) || c.y <= 1 || c.y >= i32::from(self.height)
    }

    pub fn height_i32(&self) -> i32 {
        i32::from(self.height)
    }

    pub fn width_i32(&self) -> i32 {
        i32::from(self.width)
    }
}
