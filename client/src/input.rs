//! Line-based player input
//!
//! Commands are read one per line from any buffered reader (stdin in the
//! binary): a direction word or its WASD letter, `p`/`pause`, or
//! `q`/`quit`.

use arena_shared::Direction;
use log::warn;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCommand {
    Move(Direction),
    TogglePause,
    Quit,
}

impl InputCommand {
    /// Maps one trimmed, case-insensitive word to a command
    pub fn parse(word: &str) -> Option<Self> {
        let command = match word.trim().to_ascii_lowercase().as_str() {
            "w" | "up" => InputCommand::Move(Direction::Up),
            "a" | "left" => InputCommand::Move(Direction::Left),
            "s" | "down" => InputCommand::Move(Direction::Down),
            "d" | "right" => InputCommand::Move(Direction::Right),
            "p" | "pause" => InputCommand::TogglePause,
            "q" | "quit" => InputCommand::Quit,
            _ => return None,
        };
        Some(command)
    }
}

pub struct InputManager<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> InputManager<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Next raw line, or None at end of input
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.lines.next_line().await?.map(|line| line.trim().to_string()))
    }

    /// Next recognised command, skipping blank lines and unknown words
    ///
    /// Returns None at end of input. Cancel-safe, like the line reader
    /// underneath.
    pub async fn next_command(&mut self) -> io::Result<Option<InputCommand>> {
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match InputCommand::parse(&line) {
                Some(command) => return Ok(Some(command)),
                None => warn!("Unknown command {:?}; use w/a/s/d, p or q", line.trim()),
            }
        }
        Ok(None)
    }
}
