//! Client-side view of a running session
//!
//! The server is authoritative, so this state only mirrors what it
//! broadcasts. The one piece of local logic is steering: the client refuses
//! to send a move that would reverse its snake, and a paused client sends
//! nothing at all.

use crate::network::GameSetup;
use arena_shared::{Board, Coord, Direction, GameResult, Reply, ServerFrame, Snake, INITIAL_DIRECTION};
use log::{debug, info, warn};

/// Local mirror of one session, built from the setup frames
///
/// Position rounds replace the own body and the enemy list; the target,
/// result and quit flag are updated as their frames arrive.
pub struct ClientGameState {
    board: Board,
    snake: Snake,
    enemies: Vec<Vec<Coord>>,
    target: Coord,
    start_second: u8,
    result: Option<GameResult>,
    enemy_quit: bool,
}

impl ClientGameState {
    /// Starts the mirror from the setup sequence; the own snake faces the
    /// initial direction and is not paused
    pub fn from_setup(setup: GameSetup) -> Self {
        Self {
            board: setup.board,
            snake: Snake::from_body(setup.own, INITIAL_DIRECTION),
            enemies: setup.enemies,
            target: setup.target,
            start_second: setup.start_second,
            result: None,
            enemy_quit: false,
        }
    }

    /// Folds one decoded server frame into the local view
    pub fn apply(&mut self, frame: &ServerFrame) {
        match frame {
            ServerFrame::SharedScreenSize(board) => self.board = *board,
            ServerFrame::YourCoords(body) => {
                // a new position round starts with our own body
                let paused = self.snake.is_paused();
                self.snake = Snake::from_body(body.clone(), self.snake.direction());
                self.snake.set_paused(paused);
                self.enemies.clear();
            }
            ServerFrame::EnemyCoords(body) => self.enemies.push(body.clone()),
            ServerFrame::TargetCoord(target) => self.target = *target,
            ServerFrame::Time(second) => self.start_second = *second,
            ServerFrame::Result(result) => {
                info!("Session over: {}", result.as_str());
                self.result = Some(*result);
            }
            ServerFrame::EnemyQuit => {
                info!("An opponent left the session");
                self.enemy_quit = true;
            }
            ServerFrame::Reply(Reply::Ok) => {}
            ServerFrame::Reply(reply @ (Reply::InvalidMove | Reply::InvalidCommand(_))) => {
                warn!("Server rejected a command: {}", reply)
            }
            ServerFrame::Reply(reply) => debug!("Unexpected reply during play: {}", reply),
        }
    }

    /// Applies the reversal guard and pause flag to a requested move
    ///
    /// Returns the direction to send to the server, if any.
    pub fn steer(&mut self, direction: Direction) -> Option<Direction> {
        if self.snake.is_paused() {
            return None;
        }
        self.snake.steer(direction).then_some(direction)
    }

    /// Flips the local pause flag and returns the new value
    pub fn toggle_pause(&mut self) -> bool {
        let paused = !self.snake.is_paused();
        self.snake.set_paused(paused);
        paused
    }

    /// True once a result or an opponent's quit has arrived
    pub fn is_over(&self) -> bool {
        self.result.is_some() || self.enemy_quit
    }

    pub fn board(&self) -> Board {
        self.board
    }

    pub fn snake(&self) -> &Snake {
        &self.snake
    }

    /// Enemy bodies from the latest position round, in server order
    pub fn enemies(&self) -> &[Vec<Coord>] {
        &self.enemies
    }

    pub fn target(&self) -> Coord {
        self.target
    }

    /// Wall-clock second the server announced as the start
    pub fn start_second(&self) -> u8 {
        self.start_second
    }

    /// This client's result; stays None when the session ended by a quit
    pub fn result(&self) -> Option<GameResult> {
        self.result
    }

    pub fn enemy_quit(&self) -> bool {
        self.enemy_quit
    }
}
