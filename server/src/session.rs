//! Authoritative state and lock-step tick engine of one running session
//!
//! A session owns the connections of its participants for its whole life.
//! Once its countdown has elapsed, every [`Session::iterate`] call performs,
//! in order:
//!
//! 1. target consumption (at most one participant per iteration),
//! 2. non-blocking inbound handling for every participant,
//! 3. a simulation step, if the tick interval has elapsed: advance, resolve
//!    collisions, then broadcast positions and the target through ack
//!    barriers.
//!
//! A session ends with exactly one [`SessionOutcome`]. Results and
//! `enemy_quit` are delivered best-effort; a failed position or target
//! barrier aborts the session.

use crate::barrier::{self, BarrierError, Delivery};
use crate::client_manager::{Connection, MAX_FRAMES_PER_POLL};
use crate::config::ServerConfig;
use crate::matchmaker::place_target;
use crate::transport::{Received, Transport};
use arena_shared::{Board, Coord, GameResult, Reply, ServerFrame, SessionCommand, Snake};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Setup broadcasts in progress
    Forming,
    /// Setup delivered, waiting for the agreed start
    Countdown,
    Active,
    Finished,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Two heads met on the same cell
    Draw,
    Decided { loser: String, winners: Vec<String> },
    /// A participant quit or disconnected; nobody receives a result
    Quit { username: String },
    Aborted { reason: String },
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Draw => f.write_str("draw"),
            SessionOutcome::Decided { loser, winners } => {
                write!(f, "{} lost, {} won", loser, winners.join(", "))
            }
            SessionOutcome::Quit { username } => write!(f, "{} quit", username),
            SessionOutcome::Aborted { reason } => write!(f, "aborted: {}", reason),
        }
    }
}

/// Collision found after a simulation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collision {
    /// Some pair of heads share a cell
    Draw,
    /// Index of the first participant that crashed
    Loser(usize),
}

/// Resolves collisions for snakes given in participant order
///
/// Head-on meetings are checked across all pairs first and always win over
/// any other collision in the same step. Otherwise the first snake whose head
/// lies in its own body, in another snake's body or outside the board loses.
pub fn detect_collision(board: Board, snakes: &[&Snake]) -> Option<Collision> {
    for (i, a) in snakes.iter().enumerate() {
        if snakes[i + 1..].iter().any(|b| a.head() == b.head()) {
            return Some(Collision::Draw);
        }
    }

    snakes
        .iter()
        .enumerate()
        .find(|(i, snake)| {
            let head = snake.head();
            snake.hits_itself()
                || board.is_outside(head)
                || snakes
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != *i && other.overlaps(head))
        })
        .map(|(i, _)| Collision::Loser(i))
}

/// A connection bound to the snake it controls
#[derive(Debug)]
pub struct Participant<T> {
    pub conn: Connection<T>,
    pub snake: Snake,
}

impl<T: Transport> Participant<T> {
    /// Binds a connection taken from the manager to its spawned snake
    pub fn new(conn: Connection<T>, snake: Snake) -> Self {
        Self { conn, snake }
    }

    pub fn username(&self) -> &str {
        self.conn.username()
    }
}

/// One running match: the participants, the shared board and the target
///
/// The session owns its participants' connections for its whole lifetime.
/// The server loop calls [`poll`](Session::poll) once per iteration until
/// [`is_finished`](Session::is_finished) reports a terminal outcome.
pub struct Session<T> {
    participants: Vec<Participant<T>>,
    board: Board,
    target: Coord,
    status: SessionStatus,
    starts_at: Instant,
    last_step: Instant,
    rng: StdRng,
    tick_interval: Duration,
    ack_timeout: Duration,
    outcome: Option<SessionOutcome>,
}

impl<T: Transport> Session<T> {
    /// Creates a session in [`SessionStatus::Forming`]
    ///
    /// Participants keep the given order, which decides target consumption
    /// and collision precedence. Timing comes from `config`.
    pub fn forming(
        participants: Vec<Participant<T>>,
        board: Board,
        target: Coord,
        rng: StdRng,
        config: &ServerConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            participants,
            board,
            target,
            status: SessionStatus::Forming,
            starts_at: now,
            last_step: now,
            rng,
            tick_interval: config.tick_interval,
            ack_timeout: config.ack_timeout,
            outcome: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The shared board every participant was told about
    pub fn board(&self) -> Board {
        self.board
    }

    /// Current target cell
    pub fn target(&self) -> Coord {
        self.target
    }

    /// Remaining participants in session order
    pub fn participants(&self) -> &[Participant<T>] {
        &self.participants
    }

    /// How the session ended, once it has
    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    /// Usernames of the remaining participants, for log lines
    pub fn usernames(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|p| p.username().to_string())
            .collect()
    }

    /// Gives the connections back, e.g. after a failed formation
    pub fn into_connections(self) -> Vec<Connection<T>> {
        self.participants.into_iter().map(|p| p.conn).collect()
    }

    /// Switches to the countdown; the first step follows `countdown` later
    pub fn start_countdown(&mut self, countdown: Duration) {
        self.starts_at = Instant::now() + countdown;
        self.status = SessionStatus::Countdown;
    }

    /// Drives the session once per server iteration
    pub async fn poll(&mut self) {
        if self.status == SessionStatus::Countdown {
            let now = Instant::now();
            if now < self.starts_at {
                return;
            }
            info!("Session {:?} started", self.usernames());
            self.status = SessionStatus::Active;
            self.last_step = now;
        }

        if self.status == SessionStatus::Active {
            self.iterate().await;
        }
    }

    /// One pass of consumption, inbound handling and a gated simulation step
    pub async fn iterate(&mut self) {
        if self.status != SessionStatus::Active {
            return;
        }

        self.consume_target();
        if self.is_finished() {
            return;
        }

        self.handle_inbound().await;
        if self.is_finished() {
            return;
        }

        if self.last_step.elapsed() >= self.tick_interval {
            self.last_step = Instant::now();
            self.step().await;
        }
    }

    fn consume_target(&mut self) {
        let target = self.target;
        let Some(eater) = self
            .participants
            .iter_mut()
            .find(|p| p.snake.head() == target)
        else {
            return;
        };

        eater.snake.grow();
        info!(
            "{} reached the target at {}, length now {}",
            eater.username(),
            target,
            eater.snake.len()
        );

        let snakes: Vec<&Snake> = self.participants.iter().map(|p| &p.snake).collect();
        match place_target(self.board, &snakes, &mut self.rng) {
            Some(cell) => self.target = cell,
            None => self.finish(SessionOutcome::Aborted {
                reason: "no free cell left for the target".to_string(),
            }),
        }
    }

    async fn handle_inbound(&mut self) {
        for i in 0..self.participants.len() {
            for _ in 0..MAX_FRAMES_PER_POLL {
                let participant = &mut self.participants[i];
                match participant.conn.next_inbound() {
                    Received::Frame(frame) => {
                        debug!("<- {} {}", participant.username(), frame);
                        match SessionCommand::parse(&frame) {
                            SessionCommand::Move(direction) => {
                                participant.snake.set_direction(direction);
                                participant.conn.reply(Reply::Ok).await;
                            }
                            SessionCommand::InvalidMove => {
                                participant.conn.reply(Reply::InvalidMove).await;
                            }
                            SessionCommand::Quit => {
                                participant.conn.reply(Reply::Ok).await;
                                self.remove_quitter(i).await;
                                return;
                            }
                            SessionCommand::Other => {
                                participant.conn.reply(Reply::InvalidCommand(frame)).await;
                            }
                        }
                    }
                    Received::Pending => break,
                    Received::Closed => {
                        info!("{} disconnected mid-session", participant.username());
                        self.remove_quitter(i).await;
                        return;
                    }
                }
            }
        }
    }

    /// Removes a quitting participant and tells everyone else
    async fn remove_quitter(&mut self, index: usize) {
        let quitter = self.participants.remove(index);
        let username = quitter.username().to_string();
        drop(quitter);

        let batch: Vec<Delivery<'_, T>> = self
            .participants
            .iter_mut()
            .map(|p| (&mut p.conn, vec![ServerFrame::EnemyQuit]))
            .collect();
        barrier::best_effort(batch, self.ack_timeout).await;

        self.finish(SessionOutcome::Quit { username });
    }

    async fn step(&mut self) {
        for participant in &mut self.participants {
            participant.snake.advance();
        }

        let snakes: Vec<&Snake> = self.participants.iter().map(|p| &p.snake).collect();
        match detect_collision(self.board, &snakes) {
            Some(Collision::Draw) => {
                self.send_results(|_| GameResult::Draw).await;
                self.finish(SessionOutcome::Draw);
            }
            Some(Collision::Loser(loser)) => {
                self.send_results(|i| {
                    if i == loser {
                        GameResult::Loss
                    } else {
                        GameResult::Win
                    }
                })
                .await;
                let outcome = SessionOutcome::Decided {
                    loser: self.participants[loser].username().to_string(),
                    winners: self
                        .participants
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != loser)
                        .map(|(_, p)| p.username().to_string())
                        .collect(),
                };
                self.finish(outcome);
            }
            None => {
                let broadcast = match self.broadcast_positions().await {
                    Ok(()) => self.broadcast_target().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = broadcast {
                    self.finish(SessionOutcome::Aborted {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn send_results<F>(&mut self, result_for: F)
    where
        F: Fn(usize) -> GameResult,
    {
        let batch: Vec<Delivery<'_, T>> = self
            .participants
            .iter_mut()
            .enumerate()
            .map(|(i, p)| (&mut p.conn, vec![ServerFrame::Result(result_for(i))]))
            .collect();
        barrier::best_effort(batch, self.ack_timeout).await;
    }

    fn finish(&mut self, outcome: SessionOutcome) {
        match &outcome {
            SessionOutcome::Aborted { .. } => warn!("Session ended: {}", outcome),
            _ => info!("Session ended: {}", outcome),
        }
        self.outcome = Some(outcome);
        self.status = SessionStatus::Finished;
    }

    /// Sends each participant its frames, built from the whole participant list
    async fn broadcast<F>(&mut self, frames_for: F) -> Result<(), BarrierError>
    where
        F: Fn(usize, &[Participant<T>]) -> Vec<ServerFrame>,
    {
        let frames: Vec<Vec<ServerFrame>> = (0..self.participants.len())
            .map(|i| frames_for(i, &self.participants))
            .collect();
        let batch: Vec<Delivery<'_, T>> = self
            .participants
            .iter_mut()
            .map(|p| &mut p.conn)
            .zip(frames)
            .collect();
        barrier::deliver(batch, self.ack_timeout).await
    }

    pub async fn broadcast_board(&mut self) -> Result<(), BarrierError> {
        let board = self.board;
        self.broadcast(|_, _| vec![ServerFrame::SharedScreenSize(board)])
            .await
    }

    /// Own body first, then one `enemy_coords` frame per other participant
    pub async fn broadcast_positions(&mut self) -> Result<(), BarrierError> {
        self.broadcast(|i, all| vec![ServerFrame::YourCoords(all[i].snake.body().to_vec())])
            .await?;
        self.broadcast(|i, all| {
            all.iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| ServerFrame::EnemyCoords(p.snake.body().to_vec()))
                .collect()
        })
        .await
    }

    pub async fn broadcast_target(&mut self) -> Result<(), BarrierError> {
        let target = self.target;
        self.broadcast(|_, _| vec![ServerFrame::TargetCoord(target)])
            .await
    }

    pub async fn broadcast_start(&mut self, second: u8) -> Result<(), BarrierError> {
        self.broadcast(|_, _| vec![ServerFrame::Time(second)]).await
    }
}
