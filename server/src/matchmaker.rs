//! Session formation from ready connections
//!
//! Formation takes the ready connections out of the manager, agrees on the
//! shared board, places snakes and the first target, and pushes the whole
//! setup through ack barriers. If any step fails the session is never
//! started and every surviving connection goes back to the manager.

use crate::barrier::BarrierError;
use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::session::{Participant, Session};
use crate::transport::Transport;
use arena_shared::{
    Board, Coord, Snake, INITIAL_DIRECTION, INITIAL_SNAKE_LENGTH, SPAWN_MARGIN,
};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

/// Random draws tried before scanning the board for a free target cell
const MAX_TARGET_DRAWS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormationError {
    #[error("setup broadcast failed: {0}")]
    Barrier(#[from] BarrierError),
    #[error("board {0}x{1} has no room for {2} snakes")]
    NoSpawnRoom(u16, u16, usize),
    #[error("no free cell for the target")]
    NoFreeCell,
}

/// Head cells for `count` snakes, each on its own row
///
/// Rows are drawn from the spawn margin band and columns leave room for the
/// body behind the head plus the margin on both sides.
pub fn spawn_heads<R: Rng + ?Sized>(board: Board, count: usize, rng: &mut R) -> Option<Vec<Coord>> {
    let len = INITIAL_SNAKE_LENGTH as i32;
    let min_x = len + SPAWN_MARGIN;
    let max_x = board.width_i32() - SPAWN_MARGIN - len;
    if min_x > max_x {
        return None;
    }

    let rows: Vec<i32> = (SPAWN_MARGIN..=board.height_i32() - SPAWN_MARGIN).collect();
    if rows.len() < count {
        return None;
    }

    let chosen: Vec<i32> = rows.choose_multiple(rng, count).copied().collect();
    Some(
        chosen
            .into_iter()
            .map(|y| Coord::new(rng.gen_range(min_x..=max_x), y))
            .collect(),
    )
}

/// Picks a target cell that no snake occupies
///
/// Draws randomly inside the spawn margin first; if that keeps hitting
/// bodies, falls back to the first free cell in row order. Returns None only
/// when the whole area is covered.
pub fn place_target<R: Rng + ?Sized>(board: Board, snakes: &[&Snake], rng: &mut R) -> Option<Coord> {
    let xs = SPAWN_MARGIN..=board.width_i32() - SPAWN_MARGIN;
    let ys = SPAWN_MARGIN..=board.height_i32() - SPAWN_MARGIN;
    if xs.is_empty() || ys.is_empty() {
        return None;
    }
    let free = |c: Coord| snakes.iter().all(|s| !s.overlaps(c));

    for _ in 0..MAX_TARGET_DRAWS {
        let candidate = Coord::random_within(rng, xs.clone(), ys.clone());
        if free(candidate) {
            return Some(candidate);
        }
    }

    debug!("Random target draws exhausted, scanning for a free cell");
    ys.flat_map(|y| xs.clone().map(move |x| Coord::new(x, y)))
        .find(|&c| free(c))
}

/// The `time:` value announced to clients
///
/// A wall-clock second for display only; the server itself starts the
/// session from a monotonic deadline.
pub fn start_second(epoch_secs: u64, countdown_secs: u64) -> u8 {
    ((epoch_secs % 60 + countdown_secs) % 59) as u8
}

fn wall_clock_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Forms a session if enough connections are ready
///
/// Returns `Ok(None)` when fewer than `min_players` are ready. On error the
/// connections that are still alive have already been handed back.
pub async fn try_form<T: Transport>(
    manager: &mut ClientManager<T>,
    config: &ServerConfig,
    rng: &mut StdRng,
) -> Result<Option<Session<T>>, FormationError> {
    let ids = manager.ready_ids(config.max_players);
    if ids.len() < config.min_players {
        return Ok(None);
    }

    let conns = manager.take(&ids);
    let Some(board) = Board::shared(conns.iter().filter_map(|c| c.screen())) else {
        manager.restore(conns);
        return Ok(None);
    };

    let Some(heads) = spawn_heads(board, conns.len(), rng) else {
        manager.restore(conns);
        return Err(FormationError::NoSpawnRoom(board.height, board.width, ids.len()));
    };

    let participants: Vec<Participant<T>> = conns
        .into_iter()
        .zip(heads)
        .map(|(conn, head)| {
            Participant::new(conn, Snake::spawn(head, INITIAL_SNAKE_LENGTH, INITIAL_DIRECTION))
        })
        .collect();

    let snakes: Vec<&Snake> = participants.iter().map(|p| &p.snake).collect();
    let Some(target) = place_target(board, &snakes, rng) else {
        manager.restore(participants.into_iter().map(|p| p.conn).collect());
        return Err(FormationError::NoFreeCell);
    };

    let session_rng = StdRng::seed_from_u64(rng.gen());
    let mut session = Session::forming(participants, board, target, session_rng, config);
    info!(
        "Forming session for {:?} on a {}x{} board",
        session.usernames(),
        board.height,
        board.width
    );

    match announce(&mut session, config).await {
        Ok(()) => {
            session.start_countdown(config.countdown);
            Ok(Some(session))
        }
        Err(e) => {
            warn!("Session formation failed: {}", e);
            manager.restore(session.into_connections());
            Err(e)
        }
    }
}

async fn announce<T: Transport>(
    session: &mut Session<T>,
    config: &ServerConfig,
) -> Result<(), FormationError> {
    session.broadcast_board().await?;
    session.broadcast_positions().await?;
    session.broadcast_target().await?;
    let second = start_second(wall_clock_secs(), config.countdown.as_secs());
    session.broadcast_start(second).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_manager::Connection;
    use crate::session::SessionStatus;
    use crate::transport::mock::MockTransport;
    use arena_shared::{Direction, MIN_BOARD_HEIGHT, MIN_BOARD_WIDTH};
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            ack_timeout: Duration::from_millis(50),
            ..ServerConfig::default()
        }
    }

    fn ready(manager: &mut ClientManager<MockTransport>, id: u32, name: &str, screen: Board) -> MockTransport {
        let mock = MockTransport::acking();
        manager.restore(vec![Connection::negotiated(id, test_addr(), mock.clone(), name, screen)]);
        mock
    }

    #[test]
    fn test_spawn_heads_use_distinct_rows_within_margins() {
        let mut rng = StdRng::seed_from_u64(1);
        let board = Board::new(20, 40);
        for count in 2..=4 {
            let heads = spawn_heads(board, count, &mut rng).unwrap();
            assert_eq!(heads.len(), count);

            let rows: HashSet<i32> = heads.iter().map(|c| c.y).collect();
            assert_eq!(rows.len(), count);
            for head in heads {
                assert!((3..=17).contains(&head.y));
                assert!((9..=31).contains(&head.x));
                let snake = Snake::spawn(head, INITIAL_SNAKE_LENGTH, Direction::Right);
                assert!(snake.body().iter().all(|c| !board.is_outside(*c)));
            }
        }
    }

    #[test]
    fn test_spawn_heads_on_minimum_board() {
        let mut rng = StdRng::seed_from_u64(2);
        let board = Board::new(MIN_BOARD_HEIGHT, MIN_BOARD_WIDTH);
        assert!(spawn_heads(board, 4, &mut rng).is_some());
        assert!(spawn_heads(board, 5, &mut rng).is_none());
        assert!(spawn_heads(Board::new(20, MIN_BOARD_WIDTH - 1), 2, &mut rng).is_none());
    }

    #[test]
    fn test_place_target_avoids_snakes() {
        let mut rng = StdRng::seed_from_u64(3);
        let board = Board::new(20, 40);
        let snake = Snake::spawn(Coord::new(20, 10), 6, Direction::Right);
        for _ in 0..100 {
            let target = place_target(board, &[&snake], &mut rng).unwrap();
            assert!(!snake.overlaps(target));
            assert!((3..=37).contains(&target.x));
            assert!((3..=17).contains(&target.y));
        }
    }

    #[test]
    fn test_place_target_finds_last_free_cell() {
        let mut rng = StdRng::seed_from_u64(4);
        let board = Board::new(MIN_BOARD_HEIGHT, MIN_BOARD_WIDTH);
        let area: Vec<Coord> = (3..=6)
            .flat_map(|y| (3..=15).map(move |x| Coord::new(x, y)))
            .collect();

        let almost: Vec<Coord> = area.iter().copied().filter(|&c| c != Coord::new(15, 6)).collect();
        let covering = Snake::from_body(almost, Direction::Right);
        assert_eq!(place_target(board, &[&covering], &mut rng), Some(Coord::new(15, 6)));

        let full = Snake::from_body(area, Direction::Right);
        assert_eq!(place_target(board, &[&full], &mut rng), None);
    }

    #[test]
    fn test_start_second_wraps() {
        assert_eq!(start_second(125, 6), 11);
        assert_eq!(start_second(59, 6), 6);
        assert!(start_second(u64::MAX, 6) <= 59);
    }

    #[tokio::test]
    async fn test_lone_ready_connection_waits() {
        let mut manager = ClientManager::new(8);
        let mock = ready(&mut manager, 1, "alice", Board::new(20, 40));
        let mut rng = StdRng::seed_from_u64(5);

        let formed = try_form(&mut manager, &test_config(), &mut rng).await;
        assert!(matches!(formed, Ok(None)));
        assert_eq!(manager.len(), 1);
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_formation_sends_setup_in_order() {
        let mut manager = ClientManager::new(8);
        let a = ready(&mut manager, 1, "alice", Board::new(20, 40));
        let b = ready(&mut manager, 2, "bob", Board::new(24, 80));
        let mut rng = StdRng::seed_from_u64(6);

        let session = try_form(&mut manager, &test_config(), &mut rng)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Countdown);
        assert_eq!(session.board(), Board::new(20, 40));
        assert!(manager.is_empty());

        for mock in [&a, &b] {
            let sent = mock.sent();
            assert_eq!(sent.len(), 5);
            assert_eq!(sent[0], "shared_screen_size:20x40");
            assert!(sent[1].starts_with("your_coords:"));
            assert!(sent[2].starts_with("enemy_coords:"));
            assert_eq!(sent[3], format!("target_coord:{},{}", session.target().x, session.target().y));
            assert!(sent[4].starts_with("time:"));
        }

        // each side sees the other's body as its enemy
        let own_a = a.sent()[1].trim_start_matches("your_coords:").to_string();
        assert_eq!(b.sent()[2], format!("enemy_coords:{}", own_a));
    }

    #[tokio::test]
    async fn test_session_is_capped_at_max_players() {
        let mut manager = ClientManager::new(8);
        let mut mocks = Vec::new();
        for (id, name) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            mocks.push(ready(&mut manager, id as u32 + 1, name, Board::new(20, 40)));
        }
        let mut rng = StdRng::seed_from_u64(7);

        let session = try_form(&mut manager, &test_config(), &mut rng)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.participants().len(), 4);
        assert_eq!(session.usernames(), vec!["a", "b", "c", "d"]);
        assert_eq!(manager.len(), 1);
        // three enemies, one frame each
        let sent = mocks[0].sent();
        assert_eq!(sent.iter().filter(|f| f.starts_with("enemy_coords:")).count(), 3);
        assert!(mocks[4].sent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_formation_returns_survivors() {
        let mut manager = ClientManager::new(8);
        let _a = ready(&mut manager, 1, "alice", Board::new(20, 40));
        let b = ready(&mut manager, 2, "bob", Board::new(20, 40));
        b.set_ack_code(None);
        b.push_close();
        let mut rng = StdRng::seed_from_u64(8);

        let formed = try_form(&mut manager, &test_config(), &mut rng).await;
        assert!(matches!(formed, Err(FormationError::Barrier(BarrierError::Disconnected { .. }))));
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.ready_ids(4), vec![1]);
    }
}
