//! Broadcast-then-acknowledge delivery
//!
//! A barrier sends each addressee its frames and then polls every addressee
//! until it has answered each frame with an ack digit. Polling is
//! non-blocking and bounded by a timeout, so one silent peer cannot stall the
//! server forever. Anything other than an ack that arrives in the meantime is
//! deferred to the connection's backlog and handled by the next inbound step.

use crate::client_manager::Connection;
use crate::transport::{Received, Transport};
use arena_shared::protocol::{decode_ack, ACK_OK};
use arena_shared::ServerFrame;
use log::{debug, warn};
use std::time::Duration;
use tokio::time::Instant;

/// Pause between two polling rounds while acknowledgements are outstanding
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Why a barrier did not complete
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarrierError {
    #[error("{username} disconnected during a broadcast")]
    Disconnected { username: String },
    #[error("{username} rejected a broadcast with code {code}")]
    Rejected { username: String, code: u8 },
    #[error("{username} did not acknowledge within {timeout:?}")]
    TimedOut { username: String, timeout: Duration },
}

/// One addressee and the frames it must acknowledge
pub type Delivery<'a, T> = (&'a mut Connection<T>, Vec<ServerFrame>);

/// Delivers every frame and waits for all acknowledgements
///
/// The first disconnect, rejection or timeout aborts the whole barrier.
pub async fn deliver<T: Transport>(
    batch: Vec<Delivery<'_, T>>,
    timeout: Duration,
) -> Result<(), BarrierError> {
    run(batch, timeout, true).await
}

/// Delivers terminal frames, tolerating peers that are already gone
///
/// Every reachable addressee receives its frames even if another one fails.
pub async fn best_effort<T: Transport>(batch: Vec<Delivery<'_, T>>, timeout: Duration) {
    if let Err(e) = run(batch, timeout, false).await {
        debug!("Best-effort broadcast incomplete: {}", e);
    }
}

async fn run<T: Transport>(
    batch: Vec<Delivery<'_, T>>,
    timeout: Duration,
    strict: bool,
) -> Result<(), BarrierError> {
    let mut waiting: Vec<(&mut Connection<T>, usize)> = Vec::with_capacity(batch.len());
    let mut first_error = None;

    for (conn, frames) in batch {
        let mut delivered = true;
        for frame in &frames {
            debug_assert!(frame.expects_ack());
            if conn.send(&frame.to_string()).await.is_err() {
                delivered = false;
                break;
            }
        }

        if delivered {
            waiting.push((conn, frames.len()));
            continue;
        }
        let error = BarrierError::Disconnected {
            username: conn.username().to_string(),
        };
        if strict {
            return Err(error);
        }
        first_error.get_or_insert(error);
    }

    let deadline = Instant::now() + timeout;
    loop {
        let mut outstanding = false;

        for (conn, remaining) in waiting.iter_mut() {
            while *remaining > 0 {
                let failure = match conn.read_transport() {
                    Received::Frame(frame) => match decode_ack(&frame) {
                        Some(ACK_OK) => {
                            *remaining -= 1;
                            None
                        }
                        Some(code) => Some(BarrierError::Rejected {
                            username: conn.username().to_string(),
                            code,
                        }),
                        None => {
                            debug!("Deferring {} from {} until after the barrier", frame, conn.id);
                            conn.defer(frame);
                            None
                        }
                    },
                    Received::Pending => break,
                    Received::Closed => Some(BarrierError::Disconnected {
                        username: conn.username().to_string(),
                    }),
                };

                if let Some(error) = failure {
                    warn!("Barrier failure: {}", error);
                    if strict {
                        return Err(error);
                    }
                    *remaining = 0;
                    first_error.get_or_insert(error);
                }
            }

            if *remaining > 0 {
                outstanding = true;
            }
        }

        if !outstanding {
            return first_error.map_or(Ok(()), Err);
        }

        if Instant::now() >= deadline {
            let username = waiting
                .iter()
                .find(|(_, remaining)| *remaining > 0)
                .map(|(conn, _)| conn.username().to_string())
                .unwrap_or_default();
            let error = BarrierError::TimedOut { username, timeout };
            warn!("Barrier failure: {}", error);
            return Err(error);
        }

        tokio::time::sleep(ACK_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use arena_shared::{Board, Coord, GameResult};
    use std::net::SocketAddr;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn connection(id: u32, name: &str, mock: &MockTransport) -> Connection<MockTransport> {
        Connection::negotiated(id, test_addr(), mock.clone(), name, Board::new(20, 40))
    }

    fn board_frame() -> ServerFrame {
        ServerFrame::SharedScreenSize(Board::new(20, 40))
    }

    #[tokio::test]
    async fn test_all_acknowledged() {
        let (a, b) = (MockTransport::acking(), MockTransport::acking());
        let mut ca = connection(1, "alice", &a);
        let mut cb = connection(2, "bob", &b);

        let target = ServerFrame::TargetCoord(Coord::new(5, 5));
        let batch = vec![
            (&mut ca, vec![board_frame(), target.clone()]),
            (&mut cb, vec![board_frame()]),
        ];
        assert_eq!(deliver(batch, TIMEOUT).await, Ok(()));

        assert_eq!(a.sent(), vec!["shared_screen_size:20x40", "target_coord:5,5"]);
        assert_eq!(b.sent(), vec!["shared_screen_size:20x40"]);
        assert_eq!(ca.next_inbound(), Received::Pending);
    }

    #[tokio::test]
    async fn test_other_frames_are_deferred() {
        let mock = MockTransport::silent();
        mock.push_frame("my_move:up");
        mock.push_frame("0");
        let mut conn = connection(1, "alice", &mock);

        assert_eq!(deliver(vec![(&mut conn, vec![board_frame()])], TIMEOUT).await, Ok(()));
        assert_eq!(conn.next_inbound(), Received::Frame("my_move:up".to_string()));
    }

    #[tokio::test]
    async fn test_rejection_aborts() {
        let mock = MockTransport::silent();
        mock.set_ack_code(Some(2));
        let mut conn = connection(1, "alice", &mock);

        let result = deliver(vec![(&mut conn, vec![board_frame()])], TIMEOUT).await;
        assert_eq!(
            result,
            Err(BarrierError::Rejected {
                username: "alice".to_string(),
                code: 2
            })
        );
    }

    #[tokio::test]
    async fn test_disconnect_aborts() {
        let good = MockTransport::acking();
        let gone = MockTransport::silent();
        gone.push_close();
        let mut cg = connection(1, "alice", &good);
        let mut cx = connection(2, "bob", &gone);

        let batch = vec![(&mut cg, vec![board_frame()]), (&mut cx, vec![board_frame()])];
        let result = deliver(batch, TIMEOUT).await;
        assert_eq!(
            result,
            Err(BarrierError::Disconnected {
                username: "bob".to_string()
            })
        );
        assert!(cx.is_closed());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let mock = MockTransport::silent();
        let mut conn = connection(1, "alice", &mock);

        let started = Instant::now();
        let result = deliver(vec![(&mut conn, vec![board_frame()])], TIMEOUT).await;
        assert!(matches!(result, Err(BarrierError::TimedOut { .. })));
        assert!(started.elapsed() >= TIMEOUT);
    }

    #[tokio::test]
    async fn test_best_effort_reaches_survivors() {
        let broken = MockTransport::silent();
        broken.fail_sends();
        let alive = MockTransport::acking();
        let mut cb = connection(1, "alice", &broken);
        let mut ca = connection(2, "bob", &alive);

        let result = ServerFrame::Result(GameResult::Win);
        let batch = vec![(&mut cb, vec![result.clone()]), (&mut ca, vec![result])];
        best_effort(batch, TIMEOUT).await;

        assert!(cb.is_closed());
        assert_eq!(alive.sent(), vec!["result:win"]);
        assert_eq!(ca.next_inbound(), Received::Pending);
    }
}
