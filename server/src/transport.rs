//! Non-blocking frame transport between the server loop and one peer

use arena_shared::{encode_frame, FrameBuffer};
use log::warn;
use std::future::Future;
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Outcome of one non-blocking receive attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A complete frame, terminator stripped
    Frame(String),
    /// Nothing available right now
    Pending,
    /// The peer closed the connection or the stream is unusable
    Closed,
}

/// One peer's frame stream as seen by the server loop
///
/// `try_recv` must never wait: a read that would block reports
/// [`Received::Pending`] so the loop can move on to the next peer.
pub trait Transport {
    fn try_recv(&mut self) -> Received;

    fn send(&mut self, frame: &str) -> impl Future<Output = io::Result<()>> + Send;
}

/// TCP transport used by the real server
pub struct TcpTransport {
    stream: TcpStream,
    frames: FrameBuffer,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        Self {
            stream,
            frames: FrameBuffer::new(),
        }
    }
}

impl Transport for TcpTransport {
    fn try_recv(&mut self) -> Received {
        let mut buffer = [0u8; 1024];

        loop {
            match self.frames.next_frame() {
                Some(Ok(frame)) => return Received::Frame(frame),
                Some(Err(e)) => {
                    warn!("Dropping peer after framing error: {}", e);
                    return Received::Closed;
                }
                None => {}
            }

            match self.stream.try_read(&mut buffer) {
                Ok(0) => return Received::Closed,
                Ok(len) => self.frames.extend(&buffer[..len]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Received::Pending,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Error reading from peer: {}", e);
                    return Received::Closed;
                }
            }
        }
    }

    async fn send(&mut self, frame: &str) -> io::Result<()> {
        let bytes = encode_frame(frame);
        self.stream.write_all(&bytes).await?;
        Ok(())
    }
}

/// Scripted in-memory transport for driving the server logic in tests
#[cfg(test)]
pub mod mock {
    use super::*;
    use arena_shared::protocol::expects_ack;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct MockState {
        inbound: VecDeque<Received>,
        sent: Vec<String>,
        ack_code: Option<u8>,
        fail_sends: bool,
        stall_sends: bool,
    }

    /// Cloneable handle; the test keeps one clone to script input and
    /// inspect output after the server logic has taken ownership of another
    #[derive(Debug, Clone, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        /// A peer that answers every acknowledged broadcast with `0`
        pub fn acking() -> Self {
            let mock = Self::default();
            mock.set_ack_code(Some(0));
            mock
        }

        /// A peer that never acknowledges anything on its own
        pub fn silent() -> Self {
            Self::default()
        }

        pub fn set_ack_code(&self, code: Option<u8>) {
            self.state.lock().unwrap().ack_code = code;
        }

        pub fn fail_sends(&self) {
            self.state.lock().unwrap().fail_sends = true;
        }

        /// A peer that stopped reading: every send waits forever
        pub fn stall_sends(&self) {
            self.state.lock().unwrap().stall_sends = true;
        }

        pub fn push_frame(&self, frame: &str) {
            self.state
                .lock()
                .unwrap()
                .inbound
                .push_back(Received::Frame(frame.to_string()));
        }

        pub fn push_close(&self) {
            self.state.lock().unwrap().inbound.push_back(Received::Closed);
        }

        pub fn sent(&self) -> Vec<String> {
            self.state.lock().unwrap().sent.clone()
        }

        pub fn take_sent(&self) -> Vec<String> {
            std::mem::take(&mut self.state.lock().unwrap().sent)
        }
    }

    impl Transport for MockTransport {
        fn try_recv(&mut self) -> Received {
            let mut state = self.state.lock().unwrap();
            match state.inbound.front() {
                // a close is sticky, like EOF on a real socket
                Some(Received::Closed) => Received::Closed,
                Some(_) => state.inbound.pop_front().unwrap_or(Received::Pending),
                None => Received::Pending,
            }
        }

        fn send(&mut self, frame: &str) -> impl Future<Output = io::Result<()>> + Send {
            let mut state = self.state.lock().unwrap();
            let stalled = state.stall_sends;
            let result = if stalled {
                Ok(())
            } else if state.fail_sends {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock send failure"))
            } else {
                state.sent.push(frame.to_string());
                if let Some(code) = state.ack_code {
                    if expects_ack(frame) {
                        state.inbound.push_back(Received::Frame(code.to_string()));
                    }
                }
                Ok(())
            };
            drop(state);

            async move {
                if stalled {
                    std::future::pending::<()>().await;
                }
                result
            }
        }
    }
}
