//! Channel abstraction between peers.
//!
//! A channel carries [`Envelope`]s in both directions. The session only
//! needs `send`; the serve loop drives `recv`.
//!
//! # Implementations
//!
//! - [`MpscChannel`] - tokio mpsc pair for peers in the same process
//! - [`MockChannel`] - captures sent envelopes for assertions

use crate::error::ChannelError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use sync_types::{Envelope, Message};
use tokio::sync::{mpsc, Mutex};

/// Bidirectional envelope transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Push an envelope to the remote peer.
    async fn send(&self, envelope: Envelope) -> Result<(), ChannelError>;

    /// Wait for the next inbound envelope.
    ///
    /// Returns [`ChannelError::Closed`] once the remote end is gone.
    async fn recv(&self) -> Result<Envelope, ChannelError>;
}

/// One end of an in-process channel.
#[derive(Debug)]
pub struct MpscChannel {
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<mpsc::Receiver<Envelope>>,
}

impl MpscChannel {
    /// Create two connected ends, each buffering `buffer` envelopes.
    pub fn pair(buffer: usize) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(buffer.max(1));
        let (b_tx, b_rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
        )
    }
}

#[async_trait]
impl Channel for MpscChannel {
    async fn send(&self, envelope: Envelope) -> Result<(), ChannelError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    async fn recv(&self) -> Result<Envelope, ChannelError> {
        self.rx.lock().await.recv().await.ok_or(ChannelError::Closed)
    }
}

/// Mock channel for testing.
///
/// Records everything sent and replays queued envelopes on `recv`.
#[derive(Debug, Default, Clone)]
pub struct MockChannel {
    inner: Arc<StdMutex<MockChannelInner>>,
}

#[derive(Debug, Default)]
struct MockChannelInner {
    sent: Vec<Envelope>,
    receive_queue: VecDeque<Envelope>,
    fail_next_send: Option<String>,
}

impl MockChannel {
    /// Create a new mock channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an envelope to be returned by the next `recv()` call.
    pub fn queue(&self, envelope: Envelope) {
        let mut inner = self.inner.lock().unwrap();
        inner.receive_queue.push_back(envelope);
    }

    /// All envelopes sent so far.
    pub fn sent(&self) -> Vec<Envelope> {
        let inner = self.inner.lock().unwrap();
        inner.sent.clone()
    }

    /// Sent envelopes decoded; undecodable ones are skipped.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent()
            .iter()
            .filter_map(|envelope| envelope.open().ok())
            .collect()
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn send(&self, envelope: Envelope) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_send.take() {
            return Err(ChannelError::SendFailed(error));
        }

        inner.sent.push(envelope);
        Ok(())
    }

    async fn recv(&self) -> Result<Envelope, ChannelError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .receive_queue
            .pop_front()
            .ok_or(ChannelError::Closed)
    }
}
