//! In-memory [`Connection`] for tests.
//!
//! [`mock_connection`] returns a connected pair: the [`MockConnection`] goes
//! to the router, the [`MockPeer`] stays with the test to read what the
//! router sent, push inbound messages, and inject transport failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use courier_core::{Connection, Message, TransportError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Inbound = Result<Message, TransportError>;

/// Counters shared by both ends of a mock connection.
#[derive(Clone, Debug, Default)]
pub struct ConnectionStats {
    connects: Arc<AtomicUsize>,
    disposes: Arc<AtomicUsize>,
}

impl ConnectionStats {
    /// How many times `connect` was called.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// How many times `dispose` was called.
    pub fn disposes(&self) -> usize {
        self.disposes.load(Ordering::SeqCst)
    }
}

/// Router side of the pair.
pub struct MockConnection {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    connect_error: Arc<Mutex<Option<TransportError>>>,
    stats: ConnectionStats,
}

/// Test side of the pair.
pub struct MockPeer {
    sent: mpsc::UnboundedReceiver<Message>,
    inbound: mpsc::UnboundedSender<Inbound>,
    connect_error: Arc<Mutex<Option<TransportError>>>,
    stats: ConnectionStats,
}

/// Create a connected mock pair.
pub fn mock_connection() -> (MockConnection, MockPeer) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let connect_error = Arc::new(Mutex::new(None));
    let stats = ConnectionStats::default();
    (
        MockConnection {
            outbound: outbound_tx,
            inbound: tokio::sync::Mutex::new(inbound_rx),
            connect_error: Arc::clone(&connect_error),
            stats: stats.clone(),
        },
        MockPeer {
            sent: outbound_rx,
            inbound: inbound_tx,
            connect_error,
            stats,
        },
    )
}

#[async_trait]
impl Connection for MockConnection {
    async fn connect(&self, _cancel: &CancellationToken) -> Result<(), TransportError> {
        let _ = self.stats.connects.fetch_add(1, Ordering::SeqCst);
        match self.connect_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn send(
        &self,
        message: Message,
        _cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        self.outbound
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Message, TransportError> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            next = inbound.recv() => next.unwrap_or(Err(TransportError::Closed)),
        }
    }

    async fn dispose(&self) -> Result<(), TransportError> {
        let _ = self.stats.disposes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl MockPeer {
    /// Next message the router sent. `None` once the router side is gone.
    pub async fn next_sent(&mut self) -> Option<Message> {
        self.sent.recv().await
    }

    /// Next sent message, if one is already queued.
    pub fn try_next_sent(&mut self) -> Option<Message> {
        self.sent.try_recv().ok()
    }

    /// Deliver a message to the router.
    pub fn push(&self, message: Message) {
        let _ = self.inbound.send(Ok(message));
    }

    /// Make the router's next `receive` fail.
    pub fn fail(&self, error: TransportError) {
        let _ = self.inbound.send(Err(error));
    }

    /// Close the connection gracefully from the peer side.
    pub fn close(&self) {
        self.fail(TransportError::Closed);
    }

    /// Make the next `connect` fail.
    pub fn fail_next_connect(&self, error: TransportError) {
        *self.connect_error.lock() = Some(error);
    }

    /// Shared call counters.
    pub fn stats(&self) -> ConnectionStats {
        self.stats.clone()
    }

    /// Split into the outbound receiver and an inbound sender, for driving
    /// the peer from a background task.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<Message>, MockPeerSender) {
        (
            self.sent,
            MockPeerSender {
                inbound: self.inbound,
            },
        )
    }
}

/// Cloneable inbound half of a [`MockPeer`].
#[derive(Clone)]
pub struct MockPeerSender {
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl MockPeerSender {
    /// Deliver a message to the router.
    pub fn push(&self, message: Message) {
        let _ = self.inbound.send(Ok(message));
    }

    /// Make the router's next `receive` fail.
    pub fn fail(&self, error: TransportError) {
        let _ = self.inbound.send(Err(error));
    }
}
