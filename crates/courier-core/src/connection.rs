//! The transport seam.
//!
//! A [`Connection`] moves already-framed [`Message`]s between a router and its
//! peer. WebSocket and in-process transports live outside this workspace and
//! implement this trait; the router only ever talks to `Arc<dyn Connection>`.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::TransportError;
use crate::protocol::Message;

/// Bidirectional message transport.
///
/// The router calls `send` only from its send loop and `receive` only from
/// its receive loop, so implementations see at most one concurrent caller of
/// each. Both may be in flight at the same time.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Open the transport.
    async fn connect(&self, cancel: &CancellationToken) -> Result<(), TransportError>;

    /// Send one message.
    async fn send(&self, message: Message, cancel: &CancellationToken)
    -> Result<(), TransportError>;

    /// Wait for the next inbound message.
    ///
    /// Returns [`TransportError::Closed`] once the peer has closed the
    /// connection gracefully.
    async fn receive(&self, cancel: &CancellationToken) -> Result<Message, TransportError>;

    /// Release the transport. Called exactly once by the router's close
    /// sequence.
    async fn dispose(&self) -> Result<(), TransportError>;
}
