//! Router lifecycle events for observers.
//!
//! Events are broadcast on a bounded channel obtained from
//! [`MessageRouter::events`](crate::MessageRouter::events). Emission never
//! blocks; slow receivers observe `RecvError::Lagged` instead of slowing the
//! router down.

use courier_core::{MessageRouterError, MessageType};
use tokio::sync::broadcast;

/// Something the router did.
#[derive(Clone, Debug)]
pub enum RouterEvent {
    /// A connection attempt started.
    ConnectStart,
    /// A connection attempt finished.
    ConnectStop {
        /// Failure, if the attempt did not succeed.
        error: Option<MessageRouterError>,
    },
    /// A message was handed to the transport.
    MessageSent {
        /// Message kind.
        kind: MessageType,
        /// Correlation key, if the message has one.
        request_id: Option<String>,
    },
    /// A message arrived from the transport.
    MessageReceived {
        /// Message kind.
        kind: MessageType,
        /// Correlation key, if the message has one.
        request_id: Option<String>,
    },
    /// An outbound invocation started.
    InvokeStart {
        /// Target endpoint.
        endpoint: String,
        /// Correlation key.
        request_id: String,
    },
    /// An outbound invocation finished.
    InvokeStop {
        /// Target endpoint.
        endpoint: String,
        /// Correlation key.
        request_id: String,
        /// Failure, if the call did not succeed.
        error: Option<MessageRouterError>,
    },
    /// A topic message was fanned out.
    TopicDispatched {
        /// Topic name.
        topic: String,
        /// Number of subscriptions that queued the message.
        subscribers: usize,
    },
    /// The close sequence started.
    CloseStart,
    /// The close sequence finished.
    CloseStop {
        /// Cause of an abnormal close.
        error: Option<MessageRouterError>,
    },
}

pub(crate) struct Diagnostics {
    tx: broadcast::Sender<RouterEvent>,
}

impl Diagnostics {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: RouterEvent) {
        if self.tx.receiver_count() > 0 {
            let _ = self.tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn emit_without_receivers_is_noop() {
        let diagnostics = Diagnostics::new(4);
        diagnostics.emit(RouterEvent::CloseStart);
    }

    #[tokio::test]
    async fn receivers_see_events_in_order() {
        let diagnostics = Diagnostics::new(4);
        let mut rx = diagnostics.subscribe();
        diagnostics.emit(RouterEvent::ConnectStart);
        diagnostics.emit(RouterEvent::ConnectStop { error: None });

        assert_matches!(rx.recv().await, Ok(RouterEvent::ConnectStart));
        assert_matches!(rx.recv().await, Ok(RouterEvent::ConnectStop { error: None }));
    }

    #[tokio::test]
    async fn slow_receiver_lags() {
        let diagnostics = Diagnostics::new(1);
        let mut rx = diagnostics.subscribe();
        diagnostics.emit(RouterEvent::CloseStart);
        diagnostics.emit(RouterEvent::CloseStop { error: None });

        assert_matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(1)));
    }
}
