//! Loopback peer for integration tests.
//!
//! Plays the broker for a single client over a mock connection: acknowledges
//! control requests, routes publishes back to the client when it subscribed,
//! and routes invocations back when the endpoint is a registered service or
//! the call is scoped to the client.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_client::mock::{ConnectionStats, MockPeer, MockPeerSender, mock_connection};
use courier_client::{
    ErrorInfo, MessageRouter, MessageRouterError, RouterOptions, Subscriber, TopicMessage,
};
use courier_core::{Message, TransportError};
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub const CLIENT_ID: &str = "loopback-client";
pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, Default)]
pub struct LoopbackConfig {
    /// Token the client must present; `None` accepts any.
    pub access_token: Option<String>,
    /// Topics whose subscribe requests are refused.
    pub rejected_topics: Vec<String>,
}

#[derive(Default)]
struct LoopbackState {
    subscribed: HashSet<String>,
    services: HashSet<String>,
    subscribe_messages: usize,
    unsubscribe_messages: usize,
}

/// Handle to a running loopback peer.
#[derive(Clone)]
pub struct Loopback {
    state: Arc<Mutex<LoopbackState>>,
    stats: ConnectionStats,
    inbound: MockPeerSender,
}

impl Loopback {
    pub fn spawn(peer: MockPeer, config: LoopbackConfig) -> Self {
        let stats = peer.stats();
        let (sent, inbound) = peer.into_parts();
        let state = Arc::new(Mutex::new(LoopbackState::default()));
        drop(tokio::spawn(serve(sent, inbound.clone(), Arc::clone(&state), config)));
        Self {
            state,
            stats,
            inbound,
        }
    }

    pub fn subscribe_messages(&self) -> usize {
        self.state.lock().subscribe_messages
    }

    pub fn unsubscribe_messages(&self) -> usize {
        self.state.lock().unsubscribe_messages
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.state.lock().subscribed.contains(topic)
    }

    pub fn has_service(&self, endpoint: &str) -> bool {
        self.state.lock().services.contains(endpoint)
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats.clone()
    }

    /// Break the connection with a transport error.
    pub fn abort(&self) {
        self.inbound
            .fail(TransportError::Other("connection reset".into()));
    }

    /// Close the connection gracefully from the peer side.
    pub fn hang_up(&self) {
        self.inbound.fail(TransportError::Closed);
    }
}

async fn serve(
    mut sent: mpsc::UnboundedReceiver<Message>,
    out: MockPeerSender,
    state: Arc<Mutex<LoopbackState>>,
    config: LoopbackConfig,
) {
    while let Some(message) = sent.recv().await {
        match message {
            Message::Connect { access_token } => {
                let reply = match &config.access_token {
                    Some(expected) if access_token.as_ref() != Some(expected) => {
                        Message::ConnectResponse {
                            client_id: None,
                            error: Some(ErrorInfo::new("InvalidAccessToken", "access token rejected")),
                        }
                    }
                    _ => Message::ConnectResponse {
                        client_id: Some(CLIENT_ID.into()),
                        error: None,
                    },
                };
                out.push(reply);
            }
            Message::Subscribe { request_id, topic } => {
                let error = {
                    let mut state = state.lock();
                    state.subscribe_messages += 1;
                    if config.rejected_topics.contains(&topic) {
                        Some(ErrorInfo::new("Forbidden", format!("cannot subscribe to {topic}")))
                    } else {
                        let _ = state.subscribed.insert(topic);
                        None
                    }
                };
                out.push(Message::SubscribeResponse { request_id, error });
            }
            Message::Unsubscribe { request_id, topic } => {
                {
                    let mut state = state.lock();
                    state.unsubscribe_messages += 1;
                    let _ = state.subscribed.remove(&topic);
                }
                out.push(Message::UnsubscribeResponse {
                    request_id,
                    error: None,
                });
            }
            Message::Publish {
                request_id,
                topic,
                payload,
                scope,
                correlation_id,
            } => {
                let reaches_client = scope.is_default() || scope.client_id() == Some(CLIENT_ID);
                if reaches_client && state.lock().subscribed.contains(&topic) {
                    out.push(Message::Topic {
                        topic,
                        payload,
                        source_id: Some(CLIENT_ID.into()),
                        scope,
                        correlation_id,
                    });
                }
                out.push(Message::PublishResponse {
                    request_id,
                    error: None,
                });
            }
            Message::RegisterService {
                request_id,
                endpoint,
                ..
            } => {
                let error = if state.lock().services.insert(endpoint.clone()) {
                    None
                } else {
                    Some(ErrorInfo::new(
                        "DuplicateEndpoint",
                        format!("Duplicate endpoint registration: '{endpoint}'"),
                    ))
                };
                out.push(Message::RegisterServiceResponse { request_id, error });
            }
            Message::UnregisterService {
                request_id,
                endpoint,
            } => {
                let _ = state.lock().services.remove(&endpoint);
                out.push(Message::UnregisterServiceResponse {
                    request_id,
                    error: None,
                });
            }
            Message::Invoke {
                request_id,
                endpoint,
                payload,
                scope,
                correlation_id,
                ..
            } => {
                let routable = state.lock().services.contains(&endpoint)
                    || scope.client_id() == Some(CLIENT_ID);
                if routable {
                    out.push(Message::Invoke {
                        request_id,
                        endpoint,
                        payload,
                        scope,
                        source_id: Some(CLIENT_ID.into()),
                        correlation_id,
                    });
                } else {
                    out.push(Message::InvokeResponse {
                        request_id,
                        payload: None,
                        error: Some(ErrorInfo::from(&MessageRouterError::unknown_endpoint(
                            &endpoint,
                        ))),
                    });
                }
            }
            response @ Message::InvokeResponse { .. } => out.push(response),
            _ => {}
        }
    }
}

/// A router wired to a fresh loopback peer.
pub fn loopback_router(config: LoopbackConfig, options: RouterOptions) -> (MessageRouter, Loopback) {
    let (connection, peer) = mock_connection();
    let loopback = Loopback::spawn(peer, config);
    (MessageRouter::new(Arc::new(connection), options), loopback)
}

pub fn default_router() -> (MessageRouter, Loopback) {
    loopback_router(LoopbackConfig::default(), RouterOptions::default())
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording subscriber
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum Seen {
    Next(String),
    Error(String),
    Completed,
}

/// Forwards every callback to a channel the test reads from.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Seen>,
}

#[async_trait]
impl Subscriber for Recorder {
    async fn on_next(&self, message: TopicMessage) -> anyhow::Result<()> {
        let text = message
            .payload
            .map(|p| p.as_str().to_owned())
            .unwrap_or_default();
        let _ = self.tx.send(Seen::Next(text));
        Ok(())
    }

    async fn on_error(&self, error: MessageRouterError) {
        let _ = self.tx.send(Seen::Error(error.name().as_str().to_owned()));
    }

    async fn on_completed(&self) {
        let _ = self.tx.send(Seen::Completed);
    }
}

pub fn recorder() -> (Recorder, mpsc::UnboundedReceiver<Seen>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Recorder { tx }, rx)
}

/// Next recorded callback, failing the test after [`WAIT`].
pub async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for subscriber callback")
        .expect("subscriber dropped")
}

/// Assert that nothing more arrives within a short grace period.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Seen>) {
    let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(matches!(extra, Err(_) | Ok(None)), "unexpected callback: {extra:?}");
}
