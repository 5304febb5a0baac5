//! The message router.
//!
//! ## Lifecycle
//!
//! `NotConnected → Connecting → Connected → Closing → Closed`
//!
//! - Connecting is started by the first operation that needs the peer (or an
//!   explicit [`MessageRouter::connect`]). Concurrent callers wait on the same
//!   attempt.
//! - A transport failure in either loop closes the whole router. Every pending
//!   request and every subscription is failed with the close error.
//! - `Closed` is terminal.
//!
//! ## Tasks
//!
//! The router runs one send loop draining an unbounded queue into the
//! transport and one receive loop demultiplexing inbound messages. The
//! receive loop never awaits application code: topic messages are queued per
//! subscription and invocations run on their own task.
//!
//! The state mutex is only held for reads and writes of the state itself,
//! never across an await.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use courier_core::ids::generate_request_id;
use courier_core::validation::{validate_endpoint, validate_topic};
use courier_core::{
    Connection, EndpointDescriptor, ErrorInfo, ErrorName, Message, MessageBuffer,
    MessageRouterError, TransportError,
};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::diagnostics::{Diagnostics, RouterEvent};
use crate::endpoints::EndpointRegistry;
use crate::handler::{MessageContext, MessageHandler, Subscriber, TopicMessage};
use crate::options::{InvokeOptions, PublishOptions, RouterOptions};
use crate::pending::{PendingGuard, PendingRequests};
use crate::subscription::{Subscription, SubscriptionCore};
use crate::topic::{Topic, TopicRegistry};

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Connection state of a router.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt has been made.
    NotConnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The peer accepted the connection.
    Connected,
    /// The close sequence is running.
    Closing,
    /// The router is closed for good.
    Closed,
}

struct StateInner {
    state: ConnectionState,
    client_id: Option<String>,
}

#[derive(Clone)]
enum ConnectOutcome {
    Pending,
    Connected,
    Failed(MessageRouterError),
}

impl ConnectOutcome {
    fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

struct RouterInner {
    connection: Arc<dyn Connection>,
    options: RouterOptions,
    state: Mutex<StateInner>,
    connect_outcome: watch::Sender<ConnectOutcome>,
    connect_response: Mutex<Option<oneshot::Sender<Message>>>,
    send_tx: mpsc::UnboundedSender<Message>,
    send_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    pending: PendingRequests,
    topics: TopicRegistry,
    endpoints: EndpointRegistry,
    close_token: CancellationToken,
    close_error: Mutex<Option<MessageRouterError>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    closed: watch::Sender<bool>,
    diagnostics: Diagnostics,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public handle
// ─────────────────────────────────────────────────────────────────────────────

/// Client-side message router.
///
/// Cheap to clone; clones share one connection. Call [`close`](Self::close)
/// when done: the background loops keep the router alive until then.
#[derive(Clone)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MessageRouter")
            .field("state", &state.state)
            .field("client_id", &state.client_id)
            .finish_non_exhaustive()
    }
}

impl MessageRouter {
    /// Create a router over `connection`. Nothing is sent until the first
    /// operation that needs the peer.
    pub fn new(connection: Arc<dyn Connection>, options: RouterOptions) -> Self {
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let (connect_outcome, _) = watch::channel(ConnectOutcome::Pending);
        let (closed, _) = watch::channel(false);
        let diagnostics = Diagnostics::new(options.event_capacity.max(1));
        Self {
            inner: Arc::new(RouterInner {
                connection,
                options,
                state: Mutex::new(StateInner {
                    state: ConnectionState::NotConnected,
                    client_id: None,
                }),
                connect_outcome,
                connect_response: Mutex::new(None),
                send_tx,
                send_rx: Mutex::new(Some(send_rx)),
                pending: PendingRequests::new(),
                topics: TopicRegistry::new(),
                endpoints: EndpointRegistry::new(),
                close_token: CancellationToken::new(),
                close_error: Mutex::new(None),
                loops: Mutex::new(Vec::new()),
                closed,
                diagnostics,
            }),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().state
    }

    /// Client ID assigned by the peer, while connected.
    pub fn client_id(&self) -> Option<String> {
        self.inner.state.lock().client_id.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<RouterEvent> {
        self.inner.diagnostics.subscribe()
    }

    /// Names of the endpoints registered on this client, sorted.
    pub fn registered_endpoints(&self) -> Vec<String> {
        self.inner.endpoints.names()
    }

    /// Descriptor an endpoint was registered with.
    pub fn endpoint_descriptor(&self, endpoint: &str) -> Option<EndpointDescriptor> {
        self.inner.endpoints.descriptor(endpoint)
    }

    // ── Connection ──────────────────────────────────────────────────────────

    /// Connect to the peer, or wait for the attempt already in progress.
    pub async fn connect(&self) -> Result<(), MessageRouterError> {
        self.connect_with_cancel(&CancellationToken::new()).await
    }

    /// Like [`connect`](Self::connect). If this call starts the attempt,
    /// cancelling `cancel` fails the attempt and closes the router; otherwise
    /// it only stops this caller from waiting.
    pub async fn connect_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), MessageRouterError> {
        self.connect_core(cancel.clone(), Some(cancel)).await
    }

    async fn ensure_connected(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), MessageRouterError> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        // an auto-connect outlives any single caller's cancellation
        self.connect_core(CancellationToken::new(), cancel).await
    }

    async fn connect_core(
        &self,
        attempt_cancel: CancellationToken,
        wait_cancel: Option<&CancellationToken>,
    ) -> Result<(), MessageRouterError> {
        let initiate = {
            let mut state = self.inner.state.lock();
            match state.state {
                ConnectionState::NotConnected => {
                    state.state = ConnectionState::Connecting;
                    true
                }
                ConnectionState::Connecting => false,
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closing | ConnectionState::Closed => {
                    drop(state);
                    return Err(self.inner.connect_failure());
                }
            }
        };

        if initiate {
            // runs detached so that dropping the caller cannot strand the
            // state in Connecting
            drop(tokio::spawn(
                Arc::clone(&self.inner).run_connect(attempt_cancel),
            ));
        }

        let outcome = tokio::select! {
            outcome = settled_outcome(self.inner.connect_outcome.subscribe()) => outcome,
            () = cancelled(wait_cancel) => return Err(MessageRouterError::cancelled()),
        };
        match outcome {
            ConnectOutcome::Connected => Ok(()),
            ConnectOutcome::Failed(error) => Err(error),
            ConnectOutcome::Pending => Err(MessageRouterError::connection_closed()),
        }
    }

    /// Close the router.
    ///
    /// Fails every pending request and subscription with `ConnectionClosed`,
    /// stops the loops, and disposes the connection. Idempotent: later and
    /// concurrent calls wait for the same close to finish.
    pub async fn close(&self) {
        self.inner.close_core(None).await;
    }

    // ── Publish / subscribe ─────────────────────────────────────────────────

    /// Publish a payload to a topic and wait for the peer's acknowledgement.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Option<MessageBuffer>,
        options: PublishOptions,
    ) -> Result<(), MessageRouterError> {
        validate_topic(topic)?;
        self.inner.check_state()?;
        self.ensure_connected(None).await?;

        let message = Message::Publish {
            request_id: generate_request_id(),
            topic: topic.to_owned(),
            payload,
            scope: options.scope,
            correlation_id: options.correlation_id,
        };
        let _ = self.inner.send_request(message, None).await?;
        Ok(())
    }

    /// Subscribe to a topic.
    ///
    /// The first local subscriber of a topic subscribes on the wire and waits
    /// for the acknowledgement; if the peer refuses, the local subscription
    /// is rolled back and the error returned.
    pub async fn subscribe(
        &self,
        topic: &str,
        subscriber: impl Subscriber,
    ) -> Result<Subscription, MessageRouterError> {
        self.subscribe_arc(topic, Arc::new(subscriber)).await
    }

    pub(crate) async fn subscribe_arc(
        &self,
        topic: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<Subscription, MessageRouterError> {
        validate_topic(topic)?;
        self.inner.check_state()?;
        self.ensure_connected(None).await?;

        let entry = self.inner.topics.get_or_create(topic);
        let core = SubscriptionCore::spawn(topic.to_owned(), subscriber);
        let needs_subscription = match entry.subscribe(Arc::clone(&core)) {
            Ok(first) => first,
            Err(error) => {
                core.detach();
                return Err(error);
            }
        };
        let subscription = Subscription::new(self.clone(), entry, core);

        if needs_subscription {
            let message = Message::Subscribe {
                request_id: generate_request_id(),
                topic: topic.to_owned(),
            };
            if let Err(error) = self.inner.send_request(message, None).await {
                subscription.discard();
                return Err(error);
            }
            debug!(topic, "Subscribed");
        }
        Ok(subscription)
    }

    /// Tell the peer to stop sending a topic, if no subscriber is left.
    pub(crate) async fn try_unsubscribe(&self, topic: &Topic) {
        if !topic.can_unsubscribe() || self.inner.check_state().is_err() {
            return;
        }
        let message = Message::Unsubscribe {
            request_id: generate_request_id(),
            topic: topic.name().to_owned(),
        };
        match self.inner.send_request(message, None).await {
            Ok(_) => debug!(topic = topic.name(), "Unsubscribed"),
            Err(error) => {
                error!(topic = topic.name(), error = %error, "Failed to unsubscribe");
            }
        }
    }

    // ── Invoke ──────────────────────────────────────────────────────────────

    /// Invoke an endpoint and wait for its response payload.
    pub async fn invoke(
        &self,
        endpoint: &str,
        payload: Option<MessageBuffer>,
        options: InvokeOptions,
    ) -> Result<Option<MessageBuffer>, MessageRouterError> {
        validate_endpoint(endpoint)?;
        self.inner.check_state()?;
        let cancel = options.cancellation.as_ref();
        self.ensure_connected(cancel).await?;

        let request_id = generate_request_id();
        self.inner.diagnostics.emit(RouterEvent::InvokeStart {
            endpoint: endpoint.to_owned(),
            request_id: request_id.clone(),
        });
        let message = Message::Invoke {
            request_id: request_id.clone(),
            endpoint: endpoint.to_owned(),
            payload,
            scope: options.scope.clone(),
            source_id: self.client_id(),
            correlation_id: options.correlation_id.clone(),
        };
        let result = match self.inner.send_request(message, cancel).await {
            Ok(Message::InvokeResponse { payload, .. }) => Ok(payload),
            Ok(other) => Err(unexpected_response(&other)),
            Err(error) => Err(error),
        };
        self.inner.diagnostics.emit(RouterEvent::InvokeStop {
            endpoint: endpoint.to_owned(),
            request_id,
            error: result.as_ref().err().cloned(),
        });
        result
    }

    // ── Endpoints ───────────────────────────────────────────────────────────

    /// Register a handler and announce it to the peer as a discoverable
    /// service. The local registration is rolled back if the announcement
    /// fails.
    pub async fn register_service(
        &self,
        endpoint: &str,
        handler: impl MessageHandler,
        descriptor: Option<EndpointDescriptor>,
    ) -> Result<(), MessageRouterError> {
        validate_endpoint(endpoint)?;
        self.inner.check_state()?;
        self.inner
            .endpoints
            .try_add(endpoint, Arc::new(handler), descriptor.clone())?;

        if let Err(error) = self.announce_service(endpoint, descriptor).await {
            let _ = self.inner.endpoints.remove(endpoint);
            return Err(error);
        }
        debug!(endpoint, "Service registered");
        Ok(())
    }

    async fn announce_service(
        &self,
        endpoint: &str,
        descriptor: Option<EndpointDescriptor>,
    ) -> Result<(), MessageRouterError> {
        self.ensure_connected(None).await?;
        let message = Message::RegisterService {
            request_id: generate_request_id(),
            endpoint: endpoint.to_owned(),
            descriptor,
        };
        let _ = self.inner.send_request(message, None).await?;
        Ok(())
    }

    /// Register a handler reachable only through an explicit client scope.
    /// Nothing is announced to the peer.
    pub async fn register_endpoint(
        &self,
        endpoint: &str,
        handler: impl MessageHandler,
        descriptor: Option<EndpointDescriptor>,
    ) -> Result<(), MessageRouterError> {
        validate_endpoint(endpoint)?;
        self.inner.check_state()?;
        self.inner
            .endpoints
            .try_add(endpoint, Arc::new(handler), descriptor)?;

        if let Err(error) = self.ensure_connected(None).await {
            let _ = self.inner.endpoints.remove(endpoint);
            return Err(error);
        }
        debug!(endpoint, "Endpoint registered");
        Ok(())
    }

    /// Remove a service and withdraw its announcement. No-op if the service
    /// is not registered.
    pub async fn unregister_service(&self, endpoint: &str) -> Result<(), MessageRouterError> {
        if !self.inner.endpoints.remove(endpoint) {
            return Ok(());
        }
        self.inner.check_state()?;
        let message = Message::UnregisterService {
            request_id: generate_request_id(),
            endpoint: endpoint.to_owned(),
        };
        let _ = self.inner.send_request(message, None).await?;
        debug!(endpoint, "Service unregistered");
        Ok(())
    }

    /// Remove a local endpoint. Returns `false` if it was not registered.
    pub fn unregister_endpoint(&self, endpoint: &str) -> bool {
        self.inner.endpoints.remove(endpoint)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internals
// ─────────────────────────────────────────────────────────────────────────────

impl RouterInner {
    fn check_state(&self) -> Result<(), MessageRouterError> {
        match self.state.lock().state {
            ConnectionState::Closing | ConnectionState::Closed => {
                Err(MessageRouterError::connection_closed())
            }
            _ => Ok(()),
        }
    }

    fn close_error(&self) -> MessageRouterError {
        self.close_error
            .lock()
            .clone()
            .unwrap_or_else(MessageRouterError::connection_closed)
    }

    /// Error for a connect call made after the router started closing. A
    /// failed attempt keeps reporting its own failure.
    fn connect_failure(&self) -> MessageRouterError {
        match &*self.connect_outcome.borrow() {
            ConnectOutcome::Failed(error) => error.clone(),
            _ => MessageRouterError::connection_closed(),
        }
    }

    fn enqueue(&self, message: Message) -> Result<(), MessageRouterError> {
        self.send_tx
            .send(message)
            .map_err(|_| MessageRouterError::connection_closed())
    }

    /// Send a correlated request and wait for its response.
    async fn send_request(
        &self,
        message: Message,
        cancel: Option<&CancellationToken>,
    ) -> Result<Message, MessageRouterError> {
        let request_id = message.request_id().unwrap_or_default().to_owned();
        let waiter = self.pending.register(&request_id)?;
        let _guard = PendingGuard::new(&self.pending, request_id);

        self.check_state()?;
        self.enqueue(message)?;

        tokio::select! {
            biased;
            response = waiter => response.unwrap_or_else(|_| Err(self.close_error())),
            () = cancelled(cancel) => Err(MessageRouterError::cancelled()),
            () = self.close_token.cancelled() => Err(self.close_error()),
        }
    }

    // ── Connect ─────────────────────────────────────────────────────────────

    async fn run_connect(self: Arc<Self>, cancel: CancellationToken) {
        self.diagnostics.emit(RouterEvent::ConnectStart);
        debug!("Connecting");

        match self.establish(&cancel).await {
            Ok(client_id) => {
                let connected = {
                    let mut state = self.state.lock();
                    if state.state == ConnectionState::Connecting {
                        state.state = ConnectionState::Connected;
                        state.client_id = Some(client_id.clone());
                        true
                    } else {
                        false
                    }
                };
                if connected {
                    info!(client_id = %client_id, "Connected");
                    let _ = self.connect_outcome.send_replace(ConnectOutcome::Connected);
                    self.diagnostics
                        .emit(RouterEvent::ConnectStop { error: None });
                }
            }
            Err(cause) => {
                let error = MessageRouterError::connection_failed(cause);
                warn!(error = %error, "Connection attempt failed");
                self.settle_failed(&error);
                self.diagnostics.emit(RouterEvent::ConnectStop {
                    error: Some(error.clone()),
                });
                self.close_core(Some(error)).await;
            }
        }
    }

    /// Open the transport, start the loops, and perform the handshake.
    async fn establish(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<String, MessageRouterError> {
        let timeout = self.options.connect_timeout();
        tokio::select! {
            result = self.handshake(cancel) => result,
            () = cancel.cancelled() => Err(MessageRouterError::cancelled()),
            () = tokio::time::sleep(timeout) => Err(MessageRouterError::new(
                ErrorName::Other("Timeout".into()),
                format!("no connect response within {}ms", timeout.as_millis()),
            )),
        }
    }

    async fn handshake(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<String, MessageRouterError> {
        let (tx, rx) = oneshot::channel();
        *self.connect_response.lock() = Some(tx);

        tokio::select! {
            result = self.connection.connect(cancel) => {
                result.map_err(MessageRouterError::from_transport)?;
            }
            () = self.close_token.cancelled() => return Err(self.close_error()),
        }
        self.start_loops();
        self.enqueue(Message::Connect {
            access_token: self.options.access_token.clone(),
        })?;

        let response = tokio::select! {
            response = rx => response.map_err(|_| self.close_error())?,
            () = self.close_token.cancelled() => return Err(self.close_error()),
        };
        match response {
            Message::ConnectResponse {
                error: Some(info), ..
            } => Err(info.into()),
            Message::ConnectResponse {
                client_id: Some(client_id),
                ..
            } => Ok(client_id),
            other => Err(unexpected_response(&other)),
        }
    }

    fn settle_failed(&self, error: &MessageRouterError) {
        let _ = self.connect_outcome.send_if_modified(|outcome| {
            if outcome.is_settled() {
                false
            } else {
                *outcome = ConnectOutcome::Failed(error.clone());
                true
            }
        });
    }

    // ── Loops ───────────────────────────────────────────────────────────────

    fn start_loops(self: &Arc<Self>) {
        if self.close_token.is_cancelled() {
            return;
        }
        let Some(rx) = self.send_rx.lock().take() else {
            return;
        };
        let mut loops = self.loops.lock();
        loops.push(tokio::spawn(Arc::clone(self).send_loop(rx)));
        loops.push(tokio::spawn(Arc::clone(self).receive_loop()));
    }

    async fn send_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Message>) {
        loop {
            let message = tokio::select! {
                biased;
                () = self.close_token.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let kind = message.kind();
            let request_id = message.request_id().map(str::to_owned);
            match self.connection.send(message, &self.close_token).await {
                Ok(()) => self
                    .diagnostics
                    .emit(RouterEvent::MessageSent { kind, request_id }),
                Err(TransportError::Cancelled) if self.close_token.is_cancelled() => break,
                Err(err) => {
                    error!(error = %err, kind = %kind, "Send failed, closing router");
                    self.request_close(MessageRouterError::from_transport(err));
                    break;
                }
            }
        }
        debug!("Send loop stopped");
    }

    async fn receive_loop(self: Arc<Self>) {
        loop {
            let received = tokio::select! {
                biased;
                () = self.close_token.cancelled() => break,
                received = self.connection.receive(&self.close_token) => received,
            };
            match received {
                Ok(message) => self.dispatch(message),
                Err(TransportError::Cancelled) if self.close_token.is_cancelled() => break,
                Err(TransportError::Closed) => {
                    info!("Connection closed by peer");
                    self.request_close(MessageRouterError::connection_closed());
                    break;
                }
                Err(err) => {
                    error!(error = %err, "Receive failed, closing router");
                    self.request_close(MessageRouterError::from_transport(err));
                    break;
                }
            }
        }
        debug!("Receive loop stopped");
    }

    /// Close from inside a loop. The close sequence joins the loops, so it
    /// must run on its own task.
    fn request_close(self: &Arc<Self>, error: MessageRouterError) {
        let inner = Arc::clone(self);
        drop(tokio::spawn(async move {
            inner.close_core(Some(error)).await;
        }));
    }

    // ── Dispatch ────────────────────────────────────────────────────────────

    fn dispatch(self: &Arc<Self>, message: Message) {
        self.diagnostics.emit(RouterEvent::MessageReceived {
            kind: message.kind(),
            request_id: message.request_id().map(str::to_owned),
        });

        match message {
            message @ Message::ConnectResponse { .. } => {
                match self.connect_response.lock().take() {
                    Some(tx) => {
                        let _ = tx.send(message);
                    }
                    None => warn!("Unexpected connect response"),
                }
            }
            Message::Topic {
                topic,
                payload,
                source_id,
                scope,
                correlation_id,
            } => {
                let Some(entry) = self.topics.get(&topic) else {
                    return;
                };
                let delivered = entry.on_next(&TopicMessage {
                    topic: topic.clone(),
                    payload,
                    context: MessageContext {
                        source_id,
                        scope,
                        correlation_id,
                    },
                });
                self.diagnostics.emit(RouterEvent::TopicDispatched {
                    topic,
                    subscribers: delivered,
                });
            }
            Message::Invoke {
                request_id,
                endpoint,
                payload,
                scope,
                source_id,
                correlation_id,
            } => {
                let context = MessageContext {
                    source_id,
                    scope,
                    correlation_id,
                };
                drop(tokio::spawn(Arc::clone(self).handle_invoke(
                    request_id, endpoint, payload, context,
                )));
            }
            message if message.is_response() => {
                let request_id = message.request_id().map(str::to_owned);
                if !self.pending.resolve(message) {
                    debug!(request_id = ?request_id, "Dropping response without a pending request");
                }
            }
            other => warn!(kind = %other.kind(), "Unhandled message"),
        }
    }

    async fn handle_invoke(
        self: Arc<Self>,
        request_id: String,
        endpoint: String,
        payload: Option<MessageBuffer>,
        context: MessageContext,
    ) {
        let Some(handler) = self.endpoints.handler(&endpoint) else {
            debug!(endpoint = %endpoint, request_id = %request_id, "Invocation of unknown endpoint");
            self.reply(Message::InvokeResponse {
                request_id,
                payload: None,
                error: Some(ErrorInfo::from(&MessageRouterError::unknown_endpoint(
                    &endpoint,
                ))),
            });
            return;
        };

        let call = AssertUnwindSafe(async {
            handler.handle(endpoint.clone(), payload, context).await
        });
        let (payload, error) = match call.catch_unwind().await {
            Ok(Ok(payload)) => (payload, None),
            Ok(Err(err)) => {
                error!(endpoint = %endpoint, request_id = %request_id, error = %err, "Endpoint handler failed");
                (None, Some(ErrorInfo::from_handler_error(&err)))
            }
            Err(_) => {
                error!(endpoint = %endpoint, request_id = %request_id, "Endpoint handler panicked");
                (
                    None,
                    Some(ErrorInfo::new(
                        "Error",
                        format!("Handler for endpoint '{endpoint}' panicked"),
                    )),
                )
            }
        };

        self.reply(Message::InvokeResponse {
            request_id,
            payload,
            error,
        });
    }

    fn reply(&self, message: Message) {
        if self.state.lock().state != ConnectionState::Connected {
            debug!(request_id = ?message.request_id(), "Dropping reply, router is not connected");
            return;
        }
        if self.enqueue(message).is_err() {
            debug!("Dropping reply, send queue is closed");
        }
    }

    // ── Close ───────────────────────────────────────────────────────────────

    async fn close_core(self: &Arc<Self>, error: Option<MessageRouterError>) {
        let error = error.unwrap_or_else(MessageRouterError::connection_closed);
        let previous = {
            let mut state = self.state.lock();
            let previous = state.state;
            if !matches!(previous, ConnectionState::Closing | ConnectionState::Closed) {
                state.state = ConnectionState::Closing;
            }
            previous
        };

        match previous {
            ConnectionState::Closed => return,
            ConnectionState::Closing => {
                self.wait_closed().await;
                return;
            }
            ConnectionState::NotConnected => {
                *self.close_error.lock() = Some(error);
                self.close_token.cancel();
                self.dispose_connection().await;
                self.state.lock().state = ConnectionState::Closed;
                let _ = self.closed.send_replace(true);
                debug!("Closed before connecting");
                return;
            }
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }

        debug!(error = %error, "Closing");
        self.diagnostics.emit(RouterEvent::CloseStart);

        *self.close_error.lock() = Some(error.clone());
        let failed = self.pending.fail_all(&error);
        let subscriptions = self.topics.fail_all(&error);
        self.settle_failed(&error);
        drop(self.connect_response.lock().take());

        self.close_token.cancel();
        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            if let Err(err) = handle.await {
                warn!(error = %err, "Router loop terminated abnormally");
            }
        }
        for subscription in &subscriptions {
            subscription.finished().await;
        }
        self.dispose_connection().await;

        {
            let mut state = self.state.lock();
            state.state = ConnectionState::Closed;
            state.client_id = None;
        }
        let _ = self.closed.send_replace(true);

        info!(
            reason = %error.name(),
            pending_failed = failed,
            subscriptions = subscriptions.len(),
            "Router closed"
        );
        let abnormal = *error.name() != ErrorName::ConnectionClosed;
        self.diagnostics.emit(RouterEvent::CloseStop {
            error: abnormal.then_some(error),
        });
    }

    async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn dispose_connection(&self) {
        if let Err(err) = self.connection.dispose().await {
            warn!(error = %err, "Failed to dispose connection");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn settled_outcome(mut rx: watch::Receiver<ConnectOutcome>) -> ConnectOutcome {
    match rx.wait_for(ConnectOutcome::is_settled).await {
        Ok(outcome) => (*outcome).clone(),
        Err(_) => ConnectOutcome::Failed(MessageRouterError::connection_closed()),
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn unexpected_response(message: &Message) -> MessageRouterError {
    MessageRouterError::new(
        ErrorName::Other("UnexpectedResponse".into()),
        format!("Unexpected response of type {}", message.kind()),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
