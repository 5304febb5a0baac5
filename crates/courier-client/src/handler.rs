//! Application callback contracts.
//!
//! - [`MessageHandler`]: serves invocations of a locally registered endpoint
//! - [`Subscriber`]: receives messages published to a topic
//!
//! Plain async closures satisfy both through the blanket impl and
//! [`subscriber_fn`].

use std::future::Future;

use async_trait::async_trait;
use courier_core::{MessageBuffer, MessageRouterError, MessageScope};
use futures::future::BoxFuture;

/// Addressing metadata that accompanies a topic message or an invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageContext {
    /// Client ID of the sender, when the peer reports it.
    pub source_id: Option<String>,
    /// Scope the message was sent with.
    pub scope: MessageScope,
    /// Application-supplied correlation token.
    pub correlation_id: Option<String>,
}

/// A message delivered to a [`Subscriber`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Published payload.
    pub payload: Option<MessageBuffer>,
    /// Sender and addressing metadata.
    pub context: MessageContext,
}

/// Future returned by [`MessageHandler::handle`].
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Option<MessageBuffer>>>;

/// Serves invocations of an endpoint registered on this client.
///
/// The returned payload becomes the invocation response. An `Err` is logged
/// and reported to the caller as an error response; a
/// [`MessageRouterError`] keeps its name on the wire.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one invocation.
    fn handle(
        &self,
        endpoint: String,
        payload: Option<MessageBuffer>,
        context: MessageContext,
    ) -> HandlerFuture;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(String, Option<MessageBuffer>, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<MessageBuffer>>> + Send + 'static,
{
    fn handle(
        &self,
        endpoint: String,
        payload: Option<MessageBuffer>,
        context: MessageContext,
    ) -> HandlerFuture {
        Box::pin(self(endpoint, payload, context))
    }
}

/// Receives the messages of one subscription, in arrival order.
///
/// `on_next` calls never overlap. At most one of `on_error` /
/// `on_completed` is called, and only after every earlier `on_next` has
/// returned. An `Err` from `on_next` is logged and delivery continues.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Handle one message.
    async fn on_next(&self, message: TopicMessage) -> anyhow::Result<()>;

    /// The topic terminated with an error, usually because the router closed.
    async fn on_error(&self, _error: MessageRouterError) {}

    /// The subscription ended normally.
    async fn on_completed(&self) {}
}

/// [`Subscriber`] built from an async closure. See [`subscriber_fn`].
pub struct FnSubscriber<F> {
    on_next: F,
}

/// Build a [`Subscriber`] that only handles messages.
pub fn subscriber_fn<F, Fut>(on_next: F) -> FnSubscriber<F>
where
    F: Fn(TopicMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnSubscriber { on_next }
}

#[async_trait]
impl<F, Fut> Subscriber for FnSubscriber<F>
where
    F: Fn(TopicMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_next(&self, message: TopicMessage) -> anyhow::Result<()> {
        (self.on_next)(message).await
    }
}
