//! Topic subscriptions as a [`Stream`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use courier_core::MessageRouterError;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::handler::{Subscriber, TopicMessage};
use crate::router::MessageRouter;
use crate::subscription::Subscription;

type Item = Result<TopicMessage, MessageRouterError>;

/// Messages of one subscription.
///
/// Yields one `Err` and ends when the topic errors; ends without an error
/// after [`Subscription::unsubscribe`].
pub struct TopicStream {
    inner: UnboundedReceiverStream<Item>,
}

impl Stream for TopicStream {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

struct StreamSubscriber {
    tx: mpsc::UnboundedSender<Item>,
}

#[async_trait]
impl Subscriber for StreamSubscriber {
    async fn on_next(&self, message: TopicMessage) -> anyhow::Result<()> {
        // a dropped stream just discards messages
        let _ = self.tx.send(Ok(message));
        Ok(())
    }

    async fn on_error(&self, error: MessageRouterError) {
        let _ = self.tx.send(Err(error));
    }
}

impl MessageRouter {
    /// Subscribe to a topic and receive its messages as a stream.
    ///
    /// Keep the returned [`Subscription`] to unsubscribe later.
    pub async fn subscribe_stream(
        &self,
        topic: &str,
    ) -> Result<(TopicStream, Subscription), MessageRouterError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self
            .subscribe_arc(topic, Arc::new(StreamSubscriber { tx }))
            .await?;
        let stream = TopicStream {
            inner: UnboundedReceiverStream::new(rx),
        };
        Ok((stream, subscription))
    }
}
