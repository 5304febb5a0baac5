//! Per-subscriber delivery.
//!
//! Each subscription owns an unbounded FIFO queue and a dedicated task that
//! drains it into the [`Subscriber`]. Enqueueing never waits, so a slow or
//! stuck subscriber only grows its own queue; it cannot stall the receive
//! loop or a sibling subscription.
//!
//! Disposing a subscription waits for the callback in progress, discards
//! whatever is still queued and calls `on_completed`. Once
//! [`Subscription::unsubscribe`] returns the subscriber sees nothing more.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use courier_core::MessageRouterError;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

use crate::handler::{Subscriber, TopicMessage};
use crate::router::MessageRouter;
use crate::topic::Topic;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    /// Subscription whose callbacks the current task is running.
    static DELIVERING: u64;
}

enum Delivery {
    Message(TopicMessage),
    Error(MessageRouterError),
}

/// Queue side of a subscription, shared with the owning [`Topic`].
pub(crate) struct SubscriptionCore {
    id: u64,
    tx: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    disposed: Arc<AtomicBool>,
    // closed when the processing task exits
    done: watch::Receiver<()>,
}

impl SubscriptionCore {
    /// Create the queue and start its processing task.
    pub(crate) fn spawn(topic: String, subscriber: Arc<dyn Subscriber>) -> Arc<Self> {
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done) = watch::channel(());
        let disposed = Arc::new(AtomicBool::new(false));
        let task = Worker {
            id,
            topic,
            subscriber,
            disposed: Arc::clone(&disposed),
            _done: done_tx,
        };
        drop(tokio::spawn(DELIVERING.scope(id, task.run(rx))));
        Arc::new(Self {
            id,
            tx: Mutex::new(Some(tx)),
            disposed,
            done,
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Queue a message. Returns `false` once the subscription has terminated.
    pub(crate) fn on_next(&self, message: TopicMessage) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(Delivery::Message(message)).is_ok(),
            None => false,
        }
    }

    /// Terminate with an error after the queued messages.
    pub(crate) fn fail(&self, error: MessageRouterError) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(Delivery::Error(error));
        }
    }

    /// Stop delivery, call `on_completed`, and wait until the subscriber
    /// has returned from its last callback.
    pub(crate) async fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        drop(self.tx.lock().take());
        self.finished().await;
    }

    /// Stop without invoking any terminal callback.
    pub(crate) fn detach(&self) {
        drop(self.tx.lock().take());
    }

    /// Wait for the processing task to exit. Returns at once when called
    /// from one of this subscription's own callbacks.
    pub(crate) async fn finished(&self) {
        if DELIVERING.try_with(|current| *current == self.id).unwrap_or(false) {
            return;
        }
        let mut done = self.done.clone();
        while done.changed().await.is_ok() {}
    }
}

struct Worker {
    id: u64,
    topic: String,
    subscriber: Arc<dyn Subscriber>,
    disposed: Arc<AtomicBool>,
    _done: watch::Sender<()>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Delivery>) {
        let (topic, id) = (self.topic.as_str(), self.id);
        while let Some(delivery) = rx.recv().await {
            if self.is_disposed() {
                break;
            }
            match delivery {
                Delivery::Message(message) => {
                    match AssertUnwindSafe(self.subscriber.on_next(message))
                        .catch_unwind()
                        .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            error!(topic, subscription = id, error = %err, "Subscriber failed to process message");
                        }
                        Err(_) => {
                            error!(topic, subscription = id, "Subscriber panicked while processing message");
                        }
                    }
                }
                Delivery::Error(err) => {
                    if AssertUnwindSafe(self.subscriber.on_error(err))
                        .catch_unwind()
                        .await
                        .is_err()
                    {
                        error!(topic, subscription = id, "Subscriber panicked in error callback");
                    }
                    debug!(topic, subscription = id, "Subscription failed");
                    return;
                }
            }
        }

        if self.is_disposed() {
            if AssertUnwindSafe(self.subscriber.on_completed())
                .catch_unwind()
                .await
                .is_err()
            {
                error!(topic, subscription = id, "Subscriber panicked in completion callback");
            }
            debug!(topic, subscription = id, "Subscription completed");
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Handle to an active subscription.
///
/// Delivery continues until [`unsubscribe`](Self::unsubscribe) is called or
/// the router closes. Dropping the handle does not unsubscribe.
#[must_use = "dropping a Subscription leaves it active; call unsubscribe() to stop delivery"]
pub struct Subscription {
    router: MessageRouter,
    topic: Arc<Topic>,
    core: Arc<SubscriptionCore>,
}

impl Subscription {
    pub(crate) fn new(router: MessageRouter, topic: Arc<Topic>, core: Arc<SubscriptionCore>) -> Self {
        Self {
            router,
            topic,
            core,
        }
    }

    /// Topic this subscription receives.
    pub fn topic(&self) -> &str {
        self.topic.name()
    }

    /// Stop receiving messages.
    ///
    /// Waits for a callback already in progress to return, drops messages
    /// still queued, then calls `on_completed` unless the topic already
    /// failed. No callback runs after this returns; called from the
    /// subscriber's own callback, the remaining ones run once that callback
    /// returns. A callback that never returns blocks this call.
    ///
    /// When this was the topic's last subscriber the peer is told to stop
    /// sending; a failure there is logged, not returned.
    pub async fn unsubscribe(self) {
        let removed = self.topic.unsubscribe(self.core.id());
        self.core.dispose().await;
        if removed {
            self.router.try_unsubscribe(&self.topic).await;
        }
    }

    /// Undo a local subscription whose wire subscribe failed.
    pub(crate) fn discard(self) {
        let _ = self.topic.unsubscribe(self.core.id());
        self.core.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic.name())
            .field("id", &self.core.id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use courier_core::logging::capture_logs;
    use courier_core::{ErrorName, MessageScope};
    use tokio::sync::Semaphore;
    use tokio::sync::mpsc::UnboundedSender;
    use tracing::Level;

    use super::*;
    use crate::handler::MessageContext;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Next(String),
        Error(ErrorName),
        Completed,
    }

    struct Recorder {
        tx: UnboundedSender<Seen>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Subscriber for Recorder {
        async fn on_next(&self, message: TopicMessage) -> anyhow::Result<()> {
            let text = message.payload.map(|p| p.as_str().to_owned()).unwrap_or_default();
            if Some(text.as_str()) == self.fail_on {
                anyhow::bail!("cannot handle {text}");
            }
            let _ = self.tx.send(Seen::Next(text));
            Ok(())
        }

        async fn on_error(&self, error: MessageRouterError) {
            let _ = self.tx.send(Seen::Error(error.name().clone()));
        }

        async fn on_completed(&self) {
            let _ = self.tx.send(Seen::Completed);
        }
    }

    fn recorder(fail_on: Option<&'static str>) -> (Arc<SubscriptionCore>, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let core = SubscriptionCore::spawn("t".into(), Arc::new(Recorder { tx, fail_on }));
        (core, rx)
    }

    fn message(text: &str) -> TopicMessage {
        TopicMessage {
            topic: "t".into(),
            payload: Some(text.into()),
            context: MessageContext {
                scope: MessageScope::default(),
                ..MessageContext::default()
            },
        }
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<Seen>) -> Vec<Seen> {
        let mut seen = Vec::new();
        while let Ok(Some(item)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            seen.push(item);
        }
        seen
    }

    #[tokio::test]
    async fn delivers_in_order_then_completes() {
        let (core, mut rx) = recorder(None);
        assert!(core.on_next(message("1")));
        assert!(core.on_next(message("2")));
        assert_eq!(rx.recv().await, Some(Seen::Next("1".into())));
        assert_eq!(rx.recv().await, Some(Seen::Next("2".into())));

        core.dispose().await;
        assert!(!core.on_next(message("3")));
        assert_eq!(drain(rx).await, vec![Seen::Completed]);
    }

    #[tokio::test]
    async fn error_is_terminal_and_single() {
        let (core, rx) = recorder(None);
        assert!(core.on_next(message("a")));
        core.fail(MessageRouterError::connection_closed());
        core.fail(MessageRouterError::connection_closed());
        core.finished().await;

        assert_eq!(
            drain(rx).await,
            vec![Seen::Next("a".into()), Seen::Error(ErrorName::ConnectionClosed)]
        );
    }

    #[tokio::test]
    async fn failing_message_is_logged_and_skipped() {
        let (logs, _guard) = capture_logs();
        let (core, rx) = recorder(Some("bad"));
        assert!(core.on_next(message("bad")));
        assert!(core.on_next(message("good")));
        core.fail(MessageRouterError::connection_closed());
        core.finished().await;

        assert_eq!(
            drain(rx).await,
            vec![Seen::Next("good".into()), Seen::Error(ErrorName::ConnectionClosed)]
        );
        let events = logs.find(Level::ERROR, "Subscriber failed");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].field("topic"), Some("t"));
    }

    #[tokio::test]
    async fn detach_skips_terminal_callbacks() {
        let (core, rx) = recorder(None);
        core.detach();
        assert!(!core.on_next(message("x")));
        core.finished().await;
        assert!(drain(rx).await.is_empty());
    }

    /// Reports when each message starts, then holds it until released.
    struct Gated {
        tx: UnboundedSender<Seen>,
        release: Arc<Semaphore>,
    }

    #[async_trait]
    impl Subscriber for Gated {
        async fn on_next(&self, message: TopicMessage) -> anyhow::Result<()> {
            let text = message.payload.map(|p| p.as_str().to_owned()).unwrap_or_default();
            let _ = self.tx.send(Seen::Next(text));
            self.release.acquire().await?.forget();
            Ok(())
        }

        async fn on_completed(&self) {
            let _ = self.tx.send(Seen::Completed);
        }
    }

    #[tokio::test]
    async fn dispose_waits_for_running_callback_and_drops_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        let core = SubscriptionCore::spawn(
            "t".into(),
            Arc::new(Gated {
                tx,
                release: Arc::clone(&release),
            }),
        );
        for text in ["a", "b", "c"] {
            assert!(core.on_next(message(text)));
        }
        assert_eq!(rx.recv().await, Some(Seen::Next("a".into())));

        let disposing = tokio::spawn({
            let core = Arc::clone(&core);
            async move { core.dispose().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!disposing.is_finished());

        release.add_permits(3);
        disposing.await.unwrap();
        // nothing may arrive after dispose returns
        assert_eq!(rx.try_recv(), Ok(Seen::Completed));
        assert!(drain(rx).await.is_empty());
    }

    /// Disposes its own subscription from inside `on_next`.
    struct SelfDisposing {
        tx: UnboundedSender<Seen>,
        core: Mutex<Option<Arc<SubscriptionCore>>>,
    }

    #[async_trait]
    impl Subscriber for SelfDisposing {
        async fn on_next(&self, message: TopicMessage) -> anyhow::Result<()> {
            let text = message.payload.map(|p| p.as_str().to_owned()).unwrap_or_default();
            let _ = self.tx.send(Seen::Next(text));
            let core = self.core.lock().take();
            if let Some(core) = core {
                core.dispose().await;
            }
            Ok(())
        }

        async fn on_completed(&self) {
            let _ = self.tx.send(Seen::Completed);
        }
    }

    #[tokio::test]
    async fn dispose_from_own_callback_does_not_deadlock() {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Arc::new(SelfDisposing {
            tx,
            core: Mutex::new(None),
        });
        let core = SubscriptionCore::spawn("t".into(), Arc::clone(&subscriber) as Arc<dyn Subscriber>);
        *subscriber.core.lock() = Some(Arc::clone(&core));
        assert!(core.on_next(message("first")));
        assert!(core.on_next(message("second")));

        tokio::time::timeout(Duration::from_secs(1), core.finished())
            .await
            .expect("subscription task did not finish");
        assert_eq!(drain(rx).await, vec![Seen::Next("first".into()), Seen::Completed]);
    }
}
