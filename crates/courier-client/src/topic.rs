//! Topic registry and fan-out.

use std::sync::Arc;

use courier_core::MessageRouterError;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::handler::TopicMessage;
use crate::subscription::SubscriptionCore;

struct TopicState {
    subscriptions: Vec<Arc<SubscriptionCore>>,
    completed: bool,
    error: Option<MessageRouterError>,
}

/// One topic's live subscriptions.
///
/// The lock is held only for list edits and queue pushes, never across an
/// await.
pub(crate) struct Topic {
    name: String,
    state: Mutex<TopicState>,
}

impl Topic {
    fn new(name: String) -> Self {
        Self {
            name,
            state: Mutex::new(TopicState {
                subscriptions: Vec::new(),
                completed: false,
                error: None,
            }),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Add a subscription. `Ok(true)` means it is the first one and the peer
    /// must be told to start sending.
    pub(crate) fn subscribe(
        &self,
        subscription: Arc<SubscriptionCore>,
    ) -> Result<bool, MessageRouterError> {
        let mut state = self.state.lock();
        if state.completed {
            return Err(state
                .error
                .clone()
                .unwrap_or_else(MessageRouterError::connection_closed));
        }
        state.subscriptions.push(subscription);
        Ok(state.subscriptions.len() == 1)
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub(crate) fn unsubscribe(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.id() != id);
        state.subscriptions.len() != before
    }

    /// Whether the wire subscription can be dropped.
    pub(crate) fn can_unsubscribe(&self) -> bool {
        let state = self.state.lock();
        !state.completed && state.subscriptions.is_empty()
    }

    /// Queue `message` on every subscription. Returns how many accepted it.
    pub(crate) fn on_next(&self, message: &TopicMessage) -> usize {
        let state = self.state.lock();
        if state.completed {
            return 0;
        }
        state
            .subscriptions
            .iter()
            .filter(|s| s.on_next(message.clone()))
            .count()
    }

    /// Terminate the topic, failing every subscription. Returns the
    /// subscriptions that were failed so the caller can wait for them.
    pub(crate) fn on_error(&self, error: &MessageRouterError) -> Vec<Arc<SubscriptionCore>> {
        let subscriptions = {
            let mut state = self.state.lock();
            if state.completed {
                return Vec::new();
            }
            state.completed = true;
            state.error = Some(error.clone());
            std::mem::take(&mut state.subscriptions)
        };
        for subscription in &subscriptions {
            subscription.fail(error.clone());
        }
        subscriptions
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }
}

/// Topic name → [`Topic`]. Topics are created on first subscribe and stay
/// registered for the router's lifetime.
pub(crate) struct TopicRegistry {
    topics: DashMap<String, Arc<Topic>>,
}

impl TopicRegistry {
    pub(crate) fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    pub(crate) fn get_or_create(&self, name: &str) -> Arc<Topic> {
        Arc::clone(
            self.topics
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(Topic::new(name.to_owned())))
                .value(),
        )
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.get(name).map(|t| Arc::clone(t.value()))
    }

    /// Fail every topic, returning the subscriptions that were failed.
    pub(crate) fn fail_all(&self, error: &MessageRouterError) -> Vec<Arc<SubscriptionCore>> {
        let topics: Vec<Arc<Topic>> = self.topics.iter().map(|t| Arc::clone(t.value())).collect();
        topics.iter().flat_map(|topic| topic.on_error(error)).collect()
    }
}
