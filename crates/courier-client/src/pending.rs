//! Pending-request table: request ID → waiting caller.
//!
//! Entries are removed when their response arrives, when the caller gives up
//! (cancellation or dropping the call future, via [`PendingGuard`]), or when
//! the router closes and fails every remaining entry.

use courier_core::{Message, MessageRouterError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;

/// Outcome delivered to a waiting caller.
pub(crate) type Response = Result<Message, MessageRouterError>;

pub(crate) struct PendingRequests {
    entries: DashMap<String, oneshot::Sender<Response>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a waiter, failing with `DuplicateRequestId` if the ID is taken.
    pub(crate) fn register(
        &self,
        request_id: &str,
    ) -> Result<oneshot::Receiver<Response>, MessageRouterError> {
        match self.entries.entry(request_id.to_owned()) {
            Entry::Occupied(_) => Err(MessageRouterError::duplicate_request_id(request_id)),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                let _ = slot.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Complete the waiter matching `response`'s request ID.
    ///
    /// A response carrying an error fails the waiter with that error. Returns
    /// `false` when no waiter matched.
    pub(crate) fn resolve(&self, response: Message) -> bool {
        let Some(request_id) = response.request_id() else {
            return false;
        };
        let Some((_, tx)) = self.entries.remove(request_id) else {
            return false;
        };
        let outcome = match response.error().cloned() {
            Some(info) => Err(MessageRouterError::from(info)),
            None => Ok(response),
        };
        // the caller may have stopped waiting
        let _ = tx.send(outcome);
        true
    }

    /// Drop the waiter without completing it.
    pub(crate) fn remove(&self, request_id: &str) -> bool {
        self.entries.remove(request_id).is_some()
    }

    /// Fail every waiter with `error`. Returns how many were failed.
    pub(crate) fn fail_all(&self, error: &MessageRouterError) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, tx)) = self.entries.remove(&id) {
                let _ = tx.send(Err(error.clone()));
                failed += 1;
            }
        }
        failed
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Removes a pending entry when the awaiting call ends for any reason.
///
/// Removal after a normal response is a no-op because `resolve` already took
/// the entry.
pub(crate) struct PendingGuard<'a> {
    table: &'a PendingRequests,
    request_id: String,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(table: &'a PendingRequests, request_id: String) -> Self {
        Self { table, request_id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.table.remove(&self.request_id) {
            tracing::debug!(request_id = %self.request_id, "Pending request abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use courier_core::{ErrorInfo, ErrorName};

    use super::*;

    fn invoke_response(request_id: &str, error: Option<ErrorInfo>) -> Message {
        Message::InvokeResponse {
            request_id: request_id.into(),
            payload: Some("ok".into()),
            error,
        }
    }

    #[tokio::test]
    async fn resolves_matching_waiter() {
        let table = PendingRequests::new();
        let rx = table.register("r1").unwrap();
        assert!(table.contains("r1"));

        assert!(table.resolve(invoke_response("r1", None)));
        assert!(!table.contains("r1"));
        assert_matches!(rx.await.unwrap(), Ok(Message::InvokeResponse { .. }));
    }

    #[test]
    fn duplicate_id_rejected() {
        let table = PendingRequests::new();
        let _rx = table.register("r1").unwrap();
        let err = table.register("r1").unwrap_err();
        assert_eq!(err.name(), &ErrorName::DuplicateRequestId);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn error_response_fails_waiter() {
        let table = PendingRequests::new();
        let rx = table.register("r1").unwrap();
        let info = ErrorInfo::new("UnknownEndpoint", "Unknown endpoint: x");
        assert!(table.resolve(invoke_response("r1", Some(info))));

        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.name(), &ErrorName::UnknownEndpoint);
        assert_eq!(err.message(), "Unknown endpoint: x");
    }

    #[test]
    fn unmatched_response_is_dropped() {
        let table = PendingRequests::new();
        assert!(!table.resolve(invoke_response("nobody", None)));
        assert!(!table.resolve(Message::ConnectResponse {
            client_id: None,
            error: None
        }));
    }

    #[tokio::test]
    async fn fail_all_drains_table() {
        let table = PendingRequests::new();
        let a = table.register("a").unwrap();
        let b = table.register("b").unwrap();

        assert_eq!(table.fail_all(&MessageRouterError::connection_closed()), 2);
        assert_eq!(table.len(), 0);
        for rx in [a, b] {
            let err = rx.await.unwrap().unwrap_err();
            assert_eq!(err.name(), &ErrorName::ConnectionClosed);
        }
    }

    #[test]
    fn guard_removes_on_drop() {
        let table = PendingRequests::new();
        let _rx = table.register("r1").unwrap();
        {
            let _guard = PendingGuard::new(&table, "r1".into());
        }
        assert!(!table.contains("r1"));
    }
}
