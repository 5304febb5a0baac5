//! Endpoint handler table.

use std::sync::Arc;

use courier_core::{EndpointDescriptor, MessageRouterError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::handler::MessageHandler;

struct EndpointEntry {
    handler: Arc<dyn MessageHandler>,
    descriptor: Option<EndpointDescriptor>,
}

/// Endpoint name → handler. At most one handler per name.
pub(crate) struct EndpointRegistry {
    entries: DashMap<String, EndpointEntry>,
}

impl EndpointRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert atomically, failing with `DuplicateEndpoint` if the name is taken.
    pub(crate) fn try_add(
        &self,
        endpoint: &str,
        handler: Arc<dyn MessageHandler>,
        descriptor: Option<EndpointDescriptor>,
    ) -> Result<(), MessageRouterError> {
        match self.entries.entry(endpoint.to_owned()) {
            Entry::Occupied(_) => Err(MessageRouterError::duplicate_endpoint(endpoint)),
            Entry::Vacant(slot) => {
                let _ = slot.insert(EndpointEntry {
                    handler,
                    descriptor,
                });
                Ok(())
            }
        }
    }

    pub(crate) fn remove(&self, endpoint: &str) -> bool {
        self.entries.remove(endpoint).is_some()
    }

    pub(crate) fn handler(&self, endpoint: &str) -> Option<Arc<dyn MessageHandler>> {
        self.entries
            .get(endpoint)
            .map(|entry| Arc::clone(&entry.handler))
    }

    pub(crate) fn descriptor(&self, endpoint: &str) -> Option<EndpointDescriptor> {
        self.entries
            .get(endpoint)
            .and_then(|entry| entry.descriptor.clone())
    }

    /// Registered names, sorted.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
