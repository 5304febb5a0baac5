//! Addressing scopes for publish and invoke.

use std::fmt;

use serde::{Deserialize, Serialize};

const CLIENT_ID_PREFIX: char = '@';

/// Narrows a publish or invoke to a subset of clients.
///
/// The default scope reaches every subscriber or any registrant. A scope
/// whose name starts with `@` addresses the single client with that ID.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageScope(String);

impl MessageScope {
    /// Scope addressing a single client.
    pub fn from_client_id(client_id: &str) -> Self {
        Self(format!("{CLIENT_ID_PREFIX}{client_id}"))
    }

    /// Parse a wire scope. Empty or whitespace-only input is the default scope.
    pub fn parse(value: &str) -> Self {
        Self(value.trim().to_owned())
    }

    /// Whether this is the application-level default scope.
    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this scope addresses a single client.
    pub fn is_client_id(&self) -> bool {
        self.0.len() > 1 && self.0.starts_with(CLIENT_ID_PREFIX)
    }

    /// The addressed client ID, if this is a client scope.
    pub fn client_id(&self) -> Option<&str> {
        if self.is_client_id() {
            Some(&self.0[CLIENT_ID_PREFIX.len_utf8()..])
        } else {
            None
        }
    }

    /// Wire representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageScope {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}
