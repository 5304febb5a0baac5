//! Router error types.
//!
//! Every failure surfaced by the router carries a machine-readable
//! [`ErrorName`] and a human-readable message, mirroring the `{name, message}`
//! pair that peers report inside response messages.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error names
// ─────────────────────────────────────────────────────────────────────────────

/// Machine-readable error names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorName {
    /// The connection was closed gracefully.
    ConnectionClosed,
    /// The connection dropped because of a transport failure.
    ConnectionAborted,
    /// The connection could not be established.
    ConnectionFailed,
    /// An endpoint with the same name is already registered.
    DuplicateEndpoint,
    /// A request with the same ID is already in flight.
    DuplicateRequestId,
    /// The endpoint name is malformed.
    InvalidEndpoint,
    /// The topic name is malformed.
    InvalidTopic,
    /// No handler is registered for the endpoint.
    UnknownEndpoint,
    /// The addressed client is not known to the peer.
    UnknownClient,
    /// The access token was rejected by the peer.
    InvalidAccessToken,
    /// The caller cancelled the operation before it completed.
    Cancelled,
    /// Any other name reported by a peer or a handler.
    Other(String),
}

impl ErrorName {
    /// Wire representation of the name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionClosed => "ConnectionClosed",
            Self::ConnectionAborted => "ConnectionAborted",
            Self::ConnectionFailed => "ConnectionFailed",
            Self::DuplicateEndpoint => "DuplicateEndpoint",
            Self::DuplicateRequestId => "DuplicateRequestId",
            Self::InvalidEndpoint => "InvalidEndpoint",
            Self::InvalidTopic => "InvalidTopic",
            Self::UnknownEndpoint => "UnknownEndpoint",
            Self::UnknownClient => "UnknownClient",
            Self::InvalidAccessToken => "InvalidAccessToken",
            Self::Cancelled => "Cancelled",
            Self::Other(name) => name,
        }
    }

    /// Parse a wire name. Unrecognized names map to [`ErrorName::Other`].
    pub fn parse(name: &str) -> Self {
        match name {
            "ConnectionClosed" => Self::ConnectionClosed,
            "ConnectionAborted" => Self::ConnectionAborted,
            "ConnectionFailed" => Self::ConnectionFailed,
            "DuplicateEndpoint" => Self::DuplicateEndpoint,
            "DuplicateRequestId" => Self::DuplicateRequestId,
            "InvalidEndpoint" => Self::InvalidEndpoint,
            "InvalidTopic" => Self::InvalidTopic,
            "UnknownEndpoint" => Self::UnknownEndpoint,
            "UnknownClient" => Self::UnknownClient,
            "InvalidAccessToken" => Self::InvalidAccessToken,
            "Cancelled" => Self::Cancelled,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for ErrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire error
// ─────────────────────────────────────────────────────────────────────────────

/// Error payload carried by response messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable name.
    pub name: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error payload.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Translate a handler failure into a wire error.
    ///
    /// A [`MessageRouterError`] keeps its name; anything else is reported
    /// under the generic `Error` name with its display text.
    pub fn from_handler_error(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<MessageRouterError>() {
            Some(router_error) => Self::from(router_error),
            None => Self::new("Error", error.to_string()),
        }
    }
}

impl From<&MessageRouterError> for ErrorInfo {
    fn from(error: &MessageRouterError) -> Self {
        Self::new(error.name.as_str(), error.message.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Router error
// ─────────────────────────────────────────────────────────────────────────────

/// Error returned by message router operations.
///
/// Cheap to clone so that a single terminal error can fail every pending
/// request and subscription at once.
#[derive(Clone, Debug, Error)]
#[error("[{name}] {message}")]
pub struct MessageRouterError {
    name: ErrorName,
    message: String,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl MessageRouterError {
    /// Create a new error.
    #[must_use]
    pub fn new(name: ErrorName, message: impl Into<String>) -> Self {
        Self {
            name,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Machine-readable name.
    pub fn name(&self) -> &ErrorName {
        &self.name
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this error reports the loss or failure of the connection.
    ///
    /// These errors are terminal for the router: no further operation can
    /// succeed after one of them was raised by the close sequence.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.name,
            ErrorName::ConnectionClosed | ErrorName::ConnectionAborted | ErrorName::ConnectionFailed
        )
    }

    /// The connection has been closed.
    #[must_use]
    pub fn connection_closed() -> Self {
        Self::new(ErrorName::ConnectionClosed, "The connection has been closed")
    }

    /// The connection dropped unexpectedly.
    #[must_use]
    pub fn connection_aborted<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(
            ErrorName::ConnectionAborted,
            format!("The connection dropped unexpectedly: {cause}"),
        )
        .with_source(cause)
    }

    /// The connection could not be established.
    #[must_use]
    pub fn connection_failed<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(
            ErrorName::ConnectionFailed,
            format!("Connection failed with message {cause}"),
        )
        .with_source(cause)
    }

    /// An endpoint is already registered under this name.
    #[must_use]
    pub fn duplicate_endpoint(endpoint: &str) -> Self {
        Self::new(
            ErrorName::DuplicateEndpoint,
            format!("Duplicate endpoint registration: '{endpoint}'"),
        )
    }

    /// A request with this ID is already pending.
    #[must_use]
    pub fn duplicate_request_id(request_id: &str) -> Self {
        Self::new(
            ErrorName::DuplicateRequestId,
            format!("Duplicate request ID: '{request_id}'"),
        )
    }

    /// Malformed endpoint name.
    #[must_use]
    pub fn invalid_endpoint(endpoint: &str) -> Self {
        Self::new(
            ErrorName::InvalidEndpoint,
            format!("Invalid endpoint: '{endpoint}'"),
        )
    }

    /// Malformed topic name.
    #[must_use]
    pub fn invalid_topic(topic: &str) -> Self {
        Self::new(ErrorName::InvalidTopic, format!("Invalid topic: '{topic}'"))
    }

    /// No handler registered for the endpoint.
    #[must_use]
    pub fn unknown_endpoint(endpoint: &str) -> Self {
        Self::new(
            ErrorName::UnknownEndpoint,
            format!("Unknown endpoint: {endpoint}"),
        )
    }

    /// The operation was cancelled locally.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorName::Cancelled, "The operation was cancelled")
    }

    /// Translate a transport failure.
    ///
    /// A graceful close by the peer becomes `ConnectionClosed`; every other
    /// failure becomes `ConnectionAborted` with the transport error attached.
    #[must_use]
    pub fn from_transport(error: TransportError) -> Self {
        match error {
            TransportError::Closed => Self::connection_closed(),
            other => Self::connection_aborted(other),
        }
    }
}

impl From<ErrorInfo> for MessageRouterError {
    fn from(info: ErrorInfo) -> Self {
        Self::new(ErrorName::parse(&info.name), info.message)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport error
// ─────────────────────────────────────────────────────────────────────────────

/// Failures reported by a [`Connection`](crate::connection::Connection).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the connection gracefully.
    #[error("connection closed by peer")]
    Closed,
    /// The operation observed its cancellation token.
    #[error("transport operation cancelled")]
    Cancelled,
    /// Underlying I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Any other transport-specific failure.
    #[error("transport error: {0}")]
    Other(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_name_round_trips_through_wire_string() {
        let names = [
            ErrorName::ConnectionClosed,
            ErrorName::ConnectionAborted,
            ErrorName::ConnectionFailed,
            ErrorName::DuplicateEndpoint,
            ErrorName::DuplicateRequestId,
            ErrorName::InvalidEndpoint,
            ErrorName::InvalidTopic,
            ErrorName::UnknownEndpoint,
            ErrorName::UnknownClient,
            ErrorName::InvalidAccessToken,
            ErrorName::Cancelled,
        ];
        for name in names {
            assert_eq!(ErrorName::parse(name.as_str()), name);
        }
    }

    #[test]
    fn unknown_name_is_preserved() {
        let name = ErrorName::parse("QuotaExceeded");
        assert_eq!(name, ErrorName::Other("QuotaExceeded".into()));
        assert_eq!(name.as_str(), "QuotaExceeded");
    }

    #[test]
    fn display_includes_name_and_message() {
        let err = MessageRouterError::unknown_endpoint("svc");
        assert_eq!(err.to_string(), "[UnknownEndpoint] Unknown endpoint: svc");
    }

    #[test]
    fn connection_errors_classified() {
        assert!(MessageRouterError::connection_closed().is_connection_error());
        assert!(MessageRouterError::connection_aborted(TransportError::Other("x".into()))
            .is_connection_error());
        assert!(MessageRouterError::connection_failed(TransportError::Closed).is_connection_error());
        assert!(!MessageRouterError::invalid_topic("").is_connection_error());
        assert!(!MessageRouterError::cancelled().is_connection_error());
    }

    #[test]
    fn transport_closed_maps_to_connection_closed() {
        let err = MessageRouterError::from_transport(TransportError::Closed);
        assert_eq!(err.name(), &ErrorName::ConnectionClosed);
        assert!(err.source().is_none());
    }

    #[test]
    fn transport_failure_maps_to_aborted_with_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err = MessageRouterError::from_transport(TransportError::Io(io));
        assert_eq!(err.name(), &ErrorName::ConnectionAborted);
        assert!(err.source().is_some());
        assert!(err.message().contains("pipe"));
    }

    #[test]
    fn display_and_source_chain() {
        let err = MessageRouterError::connection_aborted(TransportError::Other("reset".into()));
        assert_eq!(
            err.to_string(),
            "[ConnectionAborted] The connection dropped unexpectedly: transport error: reset"
        );
        let source = err.source().expect("aborted error keeps its cause");
        assert_eq!(source.to_string(), "transport error: reset");

        let closed = MessageRouterError::connection_closed();
        assert!(closed.source().is_none());
        assert!(closed.to_string().starts_with("[ConnectionClosed] "));
    }

    #[test]
    fn error_info_conversions() {
        let info = ErrorInfo::new("InvalidAccessToken", "bad token");
        let err = MessageRouterError::from(info.clone());
        assert_eq!(err.name(), &ErrorName::InvalidAccessToken);
        assert_eq!(err.message(), "bad token");
        assert_eq!(ErrorInfo::from(&err), info);
    }

    #[test]
    fn handler_error_keeps_router_error_name() {
        let err = anyhow::Error::new(MessageRouterError::unknown_endpoint("x"));
        let info = ErrorInfo::from_handler_error(&err);
        assert_eq!(info.name, "UnknownEndpoint");
    }

    #[test]
    fn handler_error_generic_name() {
        let err = anyhow::anyhow!("boom");
        let info = ErrorInfo::from_handler_error(&err);
        assert_eq!(info.name, "Error");
        assert_eq!(info.message, "boom");
    }

    #[test]
    fn error_info_serializes() {
        let info = ErrorInfo::new("UnknownEndpoint", "nope");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["name"], "UnknownEndpoint");
        assert_eq!(json["message"], "nope");
    }
}
