//! Messages exchanged between a router client and its peer.
//!
//! Every request that expects an answer carries a `request_id`; the matching
//! response echoes it together with an optional [`ErrorInfo`]. `Topic` and
//! `Invoke` are pushed by the peer; `Connect`/`ConnectResponse` open the
//! session and are correlated by position rather than by ID.
//!
//! Messages derive serde so transports can frame them, but the byte-level
//! framing belongs to the transport.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffer::MessageBuffer;
use crate::errors::ErrorInfo;
use crate::scope::MessageScope;

/// Optional metadata announced with a service registration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the request payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<String>,
    /// JSON schema of the response payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<String>,
}

/// A protocol message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
#[allow(missing_docs)]
pub enum Message {
    /// Opens the session.
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
    },
    /// Answers `Connect` with the assigned client ID or an error.
    ConnectResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    /// Publishes a payload to a topic.
    Publish {
        request_id: String,
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<MessageBuffer>,
        #[serde(default, skip_serializing_if = "MessageScope::is_default")]
        scope: MessageScope,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    /// Acknowledges `Publish`.
    PublishResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    /// Starts receiving messages published to a topic.
    Subscribe { request_id: String, topic: String },
    /// Acknowledges `Subscribe`.
    SubscribeResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    /// Stops receiving messages published to a topic.
    Unsubscribe { request_id: String, topic: String },
    /// Acknowledges `Unsubscribe`.
    UnsubscribeResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    /// A message published to a subscribed topic.
    Topic {
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<MessageBuffer>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
        #[serde(default, skip_serializing_if = "MessageScope::is_default")]
        scope: MessageScope,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    /// Calls an endpoint. Sent by the caller; delivered to the registrant.
    Invoke {
        request_id: String,
        endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<MessageBuffer>,
        #[serde(default, skip_serializing_if = "MessageScope::is_default")]
        scope: MessageScope,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    /// Result of an `Invoke`.
    InvokeResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<MessageBuffer>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    /// Announces a discoverable service.
    RegisterService {
        request_id: String,
        endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        descriptor: Option<EndpointDescriptor>,
    },
    /// Acknowledges `RegisterService`.
    RegisterServiceResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    /// Withdraws a service announcement.
    UnregisterService { request_id: String, endpoint: String },
    /// Acknowledges `UnregisterService`.
    UnregisterServiceResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
}

/// Discriminant of a [`Message`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MessageType {
    Connect,
    ConnectResponse,
    Publish,
    PublishResponse,
    Subscribe,
    SubscribeResponse,
    Unsubscribe,
    UnsubscribeResponse,
    Topic,
    Invoke,
    InvokeResponse,
    RegisterService,
    RegisterServiceResponse,
    UnregisterService,
    UnregisterServiceResponse,
}

impl MessageType {
    /// Wire tag of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::ConnectResponse => "connectResponse",
            Self::Publish => "publish",
            Self::PublishResponse => "publishResponse",
            Self::Subscribe => "subscribe",
            Self::SubscribeResponse => "subscribeResponse",
            Self::Unsubscribe => "unsubscribe",
            Self::UnsubscribeResponse => "unsubscribeResponse",
            Self::Topic => "topic",
            Self::Invoke => "invoke",
            Self::InvokeResponse => "invokeResponse",
            Self::RegisterService => "registerService",
            Self::RegisterServiceResponse => "registerServiceResponse",
            Self::UnregisterService => "unregisterService",
            Self::UnregisterServiceResponse => "unregisterServiceResponse",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    /// Kind of this message.
    pub fn kind(&self) -> MessageType {
        match self {
            Self::Connect { .. } => MessageType::Connect,
            Self::ConnectResponse { .. } => MessageType::ConnectResponse,
            Self::Publish { .. } => MessageType::Publish,
            Self::PublishResponse { .. } => MessageType::PublishResponse,
            Self::Subscribe { .. } => MessageType::Subscribe,
            Self::SubscribeResponse { .. } => MessageType::SubscribeResponse,
            Self::Unsubscribe { .. } => MessageType::Unsubscribe,
            Self::UnsubscribeResponse { .. } => MessageType::UnsubscribeResponse,
            Self::Topic { .. } => MessageType::Topic,
            Self::Invoke { .. } => MessageType::Invoke,
            Self::InvokeResponse { .. } => MessageType::InvokeResponse,
            Self::RegisterService { .. } => MessageType::RegisterService,
            Self::RegisterServiceResponse { .. } => MessageType::RegisterServiceResponse,
            Self::UnregisterService { .. } => MessageType::UnregisterService,
            Self::UnregisterServiceResponse { .. } => MessageType::UnregisterServiceResponse,
        }
    }

    /// Correlation key, for requests and responses that carry one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Publish { request_id, .. }
            | Self::PublishResponse { request_id, .. }
            | Self::Subscribe { request_id, .. }
            | Self::SubscribeResponse { request_id, .. }
            | Self::Unsubscribe { request_id, .. }
            | Self::UnsubscribeResponse { request_id, .. }
            | Self::Invoke { request_id, .. }
            | Self::InvokeResponse { request_id, .. }
            | Self::RegisterService { request_id, .. }
            | Self::RegisterServiceResponse { request_id, .. }
            | Self::UnregisterService { request_id, .. }
            | Self::UnregisterServiceResponse { request_id, .. } => Some(request_id),
            Self::Connect { .. } | Self::ConnectResponse { .. } | Self::Topic { .. } => None,
        }
    }

    /// Whether this message answers an earlier request.
    pub fn is_response(&self) -> bool {
        matches!(
            self.kind(),
            MessageType::ConnectResponse
                | MessageType::PublishResponse
                | MessageType::SubscribeResponse
                | MessageType::UnsubscribeResponse
                | MessageType::InvokeResponse
                | MessageType::RegisterServiceResponse
                | MessageType::UnregisterServiceResponse
        )
    }

    /// Error reported by a response, if any.
    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Self::ConnectResponse { error, .. }
            | Self::PublishResponse { error, .. }
            | Self::SubscribeResponse { error, .. }
            | Self::UnsubscribeResponse { error, .. }
            | Self::InvokeResponse { error, .. }
            | Self::RegisterServiceResponse { error, .. }
            | Self::UnregisterServiceResponse { error, .. } => error.as_ref(),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
