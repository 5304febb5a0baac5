//! # courier-core
//!
//! Foundation types shared by the courier message router and its transports.
//!
//! - **Protocol**: the [`Message`](protocol::Message) enum covering every
//!   request, response, and notification kind exchanged with the peer
//! - **Payloads**: [`MessageBuffer`](buffer::MessageBuffer), an immutable
//!   UTF-8 payload with JSON and base64 helpers
//! - **Scopes**: [`MessageScope`](scope::MessageScope) addressing qualifiers
//! - **Validation**: topic and endpoint name rules
//! - **Errors**: [`MessageRouterError`](errors::MessageRouterError) with the
//!   machine-readable [`ErrorName`](errors::ErrorName) taxonomy
//! - **Connection**: the [`Connection`](connection::Connection) trait that
//!   transports implement
//! - **Logging**: `tracing` subscriber setup and test log capture

#![deny(unsafe_code)]

pub mod buffer;
pub mod connection;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod scope;
pub mod validation;

pub use buffer::MessageBuffer;
pub use connection::Connection;
pub use errors::{ErrorInfo, ErrorName, MessageRouterError, TransportError};
pub use protocol::{EndpointDescriptor, Message, MessageType};
pub use scope::MessageScope;
