//! # courier-client
//!
//! Client-side message router: topic publish/subscribe and named-endpoint
//! request/response over a pluggable [`Connection`](courier_core::Connection).
//!
//! - **Router**: [`MessageRouter`], the connection state machine with its
//!   send and receive loops
//! - **Subscriptions**: per-subscriber queues and tasks, so a slow subscriber
//!   never delays another or the receive loop
//! - **Endpoints**: locally registered [`MessageHandler`]s served on their
//!   own tasks
//! - **Options**: [`RouterOptions`] loaded through `figment`
//! - **Diagnostics**: [`RouterEvent`] broadcast
//! - **Convenience**: typed JSON wrappers and a [`TopicStream`] adapter
//! - **Testing**: [`mock`], an in-memory connection pair

#![deny(unsafe_code)]

pub mod diagnostics;
mod endpoints;
pub mod handler;
pub mod json;
pub mod mock;
pub mod options;
mod pending;
pub mod router;
pub mod stream;
pub mod subscription;
mod topic;

pub use diagnostics::RouterEvent;
pub use handler::{
    FnSubscriber, HandlerFuture, MessageContext, MessageHandler, Subscriber, TopicMessage,
    subscriber_fn,
};
pub use json::{JsonError, json_handler};
pub use options::{ConfigError, InvokeOptions, PublishOptions, RouterOptions};
pub use router::{ConnectionState, MessageRouter};
pub use stream::TopicStream;
pub use subscription::Subscription;

pub use courier_core::{
    EndpointDescriptor, ErrorInfo, ErrorName, MessageBuffer, MessageRouterError, MessageScope,
};
