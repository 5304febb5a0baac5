//! Typed JSON wrappers over the raw router operations.

use std::future::Future;
use std::sync::Arc;

use courier_core::{EndpointDescriptor, MessageBuffer, MessageRouterError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::handler::{MessageContext, MessageHandler};
use crate::options::{InvokeOptions, PublishOptions};
use crate::router::MessageRouter;

/// Failure of a JSON convenience call.
#[derive(Debug, Error)]
pub enum JsonError {
    /// The router operation failed.
    #[error(transparent)]
    Router(#[from] MessageRouterError),
    /// The payload could not be serialized or deserialized.
    #[error("JSON payload error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Adapt a typed async function into a [`MessageHandler`].
///
/// An absent request payload deserializes from JSON `null`.
pub fn json_handler<Req, Res, F, Fut>(handler: F) -> impl MessageHandler
where
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
    F: Fn(Req, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Res>> + Send + 'static,
{
    let handler = Arc::new(handler);
    move |_endpoint: String, payload: Option<MessageBuffer>, context: MessageContext| {
        let handler = Arc::clone(&handler);
        async move {
            let request: Req = match payload {
                Some(payload) => payload.read_json()?,
                None => serde_json::from_value(serde_json::Value::Null)?,
            };
            let response = handler(request, context).await?;
            Ok::<_, anyhow::Error>(Some(MessageBuffer::from_json(&response)?))
        }
    }
}

impl MessageRouter {
    /// Publish `value` serialized as JSON.
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        value: &T,
        options: PublishOptions,
    ) -> Result<(), JsonError> {
        let payload = MessageBuffer::from_json(value)?;
        self.publish(topic, Some(payload), options).await?;
        Ok(())
    }

    /// Invoke with a JSON request and decode the JSON response.
    ///
    /// Returns `None` when the endpoint answered without a payload.
    pub async fn invoke_json<Req, Res>(
        &self,
        endpoint: &str,
        request: &Req,
        options: InvokeOptions,
    ) -> Result<Option<Res>, JsonError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let payload = MessageBuffer::from_json(request)?;
        let response = self.invoke(endpoint, Some(payload), options).await?;
        Ok(response.map(|buffer| buffer.read_json()).transpose()?)
    }

    /// Register a typed service. See [`json_handler`].
    pub async fn register_service_json<Req, Res, F, Fut>(
        &self,
        endpoint: &str,
        handler: F,
        descriptor: Option<EndpointDescriptor>,
    ) -> Result<(), MessageRouterError>
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(Req, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Res>> + Send + 'static,
    {
        self.register_service(endpoint, json_handler(handler), descriptor)
            .await
    }

    /// Register a typed local endpoint. See [`json_handler`].
    pub async fn register_endpoint_json<Req, Res, F, Fut>(
        &self,
        endpoint: &str,
        handler: F,
        descriptor: Option<EndpointDescriptor>,
    ) -> Result<(), MessageRouterError>
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(Req, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Res>> + Send + 'static,
    {
        self.register_endpoint(endpoint, json_handler(handler), descriptor)
            .await
    }
}
