//! Topic and endpoint name rules.
//!
//! Names are checked before any network interaction so that malformed names
//! fail synchronously with `InvalidTopic` / `InvalidEndpoint`.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::MessageRouterError;

static TOPIC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:@$-]+(/[A-Za-z0-9_.:@$-]+)*$").unwrap());

/// Whether `topic` is a well-formed topic name.
///
/// Topics are `/`-separated segments of `[A-Za-z0-9_.:@$-]`, with no empty
/// segment and no leading or trailing separator.
pub fn is_valid_topic_name(topic: &str) -> bool {
    TOPIC_PATTERN.is_match(topic)
}

/// Whether `endpoint` is a well-formed endpoint name.
pub fn is_valid_endpoint_name(endpoint: &str) -> bool {
    !endpoint.is_empty()
        && !endpoint
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
}

/// Fail with `InvalidTopic` unless the name is well-formed.
pub fn validate_topic(topic: &str) -> Result<(), MessageRouterError> {
    if is_valid_topic_name(topic) {
        Ok(())
    } else {
        Err(MessageRouterError::invalid_topic(topic))
    }
}

/// Fail with `InvalidEndpoint` unless the name is well-formed.
pub fn validate_endpoint(endpoint: &str) -> Result<(), MessageRouterError> {
    if is_valid_endpoint_name(endpoint) {
        Ok(())
    } else {
        Err(MessageRouterError::invalid_endpoint(endpoint))
    }
}
