//! Router and per-call options.
//!
//! [`RouterOptions`] load hierarchically with `figment`: compiled defaults,
//! then an optional JSON file, then `COURIER_*` environment variables
//! (highest priority).

use std::path::Path;
use std::time::Duration;

use courier_core::MessageScope;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Environment variable prefix for option overrides.
pub const ENV_PREFIX: &str = "COURIER_";

/// Options loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A provider failed or a value had the wrong type.
    #[error("invalid router configuration: {0}")]
    InvalidFormat(#[from] Box<figment::Error>),

    /// Extraction succeeded but a value is out of range.
    #[error("router configuration validation failed: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },
}

/// Router-wide options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterOptions {
    /// Token sent with `Connect`.
    pub access_token: Option<String>,
    /// How long a connection attempt may take, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Buffer size of the diagnostics event channel.
    pub event_capacity: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            access_token: None,
            connect_timeout_ms: 10_000,
            event_capacity: 256,
        }
    }
}

impl RouterOptions {
    /// Load from defaults and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(None))
    }

    /// Load from defaults, a JSON file, and the environment.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(Some(path.as_ref())))
    }

    /// The provider stack used by [`load`](Self::load).
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Json::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extract and validate from an arbitrary provider stack.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let options: Self = figment.extract().map_err(Box::new)?;
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Validation {
                message: "event_capacity must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Set the access token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Connection timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Options for a single publish.
#[derive(Clone, Debug, Default)]
pub struct PublishOptions {
    /// Restrict delivery to a scope.
    pub scope: MessageScope,
    /// Application correlation token.
    pub correlation_id: Option<String>,
}

impl PublishOptions {
    /// Set the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: MessageScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the correlation token.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Options for a single invocation.
#[derive(Clone, Debug, Default)]
pub struct InvokeOptions {
    /// Route to a scope, for example a specific client.
    pub scope: MessageScope,
    /// Application correlation token.
    pub correlation_id: Option<String>,
    /// Stops waiting for the response when cancelled. The request is not
    /// retracted from the peer.
    pub cancellation: Option<CancellationToken>,
}

impl InvokeOptions {
    /// Set the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: MessageScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the correlation token.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
