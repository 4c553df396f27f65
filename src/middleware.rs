//! Middleware pipeline applied around every consume and publish.
//!
//! A middleware sees traffic for all direction tags and may transform the
//! payload, drop it (which suppresses the rest of the pipeline and the
//! eventual publish), or fail (which drops the message at the dispatch
//! task boundary). The stack applies [`Middleware::handle_consume`] in
//! declared order on ingress and [`Middleware::handle_publish`] in
//! reverse declared order on egress.
//!
//! Middleware instances are constructed once at startup and shared across
//! all dispatch tasks, so they must be stateless or internally
//! synchronized.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ConfigError, MiddlewareError};
use crate::message::{MessageId, TransportEvent, UserMessage};

/// Queue role a payload is traveling under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
    Event,
    Failure,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
            Self::Event => "event",
            Self::Failure => "failure",
        }
    }
}

/// Envelope flowing through the pipeline: a user message or an event.
#[derive(Debug, Clone)]
pub enum DispatchPayload {
    User(UserMessage),
    Event(TransportEvent),
}

impl DispatchPayload {
    #[must_use]
    pub fn message_id(&self) -> MessageId {
        match self {
            Self::User(msg) => msg.message_id,
            Self::Event(event) => event.event_id,
        }
    }

    #[must_use]
    pub fn transport_name(&self) -> &str {
        match self {
            Self::User(msg) => &msg.transport_name,
            Self::Event(event) => &event.transport_name,
        }
    }

    /// Serializes the envelope for the wire.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        let encoded = match self {
            Self::User(msg) => serde_json::to_vec(msg)?,
            Self::Event(event) => serde_json::to_vec(event)?,
        };
        Ok(Bytes::from(encoded))
    }

    /// Unwraps a user message, failing if a middleware swapped the kind.
    pub fn into_user(self) -> Result<UserMessage, MiddlewareError> {
        match self {
            Self::User(msg) => Ok(msg),
            Self::Event(_) => Err(MiddlewareError::UnexpectedPayload {
                expected: "user message",
            }),
        }
    }

    /// Unwraps an event, failing if a middleware swapped the kind.
    pub fn into_event(self) -> Result<TransportEvent, MiddlewareError> {
        match self {
            Self::Event(event) => Ok(event),
            Self::User(_) => Err(MiddlewareError::UnexpectedPayload { expected: "event" }),
        }
    }
}

/// Outcome of one middleware hook.
#[derive(Debug)]
pub enum Handled {
    /// Keep going with this (possibly transformed) payload.
    Continue(DispatchPayload),
    /// Stop the pipeline; the message is not published.
    Drop,
}

/// A single message transformer. Both hooks default to pass-through.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Configured instance name, used in logs and failure reports.
    fn name(&self) -> &str;

    /// Applied on every consumed payload, in declared stack order.
    async fn handle_consume(
        &self,
        direction: Direction,
        payload: DispatchPayload,
        endpoint: &str,
    ) -> Result<Handled, MiddlewareError> {
        let _ = (direction, endpoint);
        Ok(Handled::Continue(payload))
    }

    /// Applied on every published payload, in reverse declared order.
    async fn handle_publish(
        &self,
        direction: Direction,
        payload: DispatchPayload,
        endpoint: &str,
    ) -> Result<Handled, MiddlewareError> {
        let _ = (direction, endpoint);
        Ok(Handled::Continue(payload))
    }
}

/// Ordered middleware pipeline shared by every dispatch task.
#[derive(Clone, Default)]
pub struct MiddlewareStack {
    entries: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    #[must_use]
    pub fn new(entries: Vec<Arc<dyn Middleware>>) -> Self {
        Self { entries }
    }

    /// Appends a middleware behind the configured ones.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.entries.push(middleware);
    }

    /// Runs the consume chain. `None` means a middleware dropped the
    /// payload and dispatch must stop.
    pub async fn apply_consume(
        &self,
        direction: Direction,
        mut payload: DispatchPayload,
        endpoint: &str,
    ) -> Result<Option<DispatchPayload>, MiddlewareError> {
        for middleware in &self.entries {
            match middleware
                .handle_consume(direction, payload, endpoint)
                .await?
            {
                Handled::Continue(next) => payload = next,
                Handled::Drop => {
                    debug!(
                        middleware = middleware.name(),
                        endpoint,
                        direction = direction.as_str(),
                        "middleware dropped consumed message"
                    );
                    return Ok(None);
                }
            }
        }
        Ok(Some(payload))
    }

    /// Runs the publish chain, in reverse declared order.
    pub async fn apply_publish(
        &self,
        direction: Direction,
        mut payload: DispatchPayload,
        endpoint: &str,
    ) -> Result<Option<DispatchPayload>, MiddlewareError> {
        for middleware in self.entries.iter().rev() {
            match middleware
                .handle_publish(direction, payload, endpoint)
                .await?
            {
                Handled::Continue(next) => payload = next,
                Handled::Drop => {
                    debug!(
                        middleware = middleware.name(),
                        endpoint,
                        direction = direction.as_str(),
                        "middleware dropped published message"
                    );
                    return Ok(None);
                }
            }
        }
        Ok(Some(payload))
    }
}

/// One entry of the dispatcher's `middleware` configuration list.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MiddlewareSpec {
    /// Instance name, free-form.
    pub name: String,
    /// Middleware class, resolved through the built-in registry.
    pub cls: String,
    /// Class-specific configuration subtree.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Builds the stack from the configured middleware list.
pub fn setup_middlewares(specs: &[MiddlewareSpec]) -> Result<MiddlewareStack, ConfigError> {
    let mut entries: Vec<Arc<dyn Middleware>> = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec.cls.as_str() {
            "logging" | "LoggingMiddleware" => {
                entries.push(Arc::new(LoggingMiddleware::from_spec(spec)?));
            }
            other => return Err(ConfigError::UnknownMiddlewareClass(other.to_string())),
        }
    }
    Ok(MiddlewareStack::new(entries))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LogLevel {
    #[default]
    Debug,
    Info,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingConfig {
    #[serde(default)]
    log_level: LogLevel,
}

/// Stock middleware that logs every payload passing its position in the
/// stack. Pass-through otherwise.
pub struct LoggingMiddleware {
    name: String,
    level: LogLevel,
}

impl LoggingMiddleware {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: LogLevel::Debug,
        }
    }

    fn from_spec(spec: &MiddlewareSpec) -> Result<Self, ConfigError> {
        let config: LoggingConfig = if spec.config.is_null() {
            LoggingConfig::default()
        } else {
            serde_json::from_value(spec.config.clone()).map_err(|source| {
                ConfigError::MiddlewareConfig {
                    name: spec.name.clone(),
                    source,
                }
            })?
        };
        Ok(Self {
            name: spec.name.clone(),
            level: config.log_level,
        })
    }

    fn log(&self, hook: &str, direction: Direction, payload: &DispatchPayload, endpoint: &str) {
        match self.level {
            LogLevel::Debug => debug!(
                middleware = %self.name,
                hook,
                direction = direction.as_str(),
                endpoint,
                message_id = %payload.message_id(),
                transport_name = payload.transport_name(),
                "processing message"
            ),
            LogLevel::Info => info!(
                middleware = %self.name,
                hook,
                direction = direction.as_str(),
                endpoint,
                message_id = %payload.message_id(),
                transport_name = payload.transport_name(),
                "processing message"
            ),
        }
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle_consume(
        &self,
        direction: Direction,
        payload: DispatchPayload,
        endpoint: &str,
    ) -> Result<Handled, MiddlewareError> {
        self.log("consume", direction, &payload, endpoint);
        Ok(Handled::Continue(payload))
    }

    async fn handle_publish(
        &self,
        direction: Direction,
        payload: DispatchPayload,
        endpoint: &str,
    ) -> Result<Handled, MiddlewareError> {
        self.log("publish", direction, &payload, endpoint);
        Ok(Handled::Continue(payload))
    }
}
