//! Error types for the dispatcher core.
//!
//! Errors are grouped by concern. `ConfigError` and `StartupError` are
//! fatal at startup; everything else stays inside the per-message dispatch
//! task, which logs the failure and drops the message. The worker process
//! itself never goes down because of a single bad message.

use thiserror::Error;

/// Configuration errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required option is missing or empty for the selected router.
    #[error("missing required option `{0}`")]
    MissingOption(&'static str),

    /// An endpoint name in `transport_names` / `exposed_names` is empty.
    #[error("invalid endpoint name: {0:?}")]
    InvalidEndpointName(String),

    /// The router demands a different number of exposed names.
    #[error("{router} requires exactly one exposed name, got {count}")]
    ExposedNameCardinality {
        router: &'static str,
        count: usize,
    },

    /// `router_class` did not resolve to a known router.
    #[error("unknown router class `{0}`")]
    UnknownRouterClass(String),

    /// A middleware `cls` did not resolve to a known middleware.
    #[error("unknown middleware class `{0}`")]
    UnknownMiddlewareClass(String),

    /// A keyword routing rule failed validation.
    #[error("invalid routing rule: {0}")]
    InvalidRule(String),

    /// A `toaddr_mappings` pattern failed to compile.
    #[error("invalid to_addr pattern for `{endpoint}`: {source}")]
    InvalidPattern {
        endpoint: String,
        #[source]
        source: regex::Error,
    },

    /// A middleware configuration subtree failed to deserialize.
    #[error("invalid middleware config for `{name}`: {source}")]
    MiddlewareConfig {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while bringing a dispatch worker up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Kv(#[from] KvError),
}

/// Errors surfaced by the bus client facade.
#[derive(Debug, Error)]
pub enum BusError {
    /// A queue already has a consumer attached.
    #[error("consumer already attached to queue `{0}`")]
    ConsumerAttached(String),

    /// The queue's consumer side has gone away.
    #[error("queue `{0}` is closed")]
    QueueClosed(String),

    /// Broker-level failure reported by the underlying client.
    #[error("broker failure: {0}")]
    Broker(String),
}

/// Errors surfaced by the key-value store adapter.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// `incr` hit a value that does not parse as an integer.
    #[error("value at `{key}` is not an integer")]
    NotAnInteger { key: String },
}

/// Errors raised by a middleware while transforming a message.
#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("middleware `{middleware}` failed: {reason}")]
    Failed { middleware: String, reason: String },

    /// A middleware handed back the wrong payload kind for the pipeline.
    #[error("middleware pipeline expected a {expected} payload")]
    UnexpectedPayload { expected: &'static str },
}

/// Per-message dispatch errors. Logged and dropped at the task boundary;
/// never retried, never propagated past the consumer loop.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A router asked for an endpoint outside the configured set. This is
    /// configuration drift and is logged loudly.
    #[error("no {role} publisher for endpoint `{endpoint}`")]
    UnknownEndpoint {
        endpoint: String,
        role: &'static str,
    },

    /// No routing rule or lookup key covered this message.
    #[error("no route for message: {0}")]
    RouteMiss(String),

    #[error(transparent)]
    Middleware(#[from] MiddlewareError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// A consumed payload did not decode as the queue's message class.
    #[error("malformed payload on `{queue}`: {source}")]
    MalformedPayload {
        queue: String,
        #[source]
        source: serde_json::Error,
    },
}
