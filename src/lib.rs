//! # Switchboard — message dispatcher core
//!
//! Switchboard sits between low-level bearer transports (SMS gateways,
//! XMPP servers, USSD gateways, HTTP APIs) and application endpoints
//! (chat bots, campaigns, other dispatchers) on a message bus. Inbound
//! messages arrive on transport-named queues, get transformed by an
//! ordered middleware pipeline, and are routed by a pluggable router to
//! one or more application-named queues; outbound messages flow back to
//! the right transport, and delivery events follow the routing of the
//! message that caused them.
//!
//! ## Core pieces
//!
//! - [`DispatchWorker`]: wires one consumer/publisher per configured
//!   endpoint queue and owns the process lifecycle.
//! - [`MiddlewareStack`]: ordered transformers applied on consume and, in
//!   reverse order, on publish.
//! - [`DispatchRouter`]: the routing contract, with seven shipped
//!   implementations selected through `router_class`.
//! - [`KeyValueStore`]: the store behind the stateful routers (round-robin
//!   group assignment, return-route memory for delivery events).
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchboard::{DispatchWorker, DispatcherConfig, InMemoryMessageBus};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config: DispatcherConfig = serde_json::from_str(
//!     r#"{
//!         "transport_names": ["sms_in"],
//!         "exposed_names": ["appA", "appB"],
//!         "router_class": "simple",
//!         "route_mappings": {"sms_in": ["appA", "appB"]}
//!     }"#,
//! )?;
//!
//! let bus = Arc::new(InMemoryMessageBus::new());
//! let worker = DispatchWorker::start(config, bus).await?;
//! // ... consume and publish through the bus ...
//! worker.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod kv;
pub mod message;
pub mod middleware;
pub mod router;

pub use crate::bus::{BusConsumer, InMemoryMessageBus, MessageBus, QueuePublisher};
pub use crate::config::{
    DispatcherConfig, DispatcherName, RedisConfig, RoutingMemoryTtlSecs, RoutingRule,
};
pub use crate::dispatcher::{DispatchWorker, DispatchWorkerBuilder, DispatcherContext};
pub use crate::error::{
    BusError, ConfigError, DispatchError, KvError, MiddlewareError, StartupError,
};
pub use crate::kv::{InMemoryKeyValueStore, KeyNamespace, KeyValueStore, RedisKeyValueStore};
pub use crate::message::{
    DeliveryStatus, EventType, MessageId, SessionEvent, TransportEvent, UserMessage,
};
pub use crate::middleware::{
    Direction, DispatchPayload, Handled, LoggingMiddleware, Middleware, MiddlewareSpec,
    MiddlewareStack,
};
pub use crate::router::{
    build_router, ContentKeywordRouter, DispatchRouter, FromAddrMultiplexRouter,
    RedirectOutboundRouter, RouterKind, SimpleOutbound, SimpleRouter, ToAddrRouter,
    TransportToTransportRouter, UserGroupingRouter,
};

/// Installs a `tracing` subscriber reading `RUST_LOG`, defaulting to
/// `info` for this crate. Safe to call more than once; later calls are
/// no-ops.
pub fn init_telemetry() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("switchboard=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
