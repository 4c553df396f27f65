//! The dispatch worker: endpoint wiring, dispatch operations, lifecycle.
//!
//! Startup is strictly ordered: validate configuration, build the
//! middleware stack, construct the router, declare transport-side
//! outbound publishers, declare exposed-side inbound/event publishers,
//! then attach consumers. Publishers always exist before any consumer of
//! the opposite direction starts, so a message consumed immediately after
//! startup has a valid publisher path.
//!
//! Each queue gets one consumer task that decodes payloads and hands them
//! to the router sequentially, preserving per-queue ordering. Failures
//! never cross the per-message boundary: the consumer loop logs the error
//! and moves on, and the worker stays up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{BusConsumer, MessageBus, QueuePublisher};
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, StartupError};
use crate::kv::{KeyValueStore, RedisKeyValueStore};
use crate::message::{TransportEvent, UserMessage};
use crate::middleware::{
    setup_middlewares, Direction, DispatchPayload, Middleware, MiddlewareStack,
};
use crate::router::{build_router, DispatchRouter, RouterKind};

/// How long `shutdown` waits for in-flight dispatch tasks to drain.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The publishing half of the dispatcher, shared with the router on every
/// dispatch call. Owns the middleware stack and one publisher per
/// configured endpoint and direction.
pub struct DispatcherContext {
    middlewares: MiddlewareStack,
    /// `T.outbound` per transport name.
    transport_publishers: HashMap<String, Arc<dyn QueuePublisher>>,
    /// `E.inbound` per exposed name.
    exposed_publishers: HashMap<String, Arc<dyn QueuePublisher>>,
    /// `E.event` per exposed name.
    exposed_event_publishers: HashMap<String, Arc<dyn QueuePublisher>>,
}

impl DispatcherContext {
    async fn publish(
        &self,
        publishers: &HashMap<String, Arc<dyn QueuePublisher>>,
        role: &'static str,
        direction: Direction,
        endpoint: &str,
        payload: DispatchPayload,
    ) -> Result<(), DispatchError> {
        let Some(publisher) = publishers.get(endpoint) else {
            error!(
                endpoint,
                role, "publish to unknown endpoint; configuration drift"
            );
            return Err(DispatchError::UnknownEndpoint {
                endpoint: endpoint.to_string(),
                role,
            });
        };
        let Some(payload) = self
            .middlewares
            .apply_publish(direction, payload, endpoint)
            .await?
        else {
            return Ok(());
        };
        publisher.publish(payload.to_bytes()?).await?;
        Ok(())
    }

    /// Publishes a user message to `<endpoint>.inbound` on the exposed
    /// side, running the inbound publish-chain first.
    pub async fn publish_inbound_message(
        &self,
        endpoint: &str,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        self.publish(
            &self.exposed_publishers,
            "inbound",
            Direction::Inbound,
            endpoint,
            DispatchPayload::User(msg),
        )
        .await
    }

    /// Publishes an event to `<endpoint>.event` on the exposed side.
    pub async fn publish_inbound_event(
        &self,
        endpoint: &str,
        event: TransportEvent,
    ) -> Result<(), DispatchError> {
        self.publish(
            &self.exposed_event_publishers,
            "event",
            Direction::Event,
            endpoint,
            DispatchPayload::Event(event),
        )
        .await
    }

    /// Publishes a user message to `<endpoint>.outbound` on the transport
    /// side.
    pub async fn publish_outbound_message(
        &self,
        endpoint: &str,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        self.publish(
            &self.transport_publishers,
            "outbound",
            Direction::Outbound,
            endpoint,
            DispatchPayload::User(msg),
        )
        .await
    }
}

/// Which dispatch operation a consumer queue feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumerRole {
    TransportInbound,
    TransportEvent,
    ExposedOutbound,
}

/// Builder for a [`DispatchWorker`], allowing tests and embedders to
/// inject a router, a key-value store, or extra middleware ahead of
/// startup.
pub struct DispatchWorkerBuilder {
    config: DispatcherConfig,
    bus: Arc<dyn MessageBus>,
    router: Option<Arc<dyn DispatchRouter>>,
    kv: Option<Arc<dyn KeyValueStore>>,
    extra_middleware: Vec<Arc<dyn Middleware>>,
}

impl DispatchWorkerBuilder {
    #[must_use]
    pub fn new(config: DispatcherConfig, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            config,
            bus,
            router: None,
            kv: None,
            extra_middleware: Vec::new(),
        }
    }

    /// Uses `router` instead of resolving `router_class`.
    #[must_use]
    pub fn with_router(mut self, router: Arc<dyn DispatchRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Uses `kv` instead of connecting to Redis for stateful routers.
    #[must_use]
    pub fn with_kv_store(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Appends a middleware behind the configured stack.
    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.extra_middleware.push(middleware);
        self
    }

    /// Brings the worker up following the strict startup order.
    pub async fn start(self) -> Result<DispatchWorker, StartupError> {
        let Self {
            config,
            bus,
            router,
            kv,
            extra_middleware,
        } = self;

        config.validate()?;
        info!(config = ?config, "Starting a {} dispatcher", config.router_class);

        let mut middlewares = setup_middlewares(&config.middleware)?;
        for middleware in extra_middleware {
            middlewares.push(middleware);
        }

        let router = match router {
            Some(router) => router,
            None => {
                let kind: RouterKind = config.router_class.parse()?;
                let kv = if kind.needs_kv() {
                    Some(match kv {
                        Some(kv) => kv,
                        None => {
                            let redis_config = config.redis_config.clone().unwrap_or_default();
                            Arc::new(RedisKeyValueStore::connect(&redis_config).await?)
                                as Arc<dyn KeyValueStore>
                        }
                    })
                } else {
                    None
                };
                build_router(kind, &config, kv)?
            }
        };

        let mut transport_publishers = HashMap::new();
        for name in &config.transport_names {
            let publisher = bus.declare_publisher(&format!("{name}.outbound")).await?;
            transport_publishers.insert(name.clone(), publisher);
        }

        let mut exposed_publishers = HashMap::new();
        for name in &config.exposed_names {
            let publisher = bus.declare_publisher(&format!("{name}.inbound")).await?;
            exposed_publishers.insert(name.clone(), publisher);
        }
        let mut exposed_event_publishers = HashMap::new();
        for name in &config.exposed_names {
            let publisher = bus.declare_publisher(&format!("{name}.event")).await?;
            exposed_event_publishers.insert(name.clone(), publisher);
        }

        let ctx = Arc::new(DispatcherContext {
            middlewares,
            transport_publishers,
            exposed_publishers,
            exposed_event_publishers,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut consumers = Vec::new();

        for name in &config.transport_names {
            let consumer = bus.attach_consumer(&format!("{name}.inbound")).await?;
            consumers.push(spawn_consumer(
                consumer,
                name.clone(),
                ConsumerRole::TransportInbound,
                Arc::clone(&ctx),
                Arc::clone(&router),
                shutdown_rx.clone(),
            ));
        }
        for name in &config.transport_names {
            let consumer = bus.attach_consumer(&format!("{name}.event")).await?;
            consumers.push(spawn_consumer(
                consumer,
                name.clone(),
                ConsumerRole::TransportEvent,
                Arc::clone(&ctx),
                Arc::clone(&router),
                shutdown_rx.clone(),
            ));
        }
        for name in &config.exposed_names {
            let consumer = bus.attach_consumer(&format!("{name}.outbound")).await?;
            consumers.push(spawn_consumer(
                consumer,
                name.clone(),
                ConsumerRole::ExposedOutbound,
                Arc::clone(&ctx),
                Arc::clone(&router),
                shutdown_rx.clone(),
            ));
        }

        Ok(DispatchWorker {
            ctx,
            router,
            shutdown_tx,
            consumers,
        })
    }
}

/// A running dispatch worker. Owns every consumer and publisher handle;
/// dropping or shutting it down releases them.
pub struct DispatchWorker {
    ctx: Arc<DispatcherContext>,
    router: Arc<dyn DispatchRouter>,
    shutdown_tx: watch::Sender<bool>,
    consumers: Vec<JoinHandle<()>>,
}

impl DispatchWorker {
    /// Starts a worker with the default router resolution and Redis
    /// connection. See [`DispatchWorkerBuilder`] for injection points.
    pub async fn start(
        config: DispatcherConfig,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self, StartupError> {
        DispatchWorkerBuilder::new(config, bus).start().await
    }

    /// The publishing context shared with the router.
    #[must_use]
    pub fn context(&self) -> &Arc<DispatcherContext> {
        &self.ctx
    }

    /// Runs the inbound consume-chain for `endpoint`, then the router.
    pub async fn dispatch_inbound_message(
        &self,
        endpoint: &str,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        dispatch_inbound_message(&self.ctx, self.router.as_ref(), endpoint, msg).await
    }

    /// Runs the event consume-chain for `endpoint`, then the router.
    pub async fn dispatch_inbound_event(
        &self,
        endpoint: &str,
        event: TransportEvent,
    ) -> Result<(), DispatchError> {
        dispatch_inbound_event(&self.ctx, self.router.as_ref(), endpoint, event).await
    }

    /// Runs the outbound consume-chain for `endpoint`, then the router.
    pub async fn dispatch_outbound_message(
        &self,
        endpoint: &str,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        dispatch_outbound_message(&self.ctx, self.router.as_ref(), endpoint, msg).await
    }

    /// Graceful shutdown with the default drain window.
    pub async fn shutdown(self) {
        self.shutdown_with_timeout(DEFAULT_DRAIN_TIMEOUT).await;
    }

    /// Stops accepting consumer callbacks and waits up to `drain` for
    /// in-flight dispatch tasks to finish.
    pub async fn shutdown_with_timeout(self, drain: Duration) {
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(drain, future::join_all(self.consumers))
            .await
            .is_err()
        {
            warn!(?drain, "dispatch tasks did not drain in time");
        }
        info!("dispatcher stopped");
    }
}

async fn dispatch_inbound_message(
    ctx: &DispatcherContext,
    router: &dyn DispatchRouter,
    endpoint: &str,
    msg: UserMessage,
) -> Result<(), DispatchError> {
    let Some(payload) = ctx
        .middlewares
        .apply_consume(Direction::Inbound, DispatchPayload::User(msg), endpoint)
        .await?
    else {
        return Ok(());
    };
    router.dispatch_inbound_message(ctx, payload.into_user()?).await
}

async fn dispatch_inbound_event(
    ctx: &DispatcherContext,
    router: &dyn DispatchRouter,
    endpoint: &str,
    event: TransportEvent,
) -> Result<(), DispatchError> {
    let Some(payload) = ctx
        .middlewares
        .apply_consume(Direction::Event, DispatchPayload::Event(event), endpoint)
        .await?
    else {
        return Ok(());
    };
    router.dispatch_inbound_event(ctx, payload.into_event()?).await
}

async fn dispatch_outbound_message(
    ctx: &DispatcherContext,
    router: &dyn DispatchRouter,
    endpoint: &str,
    msg: UserMessage,
) -> Result<(), DispatchError> {
    let Some(payload) = ctx
        .middlewares
        .apply_consume(Direction::Outbound, DispatchPayload::User(msg), endpoint)
        .await?
    else {
        return Ok(());
    };
    router.dispatch_outbound_message(ctx, payload.into_user()?).await
}

fn spawn_consumer(
    mut consumer: BusConsumer,
    endpoint: String,
    role: ConsumerRole,
    ctx: Arc<DispatcherContext>,
    router: Arc<dyn DispatchRouter>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let queue = consumer.queue().to_string();
        debug!(%queue, "consumer attached");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                payload = consumer.next() => {
                    let Some(payload) = payload else { break };
                    if let Err(error) =
                        handle_payload(&queue, &endpoint, role, &ctx, router.as_ref(), &payload)
                            .await
                    {
                        error!(%queue, endpoint = %endpoint, %error, "message dropped");
                    }
                }
            }
        }
        debug!(%queue, "consumer stopped");
    })
}

async fn handle_payload(
    queue: &str,
    endpoint: &str,
    role: ConsumerRole,
    ctx: &DispatcherContext,
    router: &dyn DispatchRouter,
    payload: &[u8],
) -> Result<(), DispatchError> {
    match role {
        ConsumerRole::TransportInbound => {
            let msg: UserMessage =
                serde_json::from_slice(payload).map_err(|source| DispatchError::MalformedPayload {
                    queue: queue.to_string(),
                    source,
                })?;
            dispatch_inbound_message(ctx, router, endpoint, msg).await
        }
        ConsumerRole::TransportEvent => {
            let event: TransportEvent =
                serde_json::from_slice(payload).map_err(|source| DispatchError::MalformedPayload {
                    queue: queue.to_string(),
                    source,
                })?;
            dispatch_inbound_event(ctx, router, endpoint, event).await
        }
        ConsumerRole::ExposedOutbound => {
            let msg: UserMessage =
                serde_json::from_slice(payload).map_err(|source| DispatchError::MalformedPayload {
                    queue: queue.to_string(),
                    source,
                })?;
            dispatch_outbound_message(ctx, router, endpoint, msg).await
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Context construction for router unit tests.

    use super::*;
    use crate::bus::InMemoryMessageBus;

    /// Builds a context over a fresh in-memory bus with publishers for the
    /// given endpoint names and an empty middleware stack.
    pub(crate) async fn context_for(
        bus: &InMemoryMessageBus,
        transport_names: &[&str],
        exposed_names: &[&str],
    ) -> DispatcherContext {
        let mut transport_publishers = HashMap::new();
        for name in transport_names {
            let publisher = bus
                .declare_publisher(&format!("{name}.outbound"))
                .await
                .expect("declare");
            transport_publishers.insert((*name).to_string(), publisher);
        }
        let mut exposed_publishers = HashMap::new();
        let mut exposed_event_publishers = HashMap::new();
        for name in exposed_names {
            exposed_publishers.insert(
                (*name).to_string(),
                bus.declare_publisher(&format!("{name}.inbound"))
                    .await
                    .expect("declare"),
            );
            exposed_event_publishers.insert(
                (*name).to_string(),
                bus.declare_publisher(&format!("{name}.event"))
                    .await
                    .expect("declare"),
            );
        }
        DispatcherContext {
            middlewares: MiddlewareStack::default(),
            transport_publishers,
            exposed_publishers,
            exposed_event_publishers,
        }
    }
}
