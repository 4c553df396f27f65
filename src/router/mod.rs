//! Pluggable routing logic.
//!
//! Routers decide where consumed messages go. The dispatcher hands every
//! consumed envelope to exactly one router through [`DispatchRouter`],
//! together with the [`DispatcherContext`] it publishes through. Routers
//! are constructed once at startup from the dispatcher configuration and
//! live for the process lifetime.
//!
//! `router_class` strings resolve through [`RouterKind`], the static
//! registry: both snake-case short names (`"content_keyword"`) and type
//! names (`"ContentKeywordRouter"`) are accepted.

mod content_keyword;
mod from_addr_multiplex;
mod redirect_outbound;
mod simple;
mod to_addr;
mod transport_to_transport;
mod user_grouping;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

pub use content_keyword::ContentKeywordRouter;
pub use from_addr_multiplex::FromAddrMultiplexRouter;
pub use redirect_outbound::RedirectOutboundRouter;
pub use simple::SimpleRouter;
pub use to_addr::ToAddrRouter;
pub use transport_to_transport::TransportToTransportRouter;
pub use user_grouping::UserGroupingRouter;

use crate::config::DispatcherConfig;
use crate::dispatcher::DispatcherContext;
use crate::error::{ConfigError, DispatchError};
use crate::kv::KeyValueStore;
use crate::message::{TransportEvent, UserMessage};

/// The routing contract every router implements.
///
/// All three operations run inside the consuming dispatch task; an error
/// return is logged there and the message is dropped.
#[async_trait]
pub trait DispatchRouter: Send + Sync {
    /// Routes a user message consumed from `<transport>.inbound`.
    async fn dispatch_inbound_message(
        &self,
        ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError>;

    /// Routes an event consumed from `<transport>.event`.
    async fn dispatch_inbound_event(
        &self,
        ctx: &DispatcherContext,
        event: TransportEvent,
    ) -> Result<(), DispatchError>;

    /// Routes a user message consumed from `<exposed>.outbound`.
    async fn dispatch_outbound_message(
        &self,
        ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError>;
}

/// Static registry of the routers this crate ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterKind {
    Simple,
    TransportToTransport,
    ToAddr,
    FromAddrMultiplex,
    UserGrouping,
    ContentKeyword,
    RedirectOutbound,
}

impl RouterKind {
    /// Whether this router needs a key-value store connection.
    #[must_use]
    pub fn needs_kv(self) -> bool {
        matches!(self, Self::UserGrouping | Self::ContentKeyword)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::TransportToTransport => "transport_to_transport",
            Self::ToAddr => "to_addr",
            Self::FromAddrMultiplex => "from_addr_multiplex",
            Self::UserGrouping => "user_grouping",
            Self::ContentKeyword => "content_keyword",
            Self::RedirectOutbound => "redirect_outbound",
        }
    }
}

impl fmt::Display for RouterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouterKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "simple" | "SimpleRouter" => Ok(Self::Simple),
            "transport_to_transport" | "TransportToTransportRouter" => {
                Ok(Self::TransportToTransport)
            }
            "to_addr" | "ToAddrRouter" => Ok(Self::ToAddr),
            "from_addr_multiplex" | "FromAddrMultiplexRouter" => Ok(Self::FromAddrMultiplex),
            "user_grouping" | "UserGroupingRouter" => Ok(Self::UserGrouping),
            "content_keyword" | "ContentKeywordRouter" => Ok(Self::ContentKeyword),
            "redirect_outbound" | "RedirectOutboundRouter" => Ok(Self::RedirectOutbound),
            other => Err(ConfigError::UnknownRouterClass(other.to_string())),
        }
    }
}

/// Constructs the selected router from the dispatcher configuration.
///
/// `kv` must be provided for the stateful kinds (see
/// [`RouterKind::needs_kv`]); the worker connects it from `redis_config`
/// unless one was injected.
pub fn build_router(
    kind: RouterKind,
    config: &DispatcherConfig,
    kv: Option<Arc<dyn KeyValueStore>>,
) -> Result<Arc<dyn DispatchRouter>, ConfigError> {
    let require_kv = || kv.clone().ok_or(ConfigError::MissingOption("redis_config"));
    Ok(match kind {
        RouterKind::Simple => Arc::new(SimpleRouter::new(config)?),
        RouterKind::TransportToTransport => Arc::new(TransportToTransportRouter::new(config)?),
        RouterKind::ToAddr => Arc::new(ToAddrRouter::new(config)?),
        RouterKind::FromAddrMultiplex => Arc::new(FromAddrMultiplexRouter::new(config)?),
        RouterKind::UserGrouping => Arc::new(UserGroupingRouter::new(config, require_kv()?)?),
        RouterKind::ContentKeyword => Arc::new(ContentKeywordRouter::new(config, require_kv()?)?),
        RouterKind::RedirectOutbound => Arc::new(RedirectOutboundRouter::new(config)?),
    })
}

/// The default outbound behavior shared by the simple-family routers:
/// remap the transport name through `transport_mappings` when present,
/// otherwise pass it through unchanged.
///
/// Specialized routers compose this helper instead of inheriting it.
#[derive(Debug, Clone, Default)]
pub struct SimpleOutbound {
    transport_mappings: HashMap<String, String>,
}

impl SimpleOutbound {
    #[must_use]
    pub fn new(transport_mappings: HashMap<String, String>) -> Self {
        Self { transport_mappings }
    }

    /// Publishes `msg` to its (possibly remapped) transport endpoint.
    pub async fn dispatch(
        &self,
        ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        let name = self
            .transport_mappings
            .get(&msg.transport_name)
            .cloned()
            .unwrap_or_else(|| msg.transport_name.clone());
        ctx.publish_outbound_message(&name, msg).await
    }
}
