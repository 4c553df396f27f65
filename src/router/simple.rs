//! Simple router: static transport-to-applications mappings.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::DispatcherConfig;
use crate::dispatcher::DispatcherContext;
use crate::error::{ConfigError, DispatchError};
use crate::message::{TransportEvent, UserMessage};
use crate::router::{DispatchRouter, SimpleOutbound};

/// Maps each transport to a fixed list of exposed endpoints.
///
/// Inbound messages and events received on a transport fan out to every
/// exposed endpoint in `route_mappings[transport_name]`, each destination
/// getting its own clone. Outbound messages go to the transport named in
/// the message, optionally remapped through `transport_mappings`.
pub struct SimpleRouter {
    route_mappings: HashMap<String, Vec<String>>,
    outbound: SimpleOutbound,
}

impl SimpleRouter {
    pub fn new(config: &DispatcherConfig) -> Result<Self, ConfigError> {
        if config.route_mappings.is_empty() {
            return Err(ConfigError::MissingOption("route_mappings"));
        }
        Ok(Self::from_parts(
            config.route_mappings.clone(),
            config.transport_mappings.clone(),
        ))
    }

    /// Builds the router from already-extracted sections. Used by the
    /// routers that fall back to simple semantics for part of their
    /// traffic, where an empty mapping is legitimate.
    #[must_use]
    pub fn from_parts(
        route_mappings: HashMap<String, Vec<String>>,
        transport_mappings: HashMap<String, String>,
    ) -> Self {
        Self {
            route_mappings,
            outbound: SimpleOutbound::new(transport_mappings),
        }
    }

    fn destinations(&self, transport_name: &str) -> Result<&[String], DispatchError> {
        self.route_mappings
            .get(transport_name)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                DispatchError::RouteMiss(format!(
                    "no route mapping for transport `{transport_name}`"
                ))
            })
    }
}

#[async_trait]
impl DispatchRouter for SimpleRouter {
    async fn dispatch_inbound_message(
        &self,
        ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        // Each destination gets its own clone so middleware never sees one
        // envelope instance twice.
        for name in self.destinations(&msg.transport_name)? {
            ctx.publish_inbound_message(name, msg.clone()).await?;
        }
        Ok(())
    }

    async fn dispatch_inbound_event(
        &self,
        ctx: &DispatcherContext,
        event: TransportEvent,
    ) -> Result<(), DispatchError> {
        for name in self.destinations(&event.transport_name)? {
            ctx.publish_inbound_event(name, event.clone()).await?;
        }
        Ok(())
    }

    async fn dispatch_outbound_message(
        &self,
        ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        self.outbound.dispatch(ctx, msg).await
    }
}
