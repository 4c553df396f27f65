//! Router connecting transports directly to other transports.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::config::DispatcherConfig;
use crate::dispatcher::DispatcherContext;
use crate::error::{ConfigError, DispatchError};
use crate::message::{TransportEvent, UserMessage};
use crate::router::DispatchRouter;

/// Forwards inbound messages from one transport as outbound messages to
/// other transports, per `route_mappings`.
///
/// Events are discarded: transports cannot receive them. Outbound traffic
/// never reaches this router because transports only originate inbound
/// messages.
pub struct TransportToTransportRouter {
    route_mappings: HashMap<String, Vec<String>>,
}

impl TransportToTransportRouter {
    pub fn new(config: &DispatcherConfig) -> Result<Self, ConfigError> {
        if config.route_mappings.is_empty() {
            return Err(ConfigError::MissingOption("route_mappings"));
        }
        Ok(Self {
            route_mappings: config.route_mappings.clone(),
        })
    }
}

#[async_trait]
impl DispatchRouter for TransportToTransportRouter {
    async fn dispatch_inbound_message(
        &self,
        ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        let names = self.route_mappings.get(&msg.transport_name).ok_or_else(|| {
            DispatchError::RouteMiss(format!(
                "no route mapping for transport `{}`",
                msg.transport_name
            ))
        })?;
        for name in names {
            ctx.publish_outbound_message(name, msg.clone()).await?;
        }
        Ok(())
    }

    async fn dispatch_inbound_event(
        &self,
        _ctx: &DispatcherContext,
        event: TransportEvent,
    ) -> Result<(), DispatchError> {
        debug!(
            event_id = %event.event_id,
            transport_name = %event.transport_name,
            "discarding event; transports cannot receive events"
        );
        Ok(())
    }

    async fn dispatch_outbound_message(
        &self,
        _ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        debug!(
            message_id = %msg.message_id,
            "transport-to-transport dispatcher has no outbound side; dropping"
        );
        Ok(())
    }
}
