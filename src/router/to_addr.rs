//! Router dispatching on the message's `to_addr`.

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use crate::config::DispatcherConfig;
use crate::dispatcher::DispatcherContext;
use crate::error::{ConfigError, DispatchError};
use crate::message::{TransportEvent, UserMessage};
use crate::router::{DispatchRouter, SimpleOutbound};

/// Publishes an inbound message to every exposed endpoint whose pattern
/// matches the start of the message's `to_addr`. Patterns compile once at
/// startup. Outbound traffic keeps the simple remap-or-passthrough
/// behavior.
pub struct ToAddrRouter {
    /// `(exposed_name, pattern)` in sorted name order for deterministic
    /// publish order.
    mappings: Vec<(String, Regex)>,
    outbound: SimpleOutbound,
}

impl ToAddrRouter {
    pub fn new(config: &DispatcherConfig) -> Result<Self, ConfigError> {
        if config.toaddr_mappings.is_empty() {
            return Err(ConfigError::MissingOption("toaddr_mappings"));
        }
        let mut mappings = Vec::with_capacity(config.toaddr_mappings.len());
        for (name, pattern) in &config.toaddr_mappings {
            let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                endpoint: name.clone(),
                source,
            })?;
            mappings.push((name.clone(), regex));
        }
        mappings.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self {
            mappings,
            outbound: SimpleOutbound::new(config.transport_mappings.clone()),
        })
    }

    fn matches_start(regex: &Regex, addr: &str) -> bool {
        regex.find(addr).is_some_and(|m| m.start() == 0)
    }
}

#[async_trait]
impl DispatchRouter for ToAddrRouter {
    async fn dispatch_inbound_message(
        &self,
        ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        let mut matched = false;
        for (name, regex) in &self.mappings {
            if Self::matches_start(regex, &msg.to_addr) {
                matched = true;
                ctx.publish_inbound_message(name, msg.clone()).await?;
            }
        }
        if !matched {
            info!(
                message_id = %msg.message_id,
                to_addr = %msg.to_addr,
                "no to_addr pattern matched; message not delivered"
            );
        }
        Ok(())
    }

    async fn dispatch_inbound_event(
        &self,
        _ctx: &DispatcherContext,
        event: TransportEvent,
    ) -> Result<(), DispatchError> {
        // TODO: dispatch to wherever the original outbound message went,
        // looked up by user_message_id, once a return-route store is
        // attached to this router.
        debug!(
            event_id = %event.event_id,
            user_message_id = %event.user_message_id,
            "event routing not configured for to_addr dispatching; dropping"
        );
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
