//! Router redirecting outbound traffic to a different transport.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::warn;

use crate::config::DispatcherConfig;
use crate::dispatcher::DispatcherContext;
use crate::error::{ConfigError, DispatchError};
use crate::message::{TransportEvent, UserMessage};
use crate::router::DispatchRouter;

/// Sends each outbound message to the transport mapped from its
/// `transport_name` in `redirect_outbound`. Outbound only; this router is
/// not wired into any inbound flow.
pub struct RedirectOutboundRouter {
    /// exposed name -> transport name.
    mappings: HashMap<String, String>,
}

impl RedirectOutboundRouter {
    pub fn new(config: &DispatcherConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            mappings: config.redirect_outbound.clone(),
        })
    }
}

#[async_trait]
impl DispatchRouter for RedirectOutboundRouter {
    async fn dispatch_inbound_message(
        &self,
        _ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        warn!(
            message_id = %msg.message_id,
            "redirect-outbound dispatcher received an inbound message; dropping"
        );
        Ok(())
    }

    async fn dispatch_inbound_event(
        &self,
        _ctx: &DispatcherContext,
        event: TransportEvent,
    ) -> Result<(), DispatchError> {
        warn!(
            event_id = %event.event_id,
            "redirect-outbound dispatcher received an inbound event; dropping"
        );
        Ok(())
    }

    async fn dispatch_outbound_message(
        &self,
        ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        let Some(redirect_to) = self.mappings.get(&msg.transport_name) else {
            return Err(DispatchError::RouteMiss(format!(
                "no redirect_outbound entry for `{}`",
                msg.transport_name
            )));
        };
        ctx.publish_outbound_message(redirect_to, msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryMessageBus;
    use crate::dispatcher::test_support::context_for;

    fn router() -> RedirectOutboundRouter {
        let config = DispatcherConfig {
            transport_names: vec!["smpp".into()],
            exposed_names: vec!["app1".into()],
            router_class: "redirect_outbound".into(),
            redirect_outbound: HashMap::from([("app1".to_string(), "smpp".to_string())]),
            ..Default::default()
        };
        RedirectOutboundRouter::new(&config).expect("router")
    }

    #[tokio::test]
    async fn outbound_is_redirected_to_the_mapped_transport() {
        let bus = InMemoryMessageBus::new();
        let ctx = context_for(&bus, &["smpp"], &["app1"]).await;

        let msg = UserMessage::new("app1", "+100", "+200", Some("out".into()));
        router().dispatch_outbound_message(&ctx, msg).await.expect("dispatch");
        assert_eq!(bus.published("smpp.outbound").len(), 1);
    }

    #[tokio::test]
    async fn unmapped_exposed_name_is_a_route_miss() {
        let bus = InMemoryMessageBus::new();
        let ctx = context_for(&bus, &["smpp"], &["app1"]).await;

        let msg = UserMessage::new("app2", "+100", "+200", None);
        assert!(matches!(
            router().dispatch_outbound_message(&ctx, msg).await,
            Err(DispatchError::RouteMiss(_))
        ));
        assert!(bus.published("smpp.outbound").is_empty());
    }

    #[tokio::test]
    async fn inbound_traffic_is_dropped() {
        let bus = InMemoryMessageBus::new();
        let ctx = context_for(&bus, &["smpp"], &["app1"]).await;

        let msg = UserMessage::new("smpp", "+100", "+200", None);
        router().dispatch_inbound_message(&ctx, msg).await.expect("dispatch");
        assert!(bus.published("app1.inbound").is_empty());
    }
}
