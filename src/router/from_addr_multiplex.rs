//! Router multiplexing single-address transports behind one exposed name.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::DispatcherConfig;
use crate::dispatcher::DispatcherContext;
use crate::error::{ConfigError, DispatchError};
use crate::message::{TransportEvent, UserMessage};
use crate::router::DispatchRouter;

/// Presents a pool of transports that each serve a single external
/// address as one logical transport.
///
/// `transport_name` is rewritten in both directions: inbound messages and
/// events take the single exposed name; outbound messages take the
/// transport selected by `fromaddr_mappings[from_addr]`. Exactly one
/// exposed name must be configured.
pub struct FromAddrMultiplexRouter {
    exposed_name: String,
    fromaddr_mappings: HashMap<String, String>,
}

impl FromAddrMultiplexRouter {
    pub fn new(config: &DispatcherConfig) -> Result<Self, ConfigError> {
        let [exposed_name] = config.exposed_names.as_slice() else {
            return Err(ConfigError::ExposedNameCardinality {
                router: "FromAddrMultiplexRouter",
                count: config.exposed_names.len(),
            });
        };
        if config.fromaddr_mappings.is_empty() {
            return Err(ConfigError::MissingOption("fromaddr_mappings"));
        }
        Ok(Self {
            exposed_name: exposed_name.clone(),
            fromaddr_mappings: config.fromaddr_mappings.clone(),
        })
    }
}

#[async_trait]
impl DispatchRouter for FromAddrMultiplexRouter {
    async fn dispatch_inbound_message(
        &self,
        ctx: &DispatcherContext,
        mut msg: UserMessage,
    ) -> Result<(), DispatchError> {
        msg.set_transport_name(&self.exposed_name);
        ctx.publish_inbound_message(&self.exposed_name, msg).await
    }

    async fn dispatch_inbound_event(
        &self,
        ctx: &DispatcherContext,
        mut event: TransportEvent,
    ) -> Result<(), DispatchError> {
        event.set_transport_name(&self.exposed_name);
        ctx.publish_inbound_event(&self.exposed_name, event).await
    }

    async fn dispatch_outbound_message(
        &self,
        ctx: &DispatcherContext,
        mut msg: UserMessage,
    ) -> Result<(), DispatchError> {
        let Some(name) = self.fromaddr_mappings.get(&msg.from_addr) else {
            return Err(DispatchError::RouteMiss(format!(
                "no transport for from_addr `{}`",
                msg.from_addr
            )));
        };
        msg.set_transport_name(name);
        ctx.publish_outbound_message(name, msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryMessageBus;
    use crate::dispatcher::test_support::context_for;
    use crate::message::MessageId;

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            transport_names: vec!["t1".into(), "t2".into()],
            exposed_names: vec!["app1".into()],
            router_class: "from_addr_multiplex".into(),
            fromaddr_mappings: HashMap::from([
                ("+1".to_string(), "t1".to_string()),
                ("+2".to_string(), "t2".to_string()),
            ]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn inbound_rewrites_transport_name_to_the_exposed_name() {
        let bus = InMemoryMessageBus::new();
        let ctx = context_for(&bus, &["t1", "t2"], &["app1"]).await;
        let router = FromAddrMultiplexRouter::new(&config()).expect("router");

        let msg = UserMessage::new("t1", "+100", "+1", Some("hi".into()));
        router.dispatch_inbound_message(&ctx, msg).await.expect("dispatch");

        let published = bus.published_messages("app1.inbound").expect("decode");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].transport_name, "app1");
    }

    #[tokio::test]
    async fn events_are_rewritten_too() {
        let bus = InMemoryMessageBus::new();
        let ctx = context_for(&bus, &["t1", "t2"], &["app1"]).await;
        let router = FromAddrMultiplexRouter::new(&config()).expect("router");

        let event = TransportEvent::ack(MessageId::generate(), "t2", "ext");
        router.dispatch_inbound_event(&ctx, event).await.expect("dispatch");

        let published = bus.published_events("app1.event").expect("decode");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].transport_name, "app1");
    }

    #[tokio::test]
    async fn outbound_selects_transport_by_from_addr() {
        let bus = InMemoryMessageBus::new();
        let ctx = context_for(&bus, &["t1", "t2"], &["app1"]).await;
        let router = FromAddrMultiplexRouter::new(&config()).expect("router");

        let msg = UserMessage::new("app1", "+900", "+2", Some("out".into()));
        router.dispatch_outbound_message(&ctx, msg).await.expect("dispatch");

        let published = bus.published_messages("t2.outbound").expect("decode");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].transport_name, "t2");
        assert!(bus.published("t1.outbound").is_empty());
    }

    #[tokio::test]
    async fn outbound_with_unknown_from_addr_is_a_route_miss() {
        let bus = InMemoryMessageBus::new();
        let ctx = context_for(&bus, &["t1", "t2"], &["app1"]).await;
        let router = FromAddrMultiplexRouter::new(&config()).expect("router");

        let msg = UserMessage::new("app1", "+900", "+3", None);
        assert!(matches!(
            router.dispatch_outbound_message(&ctx, msg).await,
            Err(DispatchError::RouteMiss(_))
        ));
        assert!(bus.published("t1.outbound").is_empty());
        assert!(bus.published("t2.outbound").is_empty());
    }

    #[test]
    fn more_than_one_exposed_name_is_rejected() {
        let mut config = config();
        config.exposed_names.push("app2".into());
        assert!(matches!(
            FromAddrMultiplexRouter::new(&config),
            Err(ConfigError::ExposedNameCardinality { count: 2, .. })
        ));
    }
}
