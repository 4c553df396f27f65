//! Router assigning users round-robin to fixed groups.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DispatcherConfig;
use crate::dispatcher::DispatcherContext;
use crate::error::{ConfigError, DispatchError};
use crate::kv::{KeyNamespace, KeyValueStore};
use crate::message::{TransportEvent, UserMessage};
use crate::router::{DispatchRouter, SimpleRouter};

/// Dispatches on the message's user key. Each first-seen user is assigned
/// to the next group in round-robin order; the assignment is persisted in
/// the key-value store and stays stable until that entry is evicted.
///
/// Groups iterate in sorted name order, so processes sharing one store
/// assign deterministically. Events and outbound traffic fall through to
/// simple-router semantics.
pub struct UserGroupingRouter {
    /// group name -> exposed endpoint, sorted by group name.
    groups: BTreeMap<String, String>,
    kv: Arc<dyn KeyValueStore>,
    ns: KeyNamespace,
    fallthrough: SimpleRouter,
}

impl UserGroupingRouter {
    pub fn new(
        config: &DispatcherConfig,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ConfigError> {
        let name = config.require_dispatcher_name()?;
        if config.group_mappings.is_empty() {
            return Err(ConfigError::MissingOption("group_mappings"));
        }
        Ok(Self {
            groups: config.group_mappings.clone(),
            kv,
            ns: KeyNamespace::new(name.to_string()),
            fallthrough: SimpleRouter::from_parts(
                config.route_mappings.clone(),
                config.transport_mappings.clone(),
            ),
        })
    }

    /// Looks up the user's group, assigning the next round-robin slot on
    /// first sight.
    async fn group_for_user(&self, user_id: &str) -> Result<String, DispatchError> {
        let user_key = self.ns.key(&["user", user_id]);
        if let Some(stored) = self.kv.get(&user_key).await? {
            return Ok(String::from_utf8_lossy(&stored).into_owned());
        }
        let counter = self.kv.incr(&self.ns.key(&["round-robin"])).await? - 1;
        let index = usize::try_from(counter).unwrap_or(0) % self.groups.len();
        let group = self
            .groups
            .keys()
            .nth(index)
            .cloned()
            .ok_or_else(|| DispatchError::RouteMiss("no groups configured".to_string()))?;
        self.kv.set(&user_key, group.as_bytes()).await?;
        Ok(group)
    }
}

#[async_trait]
impl DispatchRouter for UserGroupingRouter {
    async fn dispatch_inbound_message(
        &self,
        ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        let group = self.group_for_user(msg.user()).await?;
        let Some(app) = self.groups.get(&group) else {
            // A stored assignment may outlive a group that was removed
            // from the configuration; keep the stored value (I4) and
            // report the miss.
            return Err(DispatchError::RouteMiss(format!(
                "user group `{group}` has no mapped endpoint"
            )));
        };
        ctx.publish_inbound_message(app, msg).await
    }

    async fn dispatch_inbound_event(
        &self,
        ctx: &DispatcherContext,
        event: TransportEvent,
    ) -> Result<(), DispatchError> {
        self.fallthrough.dispatch_inbound_event(ctx, event).await
    }

    async fn dispatch_outbound_message(
        &self,
        ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        self.fallthrough.dispatch_outbound_message(ctx, msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryMessageBus;
    use crate::config::DispatcherName;
    use crate::dispatcher::test_support::context_for;
    use crate::kv::InMemoryKeyValueStore;

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            transport_names: vec!["sms_in".into()],
            exposed_names: vec!["appA".into(), "appB".into()],
            router_class: "user_grouping".into(),
            group_mappings: BTreeMap::from([
                ("a".to_string(), "appA".to_string()),
                ("b".to_string(), "appB".to_string()),
            ]),
            dispatcher_name: Some(DispatcherName::try_new("grouper".to_string()).expect("name")),
            ..Default::default()
        }
    }

    fn message_from(from_addr: &str) -> UserMessage {
        UserMessage::new("sms_in", "+100", from_addr, Some("hi".into()))
    }

    #[tokio::test]
    async fn users_are_assigned_round_robin_in_sorted_group_order() {
        let bus = InMemoryMessageBus::new();
        let ctx = context_for(&bus, &["sms_in"], &["appA", "appB"]).await;
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let router = UserGroupingRouter::new(&config(), kv).expect("router");

        for user in ["u1", "u2", "u3", "u1"] {
            router
                .dispatch_inbound_message(&ctx, message_from(user))
                .await
                .expect("dispatch");
        }

        let a = bus.published_messages("appA.inbound").expect("decode");
        let b = bus.published_messages("appB.inbound").expect("decode");
        assert_eq!(
            a.iter().map(|m| m.from_addr.as_str()).collect::<Vec<_>>(),
            vec!["u1", "u3", "u1"]
        );
        assert_eq!(
            b.iter().map(|m| m.from_addr.as_str()).collect::<Vec<_>>(),
            vec!["u2"]
        );
    }

    #[tokio::test]
    async fn assignment_is_stable_until_the_entry_is_evicted() {
        let bus = InMemoryMessageBus::new();
        let ctx = context_for(&bus, &["sms_in"], &["appA", "appB"]).await;
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let router =
            UserGroupingRouter::new(&config(), Arc::clone(&kv) as Arc<dyn KeyValueStore>)
                .expect("router");

        router
            .dispatch_inbound_message(&ctx, message_from("u1"))
            .await
            .expect("dispatch");
        // Advance the counter so a reassignment would land elsewhere.
        router
            .dispatch_inbound_message(&ctx, message_from("u2"))
            .await
            .expect("dispatch");
        router
            .dispatch_inbound_message(&ctx, message_from("u1"))
            .await
            .expect("dispatch");
        assert_eq!(bus.published("appA.inbound").len(), 2);

        // Evicting the user entry hands u1 the next round-robin slot.
        kv.evict("grouper:user:u1");
        router
            .dispatch_inbound_message(&ctx, message_from("u1"))
            .await
            .expect("dispatch");
        assert_eq!(bus.published("appA.inbound").len(), 3);
    }

    #[tokio::test]
    async fn assignment_keys_are_namespaced_by_dispatcher_name() {
        let bus = InMemoryMessageBus::new();
        let ctx = context_for(&bus, &["sms_in"], &["appA", "appB"]).await;
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let router =
            UserGroupingRouter::new(&config(), Arc::clone(&kv) as Arc<dyn KeyValueStore>)
                .expect("router");

        router
            .dispatch_inbound_message(&ctx, message_from("u1"))
            .await
            .expect("dispatch");

        let stored = kv.get("grouper:user:u1").await.expect("get");
        assert_eq!(stored, Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn events_fall_through_to_simple_routing() {
        let bus = InMemoryMessageBus::new();
        let ctx = context_for(&bus, &["sms_in"], &["appA", "appB"]).await;
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let mut config = config();
        config.route_mappings =
            std::collections::HashMap::from([("sms_in".to_string(), vec!["appA".to_string()])]);
        let router = UserGroupingRouter::new(&config, kv).expect("router");

        let event =
            TransportEvent::ack(crate::message::MessageId::generate(), "sms_in", "ext-1");
        router.dispatch_inbound_event(&ctx, event).await.expect("dispatch");
        assert_eq!(bus.published("appA.event").len(), 1);
    }

    #[test]
    fn dispatcher_name_is_required() {
        let mut config = config();
        config.dispatcher_name = None;
        let kv = Arc::new(InMemoryKeyValueStore::new());
        assert!(matches!(
            UserGroupingRouter::new(&config, kv),
            Err(ConfigError::MissingOption("dispatcher_name"))
        ));
    }
}
