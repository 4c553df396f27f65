//! Router dispatching on the first word of the message content.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{DispatcherConfig, RoutingRule};
use crate::dispatcher::DispatcherContext;
use crate::error::{ConfigError, DispatchError};
use crate::kv::{KeyNamespace, KeyValueStore};
use crate::message::{TransportEvent, UserMessage};
use crate::router::DispatchRouter;

/// Leading non-whitespace token of `content`, or the empty string.
#[must_use]
pub fn first_word(content: Option<&str>) -> &str {
    content
        .unwrap_or_default()
        .split_whitespace()
        .next()
        .unwrap_or_default()
}

/// Keyword router for SMS-style traffic.
///
/// Inbound messages are matched against the rule list in declared order;
/// every matching rule's application receives its own clone. Unmatched
/// messages go to `fallback_application` when configured.
///
/// Outbound messages select their transport via
/// `transport_mappings[from_addr]`. After the publish is confirmed the
/// router records `message_id -> transport_name` in the store with a
/// time-to-live, so the transport's later events can be returned to the
/// application that sent the message.
pub struct ContentKeywordRouter {
    rules: Vec<RoutingRule>,
    fallback_application: Option<String>,
    /// from_addr -> transport name.
    transport_mappings: HashMap<String, String>,
    expire_routing_secs: u64,
    ns: KeyNamespace,
    kv: Arc<dyn KeyValueStore>,
}

impl ContentKeywordRouter {
    pub fn new(
        config: &DispatcherConfig,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ConfigError> {
        let name = config.require_dispatcher_name()?;
        if config.transport_mappings.is_empty() {
            return Err(ConfigError::MissingOption("transport_mappings"));
        }

        let mut rules = Vec::with_capacity(config.rules.len() + config.keyword_mappings.len());
        for rule in &config.rules {
            if rule.app.trim().is_empty() || rule.keyword.trim().is_empty() {
                return Err(ConfigError::InvalidRule(format!(
                    "rule for app `{}` must carry both `app` and `keyword`",
                    rule.app
                )));
            }
            rules.push(RoutingRule {
                keyword: rule.keyword.to_lowercase(),
                ..rule.clone()
            });
        }
        for (app, keyword) in &config.keyword_mappings {
            rules.push(RoutingRule {
                app: app.clone(),
                keyword: keyword.to_lowercase(),
                to_addr: None,
                prefix: None,
            });
        }

        Ok(Self {
            rules,
            fallback_application: config.fallback_application.clone(),
            transport_mappings: config.transport_mappings.clone(),
            expire_routing_secs: config.expire_routing_memory.as_secs(),
            ns: KeyNamespace::new(name.to_string()),
            kv,
        })
    }

    fn message_key(&self, message_id: &str) -> String {
        self.ns.key(&["message", message_id])
    }

    fn rule_matches(keyword: &str, msg: &UserMessage, rule: &RoutingRule) -> bool {
        keyword == rule.keyword
            && rule.to_addr.as_ref().is_none_or(|addr| *addr == msg.to_addr)
            && rule
                .prefix
                .as_ref()
                .is_none_or(|prefix| msg.from_addr.starts_with(prefix.as_str()))
    }
}

#[async_trait]
impl DispatchRouter for ContentKeywordRouter {
    async fn dispatch_inbound_message(
        &self,
        ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        let keyword = first_word(msg.content.as_deref()).to_lowercase();
        let mut matched = false;
        for rule in &self.rules {
            if Self::rule_matches(&keyword, &msg, rule) {
                matched = true;
                ctx.publish_inbound_message(&rule.app, msg.clone()).await?;
            }
        }
        if !matched {
            match &self.fallback_application {
                // Single destination, no other consumer: no clone needed.
                Some(app) => ctx.publish_inbound_message(app, msg).await?,
                None => {
                    return Err(DispatchError::RouteMiss(format!(
                        "no keyword rule matched `{keyword}` for message {}",
                        msg.message_id
                    )));
                }
            }
        }
        Ok(())
    }

    async fn dispatch_inbound_event(
        &self,
        ctx: &DispatcherContext,
        event: TransportEvent,
    ) -> Result<(), DispatchError> {
        let key = self.message_key(&event.user_message_id.to_string());
        let Some(stored) = self.kv.get(&key).await? else {
            return Err(DispatchError::RouteMiss(format!(
                "no return route recorded for event on message {}",
                event.user_message_id
            )));
        };
        let name = String::from_utf8_lossy(&stored).into_owned();
        ctx.publish_inbound_event(&name, event).await
    }

    async fn dispatch_outbound_message(
        &self,
        ctx: &DispatcherContext,
        msg: UserMessage,
    ) -> Result<(), DispatchError> {
        let Some(transport) = self.transport_mappings.get(&msg.from_addr) else {
            return Err(DispatchError::RouteMiss(format!(
                "no transport for from_addr `{}`",
                msg.from_addr
            )));
        };
        let message_key = self.message_key(&msg.message_id.to_string());
        // The origin is the application's transport name as consumed,
        // before any rewrite further down the pipeline.
        let origin = msg.transport_name.clone();
        ctx.publish_outbound_message(transport, msg).await?;
        // Recorded only after the confirmed publish; the dispatch task
        // does not complete until the record and its expiry exist.
        self.kv.set(&message_key, origin.as_bytes()).await?;
        self.kv
            .expire(&message_key, self.expire_routing_secs)
            .await?;
        Ok(())
    }
}
