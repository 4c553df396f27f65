//! Dispatcher configuration.
//!
//! One [`DispatcherConfig`] struct carries the endpoint lists, the router
//! selection, the middleware list, and every per-router section. Sections
//! a given router does not use are simply ignored by it; the selected
//! router validates its own sections at startup and rejects the
//! configuration with a fatal [`ConfigError`] when they are missing or
//! malformed.

use std::collections::{BTreeMap, HashMap};

use nutype::nutype;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::middleware::MiddlewareSpec;

/// Name of a dispatcher instance, used as the key-value store prefix.
#[nutype(
    validate(not_empty),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct DispatcherName(String);

/// Seconds before a return-route record is expired from the store.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 604_800
)]
pub struct RoutingMemoryTtlSecs(u64);

impl RoutingMemoryTtlSecs {
    /// Gets the value in seconds.
    #[must_use]
    pub fn as_secs(&self) -> u64 {
        self.into_inner()
    }
}

/// Connection settings for the key-value store.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub db: u32,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
            password: None,
        }
    }
}

impl RedisConfig {
    /// Connection URL in the `redis://` scheme.
    #[must_use]
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// One keyword routing rule for the content-keyword router.
///
/// A message matches when its first word equals `keyword`
/// (case-insensitive), its `to_addr` equals `to_addr` when that is set,
/// and its `from_addr` starts with `prefix` when that is set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingRule {
    /// Exposed endpoint the matching message is published to.
    pub app: String,
    pub keyword: String,
    #[serde(default)]
    pub to_addr: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Complete dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Transport-side endpoint names. Each gets `.inbound`/`.outbound`/
    /// `.event` queues on the bus.
    pub transport_names: Vec<String>,
    /// Application-facing endpoint names, with the symmetric queues.
    #[serde(default)]
    pub exposed_names: Vec<String>,
    /// Router selection, resolved through the router registry.
    pub router_class: String,
    /// Ordered middleware list.
    #[serde(default)]
    pub middleware: Vec<MiddlewareSpec>,

    // Router sections. The selected router reads the ones it knows.
    /// Simple / transport-to-transport: transport name -> destinations.
    #[serde(default)]
    pub route_mappings: HashMap<String, Vec<String>>,
    /// Simple-style outbound remap, or (content-keyword) from_addr ->
    /// transport name.
    #[serde(default)]
    pub transport_mappings: HashMap<String, String>,
    /// ToAddr: exposed name -> pattern matched at the start of `to_addr`.
    #[serde(default)]
    pub toaddr_mappings: HashMap<String, String>,
    /// FromAddrMultiplex: from_addr -> transport name.
    #[serde(default)]
    pub fromaddr_mappings: HashMap<String, String>,
    /// UserGrouping: group name -> exposed name. Sorted iteration keeps
    /// round-robin assignment deterministic across processes.
    #[serde(default)]
    pub group_mappings: BTreeMap<String, String>,
    /// ContentKeyword rule list, evaluated in declared order.
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
    /// ContentKeyword convenience map (app -> keyword); generates rules
    /// appended after `rules` in sorted order.
    #[serde(default)]
    pub keyword_mappings: BTreeMap<String, String>,
    /// ContentKeyword destination for inbound messages matching no rule.
    #[serde(default)]
    pub fallback_application: Option<String>,
    #[serde(default)]
    pub expire_routing_memory: RoutingMemoryTtlSecs,
    /// RedirectOutbound: exposed name -> transport name.
    #[serde(default)]
    pub redirect_outbound: HashMap<String, String>,

    /// Key-value store prefix; required by the stateful routers.
    #[serde(default)]
    pub dispatcher_name: Option<DispatcherName>,
    #[serde(default)]
    pub redis_config: Option<RedisConfig>,
}

impl DispatcherConfig {
    /// Checks the router-independent parts of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport_names.is_empty() {
            return Err(ConfigError::MissingOption("transport_names"));
        }
        for name in self.transport_names.iter().chain(&self.exposed_names) {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidEndpointName(name.clone()));
            }
        }
        Ok(())
    }

    /// The configured dispatcher name, or a startup error for routers
    /// that need the key-value store.
    pub fn require_dispatcher_name(&self) -> Result<&DispatcherName, ConfigError> {
        self.dispatcher_name
            .as_ref()
            .ok_or(ConfigError::MissingOption("dispatcher_name"))
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            transport_names: Vec::new(),
            exposed_names: Vec::new(),
            router_class: "simple".to_string(),
            middleware: Vec::new(),
            route_mappings: HashMap::new(),
            transport_mappings: HashMap::new(),
            toaddr_mappings: HashMap::new(),
            fromaddr_mappings: HashMap::new(),
            group_mappings: BTreeMap::new(),
            rules: Vec::new(),
            keyword_mappings: BTreeMap::new(),
            fallback_application: None,
            expire_routing_memory: RoutingMemoryTtlSecs::default(),
            redirect_outbound: HashMap::new(),
            dispatcher_name: None,
            redis_config: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_deserializes_with_defaults() {
        let config: DispatcherConfig = serde_json::from_value(serde_json::json!({
            "transport_names": ["sms_in"],
            "exposed_names": ["appA"],
            "router_class": "simple",
            "route_mappings": {"sms_in": ["appA"]},
        }))
        .expect("deserialize");

        assert!(config.validate().is_ok());
        assert_eq!(config.expire_routing_memory.as_secs(), 604_800);
        assert!(config.middleware.is_empty());
        assert!(config.dispatcher_name.is_none());
    }

    #[test]
    fn unknown_options_are_rejected() {
        let result: Result<DispatcherConfig, _> = serde_json::from_value(serde_json::json!({
            "transport_names": ["sms_in"],
            "router_class": "simple",
            "rate_limit": 10,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn empty_endpoint_names_fail_validation() {
        let config = DispatcherConfig {
            transport_names: vec!["sms_in".into(), "  ".into()],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpointName(_))
        ));
    }

    #[test]
    fn missing_transport_names_fail_validation() {
        let config = DispatcherConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingOption("transport_names"))
        ));
    }

    #[test]
    fn redis_url_includes_password_and_db() {
        let plain = RedisConfig::default();
        assert_eq!(plain.url(), "redis://127.0.0.1:6379/0");

        let secured = RedisConfig {
            host: "kv.internal".into(),
            port: 6380,
            db: 3,
            password: Some("hunter2".into()),
        };
        assert_eq!(secured.url(), "redis://:hunter2@kv.internal:6380/3");
    }

    #[test]
    fn routing_rules_require_app_and_keyword() {
        let result: Result<RoutingRule, _> =
            serde_json::from_value(serde_json::json!({"app": "quiz"}));
        assert!(result.is_err());

        let rule: RoutingRule =
            serde_json::from_value(serde_json::json!({"app": "quiz", "keyword": "PLAY"}))
                .expect("deserialize");
        assert_eq!(rule.keyword, "PLAY");
        assert_eq!(rule.to_addr, None);
    }

    #[test]
    fn routing_memory_ttl_rejects_zero() {
        let result: Result<RoutingMemoryTtlSecs, _> = serde_json::from_value(serde_json::json!(0));
        assert!(result.is_err());
    }
}
