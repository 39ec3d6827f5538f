//! Namespace view over the loaded configuration tree.
//!
//! The tree is materialized once at startup by the `config` crate (file
//! source plus `VIADUCT__`-prefixed environment overrides) into a
//! `serde_json::Value`; every component receives a `Configuration` scoped to
//! its own namespace.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use serde_json::Value;

pub const ENV_CONFIG_FILE: &str = "VIADUCT_CONFIG_FILE";
pub const ENV_PREFIX: &str = "VIADUCT";
pub const DEFAULT_CONFIG_FILE: &str = "config/viaduct.toml";

/// Well-known namespaces and keys.
pub const NS_HTTP_WEB_SERVER: &str = "HttpWebServer";
pub const NS_ENDPOINT_REGISTRY: &str = "EndpointRegistry";
pub const NS_TRANSPORTERS: &str = "Transporters";
pub const NS_DYN_FILTER: &str = "dynfilter";

pub const KEY_ADDRESS: &str = "address";
pub const KEY_PORT: &str = "port";
pub const KEY_MANAGE_ADDRESS: &str = "manage-address";
pub const KEY_MANAGE_PORT: &str = "manage-port";
pub const KEY_TLS_CERT_FILE: &str = "tls-cert-file";
pub const KEY_TLS_KEY_FILE: &str = "tls-key-file";
pub const KEY_FEATURE_ECHO_ENABLE: &str = "feature-echo-enable";
pub const KEY_FEATURE_DEBUG_ENABLE: &str = "feature-debug-enable";
pub const KEY_FEATURE_DEBUG_PORT: &str = "feature-debug-port";
pub const KEY_REQUEST_LOG_ENABLE: &str = "request-log-enable";
pub const KEY_REGISTRY_PROTO: &str = "proto";
pub const KEY_DISABLED: &str = "disabled";
pub const KEY_FILTER_ID: &str = "id";
pub const KEY_FILTER_TYPE: &str = "type";

/// Load the configuration tree from the configured file (if present) merged
/// with environment overrides.
pub fn load_tree() -> anyhow::Result<Arc<Value>> {
    let file = env::var(ENV_CONFIG_FILE).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let mut builder = config::Config::builder();
    if Path::new(&file).exists() {
        builder = builder.add_source(config::File::from(Path::new(&file)));
    }
    builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));
    let tree: Value = builder
        .build()
        .context("failed to build configuration")?
        .try_deserialize()
        .context("failed to deserialize configuration")?;
    Ok(Arc::new(tree))
}

/// Read-only view of one configuration namespace, with per-view defaults.
#[derive(Clone)]
pub struct Configuration {
    node: Arc<Value>,
    defaults: Arc<HashMap<String, Value>>,
}

impl Configuration {
    /// View of the top-level object under `namespace`. A missing namespace
    /// yields an empty view so callers fall through to defaults.
    pub fn of(root: &Arc<Value>, namespace: &str) -> Self {
        let node = root.get(namespace).cloned().unwrap_or(Value::Null);
        Self {
            node: Arc::new(node),
            defaults: Arc::new(HashMap::new()),
        }
    }

    /// View wrapping an arbitrary subtree (array-of-tables elements).
    pub fn wrap(node: Value) -> Self {
        Self {
            node: Arc::new(node),
            defaults: Arc::new(HashMap::new()),
        }
    }

    pub fn with_defaults(mut self, defaults: HashMap<String, Value>) -> Self {
        self.defaults = Arc::new(defaults);
        self
    }

    /// View of a nested object under `key` (e.g. `Transporters.<proto>`).
    pub fn sub(&self, key: &str) -> Configuration {
        Configuration::wrap(self.node.get(key).cloned().unwrap_or(Value::Null))
    }

    /// Expand a top-level array of tables into one view per element.
    pub fn list(root: &Arc<Value>, key: &str) -> Vec<Configuration> {
        match root.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| Configuration::wrap(item.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.node
            .get(key)
            .cloned()
            .or_else(|| self.defaults.get(key).cloned())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_string_or(&self, key: &str, fallback: &str) -> String {
        self.get_string(key).unwrap_or_else(|| fallback.to_string())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_u16(&self, key: &str) -> Option<u16> {
        self.get_i64(key).and_then(|v| u16::try_from(v).ok())
    }

    pub fn is_disabled(&self) -> bool {
        self.get_bool(KEY_DISABLED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> Arc<Value> {
        Arc::new(json!({
            "HttpWebServer": {"address": "127.0.0.1", "port": 8090, "request-log-enable": true},
            "dynfilter": [
                {"id": "f1", "type": "t1"},
                {"id": "f2", "type": "t2", "disabled": true}
            ],
            "permission_filter": {"disabled": "true"}
        }))
    }

    #[test]
    fn namespace_lookup_and_defaults() {
        let cfg = Configuration::of(&tree(), NS_HTTP_WEB_SERVER).with_defaults(
            [
                (KEY_PORT.to_string(), json!(8080)),
                (KEY_MANAGE_PORT.to_string(), json!(8081)),
            ]
            .into_iter()
            .collect(),
        );
        assert_eq!(cfg.get_string(KEY_ADDRESS).as_deref(), Some("127.0.0.1"));
        assert_eq!(cfg.get_u16(KEY_PORT), Some(8090));
        assert_eq!(cfg.get_u16(KEY_MANAGE_PORT), Some(8081));
        assert!(cfg.get_bool(KEY_REQUEST_LOG_ENABLE));
    }

    #[test]
    fn list_expands_array_of_tables() {
        let entries = Configuration::list(&tree(), NS_DYN_FILTER);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].get_string(KEY_FILTER_ID).as_deref(), Some("f1"));
        assert!(entries[1].is_disabled());
    }

    #[test]
    fn string_disabled_flag_counts() {
        let cfg = Configuration::of(&tree(), "permission_filter");
        assert!(cfg.is_disabled());
    }

    #[test]
    fn missing_namespace_is_empty() {
        let cfg = Configuration::of(&tree(), "NoSuch");
        assert!(cfg.get_string("anything").is_none());
        assert!(!cfg.is_disabled());
    }
}
