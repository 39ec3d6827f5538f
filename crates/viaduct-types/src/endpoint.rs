use serde::{Deserialize, Serialize};

use crate::argument::Permission;
use crate::service::Service;

/// Marks an endpoint as belonging to the administration server; managed
/// endpoints are registered without version multiplexing.
pub const ATTR_TAG_MANAGED: &str = "Managed";
/// Legacy boolean carried by older discovery payloads.
pub const ATTR_TAG_AUTHORIZE: &str = "Authorize";

/// Free-form name/value tag on an endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn as_bool(&self) -> bool {
        match &self.value {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

/// One versioned mapping from an HTTP route to a backend RPC call.
/// Immutable once published; updates replace the whole record in its
/// multi-version table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub http_method: String,
    #[serde(default)]
    pub http_pattern: String,
    #[serde(default)]
    pub service: Service,
    #[serde(default)]
    pub permission: Permission,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Endpoint {
    pub fn is_valid(&self) -> bool {
        !self.http_method.is_empty() && !self.http_pattern.is_empty() && self.service.is_valid()
    }

    /// Route key in `METHOD#PATTERN` form, method upper-cased.
    pub fn route_key(&self) -> String {
        format!("{}#{}", self.http_method.to_uppercase(), self.http_pattern)
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn is_managed(&self) -> bool {
        self.attr(ATTR_TAG_MANAGED).map(|a| a.is_valid()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(method: &str, pattern: &str) -> Endpoint {
        Endpoint {
            version: "1.0".into(),
            http_method: method.into(),
            http_pattern: pattern.into(),
            service: Service {
                rpc_proto: "http".into(),
                interface: "upstream".into(),
                method: "call".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn route_key_uppercases_method() {
        assert_eq!(endpoint("get", "/v1/orders").route_key(), "GET#/v1/orders");
    }

    #[test]
    fn managed_flag_reads_attribute() {
        let mut e = endpoint("GET", "/admin/reload");
        assert!(!e.is_managed());
        e.attributes.push(Attribute::new(ATTR_TAG_MANAGED, serde_json::Value::Bool(true)));
        assert!(e.is_managed());
    }

    #[test]
    fn validity_requires_service() {
        let mut e = endpoint("GET", "/v1/orders");
        assert!(e.is_valid());
        e.service.method.clear();
        assert!(!e.is_valid());
    }
}
