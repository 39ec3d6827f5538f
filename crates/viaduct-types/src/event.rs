use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::endpoint::{Attribute, Endpoint, ATTR_TAG_AUTHORIZE};
use crate::service::Service;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Added,
    Updated,
    Removed,
}

/// Discovery event for one endpoint version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndpointEvent {
    pub event_type: EventType,
    pub endpoint: Endpoint,
}

/// Discovery event for one backend service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub event_type: EventType,
    pub service: Service,
}

// Older discovery payloads carried a bare `authorize` boolean instead of
// the attributes list.
#[derive(Deserialize)]
struct CompatibleEndpoint {
    #[serde(flatten)]
    endpoint: Endpoint,
    #[serde(default)]
    authorize: bool,
}

const MIN_PAYLOAD: usize = "{\"k\":0}".len();

fn looks_like_json(bytes: &[u8]) -> bool {
    if bytes.len() < MIN_PAYLOAD {
        return false;
    }
    bytes[0] == b'[' || bytes[bytes.len() - 1] == b'}'
}

/// Decode a raw discovery payload into an endpoint event. Malformed or
/// invalid payloads are logged and dropped rather than surfaced as errors;
/// the watch loop must keep consuming.
pub fn decode_endpoint_event(bytes: &[u8], event_type: EventType) -> Option<EndpointEvent> {
    if !looks_like_json(bytes) {
        warn!(size = bytes.len(), "discovery endpoint payload is not a json document");
        return None;
    }
    let compat: CompatibleEndpoint = match serde_json::from_slice(bytes) {
        Ok(compat) => compat,
        Err(err) => {
            warn!(%err, ?event_type, "discovery endpoint payload failed to parse");
            return None;
        }
    };
    let mut endpoint = compat.endpoint;
    if !endpoint.is_valid() {
        warn!(
            method = %endpoint.http_method,
            pattern = %endpoint.http_pattern,
            "discovery endpoint payload has invalid values"
        );
        return None;
    }
    if endpoint.attributes.is_empty() {
        endpoint.attributes.push(Attribute::new(
            ATTR_TAG_AUTHORIZE,
            serde_json::Value::Bool(compat.authorize),
        ));
    }
    endpoint.service.ensure_service_id();
    Some(EndpointEvent {
        event_type,
        endpoint,
    })
}

/// Decode a raw discovery payload into a service event; same drop-on-error
/// policy as `decode_endpoint_event`.
pub fn decode_service_event(bytes: &[u8], event_type: EventType) -> Option<ServiceEvent> {
    if !looks_like_json(bytes) {
        warn!(size = bytes.len(), "discovery service payload is not a json document");
        return None;
    }
    let mut service: Service = match serde_json::from_slice(bytes) {
        Ok(service) => service,
        Err(err) => {
            warn!(%err, ?event_type, "discovery service payload failed to parse");
            return None;
        }
    };
    if !service.is_valid() {
        warn!(service_id = %service.service_id, "discovery service payload has invalid values");
        return None;
    }
    service.ensure_service_id();
    Some(ServiceEvent {
        event_type,
        service,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_endpoint_json() -> serde_json::Value {
        json!({
            "version": "1.0",
            "httpMethod": "GET",
            "httpPattern": "/v1/orders/:id",
            "service": {
                "serviceId": "orders",
                "rpcProto": "dubbo",
                "interface": "com.acme.OrderService",
                "method": "getOrder",
                "arguments": [
                    {"name": "id", "class": "java.lang.String", "httpScope": "PATH", "httpKey": "id"}
                ]
            },
            "attributes": [{"name": "roles", "value": "ops"}]
        })
    }

    #[test]
    fn decode_is_identity_on_valid_payloads() {
        let bytes = serde_json::to_vec(&valid_endpoint_json()).unwrap();
        let event = decode_endpoint_event(&bytes, EventType::Added).unwrap();
        assert_eq!(event.event_type, EventType::Added);
        let reencoded = serde_json::to_value(&event.endpoint).unwrap();
        let decoded_again =
            decode_endpoint_event(&serde_json::to_vec(&reencoded).unwrap(), EventType::Added)
                .unwrap();
        assert_eq!(decoded_again.endpoint, event.endpoint);
    }

    #[test]
    fn decode_rejects_tiny_and_non_json_payloads() {
        assert!(decode_endpoint_event(b"{}", EventType::Added).is_none());
        assert!(decode_endpoint_event(b"plainly not json here", EventType::Added).is_none());
    }

    #[test]
    fn decode_rejects_invalid_values() {
        let bytes = serde_json::to_vec(&json!({"version": "1.0", "httpMethod": "GET"})).unwrap();
        assert!(decode_endpoint_event(&bytes, EventType::Updated).is_none());
    }

    #[test]
    fn legacy_authorize_becomes_attribute() {
        let mut payload = valid_endpoint_json();
        payload["attributes"] = json!([]);
        payload["authorize"] = json!(true);
        let bytes = serde_json::to_vec(&payload).unwrap();
        let event = decode_endpoint_event(&bytes, EventType::Added).unwrap();
        let attr = event.endpoint.attr(ATTR_TAG_AUTHORIZE).unwrap();
        assert!(attr.as_bool());
    }

    #[test]
    fn service_decode_fills_service_id() {
        let bytes = serde_json::to_vec(&json!({
            "rpcProto": "grpc",
            "interface": "billing.Invoices",
            "method": "Create"
        }))
        .unwrap();
        let event = decode_service_event(&bytes, EventType::Added).unwrap();
        assert_eq!(event.service.service_id, "billing.Invoices:Create");
    }
}
