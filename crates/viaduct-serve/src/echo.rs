//! Canned echo endpoints, registered at boot when `feature-echo-enable` is
//! set. Useful for smoke-testing a deployment without any backend wired up.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use viaduct_errors::prelude::*;
use viaduct_types::prelude::*;

use crate::context::Context;
use crate::transport::{passthrough_decoder, write_decoded_reply, TransportDecoder, Transporter};

pub const ECHO_PROTO: &str = "echo";
pub const ECHO_PATTERN: &str = "/_echo";

/// Reflects the inbound request back as the response body.
pub struct EchoTransporter {
    decoder: TransportDecoder,
}

impl EchoTransporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            decoder: passthrough_decoder(),
        })
    }
}

#[async_trait]
impl Transporter for EchoTransporter {
    async fn transport(&self, ctx: &Context) -> Result<(), ServeError> {
        let web = ctx
            .web()
            .ok_or_else(|| ServeError::internal("ECHO:NO_WEB_CONTEXT"))?;
        let mut headers = serde_json::Map::new();
        for (name, value) in web.headers().iter() {
            headers.insert(
                name.as_str().to_string(),
                json!(String::from_utf8_lossy(value.as_bytes())),
            );
        }
        let reply = json!({
            "method": web.method(),
            "uri": web.uri(),
            "path": web.path(),
            "headers": headers,
            "body": String::from_utf8_lossy(web.body()),
        });
        write_decoded_reply(ctx, Some(&self.decoder), reply)
    }
}

fn echo_endpoint(http_method: &str) -> Endpoint {
    Endpoint {
        // Wildcard version: serves any requested version.
        version: String::new(),
        http_method: http_method.to_string(),
        http_pattern: ECHO_PATTERN.to_string(),
        service: Service {
            service_id: "viaduct.internal.Echo:reflect".to_string(),
            rpc_proto: ECHO_PROTO.to_string(),
            interface: "viaduct.internal.Echo".to_string(),
            method: "reflect".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// The endpoint events the engine replays at boot.
pub fn echo_endpoints() -> Vec<EndpointEvent> {
    ["GET", "POST"]
        .into_iter()
        .map(|method| EndpointEvent {
            event_type: EventType::Added,
            endpoint: echo_endpoint(method),
        })
        .collect()
}
