use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use viaduct_serve::prelude::*;
use viaduct_types::prelude::*;

pub fn http_endpoint(version: &str, method: &str, pattern: &str) -> Endpoint {
    Endpoint {
        version: version.to_string(),
        http_method: method.to_string(),
        http_pattern: pattern.to_string(),
        service: Service {
            service_id: "upstream:call".to_string(),
            rpc_proto: "http".to_string(),
            interface: "upstream".to_string(),
            method: "call".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn added(endpoint: Endpoint) -> EndpointEvent {
    EndpointEvent {
        event_type: EventType::Added,
        endpoint,
    }
}

pub struct Harness {
    pub engine: ServeEngine,
    pub discovery: Arc<MemoryDiscovery>,
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
}

/// Boot a full engine on ephemeral ports around the given extensions
/// builder, already wired to an in-memory discovery backend.
pub async fn boot(
    configure: impl FnOnce(ExtensionsBuilder) -> ExtensionsBuilder,
    config: serde_json::Value,
) -> Harness {
    let discovery = MemoryDiscovery::new();
    let builder = Extensions::builder()
        .register_discovery_factory(
            DISCOVERY_PROTO_STATIC,
            shared_discovery_factory(discovery.clone()),
        );
    let extensions = Arc::new(configure(builder).build());

    let mut root = json!({
        "HttpWebServer": {
            "address": "127.0.0.1",
            "port": 0,
            "manage-address": "127.0.0.1",
            "manage-port": 0
        }
    });
    merge(&mut root, config);

    let mut engine = ServeEngine::builder()
        .build(Arc::new(root), extensions)
        .expect("engine build");
    engine.prepare().expect("engine prepare");
    engine.initial().expect("engine initial");
    engine
        .startup(BuildInfo::default())
        .await
        .expect("engine startup");
    let public_addr = engine.public_ready().await.expect("public listener");
    let admin_addr = engine.admin_ready().await.expect("admin listener");

    Harness {
        engine,
        discovery,
        public_addr,
        admin_addr,
    }
}

fn merge(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Poll until the route answers something other than 404, i.e. the event
/// loop has registered the handler.
pub async fn wait_for_route(addr: SocketAddr, path: &str, version: &str) {
    let client = reqwest::Client::new();
    for _ in 0..100 {
        let response = client
            .get(format!("http://{addr}{path}"))
            .header("X-Version", version)
            .send()
            .await;
        if let Ok(response) = response {
            if response.status() != reqwest::StatusCode::NOT_FOUND {
                return;
            }
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("route {path} never became ready on {addr}");
}
