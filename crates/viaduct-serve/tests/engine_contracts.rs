//! End-to-end contracts over real HTTP: discovery events drive the route
//! table, requests flow through the filter chain and transport, and the
//! admin surface reports state.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{added, boot, http_endpoint, wait_for_route};
use serde_json::{json, Value};
use viaduct_errors::prelude::*;
use viaduct_serve::prelude::*;
use viaduct_serve::testkit::RecordingTransporter;
use viaduct_types::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn register_and_serve_round_trip() {
    let transporter = RecordingTransporter::ok(json!({"hello": "world"}));
    let harness = boot(
        |b| b.register_transporter("http", transporter.clone()),
        json!({}),
    )
    .await;

    harness
        .discovery
        .publish_endpoint(added(http_endpoint("A", "GET", "/v1/x")))
        .await;
    wait_for_route(harness.public_addr, "/v1/x", "A").await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/v1/x", harness.public_addr))
        .header("X-Version", "A")
        .send()
        .await
        .expect("response");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers().get("X-Request-Id").is_some());
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body, json!({"hello": "world"}));
    // One call from the readiness probe plus one from the request above;
    // every served request accounts exactly once.
    assert_eq!(transporter.calls(), 2);

    let metrics = harness.engine.metrics();
    assert_eq!(
        metrics
            .access_counter
            .with_label_values(&["http", "upstream", "call"])
            .get(),
        2.0
    );
    assert_eq!(
        metrics
            .route_duration
            .with_label_values(&["Transporter", "http"])
            .get_sample_count(),
        2
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn version_miss_is_404_and_counted() {
    let transporter = RecordingTransporter::ok(json!({}));
    let harness = boot(
        |b| b.register_transporter("http", transporter.clone()),
        json!({}),
    )
    .await;
    harness
        .discovery
        .publish_endpoint(added(http_endpoint("A", "GET", "/v1/x")))
        .await;
    wait_for_route(harness.public_addr, "/v1/x", "A").await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/v1/x", harness.public_addr))
        .header("X-Version", "Z")
        .send()
        .await
        .expect("response");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["errorCode"], json!(codes::REQUEST_NOT_FOUND));
    assert_eq!(transporter.calls(), 1, "only the warm-up call reached transport");

    let metrics = harness.engine.metrics();
    assert_eq!(
        metrics
            .error_counter
            .with_label_values(&["unknown", "/v1/x", "GET", codes::REQUEST_NOT_FOUND])
            .get(),
        1.0
    );
}

struct DenyFilter;

impl Filter for DenyFilter {
    fn filter_id(&self) -> &str {
        "deny_filter"
    }

    fn do_filter(&self, _next: FilterInvoker) -> FilterInvoker {
        Arc::new(|_ctx| {
            Box::pin(async {
                Err(ServeErrorBuilder::new(
                    http::StatusCode::FORBIDDEN,
                    codes::PERMISSION_DENIED,
                )
                .message("no")
                .build())
            })
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn filter_short_circuit_renders_403() {
    let transporter = RecordingTransporter::ok(json!({}));
    let harness = boot(
        |b| {
            b.register_transporter("http", transporter.clone())
                .register_global_filter(Arc::new(DenyFilter))
        },
        json!({}),
    )
    .await;
    harness
        .discovery
        .publish_endpoint(added(http_endpoint("A", "GET", "/v1/x")))
        .await;
    wait_for_route(harness.public_addr, "/v1/x", "A").await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/v1/x", harness.public_addr))
        .header("X-Version", "A")
        .send()
        .await
        .expect("response");
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["errorCode"], json!(codes::PERMISSION_DENIED));
    assert_eq!(body["message"], json!("no"));
    assert_eq!(transporter.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panic_in_transport_renders_internal_error_and_server_survives() {
    let harness = boot(
        |b| b.register_transporter("http", RecordingTransporter::panicking()),
        json!({}),
    )
    .await;
    harness
        .discovery
        .publish_endpoint(added(http_endpoint("A", "GET", "/v1/x")))
        .await;
    wait_for_route(harness.public_addr, "/v1/x", "A").await;

    let client = reqwest::Client::new();
    for _ in 0..2 {
        let response = client
            .get(format!("http://{}/v1/x", harness.public_addr))
            .header("X-Version", "A")
            .send()
            .await
            .expect("response");
        assert_eq!(
            response.status(),
            reqwest::StatusCode::INTERNAL_SERVER_ERROR
        );
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body["errorCode"], json!(codes::GATEWAY_INTERNAL));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_survive_endpoint_update() {
    let transporter = RecordingTransporter::ok(json!({"ok": true}));
    let harness = boot(
        |b| b.register_transporter("http", transporter.clone()),
        json!({}),
    )
    .await;
    harness
        .discovery
        .publish_endpoint(added(http_endpoint("A", "GET", "/v1/x")))
        .await;
    wait_for_route(harness.public_addr, "/v1/x", "A").await;

    let addr = harness.public_addr;
    let mut workers = Vec::new();
    for _ in 0..100 {
        workers.push(tokio::spawn(async move {
            let client = reqwest::Client::new();
            let response = client
                .get(format!("http://{addr}/v1/x"))
                .header("X-Version", "A")
                .send()
                .await
                .expect("response");
            assert_eq!(response.status(), reqwest::StatusCode::OK);
        }));
    }

    let mut updated = http_endpoint("A", "GET", "/v1/x");
    updated.service.interface = "upstream-v2".to_string();
    harness
        .discovery
        .publish_endpoint(EndpointEvent {
            event_type: EventType::Updated,
            endpoint: updated,
        })
        .await;

    for worker in workers {
        worker.await.expect("request task");
    }

    let multi = harness
        .engine
        .route_table()
        .lookup("GET#/v1/x")
        .expect("route registered");
    assert_eq!(multi.len(), 1);
    assert_eq!(
        multi.find_by_version("A").unwrap().service.interface,
        "upstream-v2"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn debug_surface_reports_routes_services_and_metrics() {
    let transporter = RecordingTransporter::ok(json!({}));
    let harness = boot(
        |b| b.register_transporter("http", transporter.clone()),
        json!({}),
    )
    .await;
    harness
        .discovery
        .publish_endpoint(added(http_endpoint("A", "GET", "/v1/x")))
        .await;
    harness
        .discovery
        .publish_service(ServiceEvent {
            event_type: EventType::Added,
            service: Service {
                service_id: "orders".into(),
                alias_id: "orders-legacy".into(),
                rpc_proto: "dubbo".into(),
                interface: "com.acme.Orders".into(),
                method: "get".into(),
                ..Default::default()
            },
        })
        .await;
    wait_for_route(harness.public_addr, "/v1/x", "A").await;

    let client = reqwest::Client::new();
    let endpoints: Value = client
        .get(format!("http://{}/debug/endpoints", harness.admin_addr))
        .send()
        .await
        .expect("endpoints dump")
        .json()
        .await
        .expect("endpoints json");
    assert!(endpoints.get("GET#/v1/x").is_some());

    let services: Value = client
        .get(format!("http://{}/debug/services", harness.admin_addr))
        .send()
        .await
        .expect("services dump")
        .json()
        .await
        .expect("services json");
    assert!(services.get("orders").is_some());
    assert!(services.get("orders-legacy").is_some());

    // Drive one request so the counters exist, then scrape.
    client
        .get(format!("http://{}/v1/x", harness.public_addr))
        .header("X-Version", "A")
        .send()
        .await
        .expect("request");
    let exposition = client
        .get(format!("http://{}/debug/metrics", harness.admin_addr))
        .send()
        .await
        .expect("metrics scrape")
        .text()
        .await
        .expect("metrics text");
    assert!(exposition.contains("viaduct_endpoint_access_total"));

    // Removing by service id also drops the alias entry.
    harness
        .discovery
        .publish_service(ServiceEvent {
            event_type: EventType::Removed,
            service: Service {
                service_id: "orders".into(),
                alias_id: "orders-legacy".into(),
                rpc_proto: "dubbo".into(),
                interface: "com.acme.Orders".into(),
                method: "get".into(),
                ..Default::default()
            },
        })
        .await;
    for _ in 0..100 {
        if harness.engine.services().len() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.engine.services().len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn echo_feature_serves_reflection() {
    let harness = boot(
        |b| b.register_transporter(ECHO_PROTO, EchoTransporter::new()),
        json!({"HttpWebServer": {"feature-echo-enable": true}}),
    )
    .await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/_echo?probe=1", harness.public_addr))
        .send()
        .await
        .expect("echo response");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("echo json");
    assert_eq!(body["method"], json!("GET"));
    assert_eq!(body["path"], json!("/_echo"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn managed_endpoint_registers_on_admin_server() {
    let transporter = RecordingTransporter::ok(json!({"admin": true}));
    let harness = boot(
        |b| b.register_transporter("http", transporter.clone()),
        json!({}),
    )
    .await;

    let mut endpoint = http_endpoint("", "GET", "/internal/reload");
    endpoint
        .attributes
        .push(Attribute::new(ATTR_TAG_MANAGED, json!(true)));
    harness
        .discovery
        .publish_endpoint(added(endpoint))
        .await;
    wait_for_route(harness.admin_addr, "/internal/reload", "").await;

    let client = reqwest::Client::new();
    let admin_response = client
        .get(format!("http://{}/internal/reload", harness.admin_addr))
        .send()
        .await
        .expect("admin response");
    assert_eq!(admin_response.status(), reqwest::StatusCode::OK);

    // Managed endpoints never reach the public server.
    let public_response = client
        .get(format!("http://{}/internal/reload", harness.public_addr))
        .send()
        .await
        .expect("public response");
    assert_eq!(public_response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn whitelist_drops_connect_events() {
    let transporter = RecordingTransporter::ok(json!({}));
    let harness = boot(
        |b| b.register_transporter("http", transporter.clone()),
        json!({}),
    )
    .await;

    harness
        .engine
        .handle_endpoint_event(added(http_endpoint("A", "CONNECT", "/v1/tunnel")))
        .expect("event handled");
    assert!(harness
        .engine
        .route_table()
        .lookup("CONNECT#/v1/tunnel")
        .is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removed_version_keeps_route_but_answers_404() {
    let transporter = RecordingTransporter::ok(json!({}));
    let harness = boot(
        |b| b.register_transporter("http", transporter.clone()),
        json!({}),
    )
    .await;
    harness
        .discovery
        .publish_endpoint(added(http_endpoint("A", "GET", "/v1/x")))
        .await;
    wait_for_route(harness.public_addr, "/v1/x", "A").await;

    harness
        .discovery
        .publish_endpoint(EndpointEvent {
            event_type: EventType::Removed,
            endpoint: http_endpoint("A", "GET", "/v1/x"),
        })
        .await;

    let client = reqwest::Client::new();
    let mut last_status = reqwest::StatusCode::OK;
    for _ in 0..100 {
        last_status = client
            .get(format!("http://{}/v1/x", harness.public_addr))
            .header("X-Version", "A")
            .send()
            .await
            .expect("response")
            .status();
        if last_status == reqwest::StatusCode::NOT_FOUND {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(last_status, reqwest::StatusCode::NOT_FOUND);
    // The route registration itself survives the removal.
    let multi = harness
        .engine
        .route_table()
        .lookup("GET#/v1/x")
        .expect("route still registered");
    assert!(multi.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_signals_stopped() {
    let harness = boot(|b| b, json!({})).await;
    let mut stopped = harness.engine.stopped();
    assert!(!*stopped.borrow());
    harness
        .engine
        .shutdown(Duration::from_secs(1))
        .await
        .expect("shutdown");
    stopped.changed().await.expect("stopped signal");
    assert!(*stopped.borrow());
}
