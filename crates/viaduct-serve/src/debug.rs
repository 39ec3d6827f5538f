//! Administration surface: JSON dumps of the route table and service
//! directory plus Prometheus exposition.

use std::sync::Arc;

use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::metrics::EndpointMetrics;
use crate::registry::{RouteTable, ServiceDirectory};
use crate::web::HttpHandler;

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    headers
}

pub fn endpoints_handler(table: Arc<RouteTable>) -> HttpHandler {
    Arc::new(move |_webc| {
        let table = table.clone();
        Box::pin(async move {
            let body = serde_json::to_vec(&table.snapshot()).unwrap_or_default();
            (StatusCode::OK, json_headers(), body)
        })
    })
}

pub fn services_handler(directory: Arc<ServiceDirectory>) -> HttpHandler {
    Arc::new(move |_webc| {
        let directory = directory.clone();
        Box::pin(async move {
            let body = serde_json::to_vec(&directory.snapshot()).unwrap_or_default();
            (StatusCode::OK, json_headers(), body)
        })
    })
}

pub fn metrics_handler(metrics: Arc<EndpointMetrics>) -> HttpHandler {
    Arc::new(move |_webc| {
        let metrics = metrics.clone();
        Box::pin(async move {
            let mut headers = HeaderMap::new();
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            (StatusCode::OK, headers, metrics.gather_text().into_bytes())
        })
    })
}
