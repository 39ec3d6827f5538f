//! Per-request context: the mutable state one request carries through the
//! filter chain to the transport and back out through the writers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{HeaderMap, StatusCode};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use viaduct_types::prelude::*;

use crate::web::WebContext;

/// Cooperative cancellation flag shared between the web adapter and the
/// dispatcher's terminal transport step.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Cause attached to the canceled serve error.
#[derive(Debug, Error)]
#[error("request cancelled by client")]
pub struct Cancelled;

/// Mutable response state filled by the transport (or an error path) and
/// serialized by the response writer at the end of the request.
#[derive(Debug)]
pub struct ResponseBuffer {
    status: StatusCode,
    headers: HeaderMap,
    body: serde_json::Value,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: serde_json::Value::Null,
        }
    }
}

impl ResponseBuffer {
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn add_header(&mut self, name: http::HeaderName, value: http::HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn merge_headers(&mut self, headers: HeaderMap) {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn set_body(&mut self, body: serde_json::Value) {
        self.body = body;
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.body = serde_json::Value::Null;
    }
}

/// Request-scoped context. Pooled: `reattach` binds it to a new request,
/// `release` clears every reference before it returns to the free list.
/// Shared fields use interior locks; identity fields are only written while
/// the pool holds the context exclusively.
pub struct Context {
    request_id: String,
    start_at: Instant,
    endpoint: Option<Arc<Endpoint>>,
    web: Option<Arc<dyn WebContext>>,
    cancellation: CancellationToken,
    attributes: RwLock<HashMap<String, serde_json::Value>>,
    metrics: Mutex<Vec<(String, Duration)>>,
    response: Mutex<ResponseBuffer>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            request_id: String::new(),
            start_at: Instant::now(),
            endpoint: None,
            web: None,
            cancellation: CancellationToken::new(),
            attributes: RwLock::new(HashMap::new()),
            metrics: Mutex::new(Vec::new()),
            response: Mutex::new(ResponseBuffer::default()),
        }
    }

    /// Bind to a new request: fresh id, clock, cancellation token, and empty
    /// per-request state.
    pub(crate) fn reattach(
        &mut self,
        request_id: String,
        web: Arc<dyn WebContext>,
        endpoint: Arc<Endpoint>,
    ) {
        self.request_id = request_id;
        self.start_at = Instant::now();
        self.endpoint = Some(endpoint);
        self.web = Some(web);
        self.cancellation = CancellationToken::new();
        self.attributes.write().clear();
        self.metrics.lock().clear();
        self.response.lock().reset();
    }

    /// Drop every reference before the context goes back to the pool.
    pub(crate) fn release(&mut self) {
        self.request_id.clear();
        self.endpoint = None;
        self.web = None;
        self.attributes.write().clear();
        self.metrics.lock().clear();
        self.response.lock().reset();
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn start_at(&self) -> Instant {
        self.start_at
    }

    pub fn endpoint(&self) -> Option<Arc<Endpoint>> {
        self.endpoint.clone()
    }

    pub fn service(&self) -> Option<Service> {
        self.endpoint.as_ref().map(|e| e.service.clone())
    }

    pub fn web(&self) -> Option<Arc<dyn WebContext>> {
        self.web.clone()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.write().insert(key.into(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<serde_json::Value> {
        self.attributes.read().get(key).cloned()
    }

    /// Accumulate one labelled duration; the request log prints the full
    /// vector at the end of the request.
    pub fn add_metric(&self, label: impl Into<String>, elapsed: Duration) {
        self.metrics.lock().push((label.into(), elapsed));
    }

    pub fn load_metrics(&self) -> Vec<(String, Duration)> {
        self.metrics.lock().clone()
    }

    pub fn with_response<R>(&self, f: impl FnOnce(&mut ResponseBuffer) -> R) -> R {
        f(&mut self.response.lock())
    }

    /// Snapshot of the response buffer for the writers.
    pub fn response_snapshot(&self) -> (StatusCode, HeaderMap, serde_json::Value) {
        let response = self.response.lock();
        (
            response.status(),
            response.headers().clone(),
            response.body().clone(),
        )
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopedLookup for Context {
    fn scoped_value(&self, scope: &str, key: &str) -> Option<MTValue> {
        let web = self.web.as_ref()?;
        match scope {
            SCOPE_QUERY => web.query(key).map(MTValue::text),
            SCOPE_PATH => web.path_var(key).map(MTValue::text),
            SCOPE_HEADER => web.header(key).map(MTValue::text),
            SCOPE_ATTR => self.attribute(key).map(MTValue::json),
            SCOPE_AUTO => web
                .query(key)
                .or_else(|| web.path_var(key))
                .or_else(|| web.header(key))
                .map(MTValue::text),
            _ => None,
        }
    }
}
