//! In-process doubles for exercising the dispatch path without a socket:
//! a canned web context and a recording transporter. Shared by this
//! crate's tests and by downstream filter crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use parking_lot::Mutex;
use viaduct_errors::ServeError;

use crate::context::Context;
use crate::transport::Transporter;
use crate::web::WebContext;

/// A buffered fake request with a response slot, mirroring what the axum
/// adapter hands to handlers.
pub struct StubWebContext {
    method: String,
    path: String,
    uri: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    path_vars: HashMap<String, String>,
    body: Vec<u8>,
    request_id: String,
    response: Mutex<Option<(StatusCode, HeaderMap, Vec<u8>)>>,
}

impl StubWebContext {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            path: path.to_string(),
            uri: path.to_string(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            path_vars: HashMap::new(),
            body: Vec::new(),
            request_id: "test-request".to_string(),
            response: Mutex::new(None),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new("GET", path)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// The staged response, if the writer ran.
    pub fn sent(&self) -> Option<(StatusCode, HeaderMap, Vec<u8>)> {
        self.response.lock().clone()
    }
}

impl WebContext for StubWebContext {
    fn method(&self) -> &str {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    fn query(&self, name: &str) -> Option<String> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    fn path_var(&self, name: &str) -> Option<String> {
        self.path_vars.get(name).cloned()
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn request_id(&self) -> &str {
        &self.request_id
    }

    fn send_response(&self, status: StatusCode, headers: HeaderMap, body: Vec<u8>) {
        *self.response.lock() = Some((status, headers, body));
    }

    fn response_sent(&self) -> bool {
        self.response.lock().is_some()
    }
}

enum TransportMode {
    Reply(serde_json::Value),
    Fail(ServeError),
    Panic,
}

/// Counts invocations and replies with a canned body, a canned error, or a
/// panic.
pub struct RecordingTransporter {
    calls: AtomicUsize,
    mode: TransportMode,
}

impl RecordingTransporter {
    pub fn ok(reply: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            mode: TransportMode::Reply(reply),
        })
    }

    pub fn failing(error: ServeError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            mode: TransportMode::Fail(error),
        })
    }

    pub fn panicking() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            mode: TransportMode::Panic,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transporter for RecordingTransporter {
    async fn transport(&self, ctx: &Context) -> Result<(), ServeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            TransportMode::Reply(reply) => {
                ctx.with_response(|response| {
                    response.set_status(StatusCode::OK);
                    response.set_body(reply.clone());
                });
                Ok(())
            }
            TransportMode::Fail(error) => Err(error.clone()),
            TransportMode::Panic => panic!("transporter exploded on purpose"),
        }
    }
}
