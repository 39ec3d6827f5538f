//! Axum-backed default `WebServer`.
//!
//! Routes register dynamically at runtime, which an axum `Router` cannot
//! do once serving; the adapter therefore installs a single catch-all
//! dispatcher and matches against its own route map. Registered handlers
//! can never be removed, only shadowed by re-registration of the same
//! method and pattern.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use parking_lot::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;
use viaduct_errors::prelude::*;

use crate::config::Configuration;
use crate::web::{
    default_errors_writer, error_handler_of, TlsSettings, WebContext, WebErrorHandler,
    WebHandler, WebInterceptor, WebServer, HEADER_REQUEST_ID,
};

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

struct Route {
    pattern: String,
    segments: Vec<Segment>,
    handler: WebHandler,
}

impl Route {
    fn compile(pattern: &str, handler: WebHandler) -> Self {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self {
            pattern: pattern.to_string(),
            segments,
            handler,
        }
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut vars = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    vars.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(vars)
    }
}

struct Inner {
    routes: RwLock<HashMap<String, Vec<Route>>>,
    interceptors: RwLock<Vec<WebInterceptor>>,
    not_found: RwLock<Option<WebHandler>>,
    error_handler: RwLock<Option<WebErrorHandler>>,
    handle: Handle,
}

pub struct AxumWebServer {
    inner: Arc<Inner>,
}

impl AxumWebServer {
    pub fn new(_config: &Configuration) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                routes: RwLock::new(HashMap::new()),
                interceptors: RwLock::new(Vec::new()),
                not_found: RwLock::new(None),
                error_handler: RwLock::new(None),
                handle: Handle::new(),
            }),
        })
    }
}

#[async_trait]
impl WebServer for AxumWebServer {
    fn add_handler(&self, method: &str, pattern: &str, handler: WebHandler) {
        let mut routes = self.inner.routes.write();
        let list = routes.entry(method.to_uppercase()).or_default();
        let route = Route::compile(pattern, handler);
        if let Some(existing) = list.iter_mut().find(|r| r.pattern == pattern) {
            *existing = route;
        } else {
            list.push(route);
        }
    }

    fn add_interceptor(&self, interceptor: WebInterceptor) {
        self.inner.interceptors.write().push(interceptor);
    }

    fn set_not_found_handler(&self, handler: WebHandler) {
        *self.inner.not_found.write() = Some(handler);
    }

    fn set_error_handler(&self, handler: WebErrorHandler) {
        *self.inner.error_handler.write() = Some(handler);
    }

    async fn serve(&self, addr: SocketAddr, tls: Option<TlsSettings>) -> anyhow::Result<()> {
        let inner = self.inner.clone();
        let app = Router::new().fallback(move |req: Request| {
            let inner = inner.clone();
            async move { inner.dispatch(req).await }
        });
        let make = app.into_make_service();
        match tls {
            Some(tls) => {
                let rustls = RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
                    .await
                    .with_context(|| {
                        format!("load tls material {}/{}", tls.cert_file, tls.key_file)
                    })?;
                axum_server::bind_rustls(addr, rustls)
                    .handle(self.inner.handle.clone())
                    .serve(make)
                    .await
                    .context("https server failed")?;
            }
            None => {
                axum_server::bind(addr)
                    .handle(self.inner.handle.clone())
                    .serve(make)
                    .await
                    .context("http server failed")?;
            }
        }
        Ok(())
    }

    async fn wait_ready(&self) -> Option<SocketAddr> {
        self.inner.handle.listening().await
    }

    async fn shutdown(&self, deadline: Duration) {
        self.inner.handle.graceful_shutdown(Some(deadline));
    }
}

impl Inner {
    async fn dispatch(&self, req: Request) -> Response {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "request body read failed");
                Bytes::new()
            }
        };

        let method = parts.method.as_str().to_uppercase();
        let path = parts.uri.path().to_string();
        let uri = parts.uri.to_string();
        let query = parse_query(parts.uri.query().unwrap_or_default());
        let request_id = parts
            .headers
            .get(HEADER_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let (matched, path_vars) = {
            let routes = self.routes.read();
            match routes
                .get(&method)
                .and_then(|list| {
                    list.iter()
                        .find_map(|route| route.matches(&path).map(|vars| (route.handler.clone(), vars)))
                }) {
                Some((handler, vars)) => (Some(handler), vars),
                None => (None, HashMap::new()),
            }
        };

        let webc: Arc<AxumWebContext> = Arc::new(AxumWebContext {
            method,
            path,
            uri,
            headers: parts.headers,
            query,
            path_vars,
            body: bytes,
            request_id,
            response: Mutex::new(None),
        });

        let handler = match matched {
            Some(handler) => {
                let interceptors = self.interceptors.read().clone();
                interceptors
                    .iter()
                    .rev()
                    .fold(handler, |next, interceptor| interceptor(next))
            }
            None => match self.not_found.read().clone() {
                Some(handler) => handler,
                None => default_not_found_handler(),
            },
        };

        let result = handler(webc.clone() as Arc<dyn WebContext>).await;
        if let Err(serve_error) = result {
            let error_handler = self
                .error_handler
                .read()
                .clone()
                .unwrap_or_else(|| error_handler_of(default_errors_writer()));
            error_handler(webc.as_ref(), &serve_error);
        }

        webc.into_response()
    }
}

fn default_not_found_handler() -> WebHandler {
    Arc::new(|_webc: Arc<dyn WebContext>| Box::pin(async { Err(ServeError::not_found()) }))
}

fn parse_query(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Buffered request plus staged response for one exchange.
pub struct AxumWebContext {
    method: String,
    path: String,
    uri: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    path_vars: HashMap<String, String>,
    body: Bytes,
    request_id: String,
    response: Mutex<Option<(StatusCode, HeaderMap, Vec<u8>)>>,
}

impl AxumWebContext {
    fn into_response(self: Arc<Self>) -> Response {
        let staged = self.response.lock().take();
        let (status, headers, body) =
            staged.unwrap_or((StatusCode::OK, HeaderMap::new(), Vec::new()));
        let mut builder = Response::builder().status(status);
        if let Some(out) = builder.headers_mut() {
            out.extend(headers);
        }
        builder
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::empty()))
    }
}

impl WebContext for AxumWebContext {
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
