//! Web layer contracts: the request/response adapter handed to the core, the
//! injectable server, and the pluggable response/error writers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::error;
use viaduct_errors::prelude::*;

pub const HEADER_REQUEST_ID: &str = "X-Request-Id";
pub const HEADER_VERSION: &str = "X-Version";

/// Read/write adapter around one inbound HTTP exchange. The body is fully
/// buffered before the handler runs, so the trait stays synchronous.
pub trait WebContext: Send + Sync {
    fn method(&self) -> &str;
    fn path(&self) -> &str;
    fn uri(&self) -> &str;
    fn header(&self, name: &str) -> Option<String>;
    fn headers(&self) -> HeaderMap;
    fn query(&self, name: &str) -> Option<String>;
    fn path_var(&self, name: &str) -> Option<String>;
    fn body(&self) -> &[u8];
    fn request_id(&self) -> &str;

    /// Stage the reply; the adapter writes it out once the handler returns.
    /// Later calls replace earlier ones.
    fn send_response(&self, status: StatusCode, headers: HeaderMap, body: Vec<u8>);
    fn response_sent(&self) -> bool;
}

/// Handler bound to one route pattern.
pub type WebHandler =
    Arc<dyn Fn(Arc<dyn WebContext>) -> BoxFuture<'static, Result<(), ServeError>> + Send + Sync>;

/// Wraps a matched handler; applied in registration order, first interceptor
/// outermost.
pub type WebInterceptor = Arc<dyn Fn(WebHandler) -> WebHandler + Send + Sync>;

/// Renders a `ServeError` that escaped a handler.
pub type WebErrorHandler = Arc<dyn Fn(&dyn WebContext, &ServeError) + Send + Sync>;

#[derive(Clone, Debug)]
pub struct TlsSettings {
    pub cert_file: String,
    pub key_file: String,
}

/// The embedded web server, injectable so the engine never depends on a
/// concrete HTTP stack. Route handlers may be added before and after
/// `serve`; removal is not supported.
#[async_trait]
pub trait WebServer: Send + Sync {
    fn add_handler(&self, method: &str, pattern: &str, handler: WebHandler);
    fn add_interceptor(&self, interceptor: WebInterceptor);
    fn set_not_found_handler(&self, handler: WebHandler);
    fn set_error_handler(&self, handler: WebErrorHandler);

    /// Serve until shut down. TLS settings switch the listener to HTTPS.
    async fn serve(&self, addr: SocketAddr, tls: Option<TlsSettings>) -> anyhow::Result<()>;

    /// Resolves once the listener is bound; `None` after shutdown.
    async fn wait_ready(&self) -> Option<SocketAddr>;

    async fn shutdown(&self, deadline: Duration);

    /// Register a plain HTTP page (debug surface); default composes onto
    /// `add_handler`.
    fn add_http_handler(&self, method: &str, pattern: &str, handler: HttpHandler) {
        self.add_handler(
            method,
            pattern,
            Arc::new(move |webc: Arc<dyn WebContext>| {
                let handler = handler.clone();
                Box::pin(async move {
                    let (status, headers, body) = handler(webc.clone()).await;
                    webc.send_response(status, headers, body);
                    Ok(())
                })
            }),
        );
    }
}

pub type HttpHandler = Arc<
    dyn Fn(Arc<dyn WebContext>) -> BoxFuture<'static, (StatusCode, HeaderMap, Vec<u8>)>
        + Send
        + Sync,
>;

/// Serializes the successful response body into the HTTP reply.
pub type ResponseWriter = Arc<
    dyn Fn(&dyn WebContext, &str, &HeaderMap, StatusCode, &serde_json::Value) -> Result<(), ServeError>
        + Send
        + Sync,
>;

/// Renders a `ServeError` as the HTTP reply.
pub type ErrorsWriter =
    Arc<dyn Fn(&dyn WebContext, &str, &HeaderMap, &ServeError) -> Result<(), ServeError> + Send + Sync>;

/// Default writer: merge accumulated headers, negotiate the representation
/// from `Accept`, fall back to JSON.
pub fn default_response_writer() -> ResponseWriter {
    Arc::new(|webc, request_id, headers, status, body| {
        let mut out = headers.clone();
        if let Ok(value) = HeaderValue::from_str(request_id) {
            out.insert(HEADER_REQUEST_ID, value);
        }
        let accept = webc.header(ACCEPT.as_str()).unwrap_or_default();
        let (payload, content_type) = match (body, accept.contains("text/plain")) {
            (serde_json::Value::String(text), true) => {
                (text.clone().into_bytes(), "text/plain; charset=utf-8")
            }
            _ => {
                let bytes = serde_json::to_vec(body).map_err(|err| {
                    ServeErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR, codes::GATEWAY_INTERNAL)
                        .message("RESPONSE:ENCODE_BODY")
                        .cause(err)
                        .build()
                })?;
                (bytes, "application/json; charset=utf-8")
            }
        };
        out.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        webc.send_response(status, out, payload);
        Ok(())
    })
}

/// Default error rendering: stable JSON error body plus the error's header
/// additions on top of the accumulated response headers.
pub fn default_errors_writer() -> ErrorsWriter {
    Arc::new(|webc, request_id, headers, serve_error| {
        let mut out = headers.clone();
        serve_error.merge_header(&mut out);
        if let Ok(value) = HeaderValue::from_str(request_id) {
            out.insert(HEADER_REQUEST_ID, value);
        }
        out.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        let body = serde_json::json!({
            "requestId": request_id,
            "errorCode": serve_error.error_code(),
            "message": serve_error.message,
        });
        let payload = serde_json::to_vec(&body).map_err(|err| {
            ServeErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR, codes::GATEWAY_INTERNAL)
                .message("RESPONSE:ENCODE_ERROR")
                .cause(err)
                .build()
        })?;
        webc.send_response(serve_error.status_code, out, payload);
        Ok(())
    })
}

/// Build the engine-installed server error handler around an errors writer.
/// Writer failures are logged and swallowed; the request is already over.
pub fn error_handler_of(errors_writer: ErrorsWriter) -> WebErrorHandler {
    Arc::new(move |webc, serve_error| {
        let request_id = webc.request_id().to_string();
        if let Err(err) = errors_writer(webc, &request_id, &serve_error.header, serve_error) {
            error!(%request_id, error = %err, "error response write failed");
        }
    })
}
