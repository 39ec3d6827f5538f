pub mod codes;
pub mod prelude;

use std::error::Error as StdError;
use std::sync::Arc;

use http::{HeaderMap, StatusCode};
use thiserror::Error;

/// The uniform failure value flowing through filters, transports and the
/// engine. It carries both the HTTP status to render and the stable domain
/// error code consumers match on.
#[derive(Clone, Debug, Error)]
#[error("{error_code}: {message}")]
pub struct ServeError {
    pub status_code: StatusCode,
    pub error_code: String,
    pub message: String,
    /// Header additions merged into the response before rendering.
    pub header: HeaderMap,
    /// Underlying error, if any. Shared so the value stays cloneable.
    pub cause: Option<Arc<dyn StdError + Send + Sync>>,
    /// Private detail, never rendered to clients.
    pub internal: Option<String>,
}

impl ServeError {
    pub fn new(status_code: StatusCode, error_code: impl Into<String>) -> Self {
        Self {
            status_code,
            error_code: error_code.into(),
            message: String::new(),
            header: HeaderMap::new(),
            cause: None,
            internal: None,
        }
    }

    pub fn not_found() -> Self {
        ServeErrorBuilder::new(StatusCode::NOT_FOUND, codes::REQUEST_NOT_FOUND)
            .message(codes::MSG_REQUEST_NOT_FOUND)
            .build()
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        ServeErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR, codes::GATEWAY_INTERNAL)
            .message(codes::MSG_GATEWAY_INTERNAL)
            .internal(detail)
            .build()
    }

    /// Client went away before the terminal transport step ran. Rendered
    /// with status 200 and an error payload, matching the wire contract.
    pub fn canceled(cause: impl StdError + Send + Sync + 'static) -> Self {
        ServeErrorBuilder::new(StatusCode::OK, codes::TRANSPORT_CANCELED)
            .cause(cause)
            .build()
    }

    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    /// Merge this error's header additions into `target`; the error wins on
    /// conflicting names.
    pub fn merge_header(&self, target: &mut HeaderMap) {
        for (name, value) in self.header.iter() {
            target.insert(name.clone(), value.clone());
        }
    }
}

/// Builder for `ServeError`, used wherever a component needs more than one
/// of the optional fields.
pub struct ServeErrorBuilder {
    error: ServeError,
}

impl ServeErrorBuilder {
    pub fn new(status_code: StatusCode, error_code: impl Into<String>) -> Self {
        Self {
            error: ServeError::new(status_code, error_code),
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.error.message = message.into();
        self
    }

    pub fn header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.error.header.insert(name, value);
        self
    }

    pub fn cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.error.cause = Some(Arc::new(cause));
        self
    }

    pub fn shared_cause(mut self, cause: Arc<dyn StdError + Send + Sync>) -> Self {
        self.error.cause = Some(cause);
        self
    }

    pub fn internal(mut self, detail: impl Into<String>) -> Self {
        self.error.internal = Some(detail.into());
        self
    }

    pub fn build(self) -> ServeError {
        self.error
    }
}
