use serde::{Deserialize, Serialize};

pub const MEDIA_TEXT: &str = "text/plain";
pub const MEDIA_JSON: &str = "application/json";

/// Argument lookup scopes. `AUTO` lets the lookup function probe query,
/// path and header in that order.
pub const SCOPE_QUERY: &str = "QUERY";
pub const SCOPE_PATH: &str = "PATH";
pub const SCOPE_HEADER: &str = "HEADER";
pub const SCOPE_FORM: &str = "FORM";
pub const SCOPE_BODY: &str = "BODY";
pub const SCOPE_ATTR: &str = "ATTR";
pub const SCOPE_AUTO: &str = "AUTO";

/// A value tagged with the media type it was read as. Argument resolvers
/// convert these into the backend call's typed parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MTValue {
    pub value: serde_json::Value,
    pub media_type: String,
}

impl MTValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: serde_json::Value::String(value.into()),
            media_type: MEDIA_TEXT.to_string(),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self {
            value,
            media_type: MEDIA_JSON.to_string(),
        }
    }
}

/// Read access to request-scoped values, implemented by the per-request
/// context. Argument lookup functions depend only on this view.
pub trait ScopedLookup: Send + Sync {
    fn scoped_value(&self, scope: &str, key: &str) -> Option<MTValue>;
}
