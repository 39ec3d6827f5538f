use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use viaduct_errors::ServeError;

use crate::value::{MTValue, ScopedLookup};

/// Converts a looked-up media-typed value into the backend parameter type
/// named by the argument's `class`. Keyed by class in the extension
/// registry and late-bound at endpoint registration.
pub type ValueResolver =
    Arc<dyn Fn(&MTValue, &str, &[String]) -> Result<serde_json::Value, ServeError> + Send + Sync>;

/// Reads the raw request value for `(scope, key)` out of the current
/// request. One process-wide function, late-bound at registration.
pub type ArgumentLookupFunc =
    Arc<dyn Fn(&str, &str, &dyn ScopedLookup) -> Result<MTValue, ServeError> + Send + Sync>;

/// Declarative parameter binding for a backend call. `fields` nests for
/// structured parameters; the tree is acyclic.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Argument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub generic: Vec<String>,
    #[serde(default)]
    pub http_scope: String,
    #[serde(default)]
    pub http_key: String,
    #[serde(default)]
    pub fields: Vec<Argument>,
    #[serde(skip)]
    pub resolver: Option<ValueResolver>,
    #[serde(skip)]
    pub lookup: Option<ArgumentLookupFunc>,
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Argument")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("http_scope", &self.http_scope)
            .field("http_key", &self.http_key)
            .field("fields", &self.fields)
            .field("resolver", &self.resolver.is_some())
            .field("lookup", &self.lookup.is_some())
            .finish()
    }
}

impl PartialEq for Argument {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.class == other.class
            && self.generic == other.generic
            && self.http_scope == other.http_scope
            && self.http_key == other.http_key
            && self.fields == other.fields
    }
}

/// Permission metadata on an endpoint: the service ids the permission
/// filter verifies against, plus argument bindings for the verify call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    #[serde(default)]
    pub service_ids: Vec<String>,
    #[serde(default)]
    pub arguments: Vec<Argument>,
}
