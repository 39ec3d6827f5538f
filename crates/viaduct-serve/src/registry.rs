//! Route table and per-route multi-version endpoint maps.
//!
//! Both maps are read-mostly: the endpoint event loop is the single writer,
//! request handlers are the many readers. Each update atomically replaces
//! the entry for one version, so a concurrent reader observes either the
//! previous or the new endpoint, never a mixture.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use viaduct_types::prelude::*;

/// The set of endpoint versions bound to one `METHOD#PATTERN` route. Stays
/// registered for the life of the process even when emptied; the web layer
/// cannot unregister handlers.
pub struct MultiEndpoint {
    versions: RwLock<HashMap<String, Arc<Endpoint>>>,
}

impl MultiEndpoint {
    pub fn new() -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the endpoint stored under `version`.
    pub fn update(&self, version: &str, endpoint: Endpoint) {
        self.versions
            .write()
            .insert(version.to_string(), Arc::new(endpoint));
    }

    /// Remove one version; the table itself remains.
    pub fn delete(&self, version: &str) {
        self.versions.write().remove(version);
    }

    /// Version selection rule:
    /// 1. a non-empty `requested` returning an exact match wins;
    /// 2. else the empty-string entry serves as the wildcard default;
    /// 3. else an *empty* request falls back to the lexicographically
    ///    smallest version;
    /// 4. else the lookup fails. A non-empty mismatch without a wildcard
    ///    entry is a miss, not a fallback.
    pub fn find_by_version(&self, requested: &str) -> Option<Arc<Endpoint>> {
        let versions = self.versions.read();
        if !requested.is_empty() {
            if let Some(endpoint) = versions.get(requested) {
                return Some(endpoint.clone());
            }
        }
        if let Some(endpoint) = versions.get("") {
            return Some(endpoint.clone());
        }
        if requested.is_empty() {
            return versions
                .iter()
                .min_by(|(a, _), (b, _)| a.cmp(b))
                .map(|(_, endpoint)| endpoint.clone());
        }
        None
    }

    pub fn len(&self) -> usize {
        self.versions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.read().is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, Endpoint> {
        self.versions
            .read()
            .iter()
            .map(|(version, endpoint)| (version.clone(), (**endpoint).clone()))
            .collect()
    }
}

impl Default for MultiEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Route-key (`METHOD#PATTERN`) to multi-version endpoint map.
pub struct RouteTable {
    routes: RwLock<HashMap<String, Arc<MultiEndpoint>>>,
}

impl RouteTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: RwLock::new(HashMap::new()),
        })
    }

    /// Return the existing table for `route_key` or create one.
    /// `first_time` tells the caller to bind a web handler for the route.
    pub fn register(&self, route_key: &str) -> (Arc<MultiEndpoint>, bool) {
        if let Some(existing) = self.routes.read().get(route_key) {
            return (existing.clone(), false);
        }
        let mut routes = self.routes.write();
        // A concurrent register may have won the write lock first.
        if let Some(existing) = routes.get(route_key) {
            return (existing.clone(), false);
        }
        let created = Arc::new(MultiEndpoint::new());
        routes.insert(route_key.to_string(), created.clone());
        (created, true)
    }

    pub fn lookup(&self, route_key: &str) -> Option<Arc<MultiEndpoint>> {
        self.routes.read().get(route_key).cloned()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let routes = self.routes.read();
        let mut out = serde_json::Map::new();
        for (route_key, multi) in routes.iter() {
            let versions = multi.snapshot();
            let value = serde_json::to_value(versions).unwrap_or(serde_json::Value::Null);
            out.insert(route_key.clone(), value);
        }
        serde_json::Value::Object(out)
    }
}

/// Process-wide directory of backend services, keyed by `service_id` with
/// optional `alias_id` aliases. Written only by the service event loop.
pub struct ServiceDirectory {
    services: RwLock<HashMap<String, Service>>,
}

impl ServiceDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            services: RwLock::new(HashMap::new()),
        })
    }

    /// Store under `service_id` and, when present, under `alias_id` too.
    pub fn store(&self, service: Service) {
        let mut services = self.services.write();
        if !service.alias_id.is_empty() {
            services.insert(service.alias_id.clone(), service.clone());
        }
        services.insert(service.service_id.clone(), service);
    }

    /// Remove by id. Alias and primary entries are kept symmetric: removing
    /// either also drops its twin.
    pub fn remove(&self, id: &str) {
        let mut services = self.services.write();
        if let Some(removed) = services.remove(id) {
            if !removed.alias_id.is_empty() && removed.alias_id != id {
                services.remove(&removed.alias_id);
            }
            if removed.service_id != id {
                services.remove(&removed.service_id);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Service> {
        self.services.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let services = self.services.read();
        serde_json::to_value(&*services).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(version: &str) -> Endpoint {
        Endpoint {
            version: version.to_string(),
            http_method: "GET".into(),
            http_pattern: "/v1/x".into(),
            service: Service {
                service_id: "svc".into(),
                rpc_proto: "dubbo".into(),
                interface: "com.acme.X".into(),
                method: "call".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn exact_version_wins() {
        let multi = MultiEndpoint::new();
        multi.update("A", endpoint("A"));
        multi.update("B", endpoint("B"));
        assert_eq!(multi.find_by_version("B").unwrap().version, "B");
    }

    #[test]
    fn wildcard_entry_serves_any_request() {
        let multi = MultiEndpoint::new();
        multi.update("", endpoint(""));
        multi.update("A", endpoint("A"));
        assert_eq!(multi.find_by_version("Z").unwrap().version, "");
        assert_eq!(multi.find_by_version("").unwrap().version, "");
    }

    #[test]
    fn empty_request_falls_back_to_lex_smallest() {
        let multi = MultiEndpoint::new();
        multi.update("B", endpoint("B"));
        multi.update("A", endpoint("A"));
        assert_eq!(multi.find_by_version("").unwrap().version, "A");
    }

    #[test]
    fn nonempty_miss_without_wildcard_fails() {
        let multi = MultiEndpoint::new();
        multi.update("A", endpoint("A"));
        assert!(multi.find_by_version("Z").is_none());
    }

    #[test]
    fn delete_then_update_serves_replacement() {
        let multi = MultiEndpoint::new();
        multi.update("A", endpoint("A"));
        multi.delete("A");
        assert!(multi.find_by_version("A").is_none());
        let mut replacement = endpoint("A");
        replacement.service.method = "call2".into();
        multi.update("A", replacement);
        assert_eq!(multi.find_by_version("A").unwrap().service.method, "call2");
        assert_eq!(multi.len(), 1);
    }

    #[test]
    fn register_is_idempotent_per_key() {
        let table = RouteTable::new();
        let (first, created) = table.register("GET#/v1/x");
        assert!(created);
        first.update("A", endpoint("A"));
        let (second, created_again) = table.register("GET#/v1/x");
        assert!(!created_again);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            table
                .lookup("GET#/v1/x")
                .unwrap()
                .find_by_version("A")
                .unwrap()
                .version,
            "A"
        );
    }

    #[test]
    fn service_removal_is_alias_symmetric() {
        let directory = ServiceDirectory::new();
        directory.store(Service {
            service_id: "orders".into(),
            alias_id: "orders-legacy".into(),
            rpc_proto: "dubbo".into(),
            interface: "com.acme.Orders".into(),
            method: "get".into(),
            ..Default::default()
        });
        assert!(directory.get("orders-legacy").is_some());
        directory.remove("orders");
        assert!(directory.get("orders").is_none());
        assert!(directory.get("orders-legacy").is_none());
        assert_eq!(directory.len(), 0);
    }

    #[test]
    fn concurrent_readers_never_see_torn_updates() {
        let multi = Arc::new(MultiEndpoint::new());
        multi.update("A", endpoint("A"));
        let mut updated = endpoint("A");
        updated.service.interface = "com.acme.Y".into();
        updated.service.method = "call2".into();

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let multi = multi.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let seen = multi.find_by_version("A").unwrap();
                        let pre = seen.service.interface == "com.acme.X"
                            && seen.service.method == "call";
                        let post = seen.service.interface == "com.acme.Y"
                            && seen.service.method == "call2";
                        assert!(pre || post, "reader observed a torn endpoint");
                    }
                })
            })
            .collect();

        multi.update("A", updated);
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(multi.len(), 1);
    }
}
