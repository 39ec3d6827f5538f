//! Process-wide extension container.
//!
//! Everything pluggable — transporters, decoders, filters, selectors,
//! dynamic filter factories, value resolvers, the argument lookup, web
//! server and discovery factories, lifecycle hooks — is registered on the
//! builder and frozen into an immutable `Extensions` before the engine is
//! built. Register-before-serve is enforced by this construction order,
//! not by runtime checks.

use std::collections::HashMap;
use std::sync::Arc;

use viaduct_types::prelude::*;

use crate::config::Configuration;
use crate::discovery::{
    memory_discovery_factory, DiscoveryFactory, DISCOVERY_PROTO_STATIC,
};
use crate::filter::{Filter, FilterFactory, FilterSelector, ShutdownHook, StartupHook};
use crate::transport::{TransportDecoder, Transporter};
use crate::web::WebServer;
use crate::web_axum::AxumWebServer;

pub type WebServerFactory = Arc<dyn Fn(&Configuration) -> Arc<dyn WebServer> + Send + Sync>;

pub struct Extensions {
    transporters: HashMap<String, Arc<dyn Transporter>>,
    transport_decoders: HashMap<String, TransportDecoder>,
    global_filters: Vec<Arc<dyn Filter>>,
    selective_filters: Vec<Arc<dyn Filter>>,
    selectors: Vec<Arc<dyn FilterSelector>>,
    filter_factories: HashMap<String, FilterFactory>,
    value_resolvers: HashMap<String, ValueResolver>,
    default_resolver: ValueResolver,
    argument_lookup: ArgumentLookupFunc,
    web_server_factory: WebServerFactory,
    discovery_factories: HashMap<String, DiscoveryFactory>,
    startup_hooks: Vec<Arc<dyn StartupHook>>,
    shutdown_hooks: Vec<Arc<dyn ShutdownHook>>,
}

impl Extensions {
    pub fn builder() -> ExtensionsBuilder {
        ExtensionsBuilder::new()
    }

    pub fn transporter(&self, proto: &str) -> Option<Arc<dyn Transporter>> {
        self.transporters.get(proto).cloned()
    }

    pub fn transporters(&self) -> &HashMap<String, Arc<dyn Transporter>> {
        &self.transporters
    }

    pub fn transport_decoder(&self, proto: &str) -> Option<&TransportDecoder> {
        self.transport_decoders.get(proto)
    }

    pub fn global_filters(&self) -> &[Arc<dyn Filter>] {
        &self.global_filters
    }

    pub fn selective_filters(&self) -> &[Arc<dyn Filter>] {
        &self.selective_filters
    }

    pub fn selectors(&self) -> &[Arc<dyn FilterSelector>] {
        &self.selectors
    }

    pub fn filter_factory(&self, type_name: &str) -> Option<&FilterFactory> {
        self.filter_factories.get(type_name)
    }

    pub fn web_server_factory(&self) -> &WebServerFactory {
        &self.web_server_factory
    }

    pub fn discovery_factory(&self, proto: &str) -> Option<&DiscoveryFactory> {
        self.discovery_factories.get(proto)
    }

    pub fn startup_hooks(&self) -> Vec<Arc<dyn StartupHook>> {
        let mut hooks = self.startup_hooks.clone();
        hooks.sort_by_key(|hook| hook.order());
        hooks
    }

    pub fn shutdown_hooks(&self) -> Vec<Arc<dyn ShutdownHook>> {
        let mut hooks = self.shutdown_hooks.clone();
        hooks.sort_by_key(|hook| hook.order());
        hooks
    }

    /// Late-bind the resolver and lookup slots across an argument tree.
    /// Runs before an endpoint or service becomes visible to requests.
    pub fn bind_arguments(&self, arguments: &mut [Argument]) {
        for argument in arguments {
            let resolver = self
                .value_resolvers
                .get(&argument.class)
                .unwrap_or(&self.default_resolver);
            argument.resolver = Some(resolver.clone());
            argument.lookup = Some(self.argument_lookup.clone());
            self.bind_arguments(&mut argument.fields);
        }
    }
}

pub struct ExtensionsBuilder {
    transporters: HashMap<String, Arc<dyn Transporter>>,
    transport_decoders: HashMap<String, TransportDecoder>,
    global_filters: Vec<Arc<dyn Filter>>,
    selective_filters: Vec<Arc<dyn Filter>>,
    selectors: Vec<Arc<dyn FilterSelector>>,
    filter_factories: HashMap<String, FilterFactory>,
    value_resolvers: HashMap<String, ValueResolver>,
    default_resolver: Option<ValueResolver>,
    argument_lookup: Option<ArgumentLookupFunc>,
    web_server_factory: Option<WebServerFactory>,
    discovery_factories: HashMap<String, DiscoveryFactory>,
    startup_hooks: Vec<Arc<dyn StartupHook>>,
    shutdown_hooks: Vec<Arc<dyn ShutdownHook>>,
}

impl ExtensionsBuilder {
    pub fn new() -> Self {
        Self {
            transporters: HashMap::new(),
            transport_decoders: HashMap::new(),
            global_filters: Vec::new(),
            selective_filters: Vec::new(),
            selectors: Vec::new(),
            filter_factories: HashMap::new(),
            value_resolvers: HashMap::new(),
            default_resolver: None,
            argument_lookup: None,
            web_server_factory: None,
            discovery_factories: HashMap::new(),
            startup_hooks: Vec::new(),
            shutdown_hooks: Vec::new(),
        }
    }

    pub fn register_transporter(
        mut self,
        proto: impl Into<String>,
        transporter: Arc<dyn Transporter>,
    ) -> Self {
        self.transporters.insert(proto.into(), transporter);
        self
    }

    pub fn register_transport_decoder(
        mut self,
        proto: impl Into<String>,
        decoder: TransportDecoder,
    ) -> Self {
        self.transport_decoders.insert(proto.into(), decoder);
        self
    }

    pub fn register_global_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.global_filters.push(filter);
        self
    }

    pub fn register_selective_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.selective_filters.push(filter);
        self
    }

    pub fn register_selector(mut self, selector: Arc<dyn FilterSelector>) -> Self {
        self.selectors.push(selector);
        self
    }

    pub fn register_filter_factory(
        mut self,
        type_name: impl Into<String>,
        factory: FilterFactory,
    ) -> Self {
        self.filter_factories.insert(type_name.into(), factory);
        self
    }

    pub fn register_value_resolver(
        mut self,
        class: impl Into<String>,
        resolver: ValueResolver,
    ) -> Self {
        self.value_resolvers.insert(class.into(), resolver);
        self
    }

    pub fn with_default_resolver(mut self, resolver: ValueResolver) -> Self {
        self.default_resolver = Some(resolver);
        self
    }

    pub fn with_argument_lookup(mut self, lookup: ArgumentLookupFunc) -> Self {
        self.argument_lookup = Some(lookup);
        self
    }

    pub fn with_web_server_factory(mut self, factory: WebServerFactory) -> Self {
        self.web_server_factory = Some(factory);
        self
    }

    pub fn register_discovery_factory(
        mut self,
        proto: impl Into<String>,
        factory: DiscoveryFactory,
    ) -> Self {
        self.discovery_factories.insert(proto.into(), factory);
        self
    }

    pub fn register_startup_hook(mut self, hook: Arc<dyn StartupHook>) -> Self {
        self.startup_hooks.push(hook);
        self
    }

    pub fn register_shutdown_hook(mut self, hook: Arc<dyn ShutdownHook>) -> Self {
        self.shutdown_hooks.push(hook);
        self
    }

    /// Freeze the container. Global filters are stable-sorted by their
    /// ordering hint here, once.
    pub fn build(mut self) -> Extensions {
        self.global_filters.sort_by_key(|filter| filter.order());
        self.discovery_factories
            .entry(DISCOVERY_PROTO_STATIC.to_string())
            .or_insert_with(memory_discovery_factory);
        Extensions {
            transporters: self.transporters,
            transport_decoders: self.transport_decoders,
            global_filters: self.global_filters,
            selective_filters: self.selective_filters,
            selectors: self.selectors,
            filter_factories: self.filter_factories,
            value_resolvers: self.value_resolvers,
            default_resolver: self
                .default_resolver
                .unwrap_or_else(identity_value_resolver),
            argument_lookup: self.argument_lookup.unwrap_or_else(default_argument_lookup),
            web_server_factory: self
                .web_server_factory
                .unwrap_or_else(default_web_server_factory),
            discovery_factories: self.discovery_factories,
            startup_hooks: self.startup_hooks,
            shutdown_hooks: self.shutdown_hooks,
        }
    }
}

impl Default for ExtensionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn identity_value_resolver() -> ValueResolver {
    Arc::new(|mtv: &MTValue, _class: &str, _generic: &[String]| Ok(mtv.value.clone()))
}

fn default_argument_lookup() -> ArgumentLookupFunc {
    Arc::new(|scope: &str, key: &str, lookup: &dyn ScopedLookup| {
        let scope = if scope.is_empty() { SCOPE_AUTO } else { scope };
        Ok(lookup
            .scoped_value(scope, key)
            .unwrap_or_else(|| MTValue::json(serde_json::Value::Null)))
    })
}

fn default_web_server_factory() -> WebServerFactory {
    Arc::new(|config: &Configuration| AxumWebServer::new(config) as Arc<dyn WebServer>)
}
