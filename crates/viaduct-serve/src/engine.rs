//! Serve engine: the composition root.
//!
//! Owns the public and administration web servers, the context pool, the
//! route table and service directory, and the two discovery event loops.
//! Lifecycle: `prepare` → `initial` → `startup` → `shutdown(deadline)`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use viaduct_errors::prelude::*;
use viaduct_types::prelude::*;

use crate::config::{
    Configuration, KEY_ADDRESS, KEY_FEATURE_DEBUG_ENABLE, KEY_FEATURE_DEBUG_PORT,
    KEY_FEATURE_ECHO_ENABLE, KEY_MANAGE_ADDRESS, KEY_MANAGE_PORT, KEY_PORT, KEY_REGISTRY_PROTO,
    KEY_REQUEST_LOG_ENABLE, KEY_TLS_CERT_FILE, KEY_TLS_KEY_FILE, NS_ENDPOINT_REGISTRY,
    NS_HTTP_WEB_SERVER,
};
use crate::context::Context;
use crate::debug;
use crate::discovery::{Discovery, DISCOVERY_PROTO_STATIC, EVENT_CHANNEL_CAPACITY};
use crate::dispatch::Dispatcher;
use crate::echo::echo_endpoints;
use crate::extensions::Extensions;
use crate::metrics::EndpointMetrics;
use crate::pool::ContextPool;
use crate::registry::{MultiEndpoint, RouteTable, ServiceDirectory};
use crate::web::{
    default_errors_writer, default_response_writer, error_handler_of, ErrorsWriter,
    ResponseWriter, TlsSettings, WebContext, WebHandler, WebInterceptor, WebServer,
    HEADER_VERSION,
};

const DEFAULT_BANNER: &str =
    "Viaduct // fast gateway for microservice backends: dubbo, grpc, http";

pub type VersionLookupFunc = Arc<dyn Fn(&dyn WebContext) -> String + Send + Sync>;
pub type ContextHookFunc = Arc<dyn Fn(&dyn WebContext, &Context) + Send + Sync>;
pub type PrepareHookFunc = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Debug, Default)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub date: String,
}

const ALLOWED_HTTP_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "TRACE",
];

fn is_allowed_http_method(method: &str) -> bool {
    ALLOWED_HTTP_METHODS.contains(&method)
}

fn server_defaults() -> HashMap<String, Value> {
    [
        (KEY_ADDRESS.to_string(), json!("0.0.0.0")),
        (KEY_PORT.to_string(), json!(8080)),
        (KEY_MANAGE_ADDRESS.to_string(), json!("0.0.0.0")),
        (KEY_MANAGE_PORT.to_string(), json!(8081)),
        (KEY_FEATURE_DEBUG_PORT.to_string(), json!(9527)),
    ]
    .into_iter()
    .collect()
}

/// Request-path state shared by route handlers and the event loops.
struct EngineCore {
    dispatcher: Arc<Dispatcher>,
    pool: Arc<ContextPool>,
    route_table: Arc<RouteTable>,
    services: Arc<ServiceDirectory>,
    metrics: Arc<EndpointMetrics>,
    extensions: Arc<Extensions>,
    response_writer: ResponseWriter,
    ctx_hooks: Vec<ContextHookFunc>,
    version_lookup: VersionLookupFunc,
    request_log: bool,
    public_server: Arc<dyn WebServer>,
    admin_server: Arc<dyn WebServer>,
}

impl EngineCore {
    /// Route one discovery event into the table and, the first time a key
    /// is seen, bind the web handler for it. Methods outside the whitelist
    /// are logged and dropped.
    fn handle_endpoint_event(self: &Arc<Self>, event: EndpointEvent) {
        let method = event.endpoint.http_method.to_uppercase();
        if !is_allowed_http_method(&method) {
            error!(
                method = %method,
                pattern = %event.endpoint.http_pattern,
                "unsupported http method in endpoint event, dropped"
            );
            return;
        }
        let mut endpoint = event.endpoint;
        endpoint.http_method = method;
        self.extensions.bind_arguments(&mut endpoint.service.arguments);
        self.extensions.bind_arguments(&mut endpoint.permission.arguments);
        if endpoint.is_managed() {
            self.register_managed_endpoint(event.event_type, endpoint);
        } else {
            self.register_serve_endpoint(event.event_type, endpoint);
        }
    }

    fn register_serve_endpoint(self: &Arc<Self>, event_type: EventType, endpoint: Endpoint) {
        let route_key = endpoint.route_key();
        let method = endpoint.http_method.clone();
        let pattern = endpoint.http_pattern.clone();
        let version = endpoint.version.clone();
        let (multi, first_time) = self.route_table.register(&route_key);
        match event_type {
            EventType::Added => {
                info!(version = %version, method = %method, pattern = %pattern, "new endpoint");
                multi.update(&version, endpoint);
                if first_time {
                    info!(method = %method, pattern = %pattern, "register http handler");
                    self.public_server.add_handler(
                        &method,
                        &pattern,
                        self.multi_endpoint_handler(multi),
                    );
                }
            }
            EventType::Updated => {
                info!(version = %version, method = %method, pattern = %pattern, "update endpoint");
                multi.update(&version, endpoint);
            }
            EventType::Removed => {
                info!(version = %version, method = %method, pattern = %pattern, "delete endpoint");
                // The web handler stays bound; an emptied table answers 404.
                multi.delete(&version);
            }
        }
    }

    /// Administration endpoints skip version multiplexing: one handler per
    /// method and pattern on the admin server.
    fn register_managed_endpoint(self: &Arc<Self>, event_type: EventType, endpoint: Endpoint) {
        match event_type {
            EventType::Added | EventType::Updated => {
                let method = endpoint.http_method.clone();
                let pattern = endpoint.http_pattern.clone();
                info!(method = %method, pattern = %pattern, "register managed http handler");
                let core = self.clone();
                let endpoint = Arc::new(endpoint);
                let handler: WebHandler = Arc::new(move |webc: Arc<dyn WebContext>| {
                    let core = core.clone();
                    let endpoint = endpoint.clone();
                    Box::pin(async move {
                        let request_id = webc.request_id().to_string();
                        core.handle_endpoint_request(webc, request_id, endpoint).await
                    })
                });
                self.admin_server.add_handler(&method, &pattern, handler);
            }
            EventType::Removed => {
                // Handler removal is not supported by the web abstraction.
            }
        }
    }

    fn handle_service_event(&self, event: ServiceEvent) {
        let mut service = event.service;
        self.extensions.bind_arguments(&mut service.arguments);
        match event.event_type {
            EventType::Added | EventType::Updated => {
                info!(
                    service_id = %service.service_id,
                    alias_id = %service.alias_id,
                    "store service"
                );
                self.services.store(service);
            }
            EventType::Removed => {
                info!(
                    service_id = %service.service_id,
                    alias_id = %service.alias_id,
                    "remove service"
                );
                self.services.remove(&service.service_id);
                if !service.alias_id.is_empty() {
                    self.services.remove(&service.alias_id);
                }
            }
        }
    }

    fn multi_endpoint_handler(self: &Arc<Self>, multi: Arc<MultiEndpoint>) -> WebHandler {
        let core = self.clone();
        Arc::new(move |webc: Arc<dyn WebContext>| {
            let core = core.clone();
            let multi = multi.clone();
            Box::pin(async move { core.handle_multi_endpoint_request(webc, multi).await })
        })
    }

    async fn handle_multi_endpoint_request(
        &self,
        webc: Arc<dyn WebContext>,
        multi: Arc<MultiEndpoint>,
    ) -> Result<(), ServeError> {
        let version = (self.version_lookup)(webc.as_ref());
        let request_id = webc.request_id().to_string();
        match multi.find_by_version(&version) {
            Some(endpoint) => self.handle_endpoint_request(webc, request_id, endpoint).await,
            None => {
                if self.request_log {
                    info!(
                        request_id = %request_id,
                        method = %webc.method(),
                        uri = %webc.uri(),
                        version = %version,
                        "route not found"
                    );
                }
                self.metrics
                    .record_route_not_found(webc.method(), webc.path());
                Err(ServeError::not_found())
            }
        }
    }

    /// Outermost per-request boundary: panics are caught here, logged with
    /// the request id and the captured backtrace, and rendered as an
    /// internal gateway error.
    async fn handle_endpoint_request(
        &self,
        webc: Arc<dyn WebContext>,
        request_id: String,
        endpoint: Arc<Endpoint>,
    ) -> Result<(), ServeError> {
        let outcome =
            AssertUnwindSafe(self.run_endpoint(webc, request_id.clone(), endpoint))
                .catch_unwind()
                .await;
        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(
                    request_id = %request_id,
                    panic = %detail,
                    backtrace = %std::backtrace::Backtrace::force_capture(),
                    "request handler panicked"
                );
                Err(ServeError::internal(detail))
            }
        }
    }

    async fn run_endpoint(
        &self,
        webc: Arc<dyn WebContext>,
        request_id: String,
        endpoint: Arc<Endpoint>,
    ) -> Result<(), ServeError> {
        let guard = self
            .pool
            .acquire(request_id.clone(), webc.clone(), endpoint);
        let ctx = guard.context().clone();
        if self.request_log {
            info!(request_id = %request_id, "route start");
        }
        for hook in &self.ctx_hooks {
            hook(webc.as_ref(), &ctx);
        }
        let routed = self.dispatcher.route(ctx.clone()).await;
        let result = match routed {
            Ok(()) => {
                let (status, headers, body) = ctx.response_snapshot();
                (self.response_writer)(webc.as_ref(), &request_id, &headers, status, &body)
            }
            Err(mut err) => {
                // Headers the transport already staged travel on the error;
                // the error's own additions win.
                let (_, headers, _) = ctx.response_snapshot();
                for (name, value) in headers.iter() {
                    if !err.header.contains_key(name) {
                        err.header.insert(name.clone(), value.clone());
                    }
                }
                error!(request_id = %request_id, error = %err, "route error");
                Err(err)
            }
        };
        if self.request_log {
            info!(
                request_id = %request_id,
                metrics = ?ctx.load_metrics(),
                elapsed = ?ctx.start_at().elapsed(),
                "route end"
            );
        }
        result
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub struct ServeEngineBuilder {
    response_writer: ResponseWriter,
    errors_writer: ErrorsWriter,
    ctx_hooks: Vec<ContextHookFunc>,
    prepare_hooks: Vec<PrepareHookFunc>,
    web_interceptors: Vec<WebInterceptor>,
    version_lookup: VersionLookupFunc,
    banner: String,
    defaults: HashMap<String, Value>,
}

impl ServeEngineBuilder {
    pub fn new() -> Self {
        Self {
            response_writer: default_response_writer(),
            errors_writer: default_errors_writer(),
            ctx_hooks: Vec::new(),
            prepare_hooks: Vec::new(),
            web_interceptors: Vec::new(),
            version_lookup: Arc::new(|webc: &dyn WebContext| {
                webc.header(HEADER_VERSION).unwrap_or_default()
            }),
            banner: DEFAULT_BANNER.to_string(),
            defaults: server_defaults(),
        }
    }

    pub fn with_response_writer(mut self, writer: ResponseWriter) -> Self {
        self.response_writer = writer;
        self
    }

    pub fn with_errors_writer(mut self, writer: ErrorsWriter) -> Self {
        self.errors_writer = writer;
        self
    }

    pub fn add_context_hook(mut self, hook: ContextHookFunc) -> Self {
        self.ctx_hooks.push(hook);
        self
    }

    pub fn add_prepare_hook(mut self, hook: PrepareHookFunc) -> Self {
        self.prepare_hooks.push(hook);
        self
    }

    pub fn add_web_interceptor(mut self, interceptor: WebInterceptor) -> Self {
        self.web_interceptors.push(interceptor);
        self
    }

    pub fn with_version_lookup(mut self, lookup: VersionLookupFunc) -> Self {
        self.version_lookup = lookup;
        self
    }

    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    pub fn with_defaults(mut self, defaults: HashMap<String, Value>) -> Self {
        self.defaults.extend(defaults);
        self
    }

    pub fn build(
        self,
        root: Arc<Value>,
        extensions: Arc<Extensions>,
    ) -> anyhow::Result<ServeEngine> {
        let metrics = Arc::new(EndpointMetrics::new()?);
        let (started_tx, _) = watch::channel(false);
        let (stopped_tx, _) = watch::channel(false);
        Ok(ServeEngine {
            http_config: Configuration::of(&root, NS_HTTP_WEB_SERVER)
                .with_defaults(self.defaults),
            root,
            extensions,
            metrics,
            route_table: RouteTable::new(),
            services: ServiceDirectory::new(),
            pool: ContextPool::new(),
            response_writer: self.response_writer,
            errors_writer: self.errors_writer,
            ctx_hooks: self.ctx_hooks,
            prepare_hooks: self.prepare_hooks,
            web_interceptors: self.web_interceptors,
            version_lookup: self.version_lookup,
            banner: self.banner,
            core: None,
            discovery: None,
            debug_server: None,
            started_tx,
            stopped_tx,
        })
    }
}

impl Default for ServeEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ServeEngine {
    root: Arc<Value>,
    http_config: Configuration,
    extensions: Arc<Extensions>,
    metrics: Arc<EndpointMetrics>,
    route_table: Arc<RouteTable>,
    services: Arc<ServiceDirectory>,
    pool: Arc<ContextPool>,
    response_writer: ResponseWriter,
    errors_writer: ErrorsWriter,
    ctx_hooks: Vec<ContextHookFunc>,
    prepare_hooks: Vec<PrepareHookFunc>,
    web_interceptors: Vec<WebInterceptor>,
    version_lookup: VersionLookupFunc,
    banner: String,
    core: Option<Arc<EngineCore>>,
    discovery: Option<Arc<dyn Discovery>>,
    debug_server: Option<Arc<dyn WebServer>>,
    started_tx: watch::Sender<bool>,
    stopped_tx: watch::Sender<bool>,
}

impl ServeEngine {
    pub fn builder() -> ServeEngineBuilder {
        ServeEngineBuilder::new()
    }

    /// Run the registered prepare hooks; call before `initial`.
    pub fn prepare(&self) -> anyhow::Result<()> {
        for hook in &self.prepare_hooks {
            hook()?;
        }
        Ok(())
    }

    /// Construct the web servers, initialize the dispatcher and discovery
    /// backend, install the debug surface, and replay echo endpoints when
    /// enabled.
    pub fn initial(&mut self) -> anyhow::Result<()> {
        let factory = self.extensions.web_server_factory().clone();
        let public_server = factory(&self.http_config);
        let admin_server = factory(&self.http_config);
        for server in [&public_server, &admin_server] {
            server.set_error_handler(error_handler_of(self.errors_writer.clone()));
            server.set_not_found_handler(Arc::new(|_webc: Arc<dyn WebContext>| {
                Box::pin(async { Err(ServeError::not_found()) })
            }));
        }
        for interceptor in &self.web_interceptors {
            public_server.add_interceptor(interceptor.clone());
        }

        let dispatcher = Arc::new(Dispatcher::init(
            self.extensions.clone(),
            self.metrics.clone(),
            &self.root,
        )?);

        let registry_config = Configuration::of(&self.root, NS_ENDPOINT_REGISTRY);
        let proto = registry_config.get_string_or(KEY_REGISTRY_PROTO, DISCOVERY_PROTO_STATIC);
        info!(proto = %proto, "active endpoint registry");
        let discovery_factory = self
            .extensions
            .discovery_factory(&proto)
            .ok_or_else(|| anyhow::anyhow!("discovery factory not found, proto: {proto}"))?
            .clone();
        let discovery = discovery_factory(&registry_config)?;

        let core = Arc::new(EngineCore {
            dispatcher,
            pool: self.pool.clone(),
            route_table: self.route_table.clone(),
            services: self.services.clone(),
            metrics: self.metrics.clone(),
            extensions: self.extensions.clone(),
            response_writer: self.response_writer.clone(),
            ctx_hooks: self.ctx_hooks.clone(),
            version_lookup: self.version_lookup.clone(),
            request_log: self.http_config.get_bool(KEY_REQUEST_LOG_ENABLE),
            public_server,
            admin_server: admin_server.clone(),
        });

        if self.http_config.get_bool(KEY_FEATURE_ECHO_ENABLE) {
            info!("echo endpoints register");
            for event in echo_endpoints() {
                core.handle_endpoint_event(event);
            }
        }

        admin_server.add_http_handler(
            "GET",
            "/debug/endpoints",
            debug::endpoints_handler(self.route_table.clone()),
        );
        admin_server.add_http_handler(
            "GET",
            "/debug/services",
            debug::services_handler(self.services.clone()),
        );
        admin_server.add_http_handler(
            "GET",
            "/debug/metrics",
            debug::metrics_handler(self.metrics.clone()),
        );

        if self.http_config.get_bool(KEY_FEATURE_DEBUG_ENABLE) {
            let debug_server = factory(&self.http_config);
            debug_server.set_error_handler(error_handler_of(self.errors_writer.clone()));
            debug_server.add_http_handler(
                "GET",
                "/debug/endpoints",
                debug::endpoints_handler(self.route_table.clone()),
            );
            debug_server.add_http_handler(
                "GET",
                "/debug/metrics",
                debug::metrics_handler(self.metrics.clone()),
            );
            self.debug_server = Some(debug_server);
        }

        self.core = Some(core);
        self.discovery = Some(discovery);
        Ok(())
    }

    /// Run startup hooks, spawn the discovery event loops, and start the
    /// admin then public listeners. The public server binds `address:port`,
    /// the admin server `manage-address:manage-port`.
    pub async fn startup(&self, info: BuildInfo) -> anyhow::Result<()> {
        let core = self.core()?;
        let discovery = self
            .discovery
            .clone()
            .context("startup before initial: no discovery backend")?;

        for hook in self.extensions.startup_hooks() {
            hook.startup().await?;
        }

        let (endpoint_tx, mut endpoint_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        discovery
            .watch_endpoints(endpoint_tx)
            .await
            .context("start registry endpoint watching")?;
        let endpoint_core = core.clone();
        tokio::spawn(async move {
            info!("endpoint event loop: starting");
            while let Some(event) = endpoint_rx.recv().await {
                endpoint_core.handle_endpoint_event(event);
            }
            info!("endpoint event loop: stopped");
        });

        let (service_tx, mut service_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        discovery
            .watch_services(service_tx)
            .await
            .context("start registry service watching")?;
        let service_core = core.clone();
        tokio::spawn(async move {
            info!("service event loop: starting");
            while let Some(event) = service_rx.recv().await {
                service_core.handle_service_event(event);
            }
            info!("service event loop: stopped");
        });

        let _ = self.started_tx.send(true);
        if !self.banner.is_empty() {
            info!("{}", self.banner);
        }
        info!(
            version = %info.version,
            commit = %info.commit,
            date = %info.date,
            "build info"
        );

        let manage_addr = self.listen_addr(KEY_MANAGE_ADDRESS, KEY_MANAGE_PORT)?;
        let admin_server = core.admin_server.clone();
        info!(addr = %manage_addr, "manage web server starting");
        tokio::spawn(async move {
            if let Err(err) = admin_server.serve(manage_addr, None).await {
                error!(error = %err, "manage web server failed");
            }
        });

        if let Some(debug_server) = self.debug_server.clone() {
            let debug_addr = self.listen_addr(KEY_ADDRESS, KEY_FEATURE_DEBUG_PORT)?;
            info!(addr = %debug_addr, "debug web server starting");
            tokio::spawn(async move {
                if let Err(err) = debug_server.serve(debug_addr, None).await {
                    error!(error = %err, "debug web server failed");
                }
            });
        }

        let public_addr = self.listen_addr(KEY_ADDRESS, KEY_PORT)?;
        let tls = self.tls_settings();
        let public_server = core.public_server.clone();
        info!(
            addr = %public_addr,
            tls = tls.is_some(),
            "http web server starting"
        );
        tokio::spawn(async move {
            if let Err(err) = public_server.serve(public_addr, tls).await {
                error!(error = %err, "http web server failed");
            }
        });

        Ok(())
    }

    /// Shut down the admin then public server, drain shutdown hooks in
    /// order, and close the stopped signal. Discovery channels close from
    /// the producer side; the event loops drain on their own.
    pub async fn shutdown(&self, deadline: Duration) -> anyhow::Result<()> {
        info!("serve engine shutdown");
        if let Some(core) = &self.core {
            core.admin_server.shutdown(deadline).await;
            core.public_server.shutdown(deadline).await;
        }
        if let Some(debug_server) = &self.debug_server {
            debug_server.shutdown(deadline).await;
        }
        let mut first_error = None;
        for hook in self.extensions.shutdown_hooks() {
            if let Err(err) = hook.shutdown().await {
                warn!(error = %err, "shutdown hook failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        let _ = self.stopped_tx.send(true);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Closed-over `true` once `startup` finished.
    pub fn started(&self) -> watch::Receiver<bool> {
        self.started_tx.subscribe()
    }

    /// Closed-over `true` once `shutdown` finished.
    pub fn stopped(&self) -> watch::Receiver<bool> {
        self.stopped_tx.subscribe()
    }

    pub fn route_table(&self) -> Arc<RouteTable> {
        self.route_table.clone()
    }

    pub fn services(&self) -> Arc<ServiceDirectory> {
        self.services.clone()
    }

    pub fn metrics(&self) -> Arc<EndpointMetrics> {
        self.metrics.clone()
    }

    pub fn extensions(&self) -> Arc<Extensions> {
        self.extensions.clone()
    }

    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.core.as_ref().map(|core| core.dispatcher.clone())
    }

    /// Feed one endpoint event through the same path the event loop uses.
    pub fn handle_endpoint_event(&self, event: EndpointEvent) -> anyhow::Result<()> {
        self.core()?.handle_endpoint_event(event);
        Ok(())
    }

    pub fn handle_service_event(&self, event: ServiceEvent) -> anyhow::Result<()> {
        self.core()?.handle_service_event(event);
        Ok(())
    }

    /// Bound address of the public listener once it is up.
    pub async fn public_ready(&self) -> Option<SocketAddr> {
        self.core.as_ref()?.public_server.wait_ready().await
    }

    pub async fn admin_ready(&self) -> Option<SocketAddr> {
        self.core.as_ref()?.admin_server.wait_ready().await
    }

    fn core(&self) -> anyhow::Result<&Arc<EngineCore>> {
        self.core
            .as_ref()
            .context("engine not initialized: call initial() first")
    }

    fn listen_addr(&self, address_key: &str, port_key: &str) -> anyhow::Result<SocketAddr> {
        let address = self.http_config.get_string_or(address_key, "0.0.0.0");
        let port = self.http_config.get_u16(port_key).unwrap_or(0);
        format!("{address}:{port}")
            .parse()
            .with_context(|| format!("invalid listen address {address}:{port}"))
    }

    fn tls_settings(&self) -> Option<TlsSettings> {
        let cert_file = self.http_config.get_string(KEY_TLS_CERT_FILE)?;
        let key_file = self.http_config.get_string(KEY_TLS_KEY_FILE)?;
        if cert_file.is_empty() || key_file.is_empty() {
            return None;
        }
        Some(TlsSettings {
            cert_file,
            key_file,
        })
    }
}
