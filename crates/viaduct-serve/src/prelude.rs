pub use crate::config::{load_tree, Configuration};
pub use crate::context::{CancellationToken, Cancelled, Context, ResponseBuffer};
pub use crate::discovery::{
    memory_discovery_factory, shared_discovery_factory, Discovery, DiscoveryFactory,
    MemoryDiscovery, DISCOVERY_PROTO_STATIC, EVENT_CHANNEL_CAPACITY,
};
pub use crate::dispatch::Dispatcher;
pub use crate::echo::{echo_endpoints, EchoTransporter, ECHO_PROTO};
pub use crate::engine::{
    BuildInfo, ContextHookFunc, PrepareHookFunc, ServeEngine, ServeEngineBuilder,
    VersionLookupFunc,
};
pub use crate::extensions::{Extensions, ExtensionsBuilder, WebServerFactory};
pub use crate::filter::{
    walk, Filter, FilterFactory, FilterInvoker, FilterSelector, ShutdownHook, StartupHook,
};
pub use crate::metrics::EndpointMetrics;
pub use crate::pool::{ContextPool, PooledContext};
pub use crate::registry::{MultiEndpoint, RouteTable, ServiceDirectory};
pub use crate::transport::{
    passthrough_decoder, write_decoded_reply, DecodedReply, TransportDecoder, Transporter,
};
pub use crate::web::{
    default_errors_writer, default_response_writer, ErrorsWriter, ResponseWriter, TlsSettings,
    WebContext, WebErrorHandler, WebHandler, WebInterceptor, WebServer, HEADER_REQUEST_ID,
    HEADER_VERSION,
};
pub use crate::web_axum::AxumWebServer;
