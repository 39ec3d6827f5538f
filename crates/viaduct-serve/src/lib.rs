//! Core of the viaduct gateway: endpoint registry and watcher, request
//! dispatcher, filter pipeline, and the pooled per-request context, composed
//! by the serve engine in front of pluggable backend transports.

pub mod config;
pub mod context;
pub mod debug;
pub mod discovery;
pub mod dispatch;
pub mod echo;
pub mod engine;
pub mod extensions;
pub mod filter;
pub mod metrics;
pub mod pool;
pub mod prelude;
pub mod registry;
pub mod testkit;
pub mod transport;
pub mod web;
pub mod web_axum;

pub use engine::{ServeEngine, ServeEngineBuilder};
