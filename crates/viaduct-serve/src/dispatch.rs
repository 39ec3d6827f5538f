//! Request dispatcher: composes the filter chain around the terminal
//! transport step and accounts every routed request.

use std::sync::Arc;

use http::StatusCode;
use serde_json::Value;
use tracing::{error, info};
use viaduct_errors::prelude::*;

use crate::config::{
    Configuration, KEY_FILTER_ID, KEY_FILTER_TYPE, NS_DYN_FILTER, NS_TRANSPORTERS,
};
use crate::context::{Cancelled, Context};
use crate::extensions::Extensions;
use crate::filter::{walk, Filter, FilterInvoker};
use crate::metrics::EndpointMetrics;

pub struct Dispatcher {
    extensions: Arc<Extensions>,
    metrics: Arc<EndpointMetrics>,
    global_filters: Vec<Arc<dyn Filter>>,
    selective_pool: Vec<Arc<dyn Filter>>,
}

impl Dispatcher {
    /// Initialize every transporter and filter before any request can be
    /// served. Disabled filters are excluded from the active sets; a
    /// dynamic-filter entry naming an unknown type is a fatal error.
    pub fn init(
        extensions: Arc<Extensions>,
        metrics: Arc<EndpointMetrics>,
        root: &Arc<Value>,
    ) -> anyhow::Result<Self> {
        let transporter_config = Configuration::of(root, NS_TRANSPORTERS);
        for (proto, transporter) in extensions.transporters() {
            info!(proto = %proto, "load transporter");
            transporter.init(&transporter_config.sub(proto))?;
        }

        let mut global_filters = Vec::new();
        for filter in extensions.global_filters() {
            let config = Configuration::of(root, filter.filter_id());
            if config.is_disabled() {
                info!(filter_id = %filter.filter_id(), "global filter disabled");
                continue;
            }
            info!(filter_id = %filter.filter_id(), "load global filter");
            filter.init(&config)?;
            global_filters.push(filter.clone());
        }

        let mut selective_pool = Vec::new();
        for filter in extensions.selective_filters() {
            let config = Configuration::of(root, filter.filter_id());
            if config.is_disabled() {
                info!(filter_id = %filter.filter_id(), "selective filter disabled");
                continue;
            }
            info!(filter_id = %filter.filter_id(), "load selective filter");
            filter.init(&config)?;
            selective_pool.push(filter.clone());
        }

        for entry in Configuration::list(root, NS_DYN_FILTER) {
            let Some(filter_id) = entry.get_string(KEY_FILTER_ID).filter(|id| !id.is_empty())
            else {
                info!("dynamic filter entry without id ignored");
                continue;
            };
            let type_name = entry.get_string(KEY_FILTER_TYPE).unwrap_or_default();
            if entry.is_disabled() {
                info!(filter_id = %filter_id, type_name = %type_name, "dynamic filter disabled");
                continue;
            }
            let factory = extensions.filter_factory(&type_name).ok_or_else(|| {
                anyhow::anyhow!(
                    "filter factory not found, type: {type_name}, id: {filter_id}"
                )
            })?;
            let filter = factory();
            info!(filter_id = %filter_id, type_name = %type_name, "load dynamic filter");
            filter.init(&entry)?;
            selective_pool.push(filter);
        }

        Ok(Self {
            extensions,
            metrics,
            global_filters,
            selective_pool,
        })
    }

    /// Filters available to selectors: enabled selective statics plus
    /// dynamically loaded instances.
    pub fn selective_filters(&self) -> &[Arc<dyn Filter>] {
        &self.selective_pool
    }

    pub fn selective_filter(&self, filter_id: &str) -> Option<Arc<dyn Filter>> {
        self.selective_pool
            .iter()
            .find(|filter| filter.filter_id() == filter_id)
            .cloned()
    }

    pub fn global_filters(&self) -> &[Arc<dyn Filter>] {
        &self.global_filters
    }

    /// Execute one request through the filter chain to the transport.
    pub async fn route(&self, ctx: Arc<Context>) -> Result<(), ServeError> {
        let result = self.route_chain(ctx.clone()).await;
        if let Some(service) = ctx.service() {
            self.metrics
                .record_access(&service.rpc_proto, &service.interface, &service.method);
            if let Err(err) = &result {
                self.metrics.record_error(
                    &service.rpc_proto,
                    &service.interface,
                    &service.method,
                    err.error_code(),
                );
            }
        }
        ctx.add_metric("route", ctx.start_at().elapsed());
        result
    }

    async fn route_chain(&self, ctx: Arc<Context>) -> Result<(), ServeError> {
        let mut selective: Vec<Arc<dyn Filter>> = Vec::new();
        for selector in self.extensions.selectors() {
            if selector.activate(&ctx) {
                selective.extend(selector.do_select(&ctx));
            }
        }
        ctx.add_metric("selector", ctx.start_at().elapsed());

        let filters: Vec<Arc<dyn Filter>> = self
            .global_filters
            .iter()
            .cloned()
            .chain(selective)
            .collect();
        let chain = walk(self.terminal(), &filters);
        chain(ctx).await
    }

    /// The innermost invoker: cancellation gate, protocol resolution, timed
    /// transport call. A transport error is stamped onto the response
    /// status before it propagates; the engine prefers the returned error.
    fn terminal(&self) -> FilterInvoker {
        let extensions = self.extensions.clone();
        let metrics = self.metrics.clone();
        Arc::new(move |ctx: Arc<Context>| {
            let extensions = extensions.clone();
            let metrics = metrics.clone();
            Box::pin(async move {
                if ctx.cancellation().is_cancelled() {
                    return Err(ServeError::canceled(Cancelled));
                }
                let endpoint = ctx
                    .endpoint()
                    .ok_or_else(|| ServeError::internal("ROUTE:NO_ENDPOINT_BOUND"))?;
                let proto = endpoint.service.rpc_proto.clone();
                let Some(transporter) = extensions.transporter(&proto) else {
                    error!(
                        request_id = %ctx.request_id(),
                        proto = %proto,
                        service_id = %endpoint.service.service_id,
                        "no transporter registered for protocol"
                    );
                    return Err(ServeErrorBuilder::new(
                        StatusCode::NOT_FOUND,
                        codes::REQUEST_NOT_FOUND,
                    )
                    .message(format!("ROUTE:UNKNOWN_PROTOCOL:{proto}"))
                    .build());
                };
                let timer = metrics
                    .route_duration
                    .with_label_values(&["Transporter", &proto])
                    .start_timer();
                let result = transporter.transport(&ctx).await;
                timer.observe_duration();
                ctx.add_metric("transporter", ctx.start_at().elapsed());
                if let Err(err) = &result {
                    ctx.with_response(|response| response.set_status(err.status_code));
                }
                result
            })
        })
    }
}
