//! Chain-of-responsibility filter pipeline.
//!
//! A filter wraps the downstream invoker and returns a new invoker; the
//! dispatcher composes the chain by reverse iteration so the first filter in
//! the list runs first. An invoker calls its wrapped `next` zero or one
//! times — returning an error without calling it short-circuits everything
//! downstream, transport included.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use viaduct_errors::ServeError;

use crate::config::Configuration;
use crate::context::Context;

pub type FilterInvoker =
    Arc<dyn Fn(Arc<Context>) -> BoxFuture<'static, Result<(), ServeError>> + Send + Sync>;

pub trait Filter: Send + Sync {
    fn filter_id(&self) -> &str;

    /// Ordering hint for the static-filter sorter; lower runs first.
    fn order(&self) -> i32 {
        0
    }

    /// Called once before serving begins, with the configuration namespace
    /// equal to the filter id.
    fn init(&self, _config: &Configuration) -> anyhow::Result<()> {
        Ok(())
    }

    fn do_filter(&self, next: FilterInvoker) -> FilterInvoker;
}

/// Per-request decision object choosing which selective filters apply.
pub trait FilterSelector: Send + Sync {
    fn activate(&self, ctx: &Context) -> bool;
    fn do_select(&self, ctx: &Context) -> Vec<Arc<dyn Filter>>;
}

/// Instantiates a dynamically configured filter; keyed by the entry's
/// `type` in the extension registry.
pub type FilterFactory = Arc<dyn Fn() -> Arc<dyn Filter> + Send + Sync>;

/// Compose `filters` around `terminal`: `filters[0]` wraps the rest, so the
/// call order is `filters[0](filters[1](.. terminal))`.
pub fn walk(terminal: FilterInvoker, filters: &[Arc<dyn Filter>]) -> FilterInvoker {
    filters
        .iter()
        .rev()
        .fold(terminal, |next, filter| filter.do_filter(next))
}

/// Lifecycle capability run at engine startup, in order-hint order.
#[async_trait]
pub trait StartupHook: Send + Sync {
    fn order(&self) -> i32 {
        0
    }
    async fn startup(&self) -> anyhow::Result<()>;
}

/// Lifecycle capability drained at engine shutdown, in order-hint order.
#[async_trait]
pub trait ShutdownHook: Send + Sync {
    fn order(&self) -> i32 {
        0
    }
    async fn shutdown(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TraceFilter {
        id: &'static str,
        short_circuit: bool,
    }

    impl Filter for TraceFilter {
        fn filter_id(&self) -> &str {
            self.id
        }

        fn do_filter(&self, next: FilterInvoker) -> FilterInvoker {
            let id = self.id;
            let short_circuit = self.short_circuit;
            Arc::new(move |ctx: Arc<Context>| {
                let next = next.clone();
                Box::pin(async move {
                    let mut seen = ctx
                        .attribute("trace")
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    seen.push_str(id);
                    ctx.set_attribute("trace", json!(seen));
                    if short_circuit {
                        return Err(viaduct_errors::ServeError::internal("stopped"));
                    }
                    next(ctx).await
                })
            })
        }
    }

    fn terminal() -> FilterInvoker {
        Arc::new(|ctx: Arc<Context>| {
            Box::pin(async move {
                let mut seen = ctx
                    .attribute("trace")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                seen.push('T');
                ctx.set_attribute("trace", json!(seen));
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn chain_runs_left_to_right_around_terminal() {
        let filters: Vec<Arc<dyn Filter>> = vec![
            Arc::new(TraceFilter { id: "A", short_circuit: false }),
            Arc::new(TraceFilter { id: "B", short_circuit: false }),
            Arc::new(TraceFilter { id: "C", short_circuit: false }),
        ];
        let chain = walk(terminal(), &filters);
        let ctx = Arc::new(Context::new());
        chain(ctx.clone()).await.unwrap();
        assert_eq!(ctx.attribute("trace").unwrap(), json!("ABCT"));
    }

    #[tokio::test]
    async fn short_circuit_skips_later_filters_and_terminal() {
        let filters: Vec<Arc<dyn Filter>> = vec![
            Arc::new(TraceFilter { id: "A", short_circuit: false }),
            Arc::new(TraceFilter { id: "B", short_circuit: true }),
            Arc::new(TraceFilter { id: "C", short_circuit: false }),
        ];
        let chain = walk(terminal(), &filters);
        let ctx = Arc::new(Context::new());
        let err = chain(ctx.clone()).await.unwrap_err();
        assert_eq!(err.error_code(), viaduct_errors::codes::GATEWAY_INTERNAL);
        assert_eq!(ctx.attribute("trace").unwrap(), json!("AB"));
    }
}
