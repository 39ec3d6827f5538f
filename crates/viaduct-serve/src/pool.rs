//! Free-list allocator for request contexts.
//!
//! Acquisition pops a recycled context or builds a fresh one; the returned
//! guard releases it exactly once on every path, panics included. A context
//! that still has live references at release time is abandoned instead of
//! recycled, so no stale handle can observe the next request.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use viaduct_types::Endpoint;

use crate::context::Context;
use crate::web::WebContext;

pub struct ContextPool {
    free: Mutex<Vec<Context>>,
}

impl ContextPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
        })
    }

    pub fn acquire(
        self: &Arc<Self>,
        request_id: String,
        web: Arc<dyn WebContext>,
        endpoint: Arc<Endpoint>,
    ) -> PooledContext {
        let mut ctx = self.free.lock().pop().unwrap_or_default();
        ctx.reattach(request_id, web, endpoint);
        PooledContext {
            ctx: Some(Arc::new(ctx)),
            pool: Arc::clone(self),
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn recycle(&self, mut ctx: Context) {
        ctx.release();
        self.free.lock().push(ctx);
    }
}

/// RAII handle pairing every acquire with exactly one release.
pub struct PooledContext {
    ctx: Option<Arc<Context>>,
    pool: Arc<ContextPool>,
}

impl PooledContext {
    pub fn context(&self) -> &Arc<Context> {
        // The option is only emptied in drop.
        self.ctx.as_ref().unwrap()
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            match Arc::try_unwrap(ctx) {
                Ok(ctx) => self.pool.recycle(ctx),
                Err(leaked) => {
                    warn!(
                        request_id = %leaked.request_id(),
                        "context escaped its request; dropping instead of recycling"
                    );
                }
            }
        }
    }
}
