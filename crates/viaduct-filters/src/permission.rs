//! Permission verification against the endpoint's permission metadata.
//!
//! The filter dereferences the endpoint's permission service ids against
//! the live service directory on every request. The directory is mutated
//! concurrently by the service event loop, so a mid-request removal is
//! tolerated and reported as an internal gateway error rather than a
//! denial.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use http::StatusCode;
use tracing::info;
use viaduct_errors::prelude::*;
use viaduct_serve::prelude::*;
use viaduct_types::prelude::*;

use crate::constants::ORDER_FILTER_ENDPOINT_PERMISSION;

pub const TYPE_ID_PERMISSION_FILTER: &str = "permission_filter";

/// Verification outcome reported by the verify function.
#[derive(Clone, Debug)]
pub struct PermissionReport {
    pub status_code: u16,
    pub success: bool,
    pub error_code: String,
    pub message: String,
}

impl PermissionReport {
    pub fn passed() -> Self {
        Self {
            status_code: StatusCode::OK.as_u16(),
            success: true,
            error_code: String::new(),
            message: String::new(),
        }
    }

    pub fn denied(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::FORBIDDEN.as_u16(),
            success: false,
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}

/// Requests for which verification is skipped entirely.
pub type PermissionSkipFunc = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Verifies the request against the resolved permission services.
pub type PermissionVerifyFunc = Arc<
    dyn Fn(Vec<Service>, Arc<Context>) -> BoxFuture<'static, Result<PermissionReport, ServeError>>
        + Send
        + Sync,
>;

pub struct PermissionFilter {
    disabled: AtomicBool,
    directory: Arc<ServiceDirectory>,
    skip: PermissionSkipFunc,
    verify: PermissionVerifyFunc,
}

impl PermissionFilter {
    pub fn new(directory: Arc<ServiceDirectory>, verify: PermissionVerifyFunc) -> Arc<Self> {
        Arc::new(Self {
            disabled: AtomicBool::new(false),
            directory,
            skip: Arc::new(|_| false),
            verify,
        })
    }

    pub fn with_skip(
        directory: Arc<ServiceDirectory>,
        skip: PermissionSkipFunc,
        verify: PermissionVerifyFunc,
    ) -> Arc<Self> {
        Arc::new(Self {
            disabled: AtomicBool::new(false),
            directory,
            skip,
            verify,
        })
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }
}

impl Filter for PermissionFilter {
    fn filter_id(&self) -> &str {
        TYPE_ID_PERMISSION_FILTER
    }

    fn order(&self) -> i32 {
        ORDER_FILTER_ENDPOINT_PERMISSION
    }

    fn init(&self, config: &Configuration) -> anyhow::Result<()> {
        let disabled = config.is_disabled();
        self.disabled.store(disabled, Ordering::Relaxed);
        if disabled {
            info!("endpoint permission filter is DISABLED");
        }
        Ok(())
    }

    fn do_filter(&self, next: FilterInvoker) -> FilterInvoker {
        if self.is_disabled() {
            return next;
        }
        let directory = self.directory.clone();
        let skip = self.skip.clone();
        let verify = self.verify.clone();
        let filter_id = TYPE_ID_PERMISSION_FILTER;
        Arc::new(move |ctx: Arc<Context>| {
            let directory = directory.clone();
            let skip = skip.clone();
            let verify = verify.clone();
            let next = next.clone();
            Box::pin(async move {
                if skip(&ctx) {
                    return next(ctx).await;
                }
                let endpoint = ctx
                    .endpoint()
                    .ok_or_else(|| ServeError::internal("PERMISSION:NO_ENDPOINT_BOUND"))?;
                let mut services = Vec::with_capacity(endpoint.permission.service_ids.len());
                for id in &endpoint.permission.service_ids {
                    match directory.get(id) {
                        Some(service) => services.push(service),
                        None => {
                            return Err(ServeErrorBuilder::new(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                codes::GATEWAY_INTERNAL,
                            )
                            .message(codes::MSG_PERMISSION_SERVICE_NOT_FOUND)
                            .internal(format!("permission service not found, id: {id}"))
                            .build());
                        }
                    }
                }
                let report = verify(services, ctx.clone()).await;
                ctx.add_metric(filter_id, ctx.start_at().elapsed());
                match report {
                    Err(err) => Err(err),
                    Ok(report) if !report.success => Err(ServeErrorBuilder::new(
                        ensure_permission_status(report.status_code),
                        ensure_permission_error_code(report.error_code),
                    )
                    .message(ensure_permission_message(report.message))
                    .build()),
                    Ok(_) => next(ctx).await,
                }
            })
        })
    }
}

fn ensure_permission_status(status: u16) -> StatusCode {
    if status < 100 {
        return StatusCode::FORBIDDEN;
    }
    StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN)
}

fn ensure_permission_error_code(code: String) -> String {
    if code.is_empty() {
        return codes::PERMISSION_DENIED.to_string();
    }
    code
}

fn ensure_permission_message(message: String) -> String {
    if message.is_empty() {
        return codes::MSG_PERMISSION_DENIED.to_string();
    }
    message
}
