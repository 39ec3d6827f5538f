//! Stable domain error codes and their default user-facing messages.

/// No multi-version endpoint matches the route, no version matches the
/// request, or no transport is registered for the endpoint's protocol.
pub const REQUEST_NOT_FOUND: &str = "REQUEST_NOT_FOUND";

/// Unexpected panics, undefined transport replies, missing decoders,
/// misconfiguration discovered at runtime.
pub const GATEWAY_INTERNAL: &str = "GATEWAY_INTERNAL";

/// Permission filter rejected the request.
pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";

/// Client cancelled before the transport began; rendered with HTTP 200 and
/// an error payload.
pub const TRANSPORT_CANCELED: &str = "ROUTE:TRANSPORT/B:CANCELED";

pub const MSG_REQUEST_NOT_FOUND: &str = "ROUTE:REQUEST_NOT_FOUND";
pub const MSG_GATEWAY_INTERNAL: &str = "GATEWAY:INTERNAL_ERROR";
pub const MSG_PERMISSION_DENIED: &str = "PERMISSION:ACCESS_DENIED";
pub const MSG_PERMISSION_SERVICE_NOT_FOUND: &str = "PERMISSION:SERVICE_NOT_FOUND";
pub const MSG_PERMISSION_VERIFY_ERROR: &str = "PERMISSION:VERIFY_ERROR";
