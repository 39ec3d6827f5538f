//! Shared filter ordering and configuration keys.

/// Global filter ordering hints; lower runs first.
pub const ORDER_FILTER_JWT_VERIFICATION: i32 = -90;
pub const ORDER_FILTER_ENDPOINT_PERMISSION: i32 = -80;

pub const CONFIG_KEY_DISABLED: &str = "disabled";
pub const CONFIG_KEY_CACHE_EXPIRATION: &str = "cache-expiration";
pub const CONFIG_KEY_CACHE_SIZE: &str = "cache-size";
