pub mod argument;
pub mod endpoint;
pub mod event;
pub mod prelude;
pub mod service;
pub mod value;

pub use argument::{Argument, ArgumentLookupFunc, Permission, ValueResolver};
pub use endpoint::{Attribute, Endpoint, ATTR_TAG_AUTHORIZE, ATTR_TAG_MANAGED};
pub use event::{
    decode_endpoint_event, decode_service_event, EndpointEvent, EventType, ServiceEvent,
};
pub use service::Service;
pub use value::{MTValue, ScopedLookup};
