pub use crate::argument::{Argument, ArgumentLookupFunc, Permission, ValueResolver};
pub use crate::endpoint::{Attribute, Endpoint, ATTR_TAG_AUTHORIZE, ATTR_TAG_MANAGED};
pub use crate::event::{
    decode_endpoint_event, decode_service_event, EndpointEvent, EventType, ServiceEvent,
};
pub use crate::service::Service;
pub use crate::value::{
    MTValue, ScopedLookup, MEDIA_JSON, MEDIA_TEXT, SCOPE_ATTR, SCOPE_AUTO, SCOPE_BODY,
    SCOPE_FORM, SCOPE_HEADER, SCOPE_PATH, SCOPE_QUERY,
};
