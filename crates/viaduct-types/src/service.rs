use serde::{Deserialize, Serialize};

use crate::argument::Argument;

/// A routable backend target. `service_id` is the canonical address;
/// `alias_id` is an optional secondary key kept symmetric with it in the
/// service directory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub alias_id: String,
    #[serde(default)]
    pub rpc_proto: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub arguments: Vec<Argument>,
}

impl Service {
    pub fn is_valid(&self) -> bool {
        !self.rpc_proto.is_empty() && !self.interface.is_empty() && !self.method.is_empty()
    }

    /// Fill `service_id` from interface + method when the discovery payload
    /// omitted it.
    pub fn ensure_service_id(&mut self) {
        if self.service_id.is_empty() && self.is_valid() {
            self.service_id = format!("{}:{}", self.interface, self.method);
        }
    }
}
