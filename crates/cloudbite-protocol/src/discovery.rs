/// Discovery wire payload.
///
/// A compatible server answers `GET /api/v1/discovery` with a JSON body
/// identifying itself. The only field that decides compatibility is
/// `type`; everything else is informational and parsed leniently so
/// older or newer servers still validate.

use serde::{Deserialize, Serialize};

use crate::PRODUCT_TYPE;

/// Identity payload returned by a server's discovery endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    /// Product identifier (e.g. "cloudbite-api"). Serialized as `type`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Server display name.
    #[serde(default)]
    pub name: String,
    /// Server version string.
    #[serde(default)]
    pub version: String,
    /// Port the API listens on.
    #[serde(default)]
    pub port: u16,
    /// Optional feature flags advertised by the server.
    #[serde(default)]
    pub features: Vec<String>,
    /// Server-side timestamp (epoch milliseconds).
    #[serde(default)]
    pub timestamp: i64,
}

impl DiscoveryResponse {
    /// Whether the responder is a CloudBite backend.
    pub fn is_compatible(&self) -> bool {
        self.kind == PRODUCT_TYPE
    }
}
