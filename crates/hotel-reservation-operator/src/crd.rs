//! Custom Resource Definition for the hotel-reservation operator
//!
//! A single `HotelReservationApp` describes where the demo topology runs:
//! which node hosts the stateless logic tier, which node hosts the cache and
//! database tier, and an optional registry prefix for every image.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// HotelReservationApp custom resource definition
///
/// The operator treats the spec as read-only input and provisions the
/// complete topology from it once. Every object it creates carries an owner
/// reference back to this resource.
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "example.njtech.edu.cn",
    version = "v1beta1",
    kind = "HotelReservationApp",
    plural = "hotelreservationapps",
    shortname = "hra",
    namespaced,
    status = "HotelReservationAppStatus",
    printcolumn = r#"{"name":"Logic Node", "type":"string", "jsonPath":".spec.logicNodeName"}"#,
    printcolumn = r#"{"name":"Data Node", "type":"string", "jsonPath":".spec.dataNodeName"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HotelReservationAppSpec {
    /// Address of the node running the logic tier
    pub logic_node_ip: String,

    /// Hostname label of the node running the logic tier
    pub logic_node_name: String,

    /// Hostname label of the node running caches and databases
    pub data_node_name: String,

    /// Address of the node running caches and databases
    pub data_node_ip: String,

    /// Registry prefix prepended to every image (empty keeps stock images)
    #[serde(default)]
    pub docker_registry_prefix: String,
}

/// Observed state of a HotelReservationApp
///
/// Reserved for the identities of provisioned nodes. The operator does not
/// write it.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HotelReservationAppStatus {
    #[serde(default)]
    pub nodes: Vec<String>,
}

impl HotelReservationAppSpec {
    /// Resolve an image reference against the configured registry prefix
    pub fn image(&self, image: &str) -> String {
        let prefix = self.docker_registry_prefix.trim().trim_end_matches('/');
        if prefix.is_empty() {
            image.to_string()
        } else {
            format!("{}/{}", prefix, image)
        }
    }
}
