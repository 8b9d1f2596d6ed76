//! Topology plan for the hotel-reservation demo
//!
//! The roster of logical services, the ports each one listens on, which of
//! them get a memcached or MongoDB tier, and the order in which the tiers are
//! created. Port lookups are exhaustive matches over [`HotelService`], so
//! every roster entry has a port and nothing else can be planned.

use crate::crd::HotelReservationAppSpec;
use crate::resources::{self, DesiredResource, CACHE_PORT, CACHE_PREFIX, STORE_PORT, STORE_PREFIX};
use std::fmt;

/// One logical service of the hotel-reservation application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HotelService {
    Reservation,
    Rate,
    Profile,
    Geo,
    Recommendation,
    User,
    Search,
    Frontend,
}

impl HotelService {
    /// Full roster in provisioning order
    pub const ALL: [HotelService; 8] = [
        HotelService::Reservation,
        HotelService::Rate,
        HotelService::Profile,
        HotelService::Geo,
        HotelService::Recommendation,
        HotelService::User,
        HotelService::Search,
        HotelService::Frontend,
    ];

    /// Canonical name, also used as the logic deployment name and command
    pub fn as_str(self) -> &'static str {
        match self {
            HotelService::Reservation => "reservation",
            HotelService::Rate => "rate",
            HotelService::Profile => "profile",
            HotelService::Geo => "geo",
            HotelService::Recommendation => "recommendation",
            HotelService::User => "user",
            HotelService::Search => "search",
            HotelService::Frontend => "frontend",
        }
    }

    /// Port the logic container listens on (host and container side)
    pub fn logic_port(self) -> i32 {
        match self {
            HotelService::Profile => 8081,
            HotelService::Search => 8082,
            HotelService::Geo => 8083,
            HotelService::Rate => 8084,
            HotelService::Recommendation => 8085,
            HotelService::User => 8086,
            HotelService::Reservation => 8087,
            HotelService::Frontend => 5000,
        }
    }

    /// Node port of the memcached tier, for services that have one
    pub fn cache_node_port(self) -> Option<i32> {
        match self {
            HotelService::Rate => Some(31001),
            HotelService::Profile => Some(31002),
            HotelService::Reservation => Some(31003),
            HotelService::Geo
            | HotelService::Recommendation
            | HotelService::User
            | HotelService::Search
            | HotelService::Frontend => None,
        }
    }

    /// Node port of the MongoDB tier, for services that have one
    pub fn store_node_port(self) -> Option<i32> {
        match self {
            HotelService::Geo => Some(30001),
            HotelService::Profile => Some(30002),
            HotelService::Rate => Some(30003),
            HotelService::Recommendation => Some(30004),
            HotelService::Reservation => Some(30005),
            HotelService::User => Some(30006),
            HotelService::Search | HotelService::Frontend => None,
        }
    }
}

impl fmt::Display for HotelService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one roster entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service: HotelService,
    pub logic_port: i32,
    /// Present when the service has a memcached tier
    pub cache_node_port: Option<i32>,
    /// Present when the service has a MongoDB tier
    pub store_node_port: Option<i32>,
}

impl From<HotelService> for ServiceDescriptor {
    fn from(service: HotelService) -> Self {
        Self {
            service,
            logic_port: service.logic_port(),
            cache_node_port: service.cache_node_port(),
            store_node_port: service.store_node_port(),
        }
    }
}

/// Provisioning stages, strictly ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Caches,
    Stores,
    Discovery,
    Tracing,
    Logic,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Caches => "caches",
            Stage::Stores => "stores",
            Stage::Discovery => "discovery",
            Stage::Tracing => "tracing",
            Stage::Logic => "logic",
        };
        f.write_str(s)
    }
}

/// A desired resource tagged with the stage that creates it
#[derive(Debug, Clone)]
pub struct PlannedResource {
    pub stage: Stage,
    pub name: String,
    pub resource: DesiredResource,
}

impl PlannedResource {
    fn new(stage: Stage, resource: DesiredResource) -> Self {
        Self {
            stage,
            name: resource.name().to_string(),
            resource,
        }
    }
}

/// Fan-out table driving one reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    pub services: Vec<ServiceDescriptor>,
}

impl Default for TopologyPlan {
    fn default() -> Self {
        Self {
            services: HotelService::ALL.into_iter().map(Into::into).collect(),
        }
    }
}

impl TopologyPlan {
    /// Services with a memcached tier, paired with their node port
    pub fn cache_tier(&self) -> impl Iterator<Item = (HotelService, i32)> + '_ {
        self.services
            .iter()
            .filter_map(|d| d.cache_node_port.map(|port| (d.service, port)))
    }

    /// Services with a MongoDB tier, paired with their node port
    pub fn store_tier(&self) -> impl Iterator<Item = (HotelService, i32)> + '_ {
        self.services
            .iter()
            .filter_map(|d| d.store_node_port.map(|port| (d.service, port)))
    }

    /// Every logic service, paired with its listening port
    pub fn logic_tier(&self) -> impl Iterator<Item = (HotelService, i32)> + '_ {
        self.services.iter().map(|d| (d.service, d.logic_port))
    }

    /// Expand the plan into the ordered list of resources to create
    ///
    /// Caches come first (workload then endpoint per service), then stores,
    /// then discovery and tracing, then the logic deployments.
    pub fn planned_resources(&self, spec: &HotelReservationAppSpec) -> Vec<PlannedResource> {
        let mut planned = Vec::new();

        for (service, node_port) in self.cache_tier() {
            let name = format!("{}{}", CACHE_PREFIX, service);
            planned.push(PlannedResource::new(
                Stage::Caches,
                resources::build_cache_workload(service, spec).into(),
            ));
            planned.push(PlannedResource::new(
                Stage::Caches,
                resources::build_network_endpoint(&name, CACHE_PORT, CACHE_PORT, node_port).into(),
            ));
        }

        for (service, node_port) in self.store_tier() {
            let name = format!("{}{}", STORE_PREFIX, service);
            planned.push(PlannedResource::new(
                Stage::Stores,
                resources::build_store_workload(service, spec).into(),
            ));
            planned.push(PlannedResource::new(
                Stage::Stores,
                resources::build_network_endpoint(&name, STORE_PORT, STORE_PORT, node_port).into(),
            ));
        }

        planned.push(PlannedResource::new(
            Stage::Discovery,
            resources::build_discovery_workload(spec).into(),
        ));
        planned.push(PlannedResource::new(
            Stage::Tracing,
            resources::build_tracing_workload(spec).into(),
        ));

        for (service, port) in self.logic_tier() {
            planned.push(PlannedResource::new(
                Stage::Logic,
                resources::build_logic_workload(service, port, spec).into(),
            ));
        }

        planned
    }
}
