//! # Hotel Reservation Kubernetes Operator
//!
//! Kubernetes operator that provisions the hotel-reservation microservice
//! demo (memcached caches, MongoDB stores, consul, jaeger and eight Go
//! services) from a single `HotelReservationApp` custom resource.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hotel_reservation_operator::prelude::*;
//! use kube::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::try_default().await?;
//!     run_controller(client, ControllerConfig::default()).await
//! }
//! ```
//!
//! ## Architecture
//!
//! 1. **Watch**: Monitor `HotelReservationApp` resources and the Deployments,
//!    StatefulSets and Services they own
//! 2. **Plan**: Expand the spec into an ordered list of 28 desired objects
//! 3. **Provision**: Create each object that does not exist yet, stamped with
//!    an owner reference so deleting the app garbage-collects the topology
//!
//! Existing objects are never updated. A failed create aborts the pass and
//! the controller retries with exponential backoff.
//!
//! ## Modules
//!
//! - [`crd`] - `HotelReservationApp` custom resource
//! - [`topology`] - Service roster, port table and provisioning order
//! - [`resources`] - Builders for Services, Deployments and StatefulSets
//! - [`bootstrap`] - Create-if-absent client with owner references
//! - [`controller`] - Reconciler and controller setup
//! - [`error`] - Error types for operator operations
//!
//! ## Custom Resource
//!
//! ```yaml
//! apiVersion: example.njtech.edu.cn/v1beta1
//! kind: HotelReservationApp
//! metadata:
//!   name: demo
//!   namespace: hotel
//! spec:
//!   logicNodeName: worker-1
//!   logicNodeIp: 10.0.0.1
//!   dataNodeName: worker-2
//!   dataNodeIp: 10.0.0.2
//! ```
//!
//! ## Metrics
//!
//! - `hotel_operator_reconciliations_total` - Total reconciliation attempts
//! - `hotel_operator_reconciliation_errors_total` - Reconciliation errors
//! - `hotel_operator_resources_created_total` - Objects created
//! - `hotel_operator_reconciliation_duration_seconds` - Reconciliation latency

pub mod bootstrap;
pub mod controller;
pub mod crd;
pub mod error;
pub mod resources;
pub mod topology;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::bootstrap::{
        BootstrapClient, CreateOutcome, KubeResourceApi, ResourceApi, DEFAULT_FIELD_MANAGER,
    };
    pub use crate::controller::{
        run_controller, ControllerConfig, ControllerContext, ControllerMetrics, ProvisionReport,
        ReconcileOutcome, Reconciler, ResourceRef,
    };
    pub use crate::crd::{HotelReservationApp, HotelReservationAppSpec, HotelReservationAppStatus};
    pub use crate::error::{OperatorError, Result};
    pub use crate::resources::{DesiredResource, ResourceKind};
    pub use crate::topology::{HotelService, ServiceDescriptor, Stage, TopologyPlan};
}
