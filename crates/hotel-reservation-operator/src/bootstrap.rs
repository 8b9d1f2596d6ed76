//! Bootstrap client
//!
//! Wraps the cluster API with one operation, [`BootstrapClient::create_resource`],
//! which creates a named object only if it is absent and stamps it with an
//! owner reference to the `HotelReservationApp` being reconciled. Deleting
//! that resource lets the garbage collector remove everything created here.

use crate::crd::HotelReservationApp;
use crate::error::{OperatorError, Result};
use crate::resources::{DesiredResource, ResourceKind};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, PostParams};
use kube::{Client, Resource, ResourceExt};
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Field manager recorded on every object the operator creates
pub const DEFAULT_FIELD_MANAGER: &str = "hotelReservation-operator-controller-manager";

/// Cluster operations needed by the bootstrap client and reconciler
///
/// Abstracted so the reconciler can run against a mock or an in-memory
/// cluster in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Fetch a HotelReservationApp, `None` if it does not exist
    async fn get_app(&self, namespace: &str, name: &str) -> Result<Option<HotelReservationApp>>;

    /// Check whether an object of `kind` named `name` exists
    async fn exists(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<bool>;

    /// Submit `resource` for creation
    async fn create(
        &self,
        namespace: &str,
        resource: DesiredResource,
        field_manager: &str,
    ) -> Result<()>;
}

/// [`ResourceApi`] backed by a kube client
pub struct KubeResourceApi {
    client: Client,
}

impl KubeResourceApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceApi for KubeResourceApi {
    async fn get_app(&self, namespace: &str, name: &str) -> Result<Option<HotelReservationApp>> {
        let api: Api<HotelReservationApp> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn exists(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<bool> {
        let client = self.client.clone();
        let found = match kind {
            ResourceKind::Service => Api::<Service>::namespaced(client, namespace)
                .get_opt(name)
                .await?
                .is_some(),
            ResourceKind::Deployment => Api::<Deployment>::namespaced(client, namespace)
                .get_opt(name)
                .await?
                .is_some(),
            ResourceKind::StatefulSet => Api::<StatefulSet>::namespaced(client, namespace)
                .get_opt(name)
                .await?
                .is_some(),
        };
        Ok(found)
    }

    async fn create(
        &self,
        namespace: &str,
        resource: DesiredResource,
        field_manager: &str,
    ) -> Result<()> {
        let client = self.client.clone();
        let params = PostParams {
            field_manager: Some(field_manager.to_string()),
            ..Default::default()
        };

        match resource {
            DesiredResource::NetworkEndpoint(svc) => {
                Api::<Service>::namespaced(client, namespace)
                    .create(&params, &svc)
                    .await?;
            }
            DesiredResource::StatelessWorkload(deploy) => {
                Api::<Deployment>::namespaced(client, namespace)
                    .create(&params, &deploy)
                    .await?;
            }
            DesiredResource::StatefulWorkload(sts) => {
                Api::<StatefulSet>::namespaced(client, namespace)
                    .create(&params, &sts)
                    .await?;
            }
        }

        Ok(())
    }
}

/// Stamp `resource` with a controller owner reference to `owner`
///
/// The resource is also placed in the owner's namespace, since owner
/// references cannot cross namespaces.
pub fn with_owner(owner: &HotelReservationApp, mut resource: DesiredResource) -> Result<DesiredResource> {
    let mut oref = owner.controller_owner_ref(&()).ok_or_else(|| {
        OperatorError::InvalidConfig(format!(
            "cannot build owner reference for {} '{}': missing name or uid",
            HotelReservationApp::kind(&()),
            owner.name_any()
        ))
    })?;
    // Foreground deletion of the owner waits for the owned object
    oref.block_owner_deletion = Some(true);

    let meta = resource.metadata_mut();
    meta.namespace = owner.namespace();
    meta.owner_references = Some(vec![oref]);

    Ok(resource)
}

/// Result of a create-if-absent call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Ownership-aware client bound to one HotelReservationApp
pub struct BootstrapClient {
    api: Arc<dyn ResourceApi>,
    field_manager: String,
    owner: Arc<HotelReservationApp>,
    namespace: String,
}

impl BootstrapClient {
    /// Bind a client to `owner`
    ///
    /// Fails if the owner cannot be referenced (no name, uid or namespace).
    pub fn new(
        api: Arc<dyn ResourceApi>,
        field_manager: impl Into<String>,
        owner: Arc<HotelReservationApp>,
    ) -> Result<Self> {
        if owner.meta().uid.is_none() || owner.meta().name.is_none() {
            return Err(OperatorError::InvalidConfig(format!(
                "HotelReservationApp '{}' has no uid; cannot own resources",
                owner.name_any()
            )));
        }
        let namespace = owner.namespace().ok_or_else(|| {
            OperatorError::InvalidConfig(format!(
                "HotelReservationApp '{}' has no namespace",
                owner.name_any()
            ))
        })?;

        Ok(Self {
            api,
            field_manager: field_manager.into(),
            owner,
            namespace,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Create `desired` unless an object of the same kind and name exists
    ///
    /// Existing objects are left untouched, whatever their current state.
    pub async fn create_resource(&self, name: &str, desired: DesiredResource) -> Result<CreateOutcome> {
        let kind = desired.kind();
        if desired.name() != name {
            return Err(OperatorError::InvalidConfig(format!(
                "{} is named '{}' but was submitted as '{}'",
                kind,
                desired.name(),
                name
            )));
        }

        if self.api.exists(&self.namespace, kind, name).await? {
            debug!(kind = %kind, name = %name, "Resource already exists");
            return Ok(CreateOutcome::AlreadyExists);
        }

        let owned = with_owner(&self.owner, desired)?;

        match self
            .api
            .create(&self.namespace, owned, &self.field_manager)
            .await
        {
            Ok(()) => {
                debug!(kind = %kind, name = %name, "Resource created");
                Ok(CreateOutcome::Created)
            }
            // Another writer created it between the check and the create
            Err(e) if e.is_already_exists() => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e),
        }
    }
}
