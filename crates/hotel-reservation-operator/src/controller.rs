//! HotelReservationApp Controller
//!
//! This module implements the reconciliation of `HotelReservationApp`
//! resources. A reconciliation fetches the resource, binds a bootstrap client
//! to it and walks the topology plan in stage order, creating whatever is
//! missing. The first failure aborts the pass; the controller runtime then
//! requeues it and the next pass starts over from the fetch, skipping
//! everything that already exists.

use crate::bootstrap::{
    BootstrapClient, CreateOutcome, KubeResourceApi, ResourceApi, DEFAULT_FIELD_MANAGER,
};
use crate::crd::HotelReservationApp;
use crate::error::{OperatorError, Result};
use crate::resources::ResourceKind;
use crate::topology::{Stage, TopologyPlan};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Requeue interval for error cases (base for exponential backoff)
const ERROR_REQUEUE_SECONDS: u64 = 5;

/// Maximum requeue delay for error backoff
const MAX_ERROR_REQUEUE_SECONDS: u64 = 300;

/// Settings for [`run_controller`]
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch, `None` for cluster-wide
    pub namespace: Option<String>,
    /// Field manager recorded on created objects
    pub field_manager: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

/// Identity of one object touched by a reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

/// What a successful provisioning pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Objects created by this pass, in creation order
    pub created: Vec<ResourceRef>,
    /// Objects that were already present and left untouched
    pub existing: Vec<ResourceRef>,
}

impl ProvisionReport {
    pub fn total(&self) -> usize {
        self.created.len() + self.existing.len()
    }
}

/// Terminal state of a reconciliation that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The HotelReservationApp no longer exists; nothing to do
    Absent,
    /// Every planned resource exists
    Provisioned(ProvisionReport),
}

/// Drives the topology plan for one HotelReservationApp at a time
pub struct Reconciler {
    api: Arc<dyn ResourceApi>,
    plan: TopologyPlan,
    field_manager: String,
}

impl Reconciler {
    pub fn new(api: Arc<dyn ResourceApi>, plan: TopologyPlan, field_manager: impl Into<String>) -> Self {
        Self {
            api,
            plan,
            field_manager: field_manager.into(),
        }
    }

    pub fn plan(&self) -> &TopologyPlan {
        &self.plan
    }

    /// Provision the topology for `namespace/name`
    ///
    /// Returns [`ReconcileOutcome::Absent`] without error when the resource
    /// has been deleted. Any failing create aborts the remaining stages and
    /// is returned as [`OperatorError::ProvisionFailed`]; resources created
    /// before the failure are kept.
    #[instrument(skip(self), fields(namespace = %namespace, name = %name))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        debug!("Fetching HotelReservationApp");

        let app = match self.api.get_app(namespace, name).await {
            Ok(Some(app)) => Arc::new(app),
            Ok(None) => {
                info!("HotelReservationApp not found, maybe removed");
                return Ok(ReconcileOutcome::Absent);
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch HotelReservationApp");
                return Err(e);
            }
        };

        let client = BootstrapClient::new(self.api.clone(), self.field_manager.clone(), app.clone())
            .inspect_err(|e| error!(error = %e, "Failed to initialise bootstrap client"))?;

        let mut report = ProvisionReport::default();
        let mut current_stage: Option<Stage> = None;

        for planned in self.plan.planned_resources(&app.spec) {
            if current_stage != Some(planned.stage) {
                debug!(stage = %planned.stage, "Entering provisioning stage");
                current_stage = Some(planned.stage);
            }

            let kind = planned.resource.kind();
            let outcome = client
                .create_resource(&planned.name, planned.resource)
                .await
                .map_err(|e| {
                    error!(
                        stage = %planned.stage,
                        kind = %kind,
                        name = %planned.name,
                        error = %e,
                        "Failed to create resource"
                    );
                    OperatorError::ProvisionFailed {
                        kind,
                        name: planned.name.clone(),
                        source: Box::new(e),
                    }
                })?;

            let resource = ResourceRef {
                kind,
                name: planned.name,
            };
            match outcome {
                CreateOutcome::Created => {
                    info!(kind = %kind, name = %resource.name, "Created resource");
                    report.created.push(resource);
                }
                CreateOutcome::AlreadyExists => report.existing.push(resource),
            }
        }

        info!(
            created = report.created.len(),
            existing = report.existing.len(),
            "Reconciliation complete"
        );

        Ok(ReconcileOutcome::Provisioned(report))
    }
}

/// Context passed to the controller
pub struct ControllerContext {
    pub reconciler: Reconciler,
    /// Metrics recorder (optional)
    pub metrics: Option<ControllerMetrics>,
    /// Per-instance error retry counts for exponential backoff
    pub error_counts: dashmap::DashMap<String, u32>,
}

impl ControllerContext {
    pub fn new(reconciler: Reconciler, metrics: Option<ControllerMetrics>) -> Self {
        Self {
            reconciler,
            metrics,
            error_counts: dashmap::DashMap::new(),
        }
    }
}

/// Metrics for the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for reconciliation errors
    pub errors: metrics::Counter,
    /// Counter for objects created
    pub resources_created: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    /// Create new controller metrics
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("hotel_operator_reconciliations_total"),
            errors: metrics::counter!("hotel_operator_reconciliation_errors_total"),
            resources_created: metrics::counter!("hotel_operator_resources_created_total"),
            duration: metrics::histogram!("hotel_operator_reconciliation_duration_seconds"),
        }
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the HotelReservationApp controller
pub async fn run_controller(client: Client, config: ControllerConfig) -> Result<()> {
    let apps: Api<HotelReservationApp> = match &config.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let reconciler = Reconciler::new(
        Arc::new(KubeResourceApi::new(client.clone())),
        TopologyPlan::default(),
        config.field_manager.clone(),
    );
    let ctx = Arc::new(ControllerContext::new(
        reconciler,
        Some(ControllerMetrics::new()),
    ));

    info!(
        namespace = config.namespace.as_deref().unwrap_or("all"),
        field_manager = %config.field_manager,
        "Starting HotelReservationApp controller"
    );

    let deployments = match &config.namespace {
        Some(ns) => Api::<Deployment>::namespaced(client.clone(), ns),
        None => Api::<Deployment>::all(client.clone()),
    };
    let statefulsets = match &config.namespace {
        Some(ns) => Api::<StatefulSet>::namespaced(client.clone(), ns),
        None => Api::<StatefulSet>::all(client.clone()),
    };
    let services = match &config.namespace {
        Some(ns) => Api::<Service>::namespaced(client.clone(), ns),
        None => Api::<Service>::all(client.clone()),
    };

    // Watching owned children as well as the app means a manually deleted
    // child triggers a pass on its owner, which recreates it. Nothing else
    // about a child is ever reconciled.
    Controller::new(apps, Config::default())
        .owns(deployments, Config::default())
        .owns(statefulsets, Config::default())
        .owns(services, Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(
                        name = obj.name,
                        namespace = obj.namespace,
                        ?action,
                        "Reconciliation completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                }
            }
        })
        .await;

    Ok(())
}

/// Controller entry point
///
/// The watched object may be stale, so only its identity is used; the
/// reconciler fetches the current version itself.
#[instrument(skip(app, ctx), fields(name = %app.name_any(), namespace = app.namespace()))]
async fn reconcile(app: Arc<HotelReservationApp>, ctx: Arc<ControllerContext>) -> Result<Action> {
    let start = Instant::now();

    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let name = app.name_any();
    let namespace = app.namespace().ok_or_else(|| {
        OperatorError::InvalidConfig(format!("HotelReservationApp '{}' has no namespace", name))
    })?;
    let key = format!("{}/{}", namespace, name);

    let result = ctx.reconciler.reconcile(&namespace, &name).await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
    }

    match result {
        Ok(outcome) => {
            ctx.error_counts.remove(&key);
            if let (Some(metrics), ReconcileOutcome::Provisioned(report)) = (&ctx.metrics, &outcome) {
                metrics.resources_created.increment(report.created.len() as u64);
            }
            // Drift is not reconciled, so wait for the next change event
            Ok(Action::await_change())
        }
        Err(e) => {
            if let Some(ref metrics) = ctx.metrics {
                metrics.errors.increment(1);
            }
            Err(e)
        }
    }
}

/// Delay before retry number `retries` (1-based)
///
/// 5s → 10s → 20s → … capped at 300s.
fn backoff_delay(retries: u32) -> Duration {
    let base = Duration::from_secs(ERROR_REQUEUE_SECONDS);
    let backoff = base * 2u32.saturating_pow(retries.saturating_sub(1).min(6));
    backoff.min(Duration::from_secs(MAX_ERROR_REQUEUE_SECONDS))
}

/// Error policy for the controller: exponential backoff per instance
fn error_policy(
    app: Arc<HotelReservationApp>,
    error: &OperatorError,
    ctx: Arc<ControllerContext>,
) -> Action {
    let key = format!(
        "{}/{}",
        app.namespace().unwrap_or_default(),
        app.name_any()
    );

    if !error.is_retryable() {
        warn!(error = %error, "Reconciliation error for '{}' is not retryable", key);
        return Action::await_change();
    }

    let retries = {
        let mut entry = ctx.error_counts.entry(key.clone()).or_insert(0);
        *entry += 1;
        *entry
    };
    let delay = backoff_delay(retries);

    warn!(
        error = %error,
        resource = error.resource_name().unwrap_or("-"),
        retry = retries,
        delay_secs = delay.as_secs(),
        "Reconciliation error for '{}', will retry",
        key
    );

    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::MockResourceApi;
    use crate::crd::HotelReservationAppSpec;
    use crate::resources::{DesiredResource, HOSTNAME_LABEL};
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::error::ErrorResponse;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    fn create_test_app() -> HotelReservationApp {
        HotelReservationApp {
            metadata: ObjectMeta {
                name: Some("demo".to_string()),
                namespace: Some("hotel".to_string()),
                uid: Some("uid-42".to_string()),
                generation: Some(1),
                ..Default::default()
            },
            spec: HotelReservationAppSpec {
                logic_node_name: "n1".to_string(),
                logic_node_ip: "10.0.0.1".to_string(),
                data_node_name: "n2".to_string(),
                data_node_ip: "10.0.0.2".to_string(),
                docker_registry_prefix: String::new(),
            },
            status: None,
        }
    }

    /// In-memory cluster keyed by (kind, name)
    #[derive(Default)]
    struct FakeCluster {
        app: Option<HotelReservationApp>,
        objects: Mutex<BTreeMap<(ResourceKind, String), DesiredResource>>,
        creates: Mutex<Vec<String>>,
    }

    impl FakeCluster {
        fn with_app(app: HotelReservationApp) -> Self {
            Self {
                app: Some(app),
                ..Default::default()
            }
        }

        fn object(&self, kind: ResourceKind, name: &str) -> Option<DesiredResource> {
            self.objects
                .lock()
                .unwrap()
                .get(&(kind, name.to_string()))
                .cloned()
        }

        fn create_count(&self) -> usize {
            self.creates.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ResourceApi for FakeCluster {
        async fn get_app(&self, _namespace: &str, _name: &str) -> Result<Option<HotelReservationApp>> {
            Ok(self.app.clone())
        }

        async fn exists(&self, _namespace: &str, kind: ResourceKind, name: &str) -> Result<bool> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .contains_key(&(kind, name.to_string())))
        }

        async fn create(
            &self,
            _namespace: &str,
            resource: DesiredResource,
            _field_manager: &str,
        ) -> Result<()> {
            let key = (resource.kind(), resource.name().to_string());
            self.creates.lock().unwrap().push(key.1.clone());
            self.objects.lock().unwrap().insert(key, resource);
            Ok(())
        }
    }

    fn api_error(code: u16, reason: &str) -> OperatorError {
        OperatorError::KubeError(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} error", reason),
            reason: reason.to_string(),
            code,
        }))
    }

    fn reconciler(api: Arc<dyn ResourceApi>) -> Reconciler {
        Reconciler::new(api, TopologyPlan::default(), DEFAULT_FIELD_MANAGER)
    }

    fn provisioned(outcome: ReconcileOutcome) -> ProvisionReport {
        match outcome {
            ReconcileOutcome::Provisioned(report) => report,
            ReconcileOutcome::Absent => panic!("expected a provisioned outcome"),
        }
    }

    #[tokio::test]
    async fn test_first_run_creates_full_topology() {
        let cluster = Arc::new(FakeCluster::with_app(create_test_app()));
        let report = provisioned(
            reconciler(cluster.clone())
                .reconcile("hotel", "demo")
                .await
                .unwrap(),
        );

        assert_eq!(report.created.len(), 28);
        assert!(report.existing.is_empty());
        assert_eq!(cluster.create_count(), 28);

        let creates = cluster.creates.lock().unwrap().clone();
        assert_eq!(creates.first().map(String::as_str), Some("memcached-reservation"));
        assert_eq!(creates.last().map(String::as_str), Some("frontend"));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let cluster = Arc::new(FakeCluster::with_app(create_test_app()));
        let reconciler = reconciler(cluster.clone());

        reconciler.reconcile("hotel", "demo").await.unwrap();
        let report = provisioned(reconciler.reconcile("hotel", "demo").await.unwrap());

        assert!(report.created.is_empty());
        assert_eq!(report.existing.len(), 28);
        assert_eq!(cluster.create_count(), 28);
    }

    #[tokio::test]
    async fn test_every_object_is_owned_and_placed() {
        let cluster = Arc::new(FakeCluster::with_app(create_test_app()));
        reconciler(cluster.clone())
            .reconcile("hotel", "demo")
            .await
            .unwrap();

        let objects = cluster.objects.lock().unwrap();
        for ((kind, name), resource) in objects.iter() {
            let meta = resource.metadata();
            assert_eq!(meta.namespace.as_deref(), Some("hotel"), "{kind} {name}");
            let orefs = meta.owner_references.as_ref().unwrap();
            assert_eq!(orefs.len(), 1);
            assert_eq!(orefs[0].uid, "uid-42");
            assert_eq!(orefs[0].block_owner_deletion, Some(true), "{kind} {name}");

            if let Some(pod) = resource.pod_spec() {
                let host = pod
                    .node_selector
                    .as_ref()
                    .and_then(|s| s.get(HOSTNAME_LABEL))
                    .cloned();
                let expected = if name.starts_with("memcached-") || name.starts_with("mongodb-") {
                    "n2"
                } else {
                    "n1"
                };
                assert_eq!(host.as_deref(), Some(expected), "{kind} {name}");
            }
        }
    }

    #[tokio::test]
    async fn test_scenario_ports_and_init_env() {
        let cluster = Arc::new(FakeCluster::with_app(create_test_app()));
        reconciler(cluster.clone())
            .reconcile("hotel", "demo")
            .await
            .unwrap();

        let Some(DesiredResource::NetworkEndpoint(svc)) =
            cluster.object(ResourceKind::Service, "memcached-rate")
        else {
            panic!("memcached-rate service missing");
        };
        let port = &svc.spec.unwrap().ports.unwrap()[0];
        assert_eq!(port.node_port, Some(31001));

        let Some(DesiredResource::StatelessWorkload(deploy)) =
            cluster.object(ResourceKind::Deployment, "reservation")
        else {
            panic!("reservation deployment missing");
        };
        let pod = deploy.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.containers[0].ports.as_ref().unwrap()[0].container_port,
            8087
        );
        let env: BTreeSet<(String, String)> = pod.init_containers.unwrap()[0]
            .env
            .clone()
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.value.unwrap_or_default()))
            .collect();
        assert!(env.contains(&("LOGICNODEIP".to_string(), "10.0.0.1".to_string())));
        assert!(env.contains(&("DATANODEIP".to_string(), "10.0.0.2".to_string())));
    }

    #[tokio::test]
    async fn test_absent_app_completes_without_work() {
        let mut mock = MockResourceApi::new();
        mock.expect_get_app().times(1).returning(|_, _| Ok(None));
        mock.expect_exists().never();
        mock.expect_create().never();

        let outcome = reconciler(Arc::new(mock))
            .reconcile("hotel", "gone")
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Absent);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let mut mock = MockResourceApi::new();
        mock.expect_get_app()
            .returning(|_, _| Err(api_error(503, "ServiceUnavailable")));
        mock.expect_exists().never();

        let err = reconciler(Arc::new(mock))
            .reconcile("hotel", "demo")
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::KubeError(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_first_failure_aborts_remaining_stages() {
        let mut mock = MockResourceApi::new();
        mock.expect_get_app()
            .returning(|_, _| Ok(Some(create_test_app())));
        mock.expect_exists().times(1).returning(|_, _, _| Ok(false));
        mock.expect_create()
            .times(1)
            .returning(|_, _, _| Err(api_error(403, "Forbidden")));

        let err = reconciler(Arc::new(mock))
            .reconcile("hotel", "demo")
            .await
            .unwrap_err();

        assert_eq!(err.resource_name(), Some("memcached-reservation"));
        assert!(err.to_string().contains("memcached-reservation"));
        assert!(matches!(
            err,
            OperatorError::ProvisionFailed {
                kind: ResourceKind::Deployment,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failure_mid_plan_keeps_earlier_resources() {
        let mut mock = MockResourceApi::new();
        mock.expect_get_app()
            .returning(|_, _| Ok(Some(create_test_app())));
        mock.expect_exists().returning(|_, _, _| Ok(false));
        mock.expect_create().returning(|_, resource, _| {
            if resource.name() == "consul" {
                Err(api_error(403, "Forbidden"))
            } else {
                Ok(())
            }
        });

        let err = reconciler(Arc::new(mock))
            .reconcile("hotel", "demo")
            .await
            .unwrap_err();
        assert_eq!(err.resource_name(), Some("consul"));
    }

    #[tokio::test]
    async fn test_retry_after_failure_resumes_missing_resources() {
        let cluster = Arc::new(FakeCluster::with_app(create_test_app()));
        for (kind, name) in [
            (ResourceKind::Deployment, "memcached-reservation"),
            (ResourceKind::Service, "memcached-reservation"),
        ] {
            let placeholder: DesiredResource = match kind {
                ResourceKind::Deployment => Deployment {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                }
                .into(),
                _ => Service {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                }
                .into(),
            };
            cluster
                .objects
                .lock()
                .unwrap()
                .insert((kind, name.to_string()), placeholder);
        }

        let report = provisioned(
            reconciler(cluster.clone())
                .reconcile("hotel", "demo")
                .await
                .unwrap(),
        );
        assert_eq!(report.existing.len(), 2);
        assert_eq!(report.created.len(), 26);
        assert_eq!(report.total(), 28);
    }

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(1), Duration::from_secs(5));
        assert_eq!(backoff_delay(2), Duration::from_secs(10));
        assert_eq!(backoff_delay(4), Duration::from_secs(40));
        assert_eq!(backoff_delay(7), Duration::from_secs(300));
        assert_eq!(backoff_delay(50), Duration::from_secs(300));
    }

    #[test]
    fn test_error_policy_tracks_retries() {
        let ctx = Arc::new(ControllerContext::new(
            reconciler(Arc::new(MockResourceApi::new())),
            None,
        ));
        let app = Arc::new(create_test_app());
        let err = api_error(500, "InternalError");

        assert_eq!(
            error_policy(app.clone(), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(5))
        );
        assert_eq!(
            error_policy(app.clone(), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(10))
        );
        assert_eq!(ctx.error_counts.get("hotel/demo").map(|v| *v), Some(2));

        let invalid = OperatorError::InvalidConfig("no uid".to_string());
        assert_eq!(error_policy(app, &invalid, ctx), Action::await_change());
    }
}
