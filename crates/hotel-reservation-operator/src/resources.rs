//! Kubernetes Resource Builders
//!
//! Pure functions that turn a [`HotelReservationAppSpec`] into the Services,
//! Deployments and StatefulSets of the hotel-reservation topology. Nothing in
//! this module talks to the cluster; ownership and namespace are stamped on
//! later by the bootstrap client.

use crate::crd::HotelReservationAppSpec;
use crate::topology::HotelService;
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, ExecAction, Lifecycle,
    LifecycleHandler, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSecurityContext,
    PodSpec, PodTemplateSpec, SecurityContext, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use std::fmt;

/// Selector label carried by every generated object
pub const SELECTOR_LABEL: &str = "io.kompose.service";

/// Node label used to pin workloads to a host
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

pub const CACHE_PREFIX: &str = "memcached-";
pub const STORE_PREFIX: &str = "mongodb-";
pub const DISCOVERY_NAME: &str = "consul";
pub const TRACING_NAME: &str = "jaeger";

pub const CACHE_PORT: i32 = 11211;
pub const STORE_PORT: i32 = 27017;

/// Capacity requested by each MongoDB volume claim
pub const STORAGE_REQUEST: &str = "1Gi";

const STORE_DATA_DIR: &str = "/data/db";
const STORAGE_CLASS: &str = "managed-nfs-storage";
const STORE_SERVICE_ACCOUNT: &str = "nfs-provisioner";

const LOGIC_RUN_AS_USER: i64 = 1000321000;
const CONFIG_VOLUME: &str = "varconfig";
const CONFIG_WRITER_MOUNT: &str = "/var/configFiles";
const LOGIC_CONFIG_MOUNT: &str = "/go/src/github.com/harlow/go-micro-services/config";
const POST_START_DELAY: &str = "sleep 5";

const MEMCACHED_IMAGE: &str = "memcached";
const MONGO_IMAGE: &str = "mongo";
const CONFIG_WRITER_IMAGE: &str = "youngpig/configwriter:latest";
const LOGIC_IMAGE: &str = "youngpig/hotel_reservation";
const CONSUL_IMAGE: &str = "consul";
const JAEGER_IMAGE: &str = "jaegertracing/all-in-one:latest";

const PULL_POLICY: &str = "IfNotPresent";
const RESTART_ALWAYS: &str = "Always";

/// Kind of a generated object, used for existence checks and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Service,
    Deployment,
    StatefulSet,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Service => "Service",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::StatefulSet => "StatefulSet",
        };
        f.write_str(s)
    }
}

/// A fully specified object that has not been submitted yet
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredResource {
    NetworkEndpoint(Service),
    StatelessWorkload(Deployment),
    StatefulWorkload(StatefulSet),
}

impl DesiredResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            DesiredResource::NetworkEndpoint(_) => ResourceKind::Service,
            DesiredResource::StatelessWorkload(_) => ResourceKind::Deployment,
            DesiredResource::StatefulWorkload(_) => ResourceKind::StatefulSet,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            DesiredResource::NetworkEndpoint(svc) => &svc.metadata,
            DesiredResource::StatelessWorkload(deploy) => &deploy.metadata,
            DesiredResource::StatefulWorkload(sts) => &sts.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            DesiredResource::NetworkEndpoint(svc) => &mut svc.metadata,
            DesiredResource::StatelessWorkload(deploy) => &mut deploy.metadata,
            DesiredResource::StatefulWorkload(sts) => &mut sts.metadata,
        }
    }

    /// Object name, empty when the builder left it unset
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Pod template of a workload; endpoints have none
    pub fn pod_spec(&self) -> Option<&PodSpec> {
        match self {
            DesiredResource::NetworkEndpoint(_) => None,
            DesiredResource::StatelessWorkload(deploy) => deploy
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref()),
            DesiredResource::StatefulWorkload(sts) => {
                sts.spec.as_ref().and_then(|s| s.template.spec.as_ref())
            }
        }
    }
}

impl From<Service> for DesiredResource {
    fn from(svc: Service) -> Self {
        DesiredResource::NetworkEndpoint(svc)
    }
}

impl From<Deployment> for DesiredResource {
    fn from(deploy: Deployment) -> Self {
        DesiredResource::StatelessWorkload(deploy)
    }
}

impl From<StatefulSet> for DesiredResource {
    fn from(sts: StatefulSet) -> Self {
        DesiredResource::StatefulWorkload(sts)
    }
}

fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(SELECTOR_LABEL.to_string(), name.to_string())])
}

fn labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(name);
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "hotel-reservation-operator".to_string(),
    );
    labels
}

fn object_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(labels(name)),
        ..Default::default()
    }
}

fn node_selector(node_name: &str) -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from([(
        HOSTNAME_LABEL.to_string(),
        node_name.to_string(),
    )]))
}

fn pod_template(name: &str, spec: PodSpec) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(selector_labels(name)),
            ..Default::default()
        }),
        spec: Some(spec),
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn container_port(port: i32) -> ContainerPort {
    ContainerPort {
        container_port: port,
        ..Default::default()
    }
}

fn host_port(host: i32, container: i32, protocol: Option<&str>) -> ContainerPort {
    ContainerPort {
        container_port: container,
        host_port: Some(host),
        protocol: protocol.map(str::to_string),
        ..Default::default()
    }
}

/// Build a NodePort service exposing one TCP port
///
/// Pods are selected by the selector label equal to `name`.
pub fn build_network_endpoint(name: &str, port: i32, target_port: i32, node_port: i32) -> Service {
    Service {
        metadata: object_meta(name),
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(selector_labels(name)),
            ports: Some(vec![ServicePort {
                protocol: Some("TCP".to_string()),
                port,
                target_port: Some(IntOrString::Int(target_port)),
                node_port: Some(node_port),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the single-replica memcached deployment for `service`
pub fn build_cache_workload(service: HotelService, spec: &HotelReservationAppSpec) -> Deployment {
    let name = format!("{}{}", CACHE_PREFIX, service);

    let container = Container {
        name: format!("hotelreservation-{}", name),
        image: Some(spec.image(MEMCACHED_IMAGE)),
        image_pull_policy: Some(PULL_POLICY.to_string()),
        ports: Some(vec![container_port(CACHE_PORT)]),
        env: Some(vec![
            env("MEMCACHED_CACHE_SIZE", "2048"),
            env("MEMCACHED_THREADS", "8"),
        ]),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        node_selector: node_selector(&spec.data_node_name),
        restart_policy: Some(RESTART_ALWAYS.to_string()),
        ..Default::default()
    };

    Deployment {
        metadata: object_meta(&name),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&name)),
                ..Default::default()
            },
            template: pod_template(&name, pod_spec),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the single-replica MongoDB statefulset for `service`
///
/// Each replica gets its own 1Gi claim named after the service and mounted
/// at the MongoDB data directory.
pub fn build_store_workload(service: HotelService, spec: &HotelReservationAppSpec) -> StatefulSet {
    let name = format!("{}{}", STORE_PREFIX, service);
    let claim_name = service.as_str().to_string();

    let container = Container {
        name: format!("hotelreservation-{}", name),
        image: Some(spec.image(MONGO_IMAGE)),
        image_pull_policy: Some(PULL_POLICY.to_string()),
        ports: Some(vec![container_port(STORE_PORT)]),
        volume_mounts: Some(vec![VolumeMount {
            name: claim_name.clone(),
            mount_path: STORE_DATA_DIR.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        node_selector: node_selector(&spec.data_node_name),
        service_account_name: Some(STORE_SERVICE_ACCOUNT.to_string()),
        ..Default::default()
    };

    let pvc_template = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim_name),
            annotations: Some(BTreeMap::from([(
                "volume.beta.kubernetes.io/storage-class".to_string(),
                STORAGE_CLASS.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(STORAGE_REQUEST.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    StatefulSet {
        metadata: object_meta(&name),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: name.clone(),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&name)),
                ..Default::default()
            },
            template: pod_template(&name, pod_spec),
            volume_claim_templates: Some(vec![pvc_template]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the deployment for one logic service listening on `port`
///
/// An init container writes the per-service configuration (using both node
/// addresses) into a shared emptyDir before the service binary starts.
pub fn build_logic_workload(
    service: HotelService,
    port: i32,
    spec: &HotelReservationAppSpec,
) -> Deployment {
    let name = service.as_str();
    let non_root = Some(SecurityContext {
        run_as_non_root: Some(true),
        ..Default::default()
    });

    let config_writer = Container {
        name: "configwriter".to_string(),
        image: Some(spec.image(CONFIG_WRITER_IMAGE)),
        image_pull_policy: Some(PULL_POLICY.to_string()),
        security_context: non_root.clone(),
        env: Some(vec![
            env("LOGICNODEIP", &spec.logic_node_ip),
            env("DATANODEIP", &spec.data_node_ip),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: CONFIG_WRITER_MOUNT.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let container = Container {
        name: format!("hotelreservation-{}", name),
        image: Some(spec.image(LOGIC_IMAGE)),
        image_pull_policy: Some(PULL_POLICY.to_string()),
        command: Some(vec![name.to_string()]),
        ports: Some(vec![host_port(port, port, None)]),
        lifecycle: Some(Lifecycle {
            post_start: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        POST_START_DELAY.to_string(),
                    ]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        security_context: non_root,
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: LOGIC_CONFIG_MOUNT.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        init_containers: Some(vec![config_writer]),
        containers: vec![container],
        node_selector: node_selector(&spec.logic_node_name),
        security_context: Some(PodSecurityContext {
            run_as_user: Some(LOGIC_RUN_AS_USER),
            run_as_non_root: Some(true),
            ..Default::default()
        }),
        restart_policy: Some(RESTART_ALWAYS.to_string()),
        volumes: Some(vec![Volume {
            name: CONFIG_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: object_meta(name),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(name)),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: pod_template(name, pod_spec),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Single-container deployment on the logic node with fixed ports
fn fixed_deployment(
    name: &str,
    image: &str,
    ports: Vec<ContainerPort>,
    spec: &HotelReservationAppSpec,
) -> Deployment {
    let container = Container {
        name: name.to_string(),
        image: Some(spec.image(image)),
        image_pull_policy: Some(PULL_POLICY.to_string()),
        ports: Some(ports),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        node_selector: node_selector(&spec.logic_node_name),
        restart_policy: Some(RESTART_ALWAYS.to_string()),
        ..Default::default()
    };

    Deployment {
        metadata: object_meta(name),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(name)),
                ..Default::default()
            },
            template: pod_template(name, pod_spec),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the consul service-discovery deployment
pub fn build_discovery_workload(spec: &HotelReservationAppSpec) -> Deployment {
    let ports = vec![
        host_port(8300, 8300, None),
        host_port(8400, 8400, None),
        host_port(8500, 8500, None),
        host_port(8600, 53, Some("UDP")),
    ];
    fixed_deployment(DISCOVERY_NAME, CONSUL_IMAGE, ports, spec)
}

/// Build the jaeger all-in-one tracing deployment
pub fn build_tracing_workload(spec: &HotelReservationAppSpec) -> Deployment {
    let ports = vec![
        container_port(14269),
        host_port(5778, 5778, None),
        host_port(14268, 14268, None),
        host_port(5775, 5775, Some("UDP")),
        container_port(14267),
        host_port(16686, 16686, None),
        host_port(6831, 6831, Some("UDP")),
        host_port(6832, 6832, Some("UDP")),
    ];
    fixed_deployment(TRACING_NAME, JAEGER_IMAGE, ports, spec)
}
