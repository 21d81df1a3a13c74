//! Managed resource declarations
//!
//! Builders for the fixed resource set this operator keeps converged: the
//! mirrored agent-install CRDs, namespace, service account and RBAC grants on
//! the spoke cluster, and the storage volumes plus provisioning-service
//! workload on the hub cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, Namespace, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe,
    SecretVolumeSource, ServiceAccount, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::core::{DynamicObject, ObjectMeta};
use kube::{Resource, ResourceExt};
use serde::Serialize;

use crate::cluster::{from_dynamic, kinds, to_dynamic, ResourceId};
use crate::crd::{ProvisionerConfig, VolumeRequest};
use crate::error::Result;
use crate::sync::ManagedResource;

/// Name shared by the workload Deployment, its ServiceAccount and RBAC objects
pub const SERVICE_NAME: &str = "provision-service";

/// Label selector identifying the agent-install CRDs on the hub
pub const AGENT_INSTALL_CRD_SELECTOR: &str = "app.kubernetes.io/part-of=agent-install";

/// Cluster-scoped RBAC names for the spoke-side manager grants
pub const MANAGER_ROLE_NAME: &str = "provision-service-manager-role";
pub const MANAGER_ROLE_BINDING_NAME: &str = "provision-service-manager-rolebinding";

/// Hub-side persistent volume claim names
pub const DATA_PVC_NAME: &str = "provision-service-data";
pub const DB_PVC_NAME: &str = "provision-service-db";
pub const IMAGE_PVC_NAME: &str = "provision-service-images";

/// Workload environment contract: the spoke kubeconfig is mounted as a volume
/// and addressed through the KUBECONFIG environment variable.
pub const KUBECONFIG_VOLUME: &str = "kubeconfig";
pub const KUBECONFIG_MOUNT_PATH: &str = "/etc/kube";
pub const KUBECONFIG_ENV_PATH: &str = "/etc/kube/kubeconfig";

/// Environment override for the provisioning service image
pub const SERVICE_IMAGE_ENV: &str = "PROVISION_SERVICE_IMAGE";

const DEFAULT_SERVICE_IMAGE: &str = "quay.io/agent-install/provision-service:latest";

const SERVICE_PORT: i32 = 8090;

/// Image of the provisioning service workload
pub fn service_image() -> String {
    std::env::var(SERVICE_IMAGE_ENV).unwrap_or_else(|_| DEFAULT_SERVICE_IMAGE.to_string())
}

fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), SERVICE_NAME.to_string())])
}

fn managed<K: Serialize>(
    kind: kube::core::ApiResource,
    obj: &K,
    owner: &ResourceId,
) -> Result<ManagedResource> {
    let desired = to_dynamic(&kind, obj)?;
    Ok(ManagedResource::converging(kind, desired, owner))
}

/// The full spoke-side resource set, in apply order: CRDs first, then the
/// namespace, then the identities and grants inside it.
pub fn spoke_resources(
    owner: &ResourceId,
    hub_crds: &[DynamicObject],
) -> Result<Vec<ManagedResource>> {
    let mut resources = Vec::with_capacity(hub_crds.len() + 6);
    for crd in hub_crds {
        resources.push(mirrored_crd(owner, crd)?);
    }
    resources.push(spoke_namespace(owner)?);
    resources.push(service_account(owner)?);
    resources.push(leader_election_role(owner)?);
    resources.push(leader_election_role_binding(owner)?);
    resources.push(manager_cluster_role(owner)?);
    resources.push(manager_cluster_role_binding(owner)?);
    Ok(resources)
}

/// The hub-side resource set: storage volumes, then the workload that mounts
/// them together with the spoke kubeconfig.
pub fn hub_resources(
    owner: &ResourceId,
    config: &ProvisionerConfig,
) -> Result<Vec<ManagedResource>> {
    let mut resources = vec![
        pvc(owner, config, DB_PVC_NAME, &config.spec.database_storage)?,
        pvc(owner, config, DATA_PVC_NAME, &config.spec.filesystem_storage)?,
    ];
    if let Some(image_storage) = &config.spec.image_storage {
        resources.push(pvc(owner, config, IMAGE_PVC_NAME, image_storage)?);
    }
    resources.push(service_deployment(owner, config)?);
    Ok(resources)
}

/// Copy of a hub agent-install CRD for the spoke cluster.
///
/// Only the declarative parts travel: name, labels and spec. Everything the
/// hub API server stamped on its copy stays behind.
pub fn mirrored_crd(owner: &ResourceId, hub_crd: &DynamicObject) -> Result<ManagedResource> {
    let typed: CustomResourceDefinition = from_dynamic(hub_crd)?;
    let desired = CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(hub_crd.name_any()),
            labels: hub_crd.metadata.labels.clone(),
            ..Default::default()
        },
        spec: typed.spec,
        ..Default::default()
    };
    managed(kinds::custom_resource_definition(), &desired, owner)
}

/// The namespace on the spoke cluster mirroring the primary's namespace
pub fn spoke_namespace(owner: &ResourceId) -> Result<ManagedResource> {
    let desired = Namespace {
        metadata: ObjectMeta {
            name: Some(owner.namespace.clone()),
            ..Default::default()
        },
        ..Default::default()
    };
    managed(kinds::namespace(), &desired, owner)
}

/// Identity the hub workload assumes on the spoke cluster
pub fn service_account(owner: &ResourceId) -> Result<ManagedResource> {
    let desired = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(SERVICE_NAME.to_string()),
            namespace: Some(owner.namespace.clone()),
            ..Default::default()
        },
        ..Default::default()
    };
    managed(kinds::service_account(), &desired, owner)
}

/// Namespaced role for leader election
pub fn leader_election_role(owner: &ResourceId) -> Result<ManagedResource> {
    let desired = Role {
        metadata: ObjectMeta {
            name: Some(SERVICE_NAME.to_string()),
            namespace: Some(owner.namespace.clone()),
            ..Default::default()
        },
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec!["coordination.k8s.io".to_string()]),
                resources: Some(vec!["leases".to_string()]),
                verbs: ["get", "list", "watch", "create", "update", "delete"]
                    .map(String::from)
                    .to_vec(),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["events".to_string()]),
                verbs: ["create", "patch"].map(String::from).to_vec(),
                ..Default::default()
            },
        ]),
    };
    managed(kinds::role(), &desired, owner)
}

pub fn leader_election_role_binding(owner: &ResourceId) -> Result<ManagedResource> {
    let desired = RoleBinding {
        metadata: ObjectMeta {
            name: Some(SERVICE_NAME.to_string()),
            namespace: Some(owner.namespace.clone()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: SERVICE_NAME.to_string(),
        },
        subjects: Some(vec![service_subject(owner)]),
    };
    managed(kinds::role_binding(), &desired, owner)
}

/// Cluster-wide grants backing the spoke capability set: full control of the
/// agent-install types plus node, CSR and self-permission introspection.
pub fn manager_cluster_role(owner: &ResourceId) -> Result<ManagedResource> {
    let desired = ClusterRole {
        metadata: ObjectMeta {
            name: Some(MANAGER_ROLE_NAME.to_string()),
            ..Default::default()
        },
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec!["agent-install.io".to_string()]),
                resources: Some(vec!["*".to_string()]),
                verbs: vec!["*".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["nodes".to_string()]),
                verbs: ["get", "list", "watch"].map(String::from).to_vec(),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["certificates.k8s.io".to_string()]),
                resources: Some(vec!["certificatesigningrequests".to_string()]),
                verbs: ["get", "list", "watch"].map(String::from).to_vec(),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["certificates.k8s.io".to_string()]),
                resources: Some(vec!["certificatesigningrequests/approval".to_string()]),
                verbs: vec!["update".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["authorization.k8s.io".to_string()]),
                resources: Some(vec!["selfsubjectaccessreviews".to_string()]),
                verbs: vec!["create".to_string()],
                ..Default::default()
            },
        ]),
        ..Default::default()
    };
    managed(kinds::cluster_role(), &desired, owner)
}

pub fn manager_cluster_role_binding(owner: &ResourceId) -> Result<ManagedResource> {
    let desired = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(MANAGER_ROLE_BINDING_NAME.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: MANAGER_ROLE_NAME.to_string(),
        },
        subjects: Some(vec![service_subject(owner)]),
    };
    managed(kinds::cluster_role_binding(), &desired, owner)
}

fn service_subject(owner: &ResourceId) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: SERVICE_NAME.to_string(),
        namespace: Some(owner.namespace.clone()),
        ..Default::default()
    }
}

fn owner_reference(config: &ProvisionerConfig) -> OwnerReference {
    OwnerReference {
        api_version: ProvisionerConfig::api_version(&()).into_owned(),
        kind: ProvisionerConfig::kind(&()).into_owned(),
        name: config.name_any(),
        uid: config.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn pvc(
    owner: &ResourceId,
    config: &ProvisionerConfig,
    name: &str,
    request: &VolumeRequest,
) -> Result<ManagedResource> {
    let desired = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(owner.namespace.clone()),
            owner_references: Some(vec![owner_reference(config)]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(request.access_modes.clone()),
            storage_class_name: request.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(request.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };
    managed(kinds::persistent_volume_claim(), &desired, owner)
}

/// The hub-resident provisioning service, wired to act as a spoke client via
/// the mounted connection secret.
pub fn service_deployment(
    owner: &ResourceId,
    config: &ProvisionerConfig,
) -> Result<ManagedResource> {
    let mut volumes = vec![
        Volume {
            name: KUBECONFIG_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(config.spec.kubeconfig_secret_ref.name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        },
        pvc_volume("data", DATA_PVC_NAME),
        pvc_volume("db", DB_PVC_NAME),
    ];
    let mut mounts = vec![
        VolumeMount {
            name: KUBECONFIG_VOLUME.to_string(),
            mount_path: KUBECONFIG_MOUNT_PATH.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "data".to_string(),
            mount_path: "/data".to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "db".to_string(),
            mount_path: "/var/lib/provision/db".to_string(),
            ..Default::default()
        },
    ];
    if config.spec.image_storage.is_some() {
        volumes.push(pvc_volume("images", IMAGE_PVC_NAME));
        mounts.push(VolumeMount {
            name: "images".to_string(),
            mount_path: "/data/images".to_string(),
            ..Default::default()
        });
    }

    let desired = Deployment {
        metadata: ObjectMeta {
            name: Some(SERVICE_NAME.to_string()),
            namespace: Some(owner.namespace.clone()),
            labels: Some(app_labels()),
            owner_references: Some(vec![owner_reference(config)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(app_labels()),
                ..Default::default()
            },
            // ReadWriteOnce volumes rule out surge replicas
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: SERVICE_NAME.to_string(),
                        image: Some(service_image()),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: SERVICE_PORT,
                            ..Default::default()
                        }]),
                        env: Some(vec![EnvVar {
                            name: "KUBECONFIG".to_string(),
                            value: Some(KUBECONFIG_ENV_PATH.to_string()),
                            ..Default::default()
                        }]),
                        volume_mounts: Some(mounts),
                        readiness_probe: Some(http_probe("/ready")),
                        liveness_probe: Some(http_probe("/healthz")),
                        ..Default::default()
                    }],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };
    managed(kinds::deployment(), &desired, owner)
}

fn pvc_volume(name: &str, claim: &str) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn http_probe(path: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(SERVICE_PORT),
            ..Default::default()
        }),
        ..Default::default()
    }
}
