//! Integration tests for the hub/spoke reconciliation engine
//!
//! The real engine and spoke-client cache are driven over in-memory fakes for
//! both the hub and the spoke API surfaces, with a counting factory standing
//! in for spoke client construction.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{EnvVar, Secret, VolumeMount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
    CustomResourceDefinitionVersion,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::ByteString;
use kube::core::{ApiResource, DynamicObject, ObjectMeta};
use serde_json::json;

use agent_provision_operator::cluster::{
    from_dynamic, kinds, to_dynamic, ClusterApi, FakeCluster, ResourceId,
};
use agent_provision_operator::crd::{
    find_condition, Condition, ConditionStatus, KubeconfigSecretRef, ProvisionerConfig,
    ProvisionerConfigSpec, VolumeRequest, CONDITION_DEPLOYMENTS_HEALTHY,
    CONDITION_RECONCILE_COMPLETED,
};
use agent_provision_operator::reconcilers::provisioner::FINALIZER_NAME;
use agent_provision_operator::reconcilers::ProvisionerReconciler;
use agent_provision_operator::spoke::{resolve_kubeconfig, SpokeClientCache, SpokeClientFactory};
use agent_provision_operator::sync::resources::{
    self, DATA_PVC_NAME, DB_PVC_NAME, MANAGER_ROLE_BINDING_NAME, MANAGER_ROLE_NAME, SERVICE_NAME,
};
use agent_provision_operator::sync::owner_labels;
use agent_provision_operator::{Error, Result};

// ============================================================================
// Test Helpers
// ============================================================================

const TEST_NAME: &str = "test-config";
const TEST_NAMESPACE: &str = "test-namespace";
const TEST_SECRET_NAME: &str = "test-secret";
const TEST_CRD_NAME: &str = "agentclusterinstalls.agent-install.io";

const BASIC_KUBECONFIG: &[u8] = b"apiVersion: v1\nkind: Config\n";

fn test_id() -> ResourceId {
    ResourceId::new(TEST_NAME, TEST_NAMESPACE)
}

fn volume_request() -> VolumeRequest {
    VolumeRequest {
        size: "10Gi".to_string(),
        storage_class_name: None,
        access_modes: vec!["ReadWriteOnce".to_string()],
    }
}

fn new_config() -> ProvisionerConfig {
    ProvisionerConfig {
        metadata: ObjectMeta {
            name: Some(TEST_NAME.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: ProvisionerConfigSpec {
            kubeconfig_secret_ref: KubeconfigSecretRef {
                name: TEST_SECRET_NAME.to_string(),
            },
            database_storage: volume_request(),
            filesystem_storage: volume_request(),
            image_storage: None,
        },
        status: None,
    }
}

fn new_kubeconfig_secret() -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(TEST_SECRET_NAME.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(
            [(
                "kubeconfig".to_string(),
                ByteString(BASIC_KUBECONFIG.to_vec()),
            )]
            .into_iter()
            .collect(),
        ),
        ..Default::default()
    }
}

fn new_agent_install_crd() -> CustomResourceDefinition {
    CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(TEST_CRD_NAME.to_string()),
            labels: Some(
                [(
                    "app.kubernetes.io/part-of".to_string(),
                    "agent-install".to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: "agent-install.io".to_string(),
            names: CustomResourceDefinitionNames {
                kind: "AgentClusterInstall".to_string(),
                plural: "agentclusterinstalls".to_string(),
                ..Default::default()
            },
            scope: "Namespaced".to_string(),
            versions: vec![CustomResourceDefinitionVersion {
                name: "v1beta1".to_string(),
                served: true,
                storage: true,
                ..Default::default()
            }],
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Spoke client factory handing out a shared in-memory cluster
struct FakeFactory {
    spoke: Arc<FakeCluster>,
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl SpokeClientFactory for FakeFactory {
    async fn create(&self, _kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::InvalidKubeconfig(
                "simulated construction failure".to_string(),
            ));
        }
        let client: Arc<dyn ClusterApi> = self.spoke.clone();
        Ok(client)
    }
}

struct Harness {
    hub: Arc<FakeCluster>,
    spoke: Arc<FakeCluster>,
    factory: Arc<FakeFactory>,
    cache: Arc<SpokeClientCache>,
    reconciler: ProvisionerReconciler,
}

fn harness() -> Harness {
    let hub = Arc::new(FakeCluster::new());
    let spoke = Arc::new(FakeCluster::new());
    let factory = Arc::new(FakeFactory {
        spoke: spoke.clone(),
        calls: AtomicUsize::new(0),
        fail: AtomicBool::new(false),
    });
    let cache = Arc::new(SpokeClientCache::new(hub.clone(), factory.clone()));
    let reconciler = ProvisionerReconciler::new(hub.clone(), cache.clone());
    Harness {
        hub,
        spoke,
        factory,
        cache,
        reconciler,
    }
}

async fn create_typed<K: serde::Serialize>(
    api: &FakeCluster,
    kind: &ApiResource,
    namespace: Option<&str>,
    obj: &K,
) -> DynamicObject {
    let dynamic = to_dynamic(kind, obj).unwrap();
    api.create(kind, namespace, &dynamic).await.unwrap()
}

/// Seed the hub with everything a successful reconcile needs
async fn seed_active(h: &Harness) {
    create_typed(
        &h.hub,
        &kinds::provisioner_config(),
        Some(TEST_NAMESPACE),
        &new_config(),
    )
    .await;
    create_typed(
        &h.hub,
        &kinds::secret(),
        Some(TEST_NAMESPACE),
        &new_kubeconfig_secret(),
    )
    .await;
    create_typed(
        &h.hub,
        &kinds::custom_resource_definition(),
        None,
        &new_agent_install_crd(),
    )
    .await;
}

async fn get_config(h: &Harness) -> ProvisionerConfig {
    let obj = h
        .hub
        .get(&kinds::provisioner_config(), Some(TEST_NAMESPACE), TEST_NAME)
        .await
        .unwrap()
        .expect("ProvisionerConfig should exist");
    from_dynamic(&obj).unwrap()
}

async fn condition(h: &Harness, type_: &str) -> Condition {
    let config = get_config(h).await;
    find_condition(&config.status.unwrap_or_default().conditions, type_)
        .unwrap_or_else(|| panic!("condition '{}' should be set", type_))
        .clone()
}

async fn spoke_has(h: &Harness, kind: &ApiResource, namespace: Option<&str>, name: &str) -> bool {
    h.spoke.get(kind, namespace, name).await.unwrap().is_some()
}

// ============================================================================
// Reconcile Happy Path
// ============================================================================

#[tokio::test]
async fn reconcile_creates_spoke_resources_and_workload() {
    let h = harness();
    seed_active(&h).await;

    h.reconciler.reconcile(&test_id()).await.unwrap();

    // Finalizer persisted on the primary resource
    let config = get_config(&h).await;
    assert!(config
        .metadata
        .finalizers
        .unwrap_or_default()
        .contains(&FINALIZER_NAME.to_string()));

    // Spoke-side prerequisites
    assert!(spoke_has(&h, &kinds::namespace(), None, TEST_NAMESPACE).await);
    assert!(spoke_has(&h, &kinds::service_account(), Some(TEST_NAMESPACE), SERVICE_NAME).await);
    assert!(spoke_has(&h, &kinds::role(), Some(TEST_NAMESPACE), SERVICE_NAME).await);
    assert!(spoke_has(&h, &kinds::role_binding(), Some(TEST_NAMESPACE), SERVICE_NAME).await);
    assert!(spoke_has(&h, &kinds::cluster_role(), None, MANAGER_ROLE_NAME).await);
    assert!(spoke_has(&h, &kinds::cluster_role_binding(), None, MANAGER_ROLE_BINDING_NAME).await);
    assert!(spoke_has(&h, &kinds::custom_resource_definition(), None, TEST_CRD_NAME).await);

    // Hub-side storage
    assert!(h
        .hub
        .get(&kinds::persistent_volume_claim(), Some(TEST_NAMESPACE), DATA_PVC_NAME)
        .await
        .unwrap()
        .is_some());
    assert!(h
        .hub
        .get(&kinds::persistent_volume_claim(), Some(TEST_NAMESPACE), DB_PVC_NAME)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn workload_carries_the_spoke_kubeconfig() {
    let h = harness();
    seed_active(&h).await;

    h.reconciler.reconcile(&test_id()).await.unwrap();

    let obj = h
        .hub
        .get(&kinds::deployment(), Some(TEST_NAMESPACE), SERVICE_NAME)
        .await
        .unwrap()
        .expect("workload deployment should exist");
    let deployment: Deployment = from_dynamic(&obj).unwrap();
    let pod = deployment.spec.unwrap().template.spec.unwrap();
    let container = &pod.containers[0];

    assert!(container.env.as_deref().unwrap_or_default().contains(&EnvVar {
        name: "KUBECONFIG".to_string(),
        value: Some("/etc/kube/kubeconfig".to_string()),
        ..Default::default()
    }));
    assert!(container
        .volume_mounts
        .as_deref()
        .unwrap_or_default()
        .contains(&VolumeMount {
            name: "kubeconfig".to_string(),
            mount_path: "/etc/kube".to_string(),
            ..Default::default()
        }));
    let kubeconfig_volume = pod
        .volumes
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|v| v.name == "kubeconfig")
        .expect("kubeconfig volume should be declared")
        .clone();
    assert_eq!(
        kubeconfig_volume.secret.unwrap().secret_name.as_deref(),
        Some(TEST_SECRET_NAME)
    );
}

#[tokio::test]
async fn conditions_true_over_healthy_workload_and_reconcile_is_idempotent() {
    let h = harness();
    seed_active(&h).await;

    h.reconciler.reconcile(&test_id()).await.unwrap();

    // The workload exists but reports no ready replicas yet
    assert_eq!(
        condition(&h, CONDITION_RECONCILE_COMPLETED).await.status,
        ConditionStatus::True
    );
    assert_eq!(
        condition(&h, CONDITION_DEPLOYMENTS_HEALTHY).await.status,
        ConditionStatus::False
    );

    // Report the workload healthy, as the kubelet eventually would
    h.hub
        .patch_status(
            &kinds::deployment(),
            Some(TEST_NAMESPACE),
            SERVICE_NAME,
            json!({ "status": { "replicas": 1, "readyReplicas": 1 } }),
        )
        .await
        .unwrap();

    h.reconciler.reconcile(&test_id()).await.unwrap();
    assert_eq!(
        condition(&h, CONDITION_RECONCILE_COMPLETED).await.status,
        ConditionStatus::True
    );
    assert_eq!(
        condition(&h, CONDITION_DEPLOYMENTS_HEALTHY).await.status,
        ConditionStatus::True
    );

    // A converged identity reconciles without producing any object diff
    let spoke_before = h.spoke.snapshot();
    let hub_before = h.hub.snapshot();
    h.reconciler.reconcile(&test_id()).await.unwrap();
    assert_eq!(spoke_before, h.spoke.snapshot());
    assert_eq!(hub_before, h.hub.snapshot());
}

#[tokio::test]
async fn reconcile_of_missing_resource_is_a_noop() {
    let h = harness();
    h.reconciler.reconcile(&test_id()).await.unwrap();
    assert!(h.hub.is_empty());
    assert!(h.spoke.is_empty());
}

// ============================================================================
// Credential and Client Failures
// ============================================================================

#[tokio::test]
async fn missing_kubeconfig_secret_fails_reconcile() {
    let h = harness();
    create_typed(
        &h.hub,
        &kinds::provisioner_config(),
        Some(TEST_NAMESPACE),
        &new_config(),
    )
    .await;
    create_typed(
        &h.hub,
        &kinds::custom_resource_definition(),
        None,
        &new_agent_install_crd(),
    )
    .await;

    let err = h.reconciler.reconcile(&test_id()).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Failed to create client"));
    assert!(message.contains(&format!(
        "Failed to get '{}' secret in '{}' namespace",
        TEST_SECRET_NAME, TEST_NAMESPACE
    )));

    // No spoke client was constructed or cached
    assert_eq!(h.factory.calls.load(Ordering::SeqCst), 0);
    assert!(h.cache.is_empty());

    let completed = condition(&h, CONDITION_RECONCILE_COMPLETED).await;
    assert_eq!(completed.status, ConditionStatus::False);
    assert!(completed.message.unwrap_or_default().contains(TEST_SECRET_NAME));
}

#[tokio::test]
async fn secret_without_kubeconfig_key_is_rejected() {
    let hub = FakeCluster::new();
    let mut secret = new_kubeconfig_secret();
    secret.metadata.name = Some("invalid".to_string());
    secret.data = Some(
        [("wrong-key".to_string(), ByteString(BASIC_KUBECONFIG.to_vec()))]
            .into_iter()
            .collect(),
    );
    create_typed(&hub, &kinds::secret(), Some(TEST_NAMESPACE), &secret).await;

    let err = resolve_kubeconfig(&hub, "invalid", TEST_NAMESPACE)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Secret 'invalid' does not contain 'kubeconfig' key value"
    );
}

#[tokio::test]
async fn failed_client_construction_is_not_cached() {
    let h = harness();
    seed_active(&h).await;
    h.factory.fail.store(true, Ordering::SeqCst);

    let err = h.reconciler.reconcile(&test_id()).await.unwrap_err();
    assert!(err.to_string().contains("Failed to create client"));
    assert_eq!(h.factory.calls.load(Ordering::SeqCst), 1);

    // The failure was not cached: the next pass constructs again
    let _ = h.reconciler.reconcile(&test_id()).await.unwrap_err();
    assert_eq!(h.factory.calls.load(Ordering::SeqCst), 2);

    // Once construction succeeds the client is reused
    h.factory.fail.store(false, Ordering::SeqCst);
    h.reconciler.reconcile(&test_id()).await.unwrap();
    h.reconciler.reconcile(&test_id()).await.unwrap();
    assert_eq!(h.factory.calls.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Prerequisite Gating
// ============================================================================

#[tokio::test]
async fn missing_agent_install_crds_block_spoke_sync() {
    let h = harness();
    create_typed(
        &h.hub,
        &kinds::provisioner_config(),
        Some(TEST_NAMESPACE),
        &new_config(),
    )
    .await;
    create_typed(
        &h.hub,
        &kinds::secret(),
        Some(TEST_NAMESPACE),
        &new_kubeconfig_secret(),
    )
    .await;

    let err = h.reconciler.reconcile(&test_id()).await.unwrap_err();
    assert!(err
        .to_string()
        .contains("agent-install CRDs are not available"));

    let completed = condition(&h, CONDITION_RECONCILE_COMPLETED).await;
    assert_eq!(completed.status, ConditionStatus::False);
    assert!(completed
        .message
        .unwrap_or_default()
        .contains("agent-install CRDs are not available"));

    // The workload was never synchronized, so its health is unknown
    assert_eq!(
        condition(&h, CONDITION_DEPLOYMENTS_HEALTHY).await.status,
        ConditionStatus::Unknown
    );

    // No spoke-side mutation happened
    assert!(h.spoke.is_empty());
}

// ============================================================================
// Garbage Collection
// ============================================================================

#[tokio::test]
async fn spoke_list_failure_during_cleanup_is_tolerated() {
    let h = harness();
    seed_active(&h).await;
    h.spoke.fail_lists(true);

    h.reconciler.reconcile(&test_id()).await.unwrap();
    assert_eq!(
        condition(&h, CONDITION_RECONCILE_COMPLETED).await.status,
        ConditionStatus::True
    );
}

#[tokio::test]
async fn redundant_spoke_crd_is_garbage_collected() {
    let h = harness();
    seed_active(&h).await;

    // A CRD from a previous desired state, still carrying our marker
    let mut stale = new_agent_install_crd();
    stale.metadata.name = Some("redundant".to_string());
    let mut labels = stale.metadata.labels.take().unwrap_or_default();
    labels.extend(owner_labels(&test_id()));
    stale.metadata.labels = Some(labels);
    create_typed(&h.spoke, &kinds::custom_resource_definition(), None, &stale).await;

    h.reconciler.reconcile(&test_id()).await.unwrap();

    assert!(!spoke_has(&h, &kinds::custom_resource_definition(), None, "redundant").await);
    assert!(spoke_has(&h, &kinds::custom_resource_definition(), None, TEST_CRD_NAME).await);
}

#[tokio::test]
async fn existing_spoke_crd_is_updated_in_place() {
    let h = harness();
    seed_active(&h).await;

    h.reconciler.reconcile(&test_id()).await.unwrap();
    let created = h
        .spoke
        .get(&kinds::custom_resource_definition(), None, TEST_CRD_NAME)
        .await
        .unwrap()
        .unwrap();
    let original_uid = created.metadata.uid.clone().unwrap();

    // A label change on the hub copy propagates to the spoke copy
    let mut hub_crd = h
        .hub
        .get(&kinds::custom_resource_definition(), None, TEST_CRD_NAME)
        .await
        .unwrap()
        .unwrap();
    hub_crd
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert("new".to_string(), "label".to_string());
    h.hub
        .update(&kinds::custom_resource_definition(), None, &hub_crd)
        .await
        .unwrap();

    h.reconciler.reconcile(&test_id()).await.unwrap();

    let updated = h
        .spoke
        .get(&kinds::custom_resource_definition(), None, TEST_CRD_NAME)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        updated.metadata.labels.unwrap_or_default().get("new").map(String::as_str),
        Some("label")
    );
    // Updated, not recreated
    assert_eq!(updated.metadata.uid.as_deref(), Some(original_uid.as_str()));
}

// ============================================================================
// Finalizer Lifecycle
// ============================================================================

#[tokio::test]
async fn finalizer_removed_and_cache_invalidated_on_deletion() {
    let h = harness();
    seed_active(&h).await;

    h.reconciler.reconcile(&test_id()).await.unwrap();
    assert_eq!(h.cache.len(), 1);

    // Mark the resource for deletion
    let mut obj = h
        .hub
        .get(&kinds::provisioner_config(), Some(TEST_NAMESPACE), TEST_NAME)
        .await
        .unwrap()
        .unwrap();
    obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
    h.hub
        .update(&kinds::provisioner_config(), Some(TEST_NAMESPACE), &obj)
        .await
        .unwrap();

    h.reconciler.reconcile(&test_id()).await.unwrap();

    let config = get_config(&h).await;
    assert!(config.metadata.finalizers.unwrap_or_default().is_empty());
    assert!(h.cache.is_empty());
}

// ============================================================================
// RBAC Mutation Convergence
// ============================================================================

#[test]
fn role_mutation_restores_cleared_rules() {
    let resource = resources::leader_election_role(&test_id()).unwrap();
    assert_eq!(resource.desired.metadata.name.as_deref(), Some(SERVICE_NAME));
    assert_eq!(
        resource.desired.metadata.namespace.as_deref(),
        Some(TEST_NAMESPACE)
    );

    let mut cleared = resource.desired.clone();
    cleared.data["rules"] = serde_json::Value::Null;
    let mutated = (resource.mutate)(&cleared);
    let role: Role = from_dynamic(&mutated).unwrap();
    assert!(!role.rules.unwrap_or_default().is_empty());
}

#[test]
fn role_binding_mutation_restores_cleared_subjects() {
    let resource = resources::leader_election_role_binding(&test_id()).unwrap();
    assert_eq!(resource.desired.metadata.name.as_deref(), Some(SERVICE_NAME));

    let mut cleared = resource.desired.clone();
    cleared.data["subjects"] = serde_json::Value::Null;
    cleared.data["roleRef"] = json!({ "apiGroup": "", "kind": "", "name": "" });
    let mutated = (resource.mutate)(&cleared);
    let binding: RoleBinding = from_dynamic(&mutated).unwrap();
    assert!(!binding.subjects.unwrap_or_default().is_empty());
    assert_eq!(binding.role_ref.name, SERVICE_NAME);
}

#[test]
fn cluster_role_mutation_restores_cleared_rules() {
    let resource = resources::manager_cluster_role(&test_id()).unwrap();
    assert_eq!(
        resource.desired.metadata.name.as_deref(),
        Some(MANAGER_ROLE_NAME)
    );
    assert_eq!(resource.desired.metadata.namespace, None);

    let mut cleared = resource.desired.clone();
    cleared.data["rules"] = serde_json::Value::Null;
    let mutated = (resource.mutate)(&cleared);
    let role: ClusterRole = from_dynamic(&mutated).unwrap();
    assert!(!role.rules.unwrap_or_default().is_empty());
}

#[test]
fn cluster_role_binding_mutation_restores_cleared_subjects() {
    let resource = resources::manager_cluster_role_binding(&test_id()).unwrap();
    assert_eq!(
        resource.desired.metadata.name.as_deref(),
        Some(MANAGER_ROLE_BINDING_NAME)
    );

    let mut cleared = resource.desired.clone();
    cleared.data["subjects"] = serde_json::Value::Null;
    cleared.data["roleRef"] = json!({ "apiGroup": "", "kind": "", "name": "" });
    let mutated = (resource.mutate)(&cleared);
    let binding: ClusterRoleBinding = from_dynamic(&mutated).unwrap();
    assert!(!binding.subjects.unwrap_or_default().is_empty());
    assert_eq!(binding.role_ref.name, MANAGER_ROLE_NAME);
}
