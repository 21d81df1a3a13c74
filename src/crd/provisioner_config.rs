//! ProvisionerConfig Custom Resource Definition
//!
//! The hub-resident desired state for the agent-based cluster provisioning
//! service. Its spec references a kubeconfig secret for the spoke cluster and
//! the storage volumes backing the hub-side workload.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

/// ProvisionerConfig resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "agent-install.io",
    version = "v1alpha1",
    kind = "ProvisionerConfig",
    plural = "provisionerconfigs",
    singular = "provisionerconfig",
    shortname = "provcfg",
    namespaced,
    status = "ProvisionerConfigStatus",
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerConfigSpec {
    /// Secret holding the spoke cluster's kubeconfig under the `kubeconfig` key
    pub kubeconfig_secret_ref: KubeconfigSecretRef,

    /// Volume backing the provisioning database
    pub database_storage: VolumeRequest,

    /// Volume backing the provisioning service's working data
    pub filesystem_storage: VolumeRequest,

    /// Optional volume for generated boot images
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_storage: Option<VolumeRequest>,
}

/// Reference to the spoke connection secret (same namespace as the resource)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeconfigSecretRef {
    /// Secret name
    pub name: String,
}

/// A persistent volume request
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRequest {
    /// Requested size (e.g., "10Gi")
    pub size: String,

    /// Storage class name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Access modes
    #[serde(default = "default_access_modes")]
    pub access_modes: Vec<String>,
}

fn default_access_modes() -> Vec<String> {
    vec!["ReadWriteOnce".to_string()]
}

/// ProvisionerConfig status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerConfigStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
