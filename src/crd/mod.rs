//! Custom Resource Definitions for the agent provision operator

mod conditions;
mod provisioner_config;

pub use conditions::*;
pub use provisioner_config::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Vec<String> {
    vec![serde_yaml::to_string(&ProvisionerConfig::crd()).unwrap()]
}
