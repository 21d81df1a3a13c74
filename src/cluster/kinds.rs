//! `ApiResource` constructors for the kinds this operator manages

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::ApiResource;

use crate::crd::ProvisionerConfig;

pub fn provisioner_config() -> ApiResource {
    ApiResource::erase::<ProvisionerConfig>(&())
}

pub fn secret() -> ApiResource {
    ApiResource::erase::<Secret>(&())
}

pub fn namespace() -> ApiResource {
    ApiResource::erase::<Namespace>(&())
}

pub fn service_account() -> ApiResource {
    ApiResource::erase::<ServiceAccount>(&())
}

pub fn role() -> ApiResource {
    ApiResource::erase::<Role>(&())
}

pub fn role_binding() -> ApiResource {
    ApiResource::erase::<RoleBinding>(&())
}

pub fn cluster_role() -> ApiResource {
    ApiResource::erase::<ClusterRole>(&())
}

pub fn cluster_role_binding() -> ApiResource {
    ApiResource::erase::<ClusterRoleBinding>(&())
}

pub fn custom_resource_definition() -> ApiResource {
    ApiResource::erase::<CustomResourceDefinition>(&())
}

pub fn persistent_volume_claim() -> ApiResource {
    ApiResource::erase::<PersistentVolumeClaim>(&())
}

pub fn deployment() -> ApiResource {
    ApiResource::erase::<Deployment>(&())
}
