//! Capability-typed access to a Kubernetes API surface
//!
//! The reconciliation engine never talks to `kube::Client` directly; it goes
//! through the [`ClusterApi`] trait so that the hub connection, a live spoke
//! connection and the in-memory fake used in tests are interchangeable.

mod fake;
mod kube_api;

pub mod kinds;

pub use fake::FakeCluster;
pub use kube_api::KubeApi;

use std::fmt;

use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject, TypeMeta};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Namespace-scoped identity of a primary resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub name: String,
    pub namespace: String,
}

impl ResourceId {
    pub fn new(name: &str, namespace: &str) -> Self {
        ResourceId {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Object CRUD and list operations against one API server.
///
/// Objects are passed type-erased as [`DynamicObject`]; use [`to_dynamic`] and
/// [`from_dynamic`] at the typed boundaries. A `namespace` of `None` addresses
/// cluster-scoped kinds.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch an object, `None` if it does not exist
    async fn get(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// List objects of a kind, optionally filtered by label selector
    async fn list(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    /// Create an object
    async fn create(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Replace an existing object
    async fn update(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Delete an object; deleting an absent object is not an error
    async fn delete(&self, kind: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()>;

    /// Merge-patch the status subresource
    async fn patch_status(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<()>;
}

/// Convert a typed object into a [`DynamicObject`] tagged with the kind's TypeMeta
pub fn to_dynamic<K: Serialize>(kind: &ApiResource, obj: &K) -> Result<DynamicObject> {
    let mut dynamic: DynamicObject = serde_json::from_value(serde_json::to_value(obj)?)?;
    dynamic.types = Some(TypeMeta {
        api_version: kind.api_version.clone(),
        kind: kind.kind.clone(),
    });
    Ok(dynamic)
}

/// Convert a [`DynamicObject`] back into a typed object
pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}
