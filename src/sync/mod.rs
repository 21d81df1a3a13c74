//! Resource synchronization
//!
//! Declarative create-or-update of a set of managed resources against a
//! target API surface, followed by garbage collection of previously-created
//! objects that left the desired set.

pub mod resources;

use std::collections::{BTreeMap, HashSet};

use kube::core::{ApiResource, DynamicObject};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterApi, ResourceId};
use crate::error::{Error, Result};
use crate::metrics;

/// Marker label identifying objects owned by this operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Marker label identifying the owning primary resource
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Value of the managed-by marker
pub const OPERATOR_NAME: &str = "agent-provision-operator";

/// Pure transform from the currently-stored object to its converged form
pub type MutateFn = Box<dyn Fn(&DynamicObject) -> DynamicObject + Send + Sync>;

/// A resource whose full lifecycle this operator owns
pub struct ManagedResource {
    pub kind: ApiResource,
    pub desired: DynamicObject,
    pub mutate: MutateFn,
}

impl ManagedResource {
    /// Declare a resource converged by overwriting its mutable fields with
    /// the desired template while keeping system-managed fields untouched.
    ///
    /// The ownership marker labels are stamped onto the template here so
    /// every applied object can later be found by the garbage collector.
    pub fn converging(kind: ApiResource, mut desired: DynamicObject, owner: &ResourceId) -> Self {
        let mut labels = desired.metadata.labels.take().unwrap_or_default();
        labels.extend(owner_labels(owner));
        desired.metadata.labels = Some(labels);

        let template = desired.clone();
        ManagedResource {
            kind,
            desired,
            mutate: Box::new(move |existing| converge(existing, &template)),
        }
    }
}

/// Ownership marker labels for a primary resource
pub fn owner_labels(owner: &ResourceId) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string()),
        (
            INSTANCE_LABEL.to_string(),
            format!("{}.{}", owner.name, owner.namespace),
        ),
    ])
}

/// Label selector matching the ownership marker
pub fn owner_selector(owner: &ResourceId) -> String {
    format!(
        "{}={},{}={}.{}",
        MANAGED_BY_LABEL, OPERATOR_NAME, INSTANCE_LABEL, owner.name, owner.namespace
    )
}

/// Overwrite an existing object's mutable fields with the desired template.
///
/// System-managed metadata (resource version, uid, creation timestamp,
/// generation, managed fields) and the status subtree are carried over from
/// the existing object, which makes the transform idempotent: applying it to
/// its own output changes nothing.
pub fn converge(existing: &DynamicObject, desired: &DynamicObject) -> DynamicObject {
    let mut out = desired.clone();
    out.metadata.resource_version = existing.metadata.resource_version.clone();
    out.metadata.uid = existing.metadata.uid.clone();
    out.metadata.creation_timestamp = existing.metadata.creation_timestamp.clone();
    out.metadata.generation = existing.metadata.generation;
    out.metadata.managed_fields = existing.metadata.managed_fields.clone();
    if out.metadata.annotations.is_none() {
        out.metadata.annotations = existing.metadata.annotations.clone();
    }
    if let Some(status) = existing.data.get("status") {
        if !out.data.is_object() {
            out.data = serde_json::json!({});
        }
        out.data["status"] = status.clone();
    }
    out
}

/// Applies managed resources against one target API surface
pub struct Synchronizer<'a> {
    target: &'a dyn ClusterApi,
    owner: &'a ResourceId,
}

impl<'a> Synchronizer<'a> {
    pub fn new(target: &'a dyn ClusterApi, owner: &'a ResourceId) -> Self {
        Synchronizer { target, owner }
    }

    /// Converge every declaration, then garbage-collect stale objects.
    ///
    /// Create/update failures abort the pass; an incomplete cleanup must not
    /// block workload availability, so garbage collection never fails it.
    pub async fn sync(&self, resources: &[ManagedResource]) -> Result<()> {
        for resource in resources {
            self.apply(resource).await?;
        }
        self.garbage_collect(resources).await;
        Ok(())
    }

    async fn apply(&self, resource: &ManagedResource) -> Result<()> {
        let namespace = resource.desired.metadata.namespace.clone();
        let name = resource
            .desired
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::sync("managed resource declared without a name"))?;

        match self
            .target
            .get(&resource.kind, namespace.as_deref(), &name)
            .await?
        {
            None => {
                info!(kind = %resource.kind.kind, name = %name, "Creating resource");
                self.target
                    .create(&resource.kind, namespace.as_deref(), &resource.desired)
                    .await?;
            }
            Some(existing) => {
                let mutated = (resource.mutate)(&existing);
                if serde_json::to_value(&mutated)? != serde_json::to_value(&existing)? {
                    info!(kind = %resource.kind.kind, name = %name, "Updating resource");
                    self.target
                        .update(&resource.kind, namespace.as_deref(), &mutated)
                        .await?;
                } else {
                    debug!(kind = %resource.kind.kind, name = %name, "Resource already converged");
                }
            }
        }
        Ok(())
    }

    /// Delete marker-labeled objects of the declared kinds that are no longer
    /// in the desired set. List and delete failures are logged and tolerated.
    async fn garbage_collect(&self, resources: &[ManagedResource]) {
        let selector = owner_selector(self.owner);

        let mut groups: Vec<(ApiResource, Option<String>)> = Vec::new();
        for resource in resources {
            let namespace = resource.desired.metadata.namespace.clone();
            if !groups
                .iter()
                .any(|(kind, ns)| kind.kind == resource.kind.kind && *ns == namespace)
            {
                groups.push((resource.kind.clone(), namespace));
            }
        }

        for (kind, namespace) in groups {
            let declared: HashSet<String> = resources
                .iter()
                .filter(|r| r.kind.kind == kind.kind && r.desired.metadata.namespace == namespace)
                .filter_map(|r| r.desired.metadata.name.clone())
                .collect();

            let found = match self
                .target
                .list(&kind, namespace.as_deref(), Some(&selector))
                .await
            {
                Ok(objects) => objects,
                Err(e) => {
                    warn!(
                        kind = %kind.kind,
                        error = %e,
                        "Failed to list owned resources for cleanup, leaving them in place"
                    );
                    continue;
                }
            };

            for obj in found {
                let name = obj.name_any();
                if declared.contains(&name) {
                    continue;
                }
                info!(kind = %kind.kind, name = %name, "Deleting resource no longer in the desired set");
                match self.target.delete(&kind, namespace.as_deref(), &name).await {
                    Ok(()) => {
                        metrics::STALE_RESOURCES_DELETED
                            .with_label_values(&[kind.kind.as_str()])
                            .inc();
                    }
                    Err(e) => {
                        warn!(kind = %kind.kind, name = %name, error = %e, "Failed to delete stale resource");
                    }
                }
            }
        }
    }
}
