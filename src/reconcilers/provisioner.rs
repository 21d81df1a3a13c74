//! ProvisionerConfig reconciler
//!
//! One reconcile pass walks a strict step protocol: fetch, deletion handling,
//! finalizer persistence, spoke client acquisition, prerequisite check,
//! spoke-side synchronization, hub-side synchronization, condition write-back.
//! Spoke-side prerequisites must be fully converged before the hub workload
//! referencing the spoke credentials exists, and the finalizer must be
//! persisted before the first spoke mutation.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info};

use crate::cluster::{from_dynamic, kinds, to_dynamic, ClusterApi, ResourceId};
use crate::crd::{
    set_condition, Condition, ConditionStatus, ProvisionerConfig,
    CONDITION_DEPLOYMENTS_HEALTHY, CONDITION_RECONCILE_COMPLETED, REASON_DEPLOYMENT_HEALTHY,
    REASON_DEPLOYMENT_NOT_FOUND, REASON_DEPLOYMENT_UNAVAILABLE, REASON_RECONCILE_FAILED,
    REASON_RECONCILE_SUCCEEDED,
};
use crate::error::{Error, Result};
use crate::metrics;
use crate::spoke::SpokeClientCache;
use crate::sync::resources::{self, AGENT_INSTALL_CRD_SELECTOR, SERVICE_NAME};
use crate::sync::Synchronizer;

/// Finalizer gating deletion until spoke-side cleanup bookkeeping ran
pub const FINALIZER_NAME: &str = "agent-install.io/deprovision";

/// Reconciles ProvisionerConfig resources across the hub and spoke clusters
pub struct ProvisionerReconciler {
    hub: Arc<dyn ClusterApi>,
    spoke_clients: Arc<SpokeClientCache>,
}

impl ProvisionerReconciler {
    pub fn new(hub: Arc<dyn ClusterApi>, spoke_clients: Arc<SpokeClientCache>) -> Self {
        ProvisionerReconciler { hub, spoke_clients }
    }

    /// Run one reconcile pass for the given identity
    pub async fn reconcile(&self, id: &ResourceId) -> Result<Action> {
        let Some(mut instance) = self.fetch(id).await? else {
            debug!(identity = %id, "Resource is gone, nothing to do");
            return Ok(Action::await_change());
        };

        if instance.metadata.deletion_timestamp.is_some() {
            return self.cleanup(id, instance).await;
        }

        self.ensure_finalizer(id, &mut instance).await?;

        let outcome = self.converge(id, &instance).await;
        self.update_conditions(id, &instance, &outcome).await?;
        outcome.map(|()| Action::await_change())
    }

    async fn fetch(&self, id: &ResourceId) -> Result<Option<ProvisionerConfig>> {
        match self
            .hub
            .get(&kinds::provisioner_config(), Some(&id.namespace), &id.name)
            .await?
        {
            Some(obj) => Ok(Some(from_dynamic(&obj)?)),
            None => Ok(None),
        }
    }

    /// Deletion path: drop the cached spoke client and release the finalizer.
    /// A failed finalizer update propagates so the pass is retried.
    async fn cleanup(&self, id: &ResourceId, mut instance: ProvisionerConfig) -> Result<Action> {
        info!(identity = %id, "Resource is terminating, cleaning up");
        self.spoke_clients.invalidate(id);

        let finalizers = instance.metadata.finalizers.take().unwrap_or_default();
        let before = finalizers.len();
        let remaining: Vec<String> = finalizers
            .into_iter()
            .filter(|f| f != FINALIZER_NAME)
            .collect();
        let had_finalizer = remaining.len() != before;
        instance.metadata.finalizers = if remaining.is_empty() {
            None
        } else {
            Some(remaining)
        };

        if had_finalizer {
            let obj = to_dynamic(&kinds::provisioner_config(), &instance)?;
            self.hub
                .update(&kinds::provisioner_config(), Some(&id.namespace), &obj)
                .await?;
            info!(identity = %id, "Removed finalizer");
        }

        metrics::CLEANUPS
            .with_label_values(&["ProvisionerConfig"])
            .inc();
        Ok(Action::await_change())
    }

    /// Persist the finalizer before any spoke mutation so a crash between the
    /// two cannot orphan spoke-side objects.
    async fn ensure_finalizer(
        &self,
        id: &ResourceId,
        instance: &mut ProvisionerConfig,
    ) -> Result<()> {
        if instance.finalizers().iter().any(|f| f == FINALIZER_NAME) {
            return Ok(());
        }
        instance
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(FINALIZER_NAME.to_string());
        let obj = to_dynamic(&kinds::provisioner_config(), instance)?;
        let updated = self
            .hub
            .update(&kinds::provisioner_config(), Some(&id.namespace), &obj)
            .await?;
        instance.metadata.resource_version = updated.metadata.resource_version;
        info!(identity = %id, "Added finalizer");
        Ok(())
    }

    /// Steps 4-7: client acquisition, prerequisite gate, spoke sync, hub sync
    async fn converge(&self, id: &ResourceId, instance: &ProvisionerConfig) -> Result<()> {
        let spoke = self
            .spoke_clients
            .get(id, &instance.spec.kubeconfig_secret_ref.name)
            .await
            .map_err(|e| Error::client_unavailable(&e))?;
        metrics::SPOKE_CLIENTS.set(self.spoke_clients.len() as f64);

        let hub_crds = self.agent_install_crds().await?;

        let spoke_set = resources::spoke_resources(id, &hub_crds)?;
        Synchronizer::new(spoke.as_ref(), id).sync(&spoke_set).await?;

        let hub_set = resources::hub_resources(id, instance)?;
        Synchronizer::new(self.hub.as_ref(), id).sync(&hub_set).await?;

        info!(identity = %id, "Hub and spoke resources converged");
        Ok(())
    }

    /// The agent-install CRDs must already exist on the hub; without them a
    /// spoke sync would wire up a workload whose API types are not installed.
    async fn agent_install_crds(&self) -> Result<Vec<kube::core::DynamicObject>> {
        let crds = self
            .hub
            .list(
                &kinds::custom_resource_definition(),
                None,
                Some(AGENT_INSTALL_CRD_SELECTOR),
            )
            .await?;
        if crds.is_empty() {
            return Err(Error::PrerequisiteMissing);
        }
        Ok(crds)
    }

    /// Step 8: derive both conditions and persist them on the status
    async fn update_conditions(
        &self,
        id: &ResourceId,
        instance: &ProvisionerConfig,
        outcome: &Result<()>,
    ) -> Result<()> {
        let mut conditions = instance
            .status
            .clone()
            .unwrap_or_default()
            .conditions;

        let reconcile_condition = match outcome {
            Ok(()) => Condition::new(
                CONDITION_RECONCILE_COMPLETED,
                ConditionStatus::True,
                REASON_RECONCILE_SUCCEEDED,
                "Reconcile completed successfully",
            ),
            Err(e) => Condition::new(
                CONDITION_RECONCILE_COMPLETED,
                ConditionStatus::False,
                REASON_RECONCILE_FAILED,
                e.to_string(),
            ),
        };
        set_condition(&mut conditions, reconcile_condition);
        set_condition(&mut conditions, self.workload_health(id).await);

        let patch = json!({ "status": { "conditions": conditions } });
        self.hub
            .patch_status(
                &kinds::provisioner_config(),
                Some(&id.namespace),
                &id.name,
                patch,
            )
            .await
    }

    /// Workload health: True only when the observed replica count equals the
    /// desired count and every replica is ready; Unknown while the workload
    /// cannot be read.
    async fn workload_health(&self, id: &ResourceId) -> Condition {
        let deployment = self
            .hub
            .get(&kinds::deployment(), Some(&id.namespace), SERVICE_NAME)
            .await
            .ok()
            .flatten()
            .and_then(|obj| from_dynamic::<Deployment>(&obj).ok());

        let Some(deployment) = deployment else {
            return Condition::new(
                CONDITION_DEPLOYMENTS_HEALTHY,
                ConditionStatus::Unknown,
                REASON_DEPLOYMENT_NOT_FOUND,
                format!("Deployment '{}' is not readable yet", SERVICE_NAME),
            );
        };

        let desired = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let status = deployment.status.unwrap_or_default();
        let observed = status.replicas.unwrap_or(0);
        let ready = status.ready_replicas.unwrap_or(0);

        if observed == desired && ready == desired {
            Condition::new(
                CONDITION_DEPLOYMENTS_HEALTHY,
                ConditionStatus::True,
                REASON_DEPLOYMENT_HEALTHY,
                format!("Deployment '{}' has all replicas ready", SERVICE_NAME),
            )
        } else {
            Condition::new(
                CONDITION_DEPLOYMENTS_HEALTHY,
                ConditionStatus::False,
                REASON_DEPLOYMENT_UNAVAILABLE,
                format!(
                    "Deployment '{}' has {}/{} replicas ready",
                    SERVICE_NAME, ready, desired
                ),
            )
        }
    }
}
