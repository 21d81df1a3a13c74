//! Kubernetes controllers for the agent provision operator
//!
//! This module contains the controller wiring that watches for resource
//! changes and triggers reconciliation.

mod provisioner_controller;

pub use provisioner_controller::run as run_provisioner_controller;

use std::sync::Arc;

use kube::Client;

use crate::cluster::{ClusterApi, KubeApi};
use crate::reconcilers::ProvisionerReconciler;
use crate::spoke::{KubeconfigClientFactory, SpokeClientCache};

/// Shared context for the controllers
pub struct Context {
    /// Kubernetes client for the hub cluster
    pub client: Client,
    /// Reconciliation engine, wired against the live hub API
    pub reconciler: ProvisionerReconciler,
}

impl Context {
    /// Create a new context with a live hub API and spoke client cache
    pub fn new(client: Client) -> Self {
        let hub: Arc<dyn ClusterApi> = Arc::new(KubeApi::new(client.clone()));
        let spoke_clients = Arc::new(SpokeClientCache::new(
            hub.clone(),
            Arc::new(KubeconfigClientFactory),
        ));
        Context {
            client,
            reconciler: ProvisionerReconciler::new(hub, spoke_clients),
        }
    }
}
