//! ProvisionerConfig controller
//!
//! Watches ProvisionerConfig resources (and the hub workloads they own) and
//! drives the reconciliation engine.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{error, info, instrument};

use crate::cluster::ResourceId;
use crate::controllers::Context;
use crate::crd::ProvisionerConfig;
use crate::error::{Error, Result};
use crate::metrics;

/// Upper bound on a single reconcile pass, including spoke API round trips
const RECONCILE_TIMEOUT: Duration = Duration::from_secs(120);

/// Run the ProvisionerConfig controller
pub async fn run(client: Client, context: Arc<Context>) {
    let api: Api<ProvisionerConfig> = Api::all(client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("ProvisionerConfig CRD not installed: {}", e);
        return;
    }

    info!("Starting ProvisionerConfig controller");

    Controller::new(api, WatcherConfig::default())
        .owns(
            Api::<Deployment>::all(client.clone()),
            WatcherConfig::default(),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled ProvisionerConfig"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS
                        .with_label_values(&["ProvisionerConfig"])
                        .inc();
                }
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<ProvisionerConfig>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["ProvisionerConfig"])
        .start_timer();
    metrics::RECONCILIATIONS
        .with_label_values(&["ProvisionerConfig"])
        .inc();

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let id = ResourceId::new(&obj.name_any(), &namespace);

    match tokio::time::timeout(RECONCILE_TIMEOUT, ctx.reconciler.reconcile(&id)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(RECONCILE_TIMEOUT)),
    }
}

/// Error policy for the controller
fn error_policy(obj: Arc<ProvisionerConfig>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    error!(
        name = %name,
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    // Backoff class per error type: conflicts resolve on the next pass,
    // missing user inputs take longer to appear
    let requeue_duration = match error {
        Error::Conflict(_) => Duration::from_secs(5),
        Error::SecretNotFound { .. }
        | Error::SecretKeyNotFound { .. }
        | Error::InvalidKubeconfig(_)
        | Error::ClientUnavailable(_)
        | Error::PrerequisiteMissing => Duration::from_secs(60),
        Error::Kube(_) | Error::Sync(_) => Duration::from_secs(30),
        _ => Duration::from_secs(30),
    };

    Action::requeue(requeue_duration)
}
