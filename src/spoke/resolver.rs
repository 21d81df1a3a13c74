//! Spoke credential resolution

use k8s_openapi::api::core::v1::Secret;

use crate::cluster::{from_dynamic, kinds, ClusterApi};
use crate::error::{Error, Result};

/// Key under which the connection secret carries the spoke kubeconfig
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// Read the spoke kubeconfig blob from its hub secret.
///
/// A missing secret and a missing key are distinct, user-facing errors; any
/// other read failure propagates untouched.
pub async fn resolve_kubeconfig(
    hub: &dyn ClusterApi,
    name: &str,
    namespace: &str,
) -> Result<Vec<u8>> {
    let Some(obj) = hub.get(&kinds::secret(), Some(namespace), name).await? else {
        return Err(Error::SecretNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });
    };
    let secret: Secret = from_dynamic(&obj)?;
    match secret.data.unwrap_or_default().get(KUBECONFIG_SECRET_KEY) {
        Some(blob) if !blob.0.is_empty() => Ok(blob.0.clone()),
        _ => Err(Error::SecretKeyNotFound {
            secret: name.to_string(),
            key: KUBECONFIG_SECRET_KEY.to_string(),
        }),
    }
}
