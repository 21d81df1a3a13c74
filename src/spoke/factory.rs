//! Spoke client construction from a kubeconfig blob

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::cluster::{ClusterApi, KubeApi};
use crate::error::{Error, Result};

/// Connection timeout for spoke API servers
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout for spoke API servers
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds a spoke client from a raw kubeconfig.
///
/// A pure function of its input: no retries, no hidden state. Retry policy
/// belongs to the caller.
#[async_trait]
pub trait SpokeClientFactory: Send + Sync {
    async fn create(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>>;
}

/// Live factory parsing the blob into a `kube::Client` configuration
pub struct KubeconfigClientFactory;

#[async_trait]
impl SpokeClientFactory for KubeconfigClientFactory {
    async fn create(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>> {
        let raw = std::str::from_utf8(kubeconfig)
            .map_err(|e| Error::InvalidKubeconfig(format!("not valid UTF-8: {}", e)))?;
        let parsed: Kubeconfig = serde_yaml::from_str(raw)
            .map_err(|e| Error::InvalidKubeconfig(format!("not valid YAML: {}", e)))?;
        let mut config = Config::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::InvalidKubeconfig(e.to_string()))?;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);
        let client =
            Client::try_from(config).map_err(|e| Error::InvalidKubeconfig(e.to_string()))?;
        Ok(Arc::new(KubeApi::new(client)))
    }
}
