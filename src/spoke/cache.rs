//! Per-identity spoke client cache

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::cluster::{ClusterApi, ResourceId};
use crate::error::Result;
use crate::spoke::factory::SpokeClientFactory;
use crate::spoke::resolver::resolve_kubeconfig;

type Slot = Arc<tokio::sync::Mutex<Option<Arc<dyn ClusterApi>>>>;

/// Cache of spoke clients keyed by primary-resource identity.
///
/// Spoke connections are expensive to establish and the credential secret
/// rarely changes between reconciles, so a constructed client is reused until
/// the identity is invalidated. A failed resolution or construction is never
/// stored: the next call retries from scratch.
///
/// The outer mutex only guards map insert/lookup; each slot carries its own
/// async lock so concurrent reconciles of the same identity cannot race to
/// construct two clients, while distinct identities proceed independently.
pub struct SpokeClientCache {
    hub: Arc<dyn ClusterApi>,
    factory: Arc<dyn SpokeClientFactory>,
    clients: Mutex<HashMap<ResourceId, Slot>>,
}

impl SpokeClientCache {
    pub fn new(hub: Arc<dyn ClusterApi>, factory: Arc<dyn SpokeClientFactory>) -> Self {
        SpokeClientCache {
            hub,
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached client for `id`, constructing it on first use.
    ///
    /// `secret_name` references the connection secret in the identity's
    /// namespace; it is only consulted when construction is needed.
    pub async fn get(&self, id: &ResourceId, secret_name: &str) -> Result<Arc<dyn ClusterApi>> {
        let slot = {
            let mut clients = self.clients.lock().unwrap();
            clients.entry(id.clone()).or_default().clone()
        };

        let mut entry = slot.lock().await;
        if let Some(client) = entry.as_ref() {
            return Ok(client.clone());
        }

        debug!(identity = %id, secret = %secret_name, "Constructing spoke client");
        match self.construct(id, secret_name).await {
            Ok(client) => {
                *entry = Some(client.clone());
                Ok(client)
            }
            Err(e) => {
                // A failed construction must not leave an entry behind
                drop(entry);
                let mut clients = self.clients.lock().unwrap();
                if let Some(current) = clients.get(id) {
                    if Arc::ptr_eq(current, &slot) {
                        clients.remove(id);
                    }
                }
                Err(e)
            }
        }
    }

    async fn construct(&self, id: &ResourceId, secret_name: &str) -> Result<Arc<dyn ClusterApi>> {
        let kubeconfig = resolve_kubeconfig(self.hub.as_ref(), secret_name, &id.namespace).await?;
        self.factory.create(&kubeconfig).await
    }

    /// Drop the cached client for `id`, if any
    pub fn invalidate(&self, id: &ResourceId) {
        if self.clients.lock().unwrap().remove(id).is_some() {
            debug!(identity = %id, "Invalidated spoke client");
        }
    }

    /// Number of live cache entries
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;

    use super::*;
    use crate::cluster::{kinds, to_dynamic, FakeCluster};

    struct CountingFactory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpokeClientFactory for CountingFactory {
        async fn create(&self, _kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeCluster::new()))
        }
    }

    async fn hub_with_secret(name: &str, namespace: &str) -> Arc<FakeCluster> {
        let hub = Arc::new(FakeCluster::new());
        let secret = Secret {
            metadata: kube::core::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                [(
                    "kubeconfig".to_string(),
                    ByteString(b"apiVersion: v1\nkind: Config\n".to_vec()),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        };
        let obj = to_dynamic(&kinds::secret(), &secret).unwrap();
        hub.create(&kinds::secret(), Some(namespace), &obj)
            .await
            .unwrap();
        hub
    }

    #[tokio::test]
    async fn second_get_reuses_constructed_client() {
        let hub = hub_with_secret("creds", "ns").await;
        let factory = Arc::new(CountingFactory {
            calls: AtomicUsize::new(0),
        });
        let cache = SpokeClientCache::new(hub, factory.clone());
        let id = ResourceId::new("cfg", "ns");

        cache.get(&id, "creds").await.unwrap();
        cache.get(&id, "creds").await.unwrap();
        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_resolution_is_not_cached() {
        let hub = Arc::new(FakeCluster::new());
        let factory = Arc::new(CountingFactory {
            calls: AtomicUsize::new(0),
        });
        let cache = SpokeClientCache::new(hub, factory.clone());
        let id = ResourceId::new("cfg", "ns");

        assert!(cache.get(&id, "missing").await.is_err());
        assert!(cache.get(&id, "missing").await.is_err());
        // The factory was never reached, and no entry was left behind
        assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn invalidate_forces_reconstruction() {
        let hub = hub_with_secret("creds", "ns").await;
        let factory = Arc::new(CountingFactory {
            calls: AtomicUsize::new(0),
        });
        let cache = SpokeClientCache::new(hub, factory.clone());
        let id = ResourceId::new("cfg", "ns");

        cache.get(&id, "creds").await.unwrap();
        cache.invalidate(&id);
        assert!(cache.is_empty());
        cache.get(&id, "creds").await.unwrap();
        assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
    }
}
