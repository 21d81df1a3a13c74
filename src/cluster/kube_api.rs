//! Live [`ClusterApi`] implementation backed by a `kube::Client`

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::{Api, Client};

use crate::error::{Error, Result};

/// Field manager recorded on writes issued by this operator
const FIELD_MANAGER: &str = "agent-provision-operator";

/// [`ClusterApi`] over a live API server connection
#[derive(Clone)]
pub struct KubeApi {
    client: Client,
}

impl KubeApi {
    pub fn new(client: Client) -> Self {
        KubeApi { client }
    }

    fn api(&self, kind: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, kind),
            None => Api::all_with(self.client.clone(), kind),
        }
    }
}

/// Map optimistic-concurrency conflicts to their own variant so the error
/// policy can retry them quickly.
fn map_kube_error(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict(ae.message),
        other => Error::Kube(other),
    }
}

#[async_trait]
impl super::ClusterApi for KubeApi {
    async fn get(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        self.api(kind, namespace)
            .get_opt(name)
            .await
            .map_err(map_kube_error)
    }

    async fn list(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self
            .api(kind, namespace)
            .list(&params)
            .await
            .map_err(map_kube_error)?;
        Ok(list.items)
    }

    async fn create(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.api(kind, namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(map_kube_error)
    }

    async fn update(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::sync("cannot update an object without a name"))?;
        self.api(kind, namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(map_kube_error)
    }

    async fn delete(&self, kind: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        match self
            .api(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(map_kube_error(e)),
        }
    }

    async fn patch_status(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<()> {
        self.api(kind, namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map_err(map_kube_error)?;
        Ok(())
    }
}
