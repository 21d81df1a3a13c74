//! In-memory [`ClusterApi`] implementation
//!
//! A test double holding objects in a map keyed by kind, namespace and name.
//! Create and update mimic API-server bookkeeping (uid assignment, resource
//! version bumps) closely enough to observe whether a reconcile wrote
//! anything. List calls can be made to fail to exercise the
//! garbage-collection tolerance path.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject};

use crate::error::{Error, Result};

type ObjectKey = (String, Option<String>, String);

/// In-memory cluster state
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ObjectKey, DynamicObject>>,
    next_id: AtomicU64,
    fail_lists: AtomicBool,
}

impl FakeCluster {
    pub fn new() -> Self {
        FakeCluster::default()
    }

    /// Make every subsequent `list` call fail
    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the stored objects, for diffing between reconciles
    pub fn snapshot(&self) -> BTreeMap<String, serde_json::Value> {
        let objects = self.objects.lock().unwrap();
        objects
            .iter()
            .map(|((kind, ns, name), obj)| {
                let key = format!("{}/{}/{}", kind, ns.as_deref().unwrap_or(""), name);
                (key, serde_json::to_value(obj).unwrap())
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }

    fn key(kind: &ApiResource, namespace: Option<&str>, name: &str) -> ObjectKey {
        (
            kind.kind.clone(),
            namespace.map(str::to_string),
            name.to_string(),
        )
    }
}

/// Match a `k1=v1,k2=v2` selector against an object's labels
fn selector_matches(selector: &str, obj: &DynamicObject) -> bool {
    let labels = obj.metadata.labels.clone().unwrap_or_default();
    selector.split(',').all(|requirement| {
        match requirement.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => false,
        }
    })
}

#[async_trait]
impl super::ClusterApi for FakeCluster {
    async fn get(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects.get(&Self::key(kind, namespace, name)).cloned())
    }

    async fn list(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(Error::sync("simulated list failure"));
        }
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind.kind && ns.as_deref() == namespace)
            .filter(|(_, obj)| label_selector.map_or(true, |s| selector_matches(s, obj)))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::sync("cannot create an object without a name"))?;
        let key = Self::key(kind, namespace, &name);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(Error::sync(format!("{} '{}' already exists", kind.kind, name)));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = obj.clone();
        if stored.metadata.uid.is_none() {
            stored.metadata.uid = Some(format!("fake-uid-{}", id));
        }
        stored.metadata.resource_version = Some("1".to_string());
        objects.insert(key, stored.clone());
        Ok(stored)
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
        let key = Self::key(kind, namespace, &name);
        let mut objects = self.objects.lock().unwrap();
        let current = objects
            .get(&key)
            .ok_or_else(|| Error::sync(format!("{} '{}' not found", kind.kind, name)))?;
        let version: u64 = current
            .metadata
            .resource_version
            .as_deref()
            .unwrap_or("0")
            .parse()
            .unwrap_or(0);
        let mut stored = obj.clone();
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.resource_version = Some((version + 1).to_string());
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, kind: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        objects.remove(&Self::key(kind, namespace, name));
        Ok(())
    }

    async fn patch_status(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<()> {
        let key = Self::key(kind, namespace, name);
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&key)
            .ok_or_else(|| Error::sync(format!("{} '{}' not found", kind.kind, name)))?;
        if let Some(status) = patch.get("status").and_then(|s| s.as_object()) {
            if !obj.data.is_object() {
                obj.data = serde_json::json!({});
            }
            let target = obj.data["status"]
                .as_object()
                .cloned()
                .unwrap_or_default();
            let mut merged = target;
            for (k, v) in status {
                merged.insert(k.clone(), v.clone());
            }
            obj.data["status"] = serde_json::Value::Object(merged);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matching() {
        let mut obj = DynamicObject::new("x", &crate::cluster::kinds::namespace());
        obj.metadata.labels = Some(
            [("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(selector_matches("a=1", &obj));
        assert!(selector_matches("a=1,b=2", &obj));
        assert!(!selector_matches("a=2", &obj));
        assert!(!selector_matches("a=1,c=3", &obj));
    }
}
