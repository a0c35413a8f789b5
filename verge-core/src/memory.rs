//! In-memory store backends.
//!
//! Behaviorally faithful stand-ins for the Kubernetes-backed stores:
//! resourceVersion bumping with conflict detection on stale writes, and
//! finalizer-aware deletion (a delete while finalizers remain only sets the
//! deletion timestamp, mirroring the API server). Used by the engine's test
//! suites and usable as a lightweight backend in their own right.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::{DynamicObject, TypeMeta};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::object::{ManagedObject, ObjectKey, WatchedObject};
use crate::store::{types_of, ChildStore, ObjectStore, StatusStore};

fn next_version(current: Option<&String>) -> String {
    let version: u64 = current.and_then(|v| v.parse().ok()).unwrap_or(0);
    (version + 1).to_string()
}

fn version_conflict(stored: Option<&String>, incoming: Option<&String>) -> bool {
    stored != incoming
}

/// In-memory store for watched/managed objects of one type.
pub struct MemoryStore<K> {
    objects: Mutex<HashMap<ObjectKey, K>>,
    uid_counter: AtomicU64,
}

impl<K: WatchedObject> MemoryStore<K> {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            uid_counter: AtomicU64::new(0),
        }
    }

    /// Seed an object, assigning a uid and initial resourceVersion.
    pub async fn insert(&self, mut obj: K) {
        let meta = obj.metadata_mut();
        if meta.uid.is_none() {
            let n = self.uid_counter.fetch_add(1, Ordering::Relaxed);
            meta.uid = Some(format!("uid-{}", n));
        }
        meta.resource_version = Some("1".to_string());
        let key = obj.key();
        self.objects.lock().await.insert(key, obj);
    }

    /// Whether an object with this identity currently exists.
    pub async fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.lock().await.contains_key(key)
    }
}

#[async_trait]
impl<K: WatchedObject> ObjectStore<K> for MemoryStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        Ok(self.objects.lock().await.get(key).cloned())
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        let mut objects = self.objects.lock().await;
        let stored = objects.get(&key).ok_or_else(|| Error::NotFound {
            kind: K::KIND.to_string(),
            name: key.name.clone(),
            namespace: key.namespace.clone(),
        })?;
        if version_conflict(
            stored.metadata().resource_version.as_ref(),
            obj.metadata().resource_version.as_ref(),
        ) {
            return Err(Error::Conflict {
                name: key.name.clone(),
                namespace: key.namespace.clone(),
            });
        }

        let mut updated = obj.clone();
        let version = next_version(stored.metadata().resource_version.as_ref());
        updated.metadata_mut().resource_version = Some(version);

        // Finalizer-aware deletion: once the deletion timestamp is set and
        // the last finalizer is gone, the object disappears for real.
        let deleting = updated.metadata().deletion_timestamp.is_some();
        let finalized = updated
            .metadata()
            .finalizers
            .as_ref()
            .map(|f| f.is_empty())
            .unwrap_or(true);
        if deleting && finalized {
            objects.remove(&key);
        } else {
            objects.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.lock().await;
        let Some(stored) = objects.get_mut(key) else {
            return Ok(());
        };
        let has_finalizers = stored
            .metadata()
            .finalizers
            .as_ref()
            .map(|f| !f.is_empty())
            .unwrap_or(false);
        if has_finalizers {
            if stored.metadata().deletion_timestamp.is_none() {
                stored.metadata_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
                let version = next_version(stored.metadata().resource_version.as_ref());
                stored.metadata_mut().resource_version = Some(version);
            }
        } else {
            objects.remove(key);
        }
        Ok(())
    }
}

#[async_trait]
impl<K: ManagedObject> StatusStore<K> for MemoryStore<K> {
    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        let mut objects = self.objects.lock().await;
        let stored = objects.get(&key).ok_or_else(|| Error::NotFound {
            kind: K::KIND.to_string(),
            name: key.name.clone(),
            namespace: key.namespace.clone(),
        })?;

        // Status-only write: spec and metadata of the stored object win.
        let mut updated = stored.clone();
        *updated.status_mut() = obj.status().cloned().unwrap_or_default();
        let version = next_version(stored.metadata().resource_version.as_ref());
        updated.metadata_mut().resource_version = Some(version);
        objects.insert(key, updated.clone());
        Ok(updated)
    }
}

type ChildKey = (String, String, String);

fn child_key(types: &TypeMeta, namespace: &str, name: &str) -> ChildKey {
    (
        format!("{}/{}", types.api_version, types.kind),
        namespace.to_string(),
        name.to_string(),
    )
}

/// In-memory dynamic store for child resources.
#[derive(Default)]
pub struct MemoryChildStore {
    objects: Mutex<HashMap<ChildKey, DynamicObject>>,
    uid_counter: AtomicU64,
}

impl MemoryChildStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored children, across all types.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Whether the store holds no children.
    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }

    /// Seed a child object directly, assigning uid and resourceVersion.
    pub async fn insert(&self, mut obj: DynamicObject) -> Result<()> {
        let key = self.key_of(&obj)?;
        if obj.metadata.uid.is_none() {
            let n = self.uid_counter.fetch_add(1, Ordering::Relaxed);
            obj.metadata.uid = Some(format!("child-uid-{}", n));
        }
        obj.metadata.resource_version = Some("1".to_string());
        self.objects.lock().await.insert(key, obj);
        Ok(())
    }

    fn key_of(&self, obj: &DynamicObject) -> Result<ChildKey> {
        let types = types_of(obj)?;
        Ok(child_key(
            types,
            obj.metadata.namespace.as_deref().unwrap_or_default(),
            obj.metadata.name.as_deref().unwrap_or_default(),
        ))
    }
}

#[async_trait]
impl ChildStore for MemoryChildStore {
    async fn get(
        &self,
        namespace: &str,
        types: &TypeMeta,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let key = child_key(types, namespace, name);
        Ok(self.objects.lock().await.get(&key).cloned())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = self.key_of(obj)?;
        let mut objects = self.objects.lock().await;
        if objects.contains_key(&key) {
            return Err(Error::Conflict {
                name: key.2.clone(),
                namespace: key.1.clone(),
            });
        }
        let mut created = obj.clone();
        let n = self.uid_counter.fetch_add(1, Ordering::Relaxed);
        created.metadata.uid = Some(format!("child-uid-{}", n));
        created.metadata.resource_version = Some("1".to_string());
        objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = self.key_of(obj)?;
        let mut objects = self.objects.lock().await;
        let stored = objects.get(&key).ok_or_else(|| Error::NotFound {
            kind: key.0.clone(),
            name: key.2.clone(),
            namespace: key.1.clone(),
        })?;
        if version_conflict(
            stored.metadata.resource_version.as_ref(),
            obj.metadata.resource_version.as_ref(),
        ) {
            return Err(Error::Conflict {
                name: key.2.clone(),
                namespace: key.1.clone(),
            });
        }
        let mut updated = obj.clone();
        updated.metadata.resource_version =
            Some(next_version(stored.metadata.resource_version.as_ref()));
        objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, obj: &DynamicObject) -> Result<()> {
        let key = self.key_of(obj)?;
        self.objects.lock().await.remove(&key);
        Ok(())
    }

    async fn list(
        &self,
        namespace: &str,
        types: &TypeMeta,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        let type_key = format!("{}/{}", types.api_version, types.kind);
        let objects = self.objects.lock().await;
        let mut matches = Vec::new();
        for ((t, ns, _), obj) in objects.iter() {
            if t != &type_key || ns != namespace {
                continue;
            }
            let object_labels = obj.metadata.labels.clone().unwrap_or_default();
            if labels
                .iter()
                .all(|(k, v)| object_labels.get(k) == Some(v))
            {
                matches.push(obj.clone());
            }
        }
        matches.sort_by_key(|o| o.metadata.name.clone());
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn configmap(namespace: &str, name: &str, labels: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": namespace, "labels": labels },
            "data": {},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let store = MemoryChildStore::new();
        let cm = configmap("default", "cm1", json!({}));
        store.create(&cm).await.unwrap();
        assert!(store.create(&cm).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemoryChildStore::new();
        let created = store
            .create(&configmap("default", "cm1", json!({})))
            .await
            .unwrap();

        let fresh = store.update(&created).await.unwrap();
        assert_eq!(fresh.metadata.resource_version.as_deref(), Some("2"));

        // Writing with the old resourceVersion again must conflict.
        assert!(store.update(&created).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn list_filters_by_type_namespace_and_labels() {
        let store = MemoryChildStore::new();
        store
            .create(&configmap("default", "a", json!({"app": "demo"})))
            .await
            .unwrap();
        store
            .create(&configmap("default", "b", json!({"app": "other"})))
            .await
            .unwrap();
        store
            .create(&configmap("prod", "c", json!({"app": "demo"})))
            .await
            .unwrap();

        let types = TypeMeta {
            api_version: "v1".into(),
            kind: "ConfigMap".into(),
        };
        let labels: BTreeMap<String, String> = [("app".to_string(), "demo".to_string())].into();
        let found = store.list("default", &types, &labels).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name.as_deref(), Some("a"));
    }
}
