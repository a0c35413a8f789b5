//! Backing-store contracts and Kubernetes-backed implementations.
//!
//! The engine only ever talks to these traits. Optimistic concurrency rides
//! on the resourceVersion embedded in each object; a stale write surfaces as
//! a conflict error and is retried by the caller's scheduler on the next
//! pass against a freshly fetched object.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::object::{ManagedObject, ObjectKey, WatchedObject};

/// Read/write access to watched objects of one type.
#[async_trait]
pub trait ObjectStore<K: WatchedObject>: Send + Sync {
    /// Fetch by identity. Not-found is `None`, never an error.
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>>;
    /// Persist the object (metadata and spec). Conflicts surface as errors.
    async fn update(&self, obj: &K) -> Result<K>;
    /// Request deletion of the object.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

/// Store access for managed objects, adding status-only writes.
#[async_trait]
pub trait StatusStore<K: ManagedObject>: ObjectStore<K> {
    /// Persist only the status subresource; never mutates the spec.
    async fn update_status(&self, obj: &K) -> Result<K>;
}

/// Dynamic-typed CRUD over child resources.
///
/// The group/version/kind is taken from each object's embedded `TypeMeta`;
/// an object without type identity is rejected.
#[async_trait]
pub trait ChildStore: Send + Sync {
    /// Fetch one child by type, namespace and name.
    async fn get(
        &self,
        namespace: &str,
        types: &TypeMeta,
        name: &str,
    ) -> Result<Option<DynamicObject>>;
    /// Create a child resource.
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject>;
    /// Update a child resource in place.
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject>;
    /// Delete a child resource. Already-gone children are not an error.
    async fn delete(&self, obj: &DynamicObject) -> Result<()>;
    /// List children of one type in a namespace matching all given labels.
    async fn list(
        &self,
        namespace: &str,
        types: &TypeMeta,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>>;
}

/// Type identity of a child object, or a typed error when absent.
pub fn types_of(obj: &DynamicObject) -> Result<&TypeMeta> {
    obj.types
        .as_ref()
        .ok_or_else(|| Error::Store("child object has no type identity".into()))
}

fn api_resource(types: &TypeMeta) -> ApiResource {
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, &types.kind))
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Kubernetes-backed store for a typed custom resource.
pub struct KubeStore<K> {
    client: Client,
    _marker: PhantomData<K>,
}

impl<K> KubeStore<K> {
    /// Create a store over the given client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _marker: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: kube::Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: WatchedObject
        + kube::Resource<Scope = NamespaceResourceScope>
        + DeserializeOwned
        + Serialize
        + Debug,
    K::DynamicType: Default,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        Ok(self.api(&key.namespace).get_opt(&key.name).await?)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        Ok(self
            .api(&key.namespace)
            .replace(&key.name, &PostParams::default(), obj)
            .await?)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        match self
            .api(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<K> StatusStore<K> for KubeStore<K>
where
    K: ManagedObject
        + kube::Resource<Scope = NamespaceResourceScope>
        + DeserializeOwned
        + Serialize
        + Debug,
    K::DynamicType: Default,
    K::Status: Serialize,
{
    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        let patch = serde_json::json!({ "status": obj.status() });
        Ok(self
            .api(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }
}

/// Kubernetes-backed dynamic store for child resources.
pub struct KubeChildStore {
    client: Client,
}

impl KubeChildStore {
    /// Create a child store over the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str, types: &TypeMeta) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &api_resource(types))
    }
}

#[async_trait]
impl ChildStore for KubeChildStore {
    async fn get(
        &self,
        namespace: &str,
        types: &TypeMeta,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.api(namespace, types).get_opt(name).await?)
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let types = types_of(obj)?;
        let namespace = obj.metadata.namespace.clone().unwrap_or_default();
        Ok(self
            .api(&namespace, types)
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let types = types_of(obj)?;
        let namespace = obj.metadata.namespace.clone().unwrap_or_default();
        let name = obj.metadata.name.clone().unwrap_or_default();
        Ok(self
            .api(&namespace, types)
            .replace(&name, &PostParams::default(), obj)
            .await?)
    }

    async fn delete(&self, obj: &DynamicObject) -> Result<()> {
        let types = types_of(obj)?;
        let namespace = obj.metadata.namespace.clone().unwrap_or_default();
        let name = obj.metadata.name.clone().unwrap_or_default();
        match self
            .api(&namespace, types)
            .delete(&name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        namespace: &str,
        types: &TypeMeta,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        let params = ListParams::default().labels(&label_selector(labels));
        let list = self.api(namespace, types).list(&params).await?;
        Ok(list.items)
    }
}
