//! Reconciliation phases for the Bundle resource.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, GroupVersionKind, TypeMeta};

use verge_core::error::Result;
use verge_core::read::{to_dynamic, PhaseRead};
use verge_core::reconciler::multiphase::Step;
use verge_core::reconciler::EngineContext;

use crate::crd::Bundle;

/// Labels stamped on every child so phases can find their own objects.
pub fn bundle_labels(bundle: &Bundle) -> BTreeMap<String, String> {
    [
        (
            "app.kubernetes.io/managed-by".to_string(),
            "verge-operator".to_string(),
        ),
        (
            "verge.dev/bundle".to_string(),
            bundle.metadata.name.clone().unwrap_or_default(),
        ),
    ]
    .into()
}

fn child_meta(bundle: &Bundle, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: bundle.metadata.namespace.clone(),
        labels: Some(bundle_labels(bundle)),
        ..Default::default()
    }
}

fn configmap_types() -> TypeMeta {
    TypeMeta {
        api_version: "v1".into(),
        kind: "ConfigMap".into(),
    }
}

fn service_types() -> TypeMeta {
    TypeMeta {
        api_version: "v1".into(),
        kind: "Service".into(),
    }
}

fn api_resource(types: &TypeMeta) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("", &types.api_version, &types.kind))
}

/// Phase converging the bundle's ConfigMap.
pub struct ConfigStep;

#[async_trait]
impl Step<Bundle> for ConfigStep {
    fn name(&self) -> &str {
        "Config"
    }

    async fn read(&self, ctx: &EngineContext, obj: &Bundle) -> Result<PhaseRead> {
        let namespace = obj.metadata.namespace.as_deref().unwrap_or_default();
        let mut read = PhaseRead::new();
        for current in ctx
            .children
            .list(namespace, &configmap_types(), &bundle_labels(obj))
            .await?
        {
            read.add_current(current);
        }

        let name = obj.metadata.name.as_deref().unwrap_or_default();
        let configmap = ConfigMap {
            metadata: child_meta(obj, format!("{}-config", name)),
            data: Some(obj.spec.configs.clone()),
            ..Default::default()
        };
        read.add_expected(to_dynamic(&configmap, &api_resource(&configmap_types()))?);
        Ok(read)
    }
}

/// Phase converging the bundle's Service.
///
/// A bundle without ports declares no Service; an existing one is deleted.
pub struct ServiceStep;

#[async_trait]
impl Step<Bundle> for ServiceStep {
    fn name(&self) -> &str {
        "Service"
    }

    async fn read(&self, ctx: &EngineContext, obj: &Bundle) -> Result<PhaseRead> {
        let namespace = obj.metadata.namespace.as_deref().unwrap_or_default();
        let mut read = PhaseRead::new();
        for current in ctx
            .children
            .list(namespace, &service_types(), &bundle_labels(obj))
            .await?
        {
            read.add_current(current);
        }

        if obj.spec.ports.is_empty() {
            return Ok(read);
        }

        let name = obj.metadata.name.as_deref().unwrap_or_default();
        let service = Service {
            metadata: child_meta(obj, format!("{}-svc", name)),
            spec: Some(ServiceSpec {
                selector: Some(bundle_labels(obj)),
                ports: Some(
                    obj.spec
                        .ports
                        .iter()
                        .map(|p| ServicePort {
                            name: Some(p.name.clone()),
                            port: p.port,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        };
        read.add_expected(to_dynamic(&service, &api_resource(&service_types()))?);
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use verge_core::memory::MemoryChildStore;
    use verge_core::object::ManagedObject;
    use verge_core::reconciler::multiphase::MultiPhaseReconciler;
    use verge_core::memory::MemoryStore;
    use verge_core::object::ObjectKey;
    use verge_core::store::{ChildStore, ObjectStore};

    use crate::crd::{BundleSpec, PortSpec};

    fn bundle(name: &str, ports: Vec<PortSpec>) -> Bundle {
        let mut bundle = Bundle::new(
            name,
            BundleSpec {
                configs: [("mode".to_string(), "active".to_string())].into(),
                ports,
            },
        );
        bundle.metadata.namespace = Some("default".to_string());
        bundle.metadata.generation = Some(1);
        bundle
    }

    fn reconciler(
        store: Arc<MemoryStore<Bundle>>,
        children: Arc<MemoryChildStore>,
    ) -> MultiPhaseReconciler<Bundle> {
        MultiPhaseReconciler::new(store, EngineContext::new(children), "verge.dev/finalizer")
            .with_step(Box::new(ConfigStep))
            .with_step(Box::new(ServiceStep))
            .with_wait(std::time::Duration::ZERO)
    }

    #[tokio::test]
    async fn bundle_converges_to_configmap_and_service() {
        let store = Arc::new(MemoryStore::new());
        let children = Arc::new(MemoryChildStore::new());
        let engine = reconciler(store.clone(), children.clone());

        store
            .insert(bundle(
                "web",
                vec![PortSpec {
                    name: "http".into(),
                    port: 8080,
                }],
            ))
            .await;
        let key = ObjectKey::new("default", "web");
        engine.reconcile(&key).await.unwrap();
        engine.reconcile(&key).await.unwrap();

        let config = children
            .get("default", &configmap_types(), "web-config")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.data["data"]["mode"], "active");

        let service = children
            .get("default", &service_types(), "web-svc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.data["spec"]["ports"][0]["port"], 8080);

        let status = store.get(&key).await.unwrap().unwrap().status().cloned().unwrap();
        assert!(!status.on_error);
        assert_eq!(status.observed_generation, Some(1));
    }

    #[tokio::test]
    async fn dropping_all_ports_removes_the_service() {
        let store = Arc::new(MemoryStore::new());
        let children = Arc::new(MemoryChildStore::new());
        let engine = reconciler(store.clone(), children.clone());

        store
            .insert(bundle(
                "web",
                vec![PortSpec {
                    name: "http".into(),
                    port: 8080,
                }],
            ))
            .await;
        let key = ObjectKey::new("default", "web");
        engine.reconcile(&key).await.unwrap();
        engine.reconcile(&key).await.unwrap();

        let mut stored = store.get(&key).await.unwrap().unwrap();
        stored.spec.ports.clear();
        store.update(&stored).await.unwrap();

        engine.reconcile(&key).await.unwrap();
        assert!(children
            .get("default", &service_types(), "web-svc")
            .await
            .unwrap()
            .is_none());
        assert!(children
            .get("default", &configmap_types(), "web-config")
            .await
            .unwrap()
            .is_some());
    }
}
