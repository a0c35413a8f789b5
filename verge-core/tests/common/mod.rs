//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{DynamicObject, TypeMeta};
use serde_json::json;

use verge_core::condition::Condition;
use verge_core::error::Result;
use verge_core::object::{
    ManagedObject, MultiPhaseStatus, ObjectStatus, RemoteStatus, WatchedObject,
};
use verge_core::read::PhaseRead;
use verge_core::reconciler::multiphase::Step;
use verge_core::reconciler::EngineContext;

/// Status of the test resource, carrying every engine bookkeeping field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppStatus {
    pub conditions: Vec<Condition>,
    pub on_error: bool,
    pub last_error_message: Option<String>,
    pub observed_generation: Option<i64>,
    pub phase: Option<String>,
    pub is_sync: bool,
    pub last_applied: Option<String>,
}

impl ObjectStatus for AppStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }

    fn is_on_error(&self) -> bool {
        self.on_error
    }

    fn set_on_error(&mut self, on_error: bool) {
        self.on_error = on_error;
    }

    fn last_error_message(&self) -> Option<&str> {
        self.last_error_message.as_deref()
    }

    fn set_last_error_message(&mut self, message: Option<String>) {
        self.last_error_message = message;
    }

    fn observed_generation(&self) -> Option<i64> {
        self.observed_generation
    }

    fn set_observed_generation(&mut self, generation: i64) {
        self.observed_generation = Some(generation);
    }
}

impl MultiPhaseStatus for AppStatus {
    fn phase_name(&self) -> Option<&str> {
        self.phase.as_deref()
    }

    fn set_phase_name(&mut self, phase: &str) {
        self.phase = Some(phase.to_string());
    }
}

impl RemoteStatus for AppStatus {
    fn is_sync(&self) -> bool {
        self.is_sync
    }

    fn set_is_sync(&mut self, sync: bool) {
        self.is_sync = sync;
    }

    fn last_applied_configuration(&self) -> Option<&str> {
        self.last_applied.as_deref()
    }

    fn set_last_applied_configuration(&mut self, encoded: Option<String>) {
        self.last_applied = encoded;
    }
}

/// A small declarative resource: a named map of configuration entries.
#[derive(Clone, Debug, Default)]
pub struct App {
    pub metadata: ObjectMeta,
    pub configs: BTreeMap<String, String>,
    pub status: Option<AppStatus>,
}

impl App {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                generation: Some(1),
                ..Default::default()
            },
            configs: BTreeMap::new(),
            status: None,
        }
    }

    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.configs.insert(key.to_string(), value.to_string());
        self
    }
}

impl WatchedObject for App {
    const API_VERSION: &'static str = "verge.dev/v1";
    const KIND: &'static str = "App";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl ManagedObject for App {
    type Status = AppStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Self::Status {
        self.status.get_or_insert_with(Default::default)
    }
}

pub const FINALIZER: &str = "verge.dev/test-finalizer";

pub fn configmap_types() -> TypeMeta {
    TypeMeta {
        api_version: "v1".into(),
        kind: "ConfigMap".into(),
    }
}

pub fn app_labels(app: &App) -> BTreeMap<String, String> {
    [(
        "app".to_string(),
        app.metadata.name.clone().unwrap_or_default(),
    )]
    .into()
}

/// The expected ConfigMap derived from an [`App`]'s configuration entries.
pub fn expected_configmap(app: &App) -> DynamicObject {
    let name = app.metadata.name.as_deref().unwrap_or_default();
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": format!("{}-config", name),
            "namespace": app.metadata.namespace,
            "labels": { "app": name },
        },
        "data": app.configs,
    }))
    .unwrap()
}

/// Phase that converges one ConfigMap with the app's configuration entries.
pub struct ConfigPhase;

#[async_trait]
impl Step<App> for ConfigPhase {
    fn name(&self) -> &str {
        "ConfigPhase"
    }

    async fn read(&self, ctx: &EngineContext, obj: &App) -> Result<PhaseRead> {
        let namespace = obj.metadata.namespace.as_deref().unwrap_or_default();
        let mut read = PhaseRead::new();
        for current in ctx
            .children
            .list(namespace, &configmap_types(), &app_labels(obj))
            .await?
        {
            read.add_current(current);
        }
        read.add_expected(expected_configmap(obj));
        Ok(read)
    }
}
