//! End-to-end tests of the remote reconciler against a mock external system.

mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use verge_core::condition::condition_is_true;
use verge_core::error::{Error, Result};
use verge_core::memory::{MemoryChildStore, MemoryStore};
use verge_core::object::{has_finalizer, ObjectKey};
use verge_core::reconciler::multiphase::READY_CONDITION;
use verge_core::reconciler::remote::{RemoteAction, RemoteHandler, RemoteReconciler};
use verge_core::reconciler::{EngineContext, ReconcileAction};
use verge_core::store::ObjectStore;

use common::{App, FINALIZER};

/// The resource shape the mock external system stores.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct RemoteConfig {
    name: String,
    settings: BTreeMap<String, String>,
}

/// One-slot external system shared between handler instances.
#[derive(Default)]
struct RemoteState {
    value: Mutex<Option<RemoteConfig>>,
}

struct MockHandler {
    state: Arc<RemoteState>,
}

#[async_trait]
impl RemoteHandler<RemoteConfig> for MockHandler {
    async fn get(&self) -> Result<Option<RemoteConfig>> {
        Ok(self.state.value.lock().unwrap().clone())
    }

    async fn create(&self, expected: &RemoteConfig) -> Result<()> {
        *self.state.value.lock().unwrap() = Some(expected.clone());
        Ok(())
    }

    async fn update(&self, merged: &RemoteConfig) -> Result<()> {
        *self.state.value.lock().unwrap() = Some(merged.clone());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        *self.state.value.lock().unwrap() = None;
        Ok(())
    }
}

struct ConfigAction {
    state: Arc<RemoteState>,
    handler_available: bool,
}

#[async_trait]
impl RemoteAction<App, RemoteConfig> for ConfigAction {
    async fn handler(&self, _obj: &App) -> Result<Option<Box<dyn RemoteHandler<RemoteConfig>>>> {
        if !self.handler_available {
            return Ok(None);
        }
        Ok(Some(Box::new(MockHandler {
            state: self.state.clone(),
        })))
    }

    fn build(&self, obj: &App) -> Result<RemoteConfig> {
        Ok(RemoteConfig {
            name: obj.metadata.name.clone().unwrap_or_default(),
            settings: obj.configs.clone(),
        })
    }
}

fn engine(
    store: Arc<MemoryStore<App>>,
    state: Arc<RemoteState>,
    handler_available: bool,
) -> RemoteReconciler<App, RemoteConfig> {
    let ctx = EngineContext::new(Arc::new(MemoryChildStore::new()));
    RemoteReconciler::new(
        store,
        ctx,
        Box::new(ConfigAction {
            state,
            handler_available,
        }),
        FINALIZER,
    )
    .with_wait(Duration::ZERO)
}

#[tokio::test]
async fn absent_remote_resource_is_created() {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(RemoteState::default());
    let reconciler = engine(store.clone(), state.clone(), true);

    store.insert(App::new("default", "app1").with_config("region", "eu")).await;
    let key = ObjectKey::new("default", "app1");

    reconciler.reconcile(&key).await.unwrap();
    let action = reconciler.reconcile(&key).await.unwrap();
    assert!(matches!(action, ReconcileAction::Done));

    let remote = state.value.lock().unwrap().clone().unwrap();
    assert_eq!(remote.name, "app1");
    assert_eq!(remote.settings.get("region").map(String::as_str), Some("eu"));

    let status = store.get(&key).await.unwrap().unwrap().status.unwrap();
    assert!(status.is_sync);
    assert!(status.last_applied.is_some());
    assert!(condition_is_true(&status.conditions, READY_CONDITION));
    assert_eq!(status.observed_generation, Some(1));
}

#[tokio::test]
async fn drifted_remote_resource_is_patched() {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(RemoteState::default());
    let reconciler = engine(store.clone(), state.clone(), true);

    store.insert(App::new("default", "app1").with_config("region", "eu")).await;
    let key = ObjectKey::new("default", "app1");
    reconciler.reconcile(&key).await.unwrap();
    reconciler.reconcile(&key).await.unwrap();

    // Drift the remote side.
    {
        let mut value = state.value.lock().unwrap();
        let remote = value.as_mut().unwrap();
        remote.settings.insert("region".into(), "us".into());
    }

    reconciler.reconcile(&key).await.unwrap();
    let remote = state.value.lock().unwrap().clone().unwrap();
    assert_eq!(remote.settings.get("region").map(String::as_str), Some("eu"));
}

#[tokio::test]
async fn entries_dropped_from_the_declaration_are_removed_remotely() {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(RemoteState::default());
    let reconciler = engine(store.clone(), state.clone(), true);

    store.insert(
        App::new("default", "app1")
            .with_config("region", "eu")
            .with_config("tier", "gold"),
    )
    .await;
    let key = ObjectKey::new("default", "app1");
    reconciler.reconcile(&key).await.unwrap();
    reconciler.reconcile(&key).await.unwrap();

    // Shrink the declaration; the snapshot proves "tier" was ours to remove.
    let mut app = store.get(&key).await.unwrap().unwrap();
    app.configs.remove("tier");
    store.update(&app).await.unwrap();

    reconciler.reconcile(&key).await.unwrap();
    let remote = state.value.lock().unwrap().clone().unwrap();
    assert_eq!(remote.settings.get("region").map(String::as_str), Some("eu"));
    assert!(!remote.settings.contains_key("tier"));
}

#[tokio::test]
async fn in_sync_pass_leaves_the_remote_untouched() {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(RemoteState::default());
    let reconciler = engine(store.clone(), state.clone(), true);

    store.insert(App::new("default", "app1").with_config("region", "eu")).await;
    let key = ObjectKey::new("default", "app1");
    reconciler.reconcile(&key).await.unwrap();
    reconciler.reconcile(&key).await.unwrap();

    let settled = store.get(&key).await.unwrap().unwrap();
    reconciler.reconcile(&key).await.unwrap();
    let after = store.get(&key).await.unwrap().unwrap();
    // Nothing changed, so the status write was elided.
    assert_eq!(after.metadata.resource_version, settled.metadata.resource_version);
    assert!(after.status.unwrap().is_sync);
}

#[tokio::test]
async fn deletion_tears_down_the_remote_resource() {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(RemoteState::default());
    let reconciler = engine(store.clone(), state.clone(), true);

    store.insert(App::new("default", "app1").with_config("region", "eu")).await;
    let key = ObjectKey::new("default", "app1");
    reconciler.reconcile(&key).await.unwrap();
    reconciler.reconcile(&key).await.unwrap();
    assert!(state.value.lock().unwrap().is_some());

    store.delete(&key).await.unwrap();
    let action = reconciler.reconcile(&key).await.unwrap();
    assert!(matches!(action, ReconcileAction::Done));

    assert!(state.value.lock().unwrap().is_none());
    assert!(!store.contains(&key).await);
}

#[tokio::test]
async fn deletion_without_a_handler_just_releases_the_finalizer() {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(RemoteState::default());
    let reconciler = engine(store.clone(), state.clone(), false);

    let mut app = App::new("default", "app1");
    app.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    store.insert(app).await;
    let key = ObjectKey::new("default", "app1");
    store.delete(&key).await.unwrap();

    let action = reconciler.reconcile(&key).await.unwrap();
    assert!(matches!(action, ReconcileAction::Done));
    assert!(!store.contains(&key).await);
}

#[tokio::test]
async fn deleting_object_never_claimed_is_left_alone() {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(RemoteState::default());
    let reconciler = engine(store.clone(), state.clone(), true);

    // Held mid-delete by another controller's finalizer; ours never added.
    let mut app = App::new("default", "app1").with_config("region", "eu");
    app.metadata.finalizers = Some(vec!["other.io/finalizer".to_string()]);
    store.insert(app).await;
    let key = ObjectKey::new("default", "app1");
    store.delete(&key).await.unwrap();

    let action = reconciler.reconcile(&key).await.unwrap();
    assert!(matches!(action, ReconcileAction::Done));

    // Nothing pushed to the remote system, no claim taken, no status.
    assert!(state.value.lock().unwrap().is_none());
    let stored = store.get(&key).await.unwrap().unwrap();
    assert!(!has_finalizer(&stored.metadata, FINALIZER));
    assert!(stored.status.is_none());
}

#[tokio::test]
async fn missing_handler_outside_deletion_is_an_error() {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(RemoteState::default());
    let reconciler = engine(store.clone(), state.clone(), false);

    store.insert(App::new("default", "app1")).await;
    let key = ObjectKey::new("default", "app1");
    reconciler.reconcile(&key).await.unwrap();

    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, Error::Handler(_)));

    let stored = store.get(&key).await.unwrap().unwrap();
    assert!(has_finalizer(&stored.metadata, FINALIZER));
    assert!(stored.status.unwrap().on_error);
}
