//! Remote reconciler.
//!
//! Converges exactly one external resource reachable through a
//! caller-supplied handler. External systems rarely expose server-side
//! 3-way merge, so the "original" side of the diff comes from a locally
//! persisted last-applied snapshot on the managed object's status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::condition::{find_condition, truncate_message, upsert_condition, ConditionStatus};
use crate::error::{Error, Result};
use crate::event::Severity;
use crate::object::{
    add_finalizer, has_finalizer, is_deleting, reconcile_ignored, remove_finalizer, ManagedObject,
    ObjectKey, ObjectStatus, RemoteStatus,
};
use crate::store::StatusStore;

use super::{write_back_status, EngineContext, ReconcileAction};
use crate::reconciler::multiphase::READY_CONDITION;

/// Last-applied-configuration codec: compact JSON, gzip, base64.
pub mod last_applied {
    use std::io::{Read, Write};

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use flate2::read::GzDecoder;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::Value;

    use crate::error::{Error, Result};

    /// Encode a snapshot for storage on the status.
    pub fn encode(value: &Value) -> Result<String> {
        let json = serde_json::to_vec(value)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .and_then(|_| encoder.finish())
            .map(|compressed| STANDARD.encode(compressed))
            .map_err(|e| Error::Store(format!("last-applied encode: {}", e)))
    }

    /// Decode a snapshot previously produced by [`encode`].
    pub fn decode(encoded: &str) -> Result<Value> {
        let compressed = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Store(format!("last-applied decode: {}", e)))?;
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .map_err(|e| Error::Store(format!("last-applied decode: {}", e)))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// CRUD access to one external resource, bound to one managed object.
#[async_trait]
pub trait RemoteHandler<O>: Send + Sync
where
    O: Send + Sync,
{
    /// Fetch the current remote state; `None` when the resource is absent.
    async fn get(&self) -> Result<Option<O>>;
    /// Create the remote resource from the full expected payload.
    async fn create(&self, expected: &O) -> Result<()>;
    /// Update the remote resource with the merged payload.
    async fn update(&self, merged: &O) -> Result<()>;
    /// Delete the remote resource.
    async fn delete(&self) -> Result<()>;
}

/// Outcome of a remote diff.
#[derive(Debug)]
pub struct RemoteDiff<O> {
    /// Full payload to create when the remote resource is absent.
    pub create: Option<O>,
    /// Merged payload to apply when the remote resource drifted.
    pub update: Option<O>,
    /// Human-readable diff text.
    pub diff: String,
}

impl<O> RemoteDiff<O> {
    /// A diff with nothing to do.
    pub fn in_sync() -> Self {
        Self {
            create: None,
            update: None,
            diff: String::new(),
        }
    }

    /// Whether remote state already equals expected.
    pub fn is_sync(&self) -> bool {
        self.create.is_none() && self.update.is_none()
    }
}

/// Business logic for one remote resource family.
#[async_trait]
pub trait RemoteAction<K, O>: Send + Sync
where
    K: ManagedObject,
    K::Status: RemoteStatus,
    O: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Produce the handler for this object's remote resource.
    ///
    /// Returning `None` while the object is being deleted means "nothing to
    /// clean up remotely" and drops the finalizer without calling delete.
    async fn handler(&self, obj: &K) -> Result<Option<Box<dyn RemoteHandler<O>>>>;

    /// Synthesize the expected remote object. Pure function of the spec.
    fn build(&self, obj: &K) -> Result<O>;

    /// Compare current against expected.
    ///
    /// An absent current means the whole expected object is the create
    /// payload; otherwise the injected patch maker runs a true 3-way merge
    /// against the decoded last-applied snapshot.
    fn diff(
        &self,
        ctx: &EngineContext,
        current: Option<&O>,
        expected: &O,
        original: Option<&Value>,
    ) -> Result<RemoteDiff<O>> {
        let Some(current) = current else {
            return Ok(RemoteDiff {
                create: Some(expected.clone()),
                update: None,
                diff: "remote resource absent, creating from expected\n".to_string(),
            });
        };

        let current_value = serde_json::to_value(current)?;
        let expected_value = serde_json::to_value(expected)?;
        let patch = ctx
            .patch_maker
            .calculate(&current_value, &expected_value, original)?;
        if patch.is_empty() {
            return Ok(RemoteDiff::in_sync());
        }
        let merged: O = serde_json::from_value(patch.merged.clone())?;
        Ok(RemoteDiff {
            create: None,
            update: Some(merged),
            diff: format!("{}\n", serde_json::to_string_pretty(&patch.patch)?),
        })
    }

    /// Ensure the Ready condition exists.
    async fn configure(&self, _ctx: &EngineContext, obj: &mut K) -> Result<()> {
        let status = obj.status_mut();
        if find_condition(status.conditions(), READY_CONDITION).is_none() {
            upsert_condition(
                status.conditions_mut(),
                READY_CONDITION,
                ConditionStatus::False,
                "Initialize",
                None,
            );
        }
        Ok(())
    }

    /// Record the failure; the orchestrator re-raises the error.
    async fn on_error(&self, ctx: &EngineContext, obj: &mut K, error: &Error) {
        let message = truncate_message(&error.to_string());
        {
            let status = obj.status_mut();
            upsert_condition(
                status.conditions_mut(),
                READY_CONDITION,
                ConditionStatus::False,
                "Failed",
                Some(message.clone()),
            );
            status.set_on_error(true);
            status.set_last_error_message(Some(message.clone()));
        }
        ctx.events.emit(
            &obj.key(),
            K::KIND,
            Severity::Warning,
            "ReconcileFailed",
            &message,
        );
    }

    /// Finalize condition state once remote state equals expected.
    async fn on_success(&self, ctx: &EngineContext, obj: &mut K) -> Result<()> {
        let generation = obj.metadata().generation.unwrap_or(0);
        {
            let status = obj.status_mut();
            status.set_observed_generation(generation);
            status.set_on_error(false);
            status.set_last_error_message(None);
            upsert_condition(
                status.conditions_mut(),
                READY_CONDITION,
                ConditionStatus::True,
                "Success",
                None,
            );
        }
        ctx.events.emit(
            &obj.key(),
            K::KIND,
            Severity::Normal,
            "ReconcileCompleted",
            "remote resource in sync",
        );
        Ok(())
    }
}

/// Orchestrator for remote reconciliation.
pub struct RemoteReconciler<K, O>
where
    K: ManagedObject,
    K::Status: RemoteStatus,
    O: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    store: Arc<dyn StatusStore<K>>,
    ctx: EngineContext,
    action: Box<dyn RemoteAction<K, O>>,
    finalizer: String,
    wait: Duration,
}

impl<K, O> RemoteReconciler<K, O>
where
    K: ManagedObject,
    K::Status: RemoteStatus,
    O: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a remote reconciler.
    pub fn new(
        store: Arc<dyn StatusStore<K>>,
        ctx: EngineContext,
        action: Box<dyn RemoteAction<K, O>>,
        finalizer: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ctx,
            action,
            finalizer: finalizer.into(),
            wait: Duration::from_millis(500),
        }
    }

    /// Set the fixed wait before each pass. Zero disables it.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Run one reconcile pass for the object with the given identity.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileAction> {
        if !self.wait.is_zero() {
            tokio::time::sleep(self.wait).await;
        }

        let Some(mut obj) = self.store.get(key).await? else {
            tracing::debug!(object = %key, "object already gone, nothing to reconcile");
            return Ok(ReconcileAction::Done);
        };

        if !has_finalizer(obj.metadata(), &self.finalizer) && !is_deleting(obj.metadata()) {
            add_finalizer(obj.metadata_mut(), &self.finalizer);
            self.store.update(&obj).await?;
            return Ok(ReconcileAction::requeue_short());
        }

        let snapshot = obj.status().cloned();
        let result = self.run(&mut obj).await;

        let write = write_back_status(self.store.as_ref(), &obj, snapshot.as_ref()).await;
        match (result, write) {
            (Ok(action), Ok(())) => Ok(action),
            (Ok(_), Err(write_err)) => Err(write_err),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(write_err)) => {
                tracing::warn!(object = %key, error = %write_err, "status write-back failed");
                Err(e)
            }
        }
    }

    async fn run(&self, obj: &mut K) -> Result<ReconcileAction> {
        let key = obj.key();

        if reconcile_ignored(obj.metadata()) {
            tracing::debug!(object = %key, "reconciliation disabled by annotation");
            return Ok(ReconcileAction::Done);
        }

        // An object we never claimed is not ours to clean up, and a dying
        // object must never receive remote writes.
        if is_deleting(obj.metadata()) && !has_finalizer(obj.metadata(), &self.finalizer) {
            tracing::debug!(object = %key, "deleting object carries no finalizer of ours, nothing to do");
            return Ok(ReconcileAction::Done);
        }

        match self.run_inner(obj).await {
            Ok(action) => Ok(action),
            Err(e) => {
                self.action.on_error(&self.ctx, obj, &e).await;
                Err(e)
            }
        }
    }

    async fn run_inner(&self, obj: &mut K) -> Result<ReconcileAction> {
        let key = obj.key();

        self.action
            .configure(&self.ctx, obj)
            .await
            .map_err(|e| e.in_stage("configure"))?;

        let handler = self
            .action
            .handler(obj)
            .await
            .map_err(|e| e.in_stage("handler"))?;

        if is_deleting(obj.metadata()) && has_finalizer(obj.metadata(), &self.finalizer) {
            match handler {
                Some(handler) => {
                    handler.delete().await.map_err(|e| e.in_stage("delete"))?;
                    tracing::info!(object = %key, "remote resource deleted");
                }
                None => {
                    tracing::info!(object = %key, "no remote handler, nothing to clean up");
                }
            }
            remove_finalizer(obj.metadata_mut(), &self.finalizer);
            *obj = self
                .store
                .update(obj)
                .await
                .map_err(|e| e.in_stage("finalize"))?;
            return Ok(ReconcileAction::Done);
        }

        let handler = handler.ok_or(Error::Handler("no remote handler for object".into()))?;

        let expected = self.action.build(obj).map_err(|e| e.in_stage("build"))?;
        let current = handler.get().await.map_err(|e| e.in_stage("read"))?;
        let original = match obj.status().and_then(|s| s.last_applied_configuration()) {
            Some(encoded) => Some(last_applied::decode(encoded).map_err(|e| e.in_stage("diff"))?),
            None => None,
        };

        let diff = self
            .action
            .diff(&self.ctx, current.as_ref(), &expected, original.as_ref())
            .map_err(|e| e.in_stage("diff"))?;

        if let Some(payload) = &diff.create {
            obj.status_mut().set_is_sync(false);
            tracing::info!(object = %key, diff = %diff.diff, "creating remote resource");
            handler
                .create(payload)
                .await
                .map_err(|e| e.in_stage("create"))?;
        } else if let Some(merged) = &diff.update {
            obj.status_mut().set_is_sync(false);
            tracing::info!(object = %key, diff = %diff.diff, "updating remote resource");
            handler
                .update(merged)
                .await
                .map_err(|e| e.in_stage("update"))?;
        }

        let snapshot = last_applied::encode(&serde_json::to_value(&expected)?)?;
        {
            let status = obj.status_mut();
            status.set_last_applied_configuration(Some(snapshot));
            status.set_is_sync(true);
        }

        self.action
            .on_success(&self.ctx, obj)
            .await
            .map_err(|e| e.in_stage("on_success"))?;
        Ok(ReconcileAction::Done)
    }
}
