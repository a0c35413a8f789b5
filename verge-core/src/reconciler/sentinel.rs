//! Sentinel reconciler.
//!
//! Watches an object the engine does not own and keeps a set of derived
//! child resources converged with it. The watched object is never mutated:
//! no finalizer, no status writes, no conditions. Cleanup of the children
//! relies entirely on the owner references stamped at creation time.

use std::sync::Arc;

use async_trait::async_trait;
use kube::core::DynamicObject;

use crate::diff::{diff_children, DiffResult, IgnoreRule};
use crate::error::{Error, Result};
use crate::event::Severity;
use crate::object::{is_deleting, reconcile_ignored, ObjectKey, WatchedObject};
use crate::read::SentinelRead;
use crate::store::ObjectStore;

use super::{
    apply_creates, apply_deletes, apply_updates, engine_ignore_rules, EngineContext,
    ReconcileAction,
};

/// Business logic for deriving children from a watched foreign object.
///
/// Implementors supply `read`; the remaining methods default to the shared
/// engine behavior. Because the watched object carries no engine-owned
/// status, failures surface only as events and the error return.
#[async_trait]
pub trait SentinelAction<K>: Send + Sync
where
    K: WatchedObject,
{
    /// Populate per-type read slots: current objects from the backing store
    /// and expected objects derived from the watched object.
    async fn read(&self, ctx: &EngineContext, obj: &K) -> Result<SentinelRead>;

    /// Extra ignore rules applied on top of the engine defaults.
    fn ignore_rules(&self) -> Vec<Box<dyn IgnoreRule>> {
        Vec::new()
    }

    /// Apply the create set.
    async fn create(&self, ctx: &EngineContext, obj: &K, to_create: &[DynamicObject]) -> Result<()> {
        apply_creates(ctx, obj, to_create).await
    }

    /// Apply the update set.
    async fn update(&self, ctx: &EngineContext, obj: &K, to_update: &[DynamicObject]) -> Result<()> {
        apply_updates(ctx, obj, to_update).await
    }

    /// Apply the delete set.
    async fn delete(&self, ctx: &EngineContext, obj: &K, to_delete: &[DynamicObject]) -> Result<()> {
        apply_deletes(ctx, obj, to_delete).await
    }

    /// Report the failure. The error itself is re-raised by the orchestrator.
    async fn on_error(&self, ctx: &EngineContext, obj: &K, error: &Error) {
        ctx.events.emit(
            &obj.key(),
            K::KIND,
            Severity::Warning,
            "ReconcileFailed",
            &error.to_string(),
        );
    }

    /// Report convergence.
    async fn on_success(&self, ctx: &EngineContext, obj: &K) -> Result<()> {
        ctx.events.emit(
            &obj.key(),
            K::KIND,
            Severity::Normal,
            "ReconcileCompleted",
            "derived resources in sync",
        );
        Ok(())
    }
}

/// Orchestrator for sentinel reconciliation.
pub struct SentinelReconciler<K>
where
    K: WatchedObject,
{
    store: Arc<dyn ObjectStore<K>>,
    ctx: EngineContext,
    action: Box<dyn SentinelAction<K>>,
}

impl<K> SentinelReconciler<K>
where
    K: WatchedObject,
{
    /// Create a sentinel reconciler.
    pub fn new(
        store: Arc<dyn ObjectStore<K>>,
        ctx: EngineContext,
        action: Box<dyn SentinelAction<K>>,
    ) -> Self {
        Self { store, ctx, action }
    }

    /// Run one reconcile pass for the watched object with the given identity.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileAction> {
        let Some(obj) = self.store.get(key).await? else {
            tracing::debug!(object = %key, "watched object gone, nothing to reconcile");
            return Ok(ReconcileAction::Done);
        };

        if is_deleting(obj.metadata()) {
            tracing::debug!(object = %key, "watched object deleting, children follow via ownership");
            return Ok(ReconcileAction::Done);
        }

        if reconcile_ignored(obj.metadata()) {
            tracing::debug!(object = %key, "reconciliation disabled by annotation");
            return Ok(ReconcileAction::Done);
        }

        match self.run(&obj).await {
            Ok(action) => Ok(action),
            Err(e) => {
                self.action.on_error(&self.ctx, &obj, &e).await;
                Err(e)
            }
        }
    }

    async fn run(&self, obj: &K) -> Result<ReconcileAction> {
        let key = obj.key();

        let read = self
            .action
            .read(&self.ctx, obj)
            .await
            .map_err(|e| e.in_stage("read"))?;

        let mut result = DiffResult::default();
        for (type_key, slot) in read.into_slots() {
            let rules = engine_ignore_rules(self.action.ignore_rules());
            let (current, expected) = slot.into_parts();
            let slot_result = diff_children(current, expected, self.ctx.patch_maker.as_ref(), &rules)
                .map_err(|e| e.in_stage(format!("diff {}", type_key)))?;
            result.merge(slot_result);
        }

        if result.is_diff() {
            tracing::info!(object = %key, diff = %result.diff, "derived resources drifted");
        }

        self.action
            .create(&self.ctx, obj, &result.to_create)
            .await
            .map_err(|e| e.in_stage("create"))?;
        self.action
            .update(&self.ctx, obj, &result.to_update)
            .await
            .map_err(|e| e.in_stage("update"))?;
        self.action
            .delete(&self.ctx, obj, &result.to_delete)
            .await
            .map_err(|e| e.in_stage("delete"))?;

        self.action
            .on_success(&self.ctx, obj)
            .await
            .map_err(|e| e.in_stage("on_success"))?;
        Ok(ReconcileAction::Done)
    }
}
