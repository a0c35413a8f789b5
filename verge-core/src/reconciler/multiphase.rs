//! Multi-phase reconciler.
//!
//! Drives one managed object through finalizer handling and an ordered list
//! of phase steps. Phases execute strictly sequentially; later phases may
//! assume earlier phases' children already exist, and the first phase to
//! fail aborts all subsequent phases.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::core::DynamicObject;

use crate::condition::{
    condition_is_true, find_condition, truncate_message, upsert_condition, ConditionStatus,
};
use crate::diff::{diff_children, DiffResult, IgnoreRule};
use crate::error::{Error, Result};
use crate::event::Severity;
use crate::object::{
    add_finalizer, has_finalizer, is_deleting, reconcile_ignored, remove_finalizer, ManagedObject,
    MultiPhaseStatus, ObjectKey, ObjectStatus,
};
use crate::read::PhaseRead;
use crate::store::StatusStore;

use super::{
    apply_creates, apply_deletes, apply_updates, engine_ignore_rules, write_back_status,
    EngineContext, ReconcileAction,
};

/// Condition type for whole-object readiness.
pub const READY_CONDITION: &str = "Ready";

/// One phase of multi-phase reconciliation, owning one family of child
/// resources.
///
/// Implementors supply `name` and `read`; every other method has a default
/// that covers the common case. `read` must be safe to call every pass (no
/// side effects besides read I/O) and must not omit objects that exist but
/// are not yet ready.
#[async_trait]
pub trait Step<K>: Send + Sync
where
    K: ManagedObject,
    K::Status: MultiPhaseStatus,
{
    /// Phase name, doubling as the phase's condition type.
    fn name(&self) -> &str;

    /// Idempotently ensure the phase condition exists and record the phase
    /// marker for observability.
    async fn configure(&self, _ctx: &EngineContext, obj: &mut K) -> Result<()> {
        let phase = self.name().to_string();
        let status = obj.status_mut();
        status.set_phase_name(&phase);
        if find_condition(status.conditions(), &phase).is_none() {
            upsert_condition(
                status.conditions_mut(),
                &phase,
                ConditionStatus::False,
                "Initialize",
                None,
            );
        }
        Ok(())
    }

    /// Populate current objects from the backing store and expected objects
    /// from the managed object's spec.
    async fn read(&self, _ctx: &EngineContext, _obj: &K) -> Result<PhaseRead> {
        Err(Error::NotImplemented("read"))
    }

    /// Extra ignore rules applied on top of the engine defaults.
    fn ignore_rules(&self) -> Vec<Box<dyn IgnoreRule>> {
        Vec::new()
    }

    /// Classify the read into create/update/delete actions.
    async fn diff(&self, ctx: &EngineContext, _obj: &K, read: PhaseRead) -> Result<DiffResult> {
        let rules = engine_ignore_rules(self.ignore_rules());
        let (current, expected) = read.into_parts();
        diff_children(current, expected, ctx.patch_maker.as_ref(), &rules)
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

    /// Record the failure on the phase condition and the sticky error state.
    /// The error itself is re-raised by the orchestrator; this never swallows.
    async fn on_error(&self, ctx: &EngineContext, obj: &mut K, error: &Error) {
        let phase = self.name().to_string();
        let message = truncate_message(&error.to_string());
        {
            let status = obj.status_mut();
            upsert_condition(
                status.conditions_mut(),
                &phase,
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

    /// Flip the phase condition to True once the phase converged.
    async fn on_success(&self, _ctx: &EngineContext, obj: &mut K) -> Result<()> {
        let phase = self.name().to_string();
        let status = obj.status_mut();
        if !condition_is_true(status.conditions(), &phase) {
            upsert_condition(
                status.conditions_mut(),
                &phase,
                ConditionStatus::True,
                "Success",
                None,
            );
        }
        Ok(())
    }
}

/// Whole-object-level hooks running around the phase list.
#[async_trait]
pub trait ReconcilerHooks<K>: Send + Sync
where
    K: ManagedObject,
    K::Status: MultiPhaseStatus,
{
    /// Whole-object condition bookkeeping before any phase runs.
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

    /// Whole-object-level read; no-op by default.
    async fn read(&self, _ctx: &EngineContext, _obj: &K) -> Result<()> {
        Ok(())
    }

    /// Cleanup before finalizer removal. The default does nothing: owned
    /// children are reclaimed through their owner references.
    async fn delete(&self, _ctx: &EngineContext, _obj: &K) -> Result<()> {
        Ok(())
    }

    /// Record the failure on the Ready condition and the sticky error state.
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

    /// Finalize condition state after all phases converged. Advances the
    /// observed generation, so failed passes stay distinguishable from
    /// never-attempted ones.
    async fn on_success(&self, ctx: &EngineContext, obj: &mut K) -> Result<()> {
        let generation = obj.metadata().generation.unwrap_or(0);
        {
            let status = obj.status_mut();
            status.set_observed_generation(generation);
            status.set_on_error(false);
            status.set_last_error_message(None);
            status.set_phase_name("Running");
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
            "all phases converged",
        );
        Ok(())
    }
}

/// Hooks with all defaults.
pub struct DefaultHooks;

impl<K> ReconcilerHooks<K> for DefaultHooks
where
    K: ManagedObject,
    K::Status: MultiPhaseStatus,
{
}

/// Orchestrator for multi-phase reconciliation.
pub struct MultiPhaseReconciler<K>
where
    K: ManagedObject,
    K::Status: MultiPhaseStatus,
{
    store: Arc<dyn StatusStore<K>>,
    ctx: EngineContext,
    finalizer: String,
    wait: Duration,
    hooks: Box<dyn ReconcilerHooks<K>>,
    steps: Vec<Box<dyn Step<K>>>,
}

impl<K> MultiPhaseReconciler<K>
where
    K: ManagedObject,
    K::Status: MultiPhaseStatus,
{
    /// Create a reconciler with default hooks, no steps and a 500ms
    /// propagation wait.
    pub fn new(
        store: Arc<dyn StatusStore<K>>,
        ctx: EngineContext,
        finalizer: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ctx,
            finalizer: finalizer.into(),
            wait: Duration::from_millis(500),
            hooks: Box::new(DefaultHooks),
            steps: Vec::new(),
        }
    }

    /// Append a phase step; steps run in insertion order.
    pub fn with_step(mut self, step: Box<dyn Step<K>>) -> Self {
        self.steps.push(step);
        self
    }

    /// Replace the whole-object hooks.
    pub fn with_hooks(mut self, hooks: Box<dyn ReconcilerHooks<K>>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set the fixed wait before each pass (read-after-write tolerance for
    /// eventually consistent stores). Zero disables it.
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

        // The finalizer write gets its own pass so it never shares an
        // optimistic-concurrency token with business logic.
        if !has_finalizer(obj.metadata(), &self.finalizer) && !is_deleting(obj.metadata()) {
            add_finalizer(obj.metadata_mut(), &self.finalizer);
            self.store.update(&obj).await?;
            tracing::debug!(object = %key, "finalizer added, requeueing");
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
        // object must never gain new children.
        if is_deleting(obj.metadata()) && !has_finalizer(obj.metadata(), &self.finalizer) {
            tracing::debug!(object = %key, "deleting object carries no finalizer of ours, nothing to do");
            return Ok(ReconcileAction::Done);
        }

        if let Err(e) = self.hooks.configure(&self.ctx, obj).await {
            self.hooks.on_error(&self.ctx, obj, &e).await;
            return Err(e.in_stage("configure"));
        }
        if let Err(e) = self.hooks.read(&self.ctx, obj).await {
            self.hooks.on_error(&self.ctx, obj, &e).await;
            return Err(e.in_stage("read"));
        }

        if is_deleting(obj.metadata()) && has_finalizer(obj.metadata(), &self.finalizer) {
            if let Err(e) = self.hooks.delete(&self.ctx, obj).await {
                self.hooks.on_error(&self.ctx, obj, &e).await;
                return Err(e.in_stage("delete"));
            }
            remove_finalizer(obj.metadata_mut(), &self.finalizer);
            match self.store.update(obj).await {
                Ok(updated) => *obj = updated,
                Err(e) => {
                    self.hooks.on_error(&self.ctx, obj, &e).await;
                    return Err(e.in_stage("finalize"));
                }
            }
            tracing::info!(object = %key, "cleanup complete, finalizer removed");
            return Ok(ReconcileAction::Done);
        }

        for step in &self.steps {
            self.run_step(step.as_ref(), obj).await?;
        }

        if let Err(e) = self.hooks.on_success(&self.ctx, obj).await {
            self.hooks.on_error(&self.ctx, obj, &e).await;
            return Err(e.in_stage("on_success"));
        }
        Ok(ReconcileAction::Done)
    }

    async fn run_step(&self, step: &dyn Step<K>, obj: &mut K) -> Result<()> {
        let phase = step.name().to_string();
        tracing::debug!(object = %obj.key(), phase = %phase, "running phase");

        match self.apply_step(step, obj).await {
            Ok(()) => Ok(()),
            Err(e) => {
                step.on_error(&self.ctx, obj, &e).await;
                Err(e.in_stage(format!("phase {}", phase)))
            }
        }
    }

    async fn apply_step(&self, step: &dyn Step<K>, obj: &mut K) -> Result<()> {
        step.configure(&self.ctx, obj)
            .await
            .map_err(|e| e.in_stage("configure"))?;
        let read = step
            .read(&self.ctx, obj)
            .await
            .map_err(|e| e.in_stage("read"))?;
        let diff = step
            .diff(&self.ctx, obj, read)
            .await
            .map_err(|e| e.in_stage("diff"))?;

        if diff.is_diff() {
            tracing::info!(
                object = %obj.key(),
                phase = step.name(),
                diff = %diff.diff,
                "drift detected"
            );
        }

        step.create(&self.ctx, obj, &diff.to_create)
            .await
            .map_err(|e| e.in_stage("create"))?;
        step.update(&self.ctx, obj, &diff.to_update)
            .await
            .map_err(|e| e.in_stage("update"))?;
        step.delete(&self.ctx, obj, &diff.to_delete)
            .await
            .map_err(|e| e.in_stage("delete"))?;
        step.on_success(&self.ctx, obj)
            .await
            .map_err(|e| e.in_stage("on_success"))
    }
}
