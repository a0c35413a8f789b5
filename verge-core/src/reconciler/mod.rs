//! Reconciliation orchestrators.
//!
//! Three cooperating variants of the same control loop:
//!
//! - [`multiphase::MultiPhaseReconciler`]: converges a tree of owned child
//!   resources through an ordered list of phase steps.
//! - [`remote::RemoteReconciler`]: converges a single external resource
//!   through a caller-supplied handler, with a locally persisted
//!   last-applied snapshot standing in for server-side 3-way diffs.
//! - [`sentinel::SentinelReconciler`]: converges children derived from a
//!   foreign object the engine does not own or finalize.
//!
//! One reconcile invocation is one sequential, synchronous call chain. The
//! engine never retries; every error return is a signal to the surrounding
//! scheduler to re-enqueue with backoff.

pub mod multiphase;
pub mod remote;
pub mod sentinel;

use std::sync::Arc;
use std::time::Duration;

use kube::core::DynamicObject;

use crate::diff::{CleanMetadata, IgnoreStatusFields, IgnoreRule, PatchMaker, ThreeWayMergePatch};
use crate::error::Result;
use crate::event::{EventSink, LogSink};
use crate::object::{
    owner_reference, set_owner, ManagedObject, WatchedObject, LAST_APPLIED_ANNOTATION,
};
use crate::store::{ChildStore, StatusStore};

/// Outcome of one reconcile pass, translated by the caller into its
/// scheduler's requeue decision.
#[derive(Debug)]
pub enum ReconcileAction {
    /// Requeue after the specified duration.
    Requeue(Duration),
    /// Don't requeue (reconciliation complete).
    Done,
}

impl ReconcileAction {
    /// Requeue after 5 seconds (forced requeues, transient waits).
    pub fn requeue_short() -> Self {
        Self::Requeue(Duration::from_secs(5))
    }

    /// Requeue after 30 seconds (waiting on external systems).
    pub fn requeue_medium() -> Self {
        Self::Requeue(Duration::from_secs(30))
    }

    /// Requeue after 5 minutes (periodic re-reconciliation).
    pub fn requeue_long() -> Self {
        Self::Requeue(Duration::from_secs(300))
    }
}

/// Shared collaborators threaded through every orchestrator and action.
#[derive(Clone)]
pub struct EngineContext {
    /// Dynamic-typed store for child resources.
    pub children: Arc<dyn ChildStore>,
    /// The injected diff/merge primitive.
    pub patch_maker: Arc<dyn PatchMaker>,
    /// Fire-and-forget observability sink.
    pub events: Arc<dyn EventSink>,
}

impl EngineContext {
    /// Context over a child store, with the default patch maker and log sink.
    pub fn new(children: Arc<dyn ChildStore>) -> Self {
        Self {
            children,
            patch_maker: Arc::new(ThreeWayMergePatch),
            events: Arc::new(LogSink),
        }
    }

    /// Replace the diff/merge primitive.
    pub fn with_patch_maker(mut self, patch_maker: Arc<dyn PatchMaker>) -> Self {
        self.patch_maker = patch_maker;
        self
    }

    /// Replace the event sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }
}

/// The ignore rules applied to every engine diff, ahead of caller extras.
pub(crate) fn engine_ignore_rules(extra: Vec<Box<dyn IgnoreRule>>) -> Vec<Box<dyn IgnoreRule>> {
    let mut rules: Vec<Box<dyn IgnoreRule>> = vec![Box::new(CleanMetadata), Box::new(IgnoreStatusFields)];
    rules.extend(extra);
    rules
}

/// Compact JSON snapshot of a child, minus volatile fields, for the
/// last-applied annotation attached at creation time.
pub(crate) fn last_applied_json(child: &DynamicObject) -> Result<String> {
    let mut value = serde_json::to_value(child)?;
    CleanMetadata.apply(&mut value);
    IgnoreStatusFields.apply(&mut value);
    Ok(serde_json::to_string(&value)?)
}

/// Persist each `to_create` entry, attaching the owner back-reference and
/// the last-applied annotation, and defaulting the namespace to the owner's.
pub(crate) async fn apply_creates<K: WatchedObject>(
    ctx: &EngineContext,
    owner: &K,
    children: &[DynamicObject],
) -> Result<()> {
    for child in children {
        let mut child = child.clone();
        if child.metadata.namespace.is_none() {
            child.metadata.namespace = owner.metadata().namespace.clone();
        }
        set_owner(&mut child.metadata, owner_reference(owner));
        let snapshot = last_applied_json(&child)?;
        child
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(LAST_APPLIED_ANNOTATION.to_string(), snapshot);
        let created = ctx.children.create(&child).await?;
        tracing::info!(
            owner = %owner.key(),
            child = created.metadata.name.as_deref().unwrap_or_default(),
            "created child resource"
        );
    }
    Ok(())
}

/// Persist each `to_update` entry; values already carry the patched state.
pub(crate) async fn apply_updates<K: WatchedObject>(
    ctx: &EngineContext,
    owner: &K,
    children: &[DynamicObject],
) -> Result<()> {
    for child in children {
        let updated = ctx.children.update(child).await?;
        tracing::info!(
            owner = %owner.key(),
            child = updated.metadata.name.as_deref().unwrap_or_default(),
            "updated child resource"
        );
    }
    Ok(())
}

/// Delete each `to_delete` entry; already-gone children are benign.
pub(crate) async fn apply_deletes<K: WatchedObject>(
    ctx: &EngineContext,
    owner: &K,
    children: &[DynamicObject],
) -> Result<()> {
    for child in children {
        ctx.children.delete(child).await?;
        tracing::info!(
            owner = %owner.key(),
            child = child.metadata.name.as_deref().unwrap_or_default(),
            "deleted child resource"
        );
    }
    Ok(())
}

/// Status write-back, run on every exit path of a reconcile pass.
///
/// Writes only when the status actually changed against the snapshot taken
/// at entry. The object vanishing mid-pass (deletion completed) is benign.
pub(crate) async fn write_back_status<K: ManagedObject>(
    store: &dyn StatusStore<K>,
    obj: &K,
    snapshot: Option<&K::Status>,
) -> Result<()> {
    if obj.status() == snapshot {
        return Ok(());
    }
    match store.update_status(obj).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}
