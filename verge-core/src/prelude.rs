//! Prelude for convenient imports.
//!
//! This module re-exports the most commonly used types and traits.
//!
//! # Example
//!
//! ```ignore
//! use verge_core::prelude::*;
//! ```

// Error handling
pub use crate::error::{Error, Result};

// Object model
pub use crate::object::{
    add_finalizer, has_finalizer, is_deleting, owner_reference, reconcile_ignored, ManagedObject,
    MultiPhaseStatus, ObjectKey, ObjectStatus, RemoteStatus, WatchedObject,
    IGNORE_RECONCILE_ANNOTATION, LAST_APPLIED_ANNOTATION,
};

// Conditions
pub use crate::condition::{
    condition_is_true, find_condition, upsert_condition, Condition, ConditionStatus,
};

// Diffing
pub use crate::diff::{
    default_ignore_rules, diff_children, CalculatedPatch, CleanMetadata, DiffResult,
    IgnorePaths, IgnoreRule, IgnoreStatusFields, PatchMaker, ThreeWayMergePatch,
};

// Reads
pub use crate::read::{to_dynamic, PhaseRead, SentinelRead};

// Stores
pub use crate::store::{ChildStore, KubeChildStore, KubeStore, ObjectStore, StatusStore};

// Events
pub use crate::event::{EventSink, LogSink, Severity};

// Reconcilers
pub use crate::reconciler::multiphase::{
    DefaultHooks, MultiPhaseReconciler, ReconcilerHooks, Step, READY_CONDITION,
};
pub use crate::reconciler::remote::{
    RemoteAction, RemoteDiff, RemoteHandler, RemoteReconciler,
};
pub use crate::reconciler::sentinel::{SentinelAction, SentinelReconciler};
pub use crate::reconciler::{EngineContext, ReconcileAction};
