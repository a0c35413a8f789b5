//! Verge Core Library
//!
//! This crate provides the reconciliation engine behind Verge operators:
//! declarative convergence of managed objects toward the state their spec
//! describes, in the Kubernetes control-loop idiom.
//!
//! # Overview
//!
//! A reconcile pass is one sequential call chain: fetch the managed object,
//! synthesize its expected children, diff them against what exists, apply
//! creates/updates/deletes, record conditions, and write the status back
//! only when it changed. The engine never retries internally; an error
//! return is the signal for the surrounding scheduler to re-enqueue with
//! backoff.
//!
//! # Key Components
//!
//! - **Reconcilers**: three orchestrator variants for owned child trees
//!   ([`reconciler::multiphase`]), single external resources
//!   ([`reconciler::remote`]), and foreign watched objects
//!   ([`reconciler::sentinel`])
//! - **Diff**: injectable merge-patch calculation with ignore rules
//! - **Stores**: object/status/child persistence traits, with Kubernetes
//!   and in-memory implementations
//! - **Conditions**: typed status conditions with transition tracking
//!
//! # Example
//!
//! ```ignore
//! use verge_core::prelude::*;
//!
//! let ctx = EngineContext::new(children);
//! let reconciler = MultiPhaseReconciler::new(store, ctx, "verge.dev/finalizer")
//!     .with_step(Box::new(ConfigStep));
//! let action = reconciler.reconcile(&key).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod condition;
pub mod diff;
pub mod error;
pub mod event;
pub mod memory;
pub mod object;
pub mod prelude;
pub mod read;
pub mod reconciler;
pub mod store;

// Re-export key types at crate root for convenience
pub use condition::{Condition, ConditionStatus};
pub use diff::{DiffResult, PatchMaker, ThreeWayMergePatch};
pub use error::{Error, Result};
pub use object::{ManagedObject, ObjectKey, WatchedObject};
pub use reconciler::{EngineContext, ReconcileAction};
