//! Error types for the reconciliation engine.

use thiserror::Error;

/// Errors that can occur while reconciling an object.
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found.
    #[error("resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
        /// Resource namespace.
        namespace: String,
    },

    /// Optimistic-concurrency conflict on write.
    #[error("write conflict on {name} in namespace {namespace}")]
    Conflict {
        /// Resource name.
        name: String,
        /// Resource namespace.
        namespace: String,
    },

    /// Diff or patch calculation failed.
    #[error("diff calculation failed: {0}")]
    Diff(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote system error reported by a handler.
    #[error("remote handler error: {0}")]
    Handler(String),

    /// A required action method was not implemented by the caller.
    #[error("action method not implemented: {0}")]
    NotImplemented(&'static str),

    /// Backing store error.
    #[error("store error: {0}")]
    Store(String),

    /// An error wrapped with the lifecycle stage in which it occurred.
    #[error("stage {stage} failed: {source}")]
    Stage {
        /// Lifecycle stage name (configure, read, diff, create, ...).
        stage: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap this error with the lifecycle stage it occurred in.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        Error::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error is a benign not-found (already converged to deleted).
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            Error::Stage { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether this error is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409,
            Error::Stage { source, .. } => source.is_conflict(),
            _ => false,
        }
    }
}
