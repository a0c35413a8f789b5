//! Managed-object contracts.
//!
//! The engine is written once against these traits; callers supply an impl
//! per custom-resource type. Field access is an explicit compile-time
//! contract rather than runtime lookup: every managed type hands out its
//! `ObjectMeta` and status through accessors.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::condition::Condition;

/// Annotation that disables reconciliation for an object when set to "true".
pub const IGNORE_RECONCILE_ANNOTATION: &str = "verge.dev/ignore-reconcile";

/// Annotation carrying the last applied configuration of a child resource.
pub const LAST_APPLIED_ANNOTATION: &str = "verge.dev/last-applied-configuration";

/// Identity of an object within the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Namespace the object lives in.
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// Create a key from namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Capability set required by the engine's status bookkeeping.
///
/// Modeled as an interface rather than a concrete struct so callers keep
/// ownership of their status layout.
pub trait ObjectStatus: Default + Clone + PartialEq + Send + Sync {
    /// Current conditions.
    fn conditions(&self) -> &[Condition];
    /// Mutable conditions, for upserts.
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
    /// Sticky error flag, cleared on the next successful configure.
    fn is_on_error(&self) -> bool;
    /// Set the sticky error flag.
    fn set_on_error(&mut self, on_error: bool);
    /// Last recorded error message.
    fn last_error_message(&self) -> Option<&str>;
    /// Set or clear the last error message.
    fn set_last_error_message(&mut self, message: Option<String>);
    /// Generation of the spec that was last fully reconciled.
    fn observed_generation(&self) -> Option<i64>;
    /// Record the observed generation; set only on full success.
    fn set_observed_generation(&mut self, generation: i64);
}

/// Status extension for multi-phase reconciliation.
pub trait MultiPhaseStatus: ObjectStatus {
    /// Name of the last phase executed (observability only, not a resume point).
    fn phase_name(&self) -> Option<&str>;
    /// Record the phase name.
    fn set_phase_name(&mut self, phase: &str);
}

/// Status extension for remote reconciliation.
pub trait RemoteStatus: ObjectStatus {
    /// Whether the last reconcile left the remote state equal to expected.
    fn is_sync(&self) -> bool;
    /// Set the sync flag.
    fn set_is_sync(&mut self, sync: bool);
    /// Serialized snapshot of the last successfully applied expected object.
    fn last_applied_configuration(&self) -> Option<&str>;
    /// Store the last applied configuration snapshot.
    fn set_last_applied_configuration(&mut self, encoded: Option<String>);
}

/// Any object the engine can observe: it exposes its Kubernetes metadata.
pub trait WatchedObject: Clone + Send + Sync + 'static {
    /// API group/version of the object.
    const API_VERSION: &'static str;
    /// Kind of the object.
    const KIND: &'static str;

    /// Object metadata.
    fn metadata(&self) -> &ObjectMeta;
    /// Mutable object metadata.
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Identity of this object.
    fn key(&self) -> ObjectKey {
        ObjectKey::new(
            self.metadata().namespace.clone().unwrap_or_default(),
            self.metadata().name.clone().unwrap_or_default(),
        )
    }
}

/// A declared resource the engine owns and converges toward its spec.
pub trait ManagedObject: WatchedObject {
    /// Typed status carried by the object.
    type Status: ObjectStatus;

    /// Current status, if any has been written yet.
    fn status(&self) -> Option<&Self::Status>;
    /// Mutable status, defaulting it on first access.
    fn status_mut(&mut self) -> &mut Self::Status;
}

/// Whether the finalizer token is present on the metadata.
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .map(|f| f.iter().any(|x| x == finalizer))
        .unwrap_or(false)
}

/// Add the finalizer token if absent.
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|x| x == finalizer) {
        finalizers.push(finalizer.to_string());
    }
}

/// Remove the finalizer token if present.
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) {
    if let Some(finalizers) = meta.finalizers.as_mut() {
        finalizers.retain(|x| x != finalizer);
    }
}

/// Whether the object carries a deletion timestamp.
pub fn is_deleting(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some()
}

/// Whether reconciliation is disabled via the ignore annotation.
pub fn reconcile_ignored(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(IGNORE_RECONCILE_ANNOTATION))
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Build an owner back-reference to a managed object.
///
/// The relation lets the backing store garbage-collect children once the
/// owner is deleted; the engine itself holds no ownership records.
pub fn owner_reference<K: WatchedObject>(owner: &K) -> OwnerReference {
    OwnerReference {
        api_version: K::API_VERSION.to_string(),
        kind: K::KIND.to_string(),
        name: owner.metadata().name.clone().unwrap_or_default(),
        uid: owner.metadata().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Attach an owner reference to a child's metadata, deduplicating by uid.
pub fn set_owner(meta: &mut ObjectMeta, owner: OwnerReference) {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    if !refs.iter().any(|r| r.uid == owner.uid) {
        refs.push(owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalizer_roundtrip() {
        let mut meta = ObjectMeta::default();
        assert!(!has_finalizer(&meta, "verge.dev/finalizer"));

        add_finalizer(&mut meta, "verge.dev/finalizer");
        add_finalizer(&mut meta, "verge.dev/finalizer");
        assert_eq!(meta.finalizers.as_ref().unwrap().len(), 1);
        assert!(has_finalizer(&meta, "verge.dev/finalizer"));

        remove_finalizer(&mut meta, "verge.dev/finalizer");
        assert!(!has_finalizer(&meta, "verge.dev/finalizer"));
    }

    #[test]
    fn ignore_annotation_must_be_exactly_true() {
        let mut meta = ObjectMeta::default();
        assert!(!reconcile_ignored(&meta));

        let annotations = meta.annotations.get_or_insert_with(Default::default);
        annotations.insert(IGNORE_RECONCILE_ANNOTATION.into(), "yes".into());
        assert!(!reconcile_ignored(&meta));

        meta.annotations
            .as_mut()
            .unwrap()
            .insert(IGNORE_RECONCILE_ANNOTATION.into(), "true".into());
        assert!(reconcile_ignored(&meta));
    }

    #[test]
    fn owner_references_deduplicate_by_uid() {
        let mut meta = ObjectMeta::default();
        let owner = OwnerReference {
            api_version: "verge.dev/v1".into(),
            kind: "Bundle".into(),
            name: "app".into(),
            uid: "uid-1".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        };
        set_owner(&mut meta, owner.clone());
        set_owner(&mut meta, owner);
        assert_eq!(meta.owner_references.as_ref().unwrap().len(), 1);
    }
}
