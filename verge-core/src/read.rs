//! Read containers.
//!
//! A phase/step's `read` populates these with the current objects fetched
//! from the backing store and the expected objects synthesized from the
//! managed object's spec. Expected synthesis must be a deterministic, pure
//! function of the spec; an absent expected object means "do not touch this
//! slot this pass", never "not ready yet".

use std::collections::BTreeMap;

use kube::core::{ApiResource, DynamicObject, TypeMeta};
use serde::Serialize;

use crate::error::Result;

/// Current and expected objects of one child-resource type.
#[derive(Default)]
pub struct PhaseRead {
    current: Vec<DynamicObject>,
    expected: Vec<DynamicObject>,
}

impl PhaseRead {
    /// Empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a current object.
    pub fn add_current(&mut self, obj: DynamicObject) {
        self.current.push(obj);
    }

    /// Add an expected object.
    pub fn add_expected(&mut self, obj: DynamicObject) {
        self.expected.push(obj);
    }

    /// Consume the container into (current, expected).
    pub fn into_parts(self) -> (Vec<DynamicObject>, Vec<DynamicObject>) {
        (self.current, self.expected)
    }
}

/// Per-type read map for sentinel reconciliation.
///
/// A sentinel commonly manages several unrelated child types derived from
/// one foreign object, so reads are keyed by a type label and diffed
/// independently per key.
#[derive(Default)]
pub struct SentinelRead {
    slots: BTreeMap<String, PhaseRead>,
}

impl SentinelRead {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutable access to the read slot for one child-resource type.
    pub fn slot(&mut self, type_key: &str) -> &mut PhaseRead {
        self.slots.entry(type_key.to_string()).or_default()
    }

    /// Consume the map into its (type key, read) pairs.
    pub fn into_slots(self) -> BTreeMap<String, PhaseRead> {
        self.slots
    }
}

/// Convert a typed Kubernetes object into a [`DynamicObject`].
///
/// Typed `k8s-openapi` values do not serialize their apiVersion/kind, so the
/// type identity is taken from the supplied [`ApiResource`].
pub fn to_dynamic<K: Serialize>(obj: &K, resource: &ApiResource) -> Result<DynamicObject> {
    let mut dynamic: DynamicObject = serde_json::from_value(serde_json::to_value(obj)?)?;
    dynamic.types = Some(TypeMeta {
        api_version: resource.api_version.clone(),
        kind: resource.kind.clone(),
    });
    Ok(dynamic)
}
