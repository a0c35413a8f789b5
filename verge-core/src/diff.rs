//! Diff engine.
//!
//! Pure classification of (current, expected) child sets into create, update
//! and delete actions. The patch calculation itself is behind the
//! [`PatchMaker`] trait so callers can inject their own merge semantics; the
//! shipped [`ThreeWayMergePatch`] computes an RFC 7386 style merge patch,
//! with deletions derived from an optional `original` snapshot.

use kube::core::DynamicObject;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::object::LAST_APPLIED_ANNOTATION;

/// A rule that strips fields from an object before comparison.
pub trait IgnoreRule: Send + Sync {
    /// Remove ignored fields from the value in place.
    fn apply(&self, value: &mut Value);
}

/// Strips server-populated metadata so it never produces spurious diffs.
pub struct CleanMetadata;

/// Metadata fields owned by the API server, never by the reconciler.
const SERVER_METADATA_FIELDS: &[&str] = &[
    "resourceVersion",
    "uid",
    "creationTimestamp",
    "deletionTimestamp",
    "generation",
    "managedFields",
    "selfLink",
    "finalizers",
    "ownerReferences",
];

impl IgnoreRule for CleanMetadata {
    fn apply(&self, value: &mut Value) {
        let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) else {
            return;
        };
        for field in SERVER_METADATA_FIELDS {
            meta.remove(*field);
        }
        if let Some(annotations) = meta.get_mut("annotations").and_then(Value::as_object_mut) {
            annotations.remove(LAST_APPLIED_ANNOTATION);
            annotations.remove("kubectl.kubernetes.io/last-applied-configuration");
        }
        if meta
            .get("annotations")
            .and_then(Value::as_object)
            .map(|a| a.is_empty())
            .unwrap_or(false)
        {
            meta.remove("annotations");
        }
    }
}

/// Drops the whole `status` subtree from comparison.
pub struct IgnoreStatusFields;

impl IgnoreRule for IgnoreStatusFields {
    fn apply(&self, value: &mut Value) {
        if let Some(obj) = value.as_object_mut() {
            obj.remove("status");
        }
    }
}

/// Removes caller-chosen JSON pointer paths (object members only).
pub struct IgnorePaths(pub Vec<String>);

impl IgnoreRule for IgnorePaths {
    fn apply(&self, value: &mut Value) {
        for pointer in &self.0 {
            let Some(split) = pointer.rfind('/') else { continue };
            let (parent, leaf) = (&pointer[..split], &pointer[split + 1..]);
            if let Some(target) = value.pointer_mut(parent).and_then(Value::as_object_mut) {
                target.remove(leaf);
            }
        }
    }
}

/// Result of a patch calculation.
#[derive(Debug)]
pub struct CalculatedPatch {
    /// Merge patch turning current into expected.
    pub patch: Value,
    /// Current with the patch applied.
    pub merged: Value,
}

impl CalculatedPatch {
    /// Whether current and expected are already in sync.
    pub fn is_empty(&self) -> bool {
        self.patch.as_object().map(Map::is_empty).unwrap_or(false)
    }
}

/// The injectable diff/merge primitive.
///
/// `original` is the last-applied snapshot for true 3-way merges; without it
/// the patch is purely additive (fields absent from expected are preserved).
pub trait PatchMaker: Send + Sync {
    /// Calculate the patch turning `current` into `expected`.
    fn calculate(
        &self,
        current: &Value,
        expected: &Value,
        original: Option<&Value>,
    ) -> Result<CalculatedPatch>;
}

/// Default [`PatchMaker`]: recursive merge patch with 3-way deletions.
#[derive(Default)]
pub struct ThreeWayMergePatch;

impl PatchMaker for ThreeWayMergePatch {
    fn calculate(
        &self,
        current: &Value,
        expected: &Value,
        original: Option<&Value>,
    ) -> Result<CalculatedPatch> {
        let mut patch = merge_diff(current, expected);
        if let Some(original) = original {
            if let Some(map) = patch.as_object_mut() {
                mark_removals(map, current, expected, original);
            }
        }
        let mut merged = current.clone();
        json_patch::merge(&mut merged, &patch);
        Ok(CalculatedPatch { patch, merged })
    }
}

/// Recursive additive diff: keys in `expected` that differ from `current`.
fn merge_diff(current: &Value, expected: &Value) -> Value {
    match (current, expected) {
        (Value::Object(cur), Value::Object(exp)) => {
            let mut out = Map::new();
            for (key, expected_value) in exp {
                match cur.get(key) {
                    Some(current_value) if current_value == expected_value => {}
                    Some(current_value)
                        if current_value.is_object() && expected_value.is_object() =>
                    {
                        let nested = merge_diff(current_value, expected_value);
                        if nested.as_object().map(|m| !m.is_empty()).unwrap_or(true) {
                            out.insert(key.clone(), nested);
                        }
                    }
                    _ => {
                        out.insert(key.clone(), expected_value.clone());
                    }
                }
            }
            Value::Object(out)
        }
        _ if current == expected => Value::Object(Map::new()),
        _ => expected.clone(),
    }
}

/// Mark keys for deletion: present in `original` and `current`, absent from
/// `expected`. A merge patch expresses deletion as an explicit null.
fn mark_removals(patch: &mut Map<String, Value>, current: &Value, expected: &Value, original: &Value) {
    let (Value::Object(cur), Value::Object(orig)) = (current, original) else {
        return;
    };
    let exp = expected.as_object();
    for (key, original_value) in orig {
        let expected_value = exp.and_then(|m| m.get(key));
        match expected_value {
            None => {
                if cur.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Some(ev) => {
                if let Some(cv) = cur.get(key) {
                    if original_value.is_object() && cv.is_object() && ev.is_object() {
                        let mut sub = match patch.remove(key) {
                            Some(Value::Object(m)) => m,
                            Some(other) => {
                                patch.insert(key.clone(), other);
                                continue;
                            }
                            None => Map::new(),
                        };
                        mark_removals(&mut sub, cv, ev, original_value);
                        if !sub.is_empty() {
                            patch.insert(key.clone(), Value::Object(sub));
                        }
                    }
                }
            }
        }
    }
}

/// Classified actions produced by one diff pass.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Objects to create.
    pub to_create: Vec<DynamicObject>,
    /// Objects to update, already carrying the patched value.
    pub to_update: Vec<DynamicObject>,
    /// Objects to delete.
    pub to_delete: Vec<DynamicObject>,
    /// Human-readable diff text, for logs only.
    pub diff: String,
}

impl DiffResult {
    /// Whether any action is pending.
    pub fn is_diff(&self) -> bool {
        !self.to_create.is_empty() || !self.to_update.is_empty() || !self.to_delete.is_empty()
    }

    /// Fold another result into this one (used for per-type sentinel diffs).
    pub fn merge(&mut self, other: DiffResult) {
        self.to_create.extend(other.to_create);
        self.to_update.extend(other.to_update);
        self.to_delete.extend(other.to_delete);
        self.diff.push_str(&other.diff);
    }
}

fn name_of(obj: &DynamicObject) -> String {
    obj.metadata.name.clone().unwrap_or_default()
}

/// Diff a current set against an expected set of one child-resource type.
///
/// Matching is by exact name equality; callers must supply at most one
/// expected object per name. A patch-calculation error aborts the whole diff
/// so no apply decision is ever made from a half-computed result.
pub fn diff_children(
    current: Vec<DynamicObject>,
    expected: Vec<DynamicObject>,
    patch_maker: &dyn PatchMaker,
    ignore_rules: &[Box<dyn IgnoreRule>],
) -> Result<DiffResult> {
    let mut pool = current;
    let mut result = DiffResult::default();

    for mut exp in expected {
        let name = name_of(&exp);
        match pool.iter().position(|c| name_of(c) == name) {
            Some(idx) => {
                let cur = pool.remove(idx);
                // Type identity is immutable; carry it forward so ignore
                // rules and stores can rely on the concrete kind.
                if exp.types.is_none() {
                    exp.types = cur.types.clone();
                }

                let raw_current = serde_json::to_value(&cur)?;
                let raw_expected = serde_json::to_value(&exp)?;
                let mut cmp_current = raw_current.clone();
                let mut cmp_expected = raw_expected;
                for rule in ignore_rules {
                    rule.apply(&mut cmp_current);
                    rule.apply(&mut cmp_expected);
                }

                let patch = patch_maker.calculate(&cmp_current, &cmp_expected, None)?;
                if !patch.is_empty() {
                    let mut merged = raw_current;
                    json_patch::merge(&mut merged, &patch.patch);
                    let updated: DynamicObject = serde_json::from_value(merged)?;
                    result.diff.push_str(&format!(
                        "~ {}\n{}\n",
                        name,
                        serde_json::to_string_pretty(&patch.patch)?
                    ));
                    result.to_update.push(updated);
                }
            }
            None => {
                result.diff.push_str(&format!("+ {}\n", name));
                result.to_create.push(exp);
            }
        }
    }

    for leftover in pool {
        result.diff.push_str(&format!("- {}\n", name_of(&leftover)));
        result.to_delete.push(leftover);
    }

    Ok(result)
}

/// The ignore rules every engine diff applies before caller-supplied extras.
pub fn default_ignore_rules() -> Vec<Box<dyn IgnoreRule>> {
    vec![Box::new(CleanMetadata), Box::new(IgnoreStatusFields)]
}
