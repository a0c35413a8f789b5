//! Bundle Custom Resource Definition.
//!
//! A Bundle declares a set of configuration entries and service ports; the
//! operator derives a ConfigMap and a Service from it and keeps both
//! converged.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use verge_core::condition::Condition;
use verge_core::object::{ManagedObject, MultiPhaseStatus, ObjectStatus, WatchedObject};

/// Bundle is the Schema for the bundles API.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "verge.dev",
    version = "v1",
    kind = "Bundle",
    plural = "bundles",
    shortname = "bnd",
    namespaced,
    status = "BundleStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Observed", "type":"integer", "jsonPath":".status.observedGeneration"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    /// Configuration entries rendered into the bundle's ConfigMap.
    #[serde(default)]
    pub configs: BTreeMap<String, String>,

    /// Ports exposed through the bundle's Service.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortSpec>,
}

/// One exposed service port.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    /// Port name, unique within the bundle.
    pub name: String,

    /// Port number.
    pub port: i32,
}

/// Status of a Bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    /// Conditions, one per phase plus the whole-object Ready condition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Whether the last reconcile pass failed.
    #[serde(default)]
    pub on_error: bool,

    /// Message of the last failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,

    /// Generation last reconciled to completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last phase the reconciler ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl ObjectStatus for BundleStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }

    fn is_on_error(&self) -> bool {
        self.on_error
    }

    fn set_on_error(&mut self, on_error: bool) {
        self.on_error = on_error;
    }

    fn last_error_message(&self) -> Option<&str> {
        self.last_error_message.as_deref()
    }

    fn set_last_error_message(&mut self, message: Option<String>) {
        self.last_error_message = message;
    }

    fn observed_generation(&self) -> Option<i64> {
        self.observed_generation
    }

    fn set_observed_generation(&mut self, generation: i64) {
        self.observed_generation = Some(generation);
    }
}

impl MultiPhaseStatus for BundleStatus {
    fn phase_name(&self) -> Option<&str> {
        self.phase.as_deref()
    }

    fn set_phase_name(&mut self, phase: &str) {
        self.phase = Some(phase.to_string());
    }
}

impl WatchedObject for Bundle {
    const API_VERSION: &'static str = "verge.dev/v1";
    const KIND: &'static str = "Bundle";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl ManagedObject for Bundle {
    type Status = BundleStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Self::Status {
        self.status.get_or_insert_with(Default::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_to_empty() {
        let spec: BundleSpec = serde_json::from_str("{}").unwrap();
        assert!(spec.configs.is_empty());
        assert!(spec.ports.is_empty());
    }

    #[test]
    fn status_serializes_camel_case() {
        let mut status = BundleStatus::default();
        status.set_observed_generation(3);
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["observedGeneration"], 3);
    }
}
