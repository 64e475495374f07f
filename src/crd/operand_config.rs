//! OperandConfig Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ServicePhase;

/// OperandConfig resource specification
///
/// An OperandConfig shares its name and namespace with the OperandRegistry it
/// configures.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operator.oso.sh",
    version = "v1alpha1",
    kind = "OperandConfig",
    plural = "operandconfigs",
    singular = "operandconfig",
    shortname = "opcon",
    namespaced,
    status = "OperandConfigStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OperandConfigSpec {
    /// Configuration per operand
    #[serde(default)]
    pub services: Vec<ConfigService>,
}

/// Desired configuration of one operand, keyed by resource kind
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigService {
    /// Operand name
    pub name: String,

    /// Resource kind to spec fragment merged over the operator's example
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_map")]
    pub spec: BTreeMap<String, serde_json::Value>,
}

fn preserve_unknown_map(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "object",
        "additionalProperties": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    }))
    .unwrap_or(schemars::schema::Schema::Bool(true))
}

impl ConfigService {
    /// Spec fragment declared for a resource kind, matched case-insensitively
    pub fn spec_for_kind(&self, kind: &str) -> Option<&serde_json::Value> {
        self.spec
            .iter()
            .find(|(declared, _)| declared.eq_ignore_ascii_case(kind))
            .map(|(_, spec)| spec)
    }

    pub fn declares_kind(&self, kind: &str) -> bool {
        self.spec_for_kind(kind).is_some()
    }
}

impl OperandConfigSpec {
    pub fn service(&self, name: &str) -> Option<&ConfigService> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// OperandConfig status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperandConfigStatus {
    /// Aggregate phase over all operand resources
    #[serde(default)]
    pub phase: ServicePhase,

    /// Operand name to resource kind to phase
    #[serde(default)]
    pub service_status: BTreeMap<String, BTreeMap<String, ServicePhase>>,
}

impl OperandConfigStatus {
    /// Init until something was observed, Failed if any kind failed, else the
    /// least advanced phase seen.
    pub fn aggregate_phase(&self) -> ServicePhase {
        let phases: Vec<ServicePhase> = self
            .service_status
            .values()
            .flat_map(|kinds| kinds.values().copied())
            .collect();

        if phases.is_empty() {
            ServicePhase::Init
        } else if phases.contains(&ServicePhase::Failed) {
            ServicePhase::Failed
        } else if let Some(other) = phases.iter().find(|p| **p != ServicePhase::Running) {
            *other
        } else {
            ServicePhase::Running
        }
    }
}
