//! OperandRegistry Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{OperatorPhase, ServicePhase};

/// OperandRegistry resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operator.oso.sh",
    version = "v1alpha1",
    kind = "OperandRegistry",
    plural = "operandregistries",
    singular = "operandregistry",
    shortname = "opreg",
    namespaced,
    status = "OperandRegistryStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OperandRegistrySpec {
    /// Operators that can back operands requested against this registry
    #[serde(default)]
    pub operators: Vec<Operator>,
}

/// Installable operator descriptor
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    /// Operator name, also the operand name used by requests
    pub name: String,

    /// Namespace the operator is installed into
    pub namespace: String,

    /// CatalogSource name
    pub source_name: String,

    /// CatalogSource namespace
    pub source_namespace: String,

    /// Package name in the catalog
    pub package_name: String,

    /// Subscription channel
    pub channel: String,

    /// Install mode: "namespace" (default) or "cluster"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_mode: Option<String>,

    /// Target namespaces of the operator group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_namespaces: Vec<String>,

    /// Visibility scope: "public" or "private"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Install mode that places the operator in the cluster-wide namespace
pub const INSTALL_MODE_CLUSTER: &str = "cluster";

impl OperandRegistrySpec {
    pub fn operator(&self, name: &str) -> Option<&Operator> {
        self.operators.iter().find(|op| op.name == name)
    }
}

impl OperandRegistry {
    /// Install phase the registry currently reports for an operator
    pub fn reported_phase(&self, operator: &str) -> Option<OperatorPhase> {
        self.status
            .as_ref()
            .and_then(|s| s.operators_status.get(operator))
            .map(|s| s.phase)
    }
}

/// OperandRegistry status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperandRegistryStatus {
    /// Aggregate phase over all declared operators
    #[serde(default)]
    pub phase: ServicePhase,

    /// Per-operator install status
    #[serde(default)]
    pub operators_status: BTreeMap<String, OperatorStatus>,
}

/// Install status of a single operator
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    pub phase: OperatorPhase,

    /// Requests currently referencing this operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reconcile_requests: Vec<ReconcileRequest>,
}

/// Reference to an OperandRequest
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub name: String,
    pub namespace: String,
}
