//! OperandBindInfo Custom Resource Definition

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{BindInfoPhase, RegistryKey, SecretConfigmap};

/// Visibility scope key whose bindings are replicated to other namespaces
pub const SCOPE_PUBLIC: &str = "public";

/// OperandBindInfo resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operator.oso.sh",
    version = "v1alpha1",
    kind = "OperandBindInfo",
    plural = "operandbindinfos",
    singular = "operandbindinfo",
    shortname = "opbi",
    namespaced,
    status = "OperandBindInfoStatus",
    printcolumn = r#"{"name": "Operand", "type": "string", "jsonPath": ".spec.operand"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OperandBindInfoSpec {
    /// Operand whose credentials are shared
    pub operand: String,

    /// OperandRegistry the operand is declared in
    pub registry: String,

    /// OperandRegistry namespace, defaults to the bindinfo's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_namespace: Option<String>,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Secret/ConfigMap pairs keyed by visibility scope
    #[serde(default)]
    pub bindings: BTreeMap<String, SecretConfigmap>,
}

impl OperandBindInfo {
    pub fn registry_key(&self) -> RegistryKey {
        let namespace = self
            .spec
            .registry_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.namespace().unwrap_or_default());
        RegistryKey::new(self.spec.registry.clone(), namespace)
    }

    /// Bindings allowed to leave the operand's namespace
    pub fn public_bindings(&self) -> impl Iterator<Item = (&String, &SecretConfigmap)> {
        self.spec
            .bindings
            .iter()
            .filter(|(scope, _)| scope.as_str() == SCOPE_PUBLIC)
    }
}

/// OperandBindInfo status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperandBindInfoStatus {
    #[serde(default)]
    pub phase: BindInfoPhase,

    /// Namespaces the bindings are currently synced into
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_namespaces: Vec<String>,
}
