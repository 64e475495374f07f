//! OperandRequest Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{CsvPhase, ServicePhase};

/// OperandRequest resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operator.oso.sh",
    version = "v1alpha1",
    kind = "OperandRequest",
    plural = "operandrequests",
    singular = "operandrequest",
    shortname = "opreq",
    namespaced,
    status = "OperandRequestStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OperandRequestSpec {
    /// Operands requested, grouped by the registry that provides them
    #[serde(default)]
    pub requests: Vec<Request>,
}

/// Operands requested from one registry
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// OperandRegistry name
    pub registry: String,

    /// OperandRegistry namespace, defaults to the request's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_namespace: Option<String>,

    /// Requested operands
    #[serde(default)]
    pub operands: Vec<Operand>,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single requested operand
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Operand {
    /// Operand name as declared in the registry
    pub name: String,

    /// Local names for shared secrets/config maps, keyed by visibility scope
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, SecretConfigmap>,
}

/// Secret and ConfigMap names of a binding
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretConfigmap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configmap: Option<String>,
}

/// Namespace/name of the registry (and its same-named config) an entry points at
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistryKey {
    pub name: String,
    pub namespace: String,
}

impl RegistryKey {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl OperandRequest {
    /// Registry key of a request entry, resolving the default namespace
    pub fn registry_key(&self, request: &Request) -> RegistryKey {
        let namespace = request
            .registry_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.namespace().unwrap_or_default());
        RegistryKey::new(request.registry.clone(), namespace)
    }

    /// Every (registry key, operand) pair declared by this request
    pub fn declared_operands(&self) -> impl Iterator<Item = (RegistryKey, &Operand)> + '_ {
        self.spec.requests.iter().flat_map(move |request| {
            let key = self.registry_key(request);
            request.operands.iter().map(move |op| (key.clone(), op))
        })
    }

    pub fn declares(&self, operand: &str, key: &RegistryKey) -> bool {
        self.declared_operands()
            .any(|(k, op)| op.name == operand && &k == key)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

/// OperandRequest status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperandRequestStatus {
    /// Overall phase
    #[serde(default)]
    pub phase: ServicePhase,

    /// One entry per requested operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberStatus>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Membership entry for one operator
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    /// Operator (and operand) name
    pub name: String,

    /// Registry the operand was requested from
    #[serde(default)]
    pub registry: String,

    /// Namespace of that registry
    #[serde(default)]
    pub registry_namespace: String,

    pub phase: MemberPhase,

    /// Managed resources written for this operand, torn down when it leaves
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ManagedResource>,
}

impl MemberStatus {
    pub fn new(name: impl Into<String>, key: &RegistryKey, phase: MemberPhase) -> Self {
        Self {
            name: name.into(),
            registry: key.name.clone(),
            registry_namespace: key.namespace.clone(),
            phase,
            resources: Vec::new(),
        }
    }

    /// Record `resources`, kept sorted and free of duplicates
    pub fn with_resources(mut self, resources: impl IntoIterator<Item = ManagedResource>) -> Self {
        self.resources.extend(resources);
        self.resources.sort();
        self.resources.dedup();
        self
    }

    pub fn registry_key(&self) -> RegistryKey {
        RegistryKey::new(self.registry.clone(), self.registry_namespace.clone())
    }
}

/// Address of a managed resource
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

/// Install phase of the operator paired with the phase of its operand resources
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberPhase {
    #[serde(default)]
    pub operator_phase: CsvPhase,

    #[serde(default)]
    pub operand_phase: ServicePhase,
}

impl OperandRequestStatus {
    pub fn member(&self, name: &str) -> Option<&MemberStatus> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Insert or replace the entry for `member.name`.
    ///
    /// Returns false, leaving the list untouched, when an identical entry
    /// (phase pair, registry and recorded resources) already exists.
    pub fn set_member(&mut self, member: MemberStatus) -> bool {
        match self.members.iter_mut().find(|m| m.name == member.name) {
            Some(existing) if *existing == member => false,
            Some(existing) => {
                *existing = member;
                true
            }
            None => {
                self.members.push(member);
                true
            }
        }
    }

    pub fn remove_member(&mut self, name: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.name != name);
        before != self.members.len()
    }

    /// Set a condition, keeping its transition time when nothing changed
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing)
                if existing.status == condition.status
                    && existing.reason == condition.reason
                    && existing.message == condition.message => {}
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }
}

/// Status condition
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (Ready, OperandsReconciled)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
