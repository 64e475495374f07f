//! Read-only views of the OLM resources the operator inspects
//!
//! Only the fields consulted during reconciliation are modelled; everything
//! else in the live objects is ignored on deserialization.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::CsvPhase;

/// Annotation on a ClusterServiceVersion carrying example resources
pub const ALM_EXAMPLES_ANNOTATION: &str = "alm-examples";

/// Subscription specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    plural = "subscriptions",
    namespaced,
    status = "SubscriptionStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Package name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub source_namespace: String,
}

/// Subscription status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    #[serde(default, rename = "currentCSV", skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,

    #[serde(default, rename = "installedCSV", skip_serializing_if = "Option::is_none")]
    pub installed_csv: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Subscription {
    /// Name of the CSV the subscription resolved to, preferring the installed one
    pub fn resolved_csv(&self) -> Option<&str> {
        let status = self.status.as_ref()?;
        status
            .installed_csv
            .as_deref()
            .filter(|n| !n.is_empty())
            .or_else(|| status.current_csv.as_deref().filter(|n| !n.is_empty()))
    }
}

/// ClusterServiceVersion specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "ClusterServiceVersion",
    plural = "clusterserviceversions",
    namespaced,
    status = "ClusterServiceVersionStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// ClusterServiceVersion status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionStatus {
    #[serde(default)]
    pub phase: CsvPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ClusterServiceVersion {
    pub fn phase(&self) -> CsvPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Raw `alm-examples` annotation, if present and non-empty
    pub fn alm_examples(&self) -> Option<&str> {
        self.annotations()
            .get(ALM_EXAMPLES_ANNOTATION)
            .map(String::as_str)
            .filter(|raw| !raw.trim().is_empty())
    }
}
