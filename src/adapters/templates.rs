//! Example resources bundled with an operator and the managed objects built from them

use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use serde_json::Value;

use crate::adapters::{labels, merge};
use crate::crd::ClusterServiceVersion;
use crate::{Error, Result};

/// One entry of a ClusterServiceVersion's `alm-examples` list
#[derive(Clone, Debug, PartialEq)]
pub struct ExampleResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    body: Value,
}

impl ExampleResource {
    fn from_value(body: Value) -> Result<Self> {
        let field = |path: &[&str]| -> Option<String> {
            let mut cur = &body;
            for key in path {
                cur = cur.get(key)?;
            }
            cur.as_str().map(str::to_string)
        };

        let api_version = field(&["apiVersion"])
            .ok_or_else(|| Error::TemplateError("example is missing apiVersion".to_string()))?;
        let kind = field(&["kind"])
            .ok_or_else(|| Error::TemplateError("example is missing kind".to_string()))?;
        let name = field(&["metadata", "name"]).unwrap_or_default();

        Ok(Self {
            api_version,
            kind,
            name,
            body,
        })
    }

    /// Example `spec`, or an empty object when the example has none
    pub fn spec(&self) -> Value {
        self.body
            .get("spec")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    /// Build the object to write: the example with `overrides` merged into its
    /// spec, placed in `namespace` and labelled for `operand`.
    pub fn render(
        &self,
        operand: &str,
        namespace: &str,
        overrides: &Value,
    ) -> Result<DynamicObject> {
        let merged = merge::merge(&self.spec(), overrides)?;

        let mut obj: DynamicObject = serde_json::from_value(self.body.clone()).map_err(|e| {
            Error::TemplateError(format!("Invalid example {} {}: {}", self.kind, self.name, e))
        })?;
        obj.metadata.namespace = Some(namespace.to_string());
        obj.metadata.resource_version = None;
        obj.metadata.uid = None;
        obj.metadata
            .labels
            .get_or_insert_with(Default::default)
            .extend(labels::operand_labels(operand));
        match obj.data.as_object_mut() {
            Some(data) => {
                data.insert("spec".to_string(), merged);
            }
            None => obj.data = serde_json::json!({ "spec": merged }),
        }
        Ok(obj)
    }
}

/// Parse the examples bundled with a CSV; no annotation means no examples
pub fn examples(csv: &ClusterServiceVersion) -> Result<Vec<ExampleResource>> {
    match csv.alm_examples() {
        Some(raw) => parse_examples(raw),
        None => Ok(Vec::new()),
    }
}

/// Parse an `alm-examples` payload (a JSON array of resource bodies)
pub fn parse_examples(raw: &str) -> Result<Vec<ExampleResource>> {
    let values: Vec<Value> = serde_json::from_str(raw)
        .map_err(|e| Error::TemplateError(format!("Malformed alm-examples: {}", e)))?;
    values.into_iter().map(ExampleResource::from_value).collect()
}

/// Group, version and kind of an `apiVersion`/`kind` pair; a bare version is
/// the core group
pub fn group_version_kind(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    };
    GroupVersionKind::gvk(group, version, kind)
}
