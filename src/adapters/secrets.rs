//! Copies of shared Secrets and ConfigMaps bound to a consuming request

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

use crate::adapters::labels;

/// Copy of `source` named `name` in `namespace`, owned by `owner`
pub fn secret_copy(
    source: &Secret,
    name: &str,
    namespace: &str,
    owner: Option<OwnerReference>,
    bind_info: &str,
) -> Secret {
    Secret {
        metadata: copy_metadata(name, namespace, owner, bind_info),
        type_: source.type_.clone(),
        data: source.data.clone(),
        string_data: None,
        immutable: None,
    }
}

/// Copy of `source` named `name` in `namespace`, owned by `owner`
pub fn config_map_copy(
    source: &ConfigMap,
    name: &str,
    namespace: &str,
    owner: Option<OwnerReference>,
    bind_info: &str,
) -> ConfigMap {
    ConfigMap {
        metadata: copy_metadata(name, namespace, owner, bind_info),
        data: source.data.clone(),
        binary_data: source.binary_data.clone(),
        immutable: None,
    }
}

fn copy_metadata(
    name: &str,
    namespace: &str,
    owner: Option<OwnerReference>,
    bind_info: &str,
) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert(
        labels::MANAGED_BY_LABEL.to_string(),
        labels::MANAGED_BY_VALUE.to_string(),
    );
    let mut annotations = BTreeMap::new();
    annotations.insert(labels::BIND_INFO_ANNOTATION.to_string(), bind_info.to_string());

    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        annotations: Some(annotations),
        owner_references: owner.map(|o| vec![o]),
        ..Default::default()
    }
}

/// Add `owner` to the owner list unless it is already there. A second owner
/// never claims the controller flag.
///
/// Returns true when the list changed.
pub fn add_owner(meta: &mut ObjectMeta, owner: &OwnerReference) -> bool {
    let owners = meta.owner_references.get_or_insert_with(Vec::new);
    if owners.iter().any(|o| o.uid == owner.uid) {
        return false;
    }
    let mut owner = owner.clone();
    if owners.iter().any(|o| o.controller == Some(true)) {
        owner.controller = Some(false);
    }
    owners.push(owner);
    true
}

/// Bring `existing` in line with `desired`; returns true when a write is needed
pub fn sync_secret(existing: &mut Secret, desired: &Secret) -> bool {
    let mut changed = sync_meta(&mut existing.metadata, &desired.metadata);
    if existing.data != desired.data {
        existing.data = desired.data.clone();
        changed = true;
    }
    changed
}

/// Bring `existing` in line with `desired`; returns true when a write is needed
pub fn sync_config_map(existing: &mut ConfigMap, desired: &ConfigMap) -> bool {
    let mut changed = sync_meta(&mut existing.metadata, &desired.metadata);
    if existing.data != desired.data {
        existing.data = desired.data.clone();
        changed = true;
    }
    if existing.binary_data != desired.binary_data {
        existing.binary_data = desired.binary_data.clone();
        changed = true;
    }
    changed
}

fn sync_meta(existing: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let mut changed = false;
    for owner in desired.owner_references.iter().flatten() {
        changed |= add_owner(existing, owner);
    }
    let wanted = desired.labels.clone().unwrap_or_default();
    let current = existing.labels.get_or_insert_with(BTreeMap::new);
    if !labels::has_labels(current, &wanted) {
        current.extend(wanted);
        changed = true;
    }
    changed
}
