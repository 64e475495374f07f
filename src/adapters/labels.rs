//! Labels and annotations stamped on objects the operator writes

use std::collections::BTreeMap;

/// Marks an object as written by this operator
pub const MANAGED_BY_LABEL: &str = "operand.oso.sh/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "operand-lifecycle-operator";

/// Operand a managed resource belongs to
pub const OPERAND_LABEL: &str = "operand.oso.sh/operand";

/// `namespace/name` of the request whose reconcile first created the resource
pub const CREATED_BY_ANNOTATION: &str = "operand.oso.sh/created-by";

/// OperandBindInfo a replicated secret/config map was copied from
pub const BIND_INFO_ANNOTATION: &str = "operand.oso.sh/bindinfo";

/// Labels identifying resources materialized for an operand
pub fn operand_labels(operand: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(OPERAND_LABEL.to_string(), operand.to_string());
    labels
}

/// Label selector matching [`operand_labels`]
pub fn operand_selector(operand: &str) -> String {
    format!(
        "{}={},{}={}",
        MANAGED_BY_LABEL, MANAGED_BY_VALUE, OPERAND_LABEL, operand
    )
}

/// True when every label in `wanted` is present with the same value
pub fn has_labels(
    actual: &BTreeMap<String, String>,
    wanted: &BTreeMap<String, String>,
) -> bool {
    wanted.iter().all(|(k, v)| actual.get(k) == Some(v))
}
