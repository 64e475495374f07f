//! Custom Resource Definitions for the Operand Lifecycle Operator

mod olm;
mod operand_bind_info;
mod operand_config;
mod operand_registry;
mod operand_request;
mod phase;

pub use olm::*;
pub use operand_bind_info::*;
pub use operand_config::*;
pub use operand_registry::*;
pub use operand_request::*;
pub use phase::*;

use kube::CustomResourceExt;

/// Generate CRD YAML manifests for the custom resources owned by this operator
pub fn generate_crds() -> Vec<String> {
    [
        OperandRegistry::crd(),
        OperandConfig::crd(),
        OperandRequest::crd(),
        OperandBindInfo::crd(),
    ]
    .iter()
    .filter_map(|crd| serde_yaml::to_string(crd).ok())
    .collect()
}
