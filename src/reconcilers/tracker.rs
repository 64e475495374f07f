//! Reference tracking: which requests currently consume an operand

use std::collections::BTreeSet;

use kube::ResourceExt;

use crate::crd::{OperandRequest, ReconcileRequest, RegistryKey};

/// A request consuming an operand through a registry
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Referent {
    pub request: String,
    pub namespace: String,
    pub registry: RegistryKey,
}

impl Referent {
    pub fn reconcile_request(&self) -> ReconcileRequest {
        ReconcileRequest {
            name: self.request.clone(),
            namespace: self.namespace.clone(),
        }
    }

    fn is(&self, request: &OperandRequest) -> bool {
        self.request == request.name_any()
            && Some(self.namespace.as_str()) == request.metadata.namespace.as_deref()
    }
}

/// Every live request declaring `operand`, from any registry.
///
/// Requests already marked for deletion no longer count.
pub fn referents(requests: &[OperandRequest], operand: &str) -> BTreeSet<Referent> {
    requests
        .iter()
        .filter(|r| !r.is_deleting())
        .flat_map(|r| {
            r.declared_operands()
                .filter(|(_, op)| op.name == operand)
                .map(|(registry, _)| Referent {
                    request: r.name_any(),
                    namespace: r.namespace().unwrap_or_default(),
                    registry,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Referents of `operand` resolved through one registry
pub fn referents_via(
    requests: &[OperandRequest],
    operand: &str,
    registry: &RegistryKey,
) -> BTreeSet<Referent> {
    referents(requests, operand)
        .into_iter()
        .filter(|r| &r.registry == registry)
        .collect()
}

/// Referents left for `operand`, through any registry, once `excluded` stops
/// counting. Whether one of them still uses a given resource depends on where
/// its registry installs the operand.
pub fn remaining_referents(
    requests: &[OperandRequest],
    operand: &str,
    excluded: &OperandRequest,
) -> BTreeSet<Referent> {
    referents(requests, operand)
        .into_iter()
        .filter(|r| !r.is(excluded))
        .collect()
}
