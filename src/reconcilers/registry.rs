//! Reconciliation logic for OperandRegistry resources

use std::collections::BTreeMap;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::adapters::ClusterClient;
use crate::config::OperatorConfig;
use crate::crd::{
    OperandRegistry, OperandRegistryStatus, OperatorPhase, OperatorStatus, RegistryKey,
    ServicePhase,
};
use crate::reconcilers::{install, tracker};
use crate::{Error, Result};

/// Validate an OperandRegistry spec
pub fn validate(registry: &OperandRegistry) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for op in &registry.spec.operators {
        if op.name.is_empty() {
            return Err(Error::ValidationError(
                "operators[].name cannot be empty".to_string(),
            ));
        }
        if !seen.insert(op.name.as_str()) {
            return Err(Error::ValidationError(format!(
                "operator {} is declared more than once",
                op.name
            )));
        }
        if op.package_name.is_empty() {
            return Err(Error::ValidationError(format!(
                "operator {}: packageName cannot be empty",
                op.name
            )));
        }
    }
    Ok(())
}

/// Registry phase derived from its operators' phases
pub fn registry_phase(operators: &BTreeMap<String, OperatorStatus>) -> ServicePhase {
    if operators.is_empty() {
        ServicePhase::Init
    } else if operators.values().any(|s| s.phase == OperatorPhase::Failed) {
        ServicePhase::Failed
    } else if operators.values().all(|s| s.phase == OperatorPhase::Ready) {
        ServicePhase::Running
    } else {
        ServicePhase::Pending
    }
}

/// Recompute the registry status from the cluster and publish it if it changed
pub async fn reconcile(
    registry: &OperandRegistry,
    client: &dyn ClusterClient,
    config: &OperatorConfig,
) -> Result<Action> {
    let name = registry.name_any();
    let ns = registry.namespace().unwrap_or_default();
    let key = RegistryKey::new(name.clone(), ns.clone());

    validate(registry)?;

    let requests = client.list_requests().await?;

    let mut operators_status = BTreeMap::new();
    for op in &registry.spec.operators {
        let phase = install::operator_phase(client, config, op).await?;
        let reconcile_requests = tracker::referents_via(&requests, &op.name, &key)
            .iter()
            .map(tracker::Referent::reconcile_request)
            .collect();
        debug!("Operator {} in registry {} is {}", op.name, key, phase);
        operators_status.insert(
            op.name.clone(),
            OperatorStatus {
                phase,
                reconcile_requests,
            },
        );
    }

    let status = OperandRegistryStatus {
        phase: registry_phase(&operators_status),
        operators_status,
    };

    if registry.status.as_ref() != Some(&status) {
        client.patch_registry_status(&name, &ns, &status).await?;
        info!("Updated status for OperandRegistry {}/{}: phase={}", ns, name, status.phase);
    }

    if status.phase.is_settled() {
        Ok(Action::await_change())
    } else {
        Ok(Action::requeue(config.requeue_interval()))
    }
}
