//! Reconciliation logic for OperandRequest resources
//!
//! For every requested operand the operator's example resources are merged
//! with the OperandConfig fragment and written to the cluster. The resources
//! written are recorded on the request's member entry. Operands that leave the
//! request (or a request that is deleted) have those resources torn down once
//! no other request uses them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapters::events::{self, actions, reasons};
use crate::adapters::templates::{self, ExampleResource};
use crate::adapters::{labels, ClusterClient, CreateOutcome, ResourceRef};
use crate::config::OperatorConfig;
use crate::crd::{
    self, Condition, CsvPhase, ManagedResource, MemberPhase, MemberStatus, OperandRequest,
    OperandRequestStatus, RegistryKey, ServicePhase,
};
use crate::error::MultiError;
use crate::metrics::prometheus::MANAGED_RESOURCE_WRITES;
use crate::reconcilers::tracker::{self, Referent};
use crate::reconcilers::install;
use crate::{Error, Result};

/// Validate an OperandRequest spec
pub fn validate(request: &OperandRequest) -> Result<()> {
    for entry in &request.spec.requests {
        if entry.registry.is_empty() {
            return Err(Error::ValidationError(
                "requests[].registry cannot be empty".to_string(),
            ));
        }
        if entry.operands.iter().any(|op| op.name.is_empty()) {
            return Err(Error::ValidationError(format!(
                "requests[].operands[].name cannot be empty (registry {})",
                entry.registry
            )));
        }
    }
    Ok(())
}

/// Converge the managed resources of a live request and publish its status
pub async fn reconcile(
    request: &OperandRequest,
    client: &dyn ClusterClient,
    config: &OperatorConfig,
) -> Result<Action> {
    let name = request.name_any();
    let ns = request.namespace().unwrap_or_default();

    validate(request)?;

    let mut status = request.status.clone().unwrap_or_default();
    let mut errors = MultiError::new();

    // Operands tracked in the membership list but no longer requested
    let removed: Vec<MemberStatus> = status
        .members
        .iter()
        .filter(|m| !request.declares(&m.name, &m.registry_key()))
        .cloned()
        .collect();
    if !removed.is_empty() {
        let requests = client.list_requests().await?;
        for member in removed {
            info!("Operand {} was removed from {}/{}", member.name, ns, name);
            match teardown_operand(client, config, request, &member, &requests).await {
                Ok(()) => {
                    status.remove_member(&member.name);
                }
                Err(e) => errors.push(e),
            }
        }
    }

    let mut operand_phases: BTreeMap<String, (RegistryKey, ServicePhase, Vec<ManagedResource>)> =
        BTreeMap::new();
    for (key, operand) in request.declared_operands() {
        let mut applied = Vec::new();
        let phase = reconcile_operand(
            client,
            config,
            request,
            &key,
            &operand.name,
            &mut applied,
            &mut errors,
        )
        .await;
        debug!("Operand {} of {}/{} is {}", operand.name, ns, name, phase);
        operand_phases.insert(operand.name.clone(), (key, phase, applied));
    }

    for (operand, (key, operand_phase, applied)) in operand_phases {
        let operator_phase = match member_operator_phase(client, config, &key, &operand).await {
            Ok(phase) => phase,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        // Resources written earlier stay recorded until the operand is torn down
        let recorded = status
            .member(&operand)
            .filter(|m| m.registry_key() == key)
            .map(|m| m.resources.clone())
            .unwrap_or_default();
        status.set_member(
            MemberStatus::new(
                operand,
                &key,
                MemberPhase {
                    operator_phase,
                    operand_phase,
                },
            )
            .with_resources(recorded.into_iter().chain(applied)),
        );
    }

    status.phase = crd::request_phase(status.members.iter().map(|m| m.phase.operator_phase));
    set_conditions(&mut status, &errors);

    if request.status.as_ref() != Some(&status) {
        client.patch_request_status(&name, &ns, &status).await?;
        info!("Updated status for OperandRequest {}/{}: phase={}", ns, name, status.phase);
    }

    if !errors.is_empty() {
        events::publish(
            client,
            request,
            events::warning(reasons::RECONCILE_FAILED, actions::RECONCILE, errors.to_string()),
        )
        .await;
    }
    errors.into_result()?;

    if status.phase.is_settled() {
        Ok(Action::await_change())
    } else {
        debug!("OperandRequest {}/{} is {}, checking again later", ns, name, status.phase);
        Ok(Action::requeue(config.requeue_interval()))
    }
}

/// Tear down every recorded operand of a request that is being deleted
pub async fn cleanup(
    request: &OperandRequest,
    client: &dyn ClusterClient,
    config: &OperatorConfig,
) -> Result<Action> {
    let name = request.name_any();
    let ns = request.namespace().unwrap_or_default();
    info!("Cleaning up OperandRequest {}/{}", ns, name);

    let members = request
        .status
        .as_ref()
        .map(|s| s.members.clone())
        .unwrap_or_default();

    let requests = client.list_requests().await?;
    let mut errors = MultiError::new();
    for member in &members {
        if let Err(e) = teardown_operand(client, config, request, member, &requests).await {
            warn!("Failed to tear down operand {} of {}/{}: {}", member.name, ns, name, e);
            errors.push(e);
        }
    }

    if !errors.is_empty() {
        events::publish(
            client,
            request,
            events::warning(reasons::DELETE_FAILED, actions::DELETE, errors.to_string()),
        )
        .await;
    }
    errors.into_result()?;

    Ok(Action::await_change())
}

/// Materialize one operand; resources written are pushed to `applied`,
/// per-kind failures to `errors` and reflected in the returned phase
async fn reconcile_operand(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    request: &OperandRequest,
    key: &RegistryKey,
    operand: &str,
    applied: &mut Vec<ManagedResource>,
    errors: &mut MultiError,
) -> ServicePhase {
    let config_catalog = match client.get_config(&key.name, &key.namespace).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            errors.push(Error::MissingDependency(format!(
                "OperandConfig {} requested for operand {} not found",
                key, operand
            )));
            return ServicePhase::Failed;
        }
        Err(e) => {
            errors.push(e);
            return ServicePhase::Failed;
        }
    };

    let Some(service) = config_catalog.spec.service(operand) else {
        debug!("OperandConfig {} has nothing to deploy for {}", key, operand);
        return ServicePhase::None;
    };

    let registry = match client.get_registry(&key.name, &key.namespace).await {
        Ok(Some(r)) => r,
        Ok(None) => {
            errors.push(Error::MissingDependency(format!(
                "OperandRegistry {} requested for operand {} not found",
                key, operand
            )));
            return ServicePhase::Failed;
        }
        Err(e) => {
            errors.push(e);
            return ServicePhase::Failed;
        }
    };
    let Some(operator) = registry.spec.operator(operand) else {
        errors.push(Error::MissingDependency(format!(
            "operator {} is not declared in OperandRegistry {}",
            operand, key
        )));
        return ServicePhase::Failed;
    };

    let csv = match install::resolve_installed_csv(client, config, operator).await {
        Ok(Some(csv)) => csv,
        Ok(None) => {
            debug!("Operator {} has no installed ClusterServiceVersion yet", operand);
            return ServicePhase::Pending;
        }
        Err(e) => {
            errors.push(e);
            return ServicePhase::Failed;
        }
    };
    let target_ns = csv.namespace().unwrap_or_default();

    let examples = match templates::examples(&csv) {
        Ok(examples) => examples,
        Err(e) => {
            warn!("Operator {} ships unusable examples: {}", operand, e);
            errors.push(e);
            return ServicePhase::Failed;
        }
    };

    let mut kinds: BTreeMap<String, ServicePhase> = BTreeMap::new();
    for example in &examples {
        let Some(overrides) = service.spec_for_kind(&example.kind) else {
            continue;
        };
        let phase = match apply_example(client, request, operand, example, overrides, &target_ns).await {
            Ok(target) => {
                applied.push(ManagedResource::from(&target));
                ServicePhase::Running
            }
            Err(e) => {
                warn!("Failed to apply {} for operand {}: {}", example.kind, operand, e);
                errors.push(e);
                ServicePhase::Failed
            }
        };
        let entry = kinds.entry(example.kind.clone()).or_insert(phase);
        if phase == ServicePhase::Failed {
            *entry = ServicePhase::Failed;
        }
    }

    if kinds.is_empty() {
        ServicePhase::None
    } else if kinds.values().any(|p| *p == ServicePhase::Failed) {
        ServicePhase::Failed
    } else {
        ServicePhase::Running
    }
}

/// Create the rendered example, or update the spec of the existing object
async fn apply_example(
    client: &dyn ClusterClient,
    request: &OperandRequest,
    operand: &str,
    example: &ExampleResource,
    overrides: &serde_json::Value,
    namespace: &str,
) -> Result<ResourceRef> {
    let mut desired = example.render(operand, namespace, overrides)?;
    desired
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            labels::CREATED_BY_ANNOTATION.to_string(),
            format!(
                "{}/{}",
                request.namespace().unwrap_or_default(),
                request.name_any()
            ),
        );
    let target = ResourceRef::from_object(&desired)?;

    match client.create_resource(&desired).await? {
        CreateOutcome::Created => {
            MANAGED_RESOURCE_WRITES
                .with_label_values(&[&target.kind, "create"])
                .inc();
            info!("Created {}", target);
        }
        CreateOutcome::AlreadyExists => {
            let mut existing = client.get_resource(&target).await?.ok_or_else(|| {
                Error::KubeError(format!("{} vanished after create reported a conflict", target))
            })?;
            if !sync_spec(&mut existing, &desired) {
                debug!("{} is up to date", target);
                return Ok(target);
            }
            client.replace_resource(&existing).await?;
            MANAGED_RESOURCE_WRITES
                .with_label_values(&[&target.kind, "update"])
                .inc();
            info!("Updated {}", target);
        }
    }
    Ok(target)
}

/// Copy spec and operand labels from `desired` onto `existing`, keeping
/// everything else. Returns true when something changed.
fn sync_spec(existing: &mut DynamicObject, desired: &DynamicObject) -> bool {
    let mut changed = false;

    let wanted = desired.data.get("spec").cloned().unwrap_or_default();
    if existing.data.get("spec") != Some(&wanted) {
        match existing.data.as_object_mut() {
            Some(data) => {
                data.insert("spec".to_string(), wanted);
            }
            None => existing.data = serde_json::json!({ "spec": wanted }),
        }
        changed = true;
    }

    let wanted_labels = desired.metadata.labels.clone().unwrap_or_default();
    let current = existing.metadata.labels.get_or_insert_with(Default::default);
    if !labels::has_labels(current, &wanted_labels) {
        current.extend(wanted_labels);
        changed = true;
    }

    changed
}

/// Delete the resources recorded for `member` that no other request uses.
///
/// Another request of the same registry keeps all of them. A request reaching
/// the operand through another registry keeps those in the namespace that
/// registry installs the operand into. Deletion of each resource is confirmed
/// by polling before returning.
pub async fn teardown_operand(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    request: &OperandRequest,
    member: &MemberStatus,
    requests: &[OperandRequest],
) -> Result<()> {
    let operand = member.name.as_str();
    if member.resources.is_empty() {
        debug!("Operand {} has no recorded resources", operand);
        return Ok(());
    }

    let key = member.registry_key();
    let remaining = tracker::remaining_referents(requests, operand, request);
    if remaining.iter().any(|r| r.registry == key) {
        info!(
            "Operand {} is still referenced through {}, keeping its resources",
            operand, key
        );
        return Ok(());
    }
    let shared = shared_namespaces(client, config, operand, &remaining).await?;

    let mut errors = MultiError::new();
    for resource in &member.resources {
        let target = ResourceRef::from(resource);
        if shared.contains(&target.namespace) {
            info!("{} is still used through another registry, keeping it", target);
            continue;
        }
        if let Err(e) = delete_and_wait(client, config, operand, &target).await {
            errors.push(e);
        }
    }
    errors.into_result()
}

/// Namespaces the registries of `referents` install `operand` into
async fn shared_namespaces(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    operand: &str,
    referents: &BTreeSet<Referent>,
) -> Result<BTreeSet<String>> {
    let registries: BTreeSet<&RegistryKey> = referents.iter().map(|r| &r.registry).collect();
    let mut namespaces = BTreeSet::new();
    for key in registries {
        let Some(registry) = client.get_registry(&key.name, &key.namespace).await? else {
            continue;
        };
        if let Some(operator) = registry.spec.operator(operand) {
            namespaces.insert(install::operator_namespace(config, operator));
        }
    }
    Ok(namespaces)
}

/// Delete the operand's objects of `target`'s kind and wait until `target` is gone
async fn delete_and_wait(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    operand: &str,
    target: &ResourceRef,
) -> Result<()> {
    let Some(existing) = client.get_resource(target).await? else {
        debug!("{} already absent", target);
        return Ok(());
    };

    client
        .delete_resources(
            &target.api_version,
            &target.kind,
            &target.namespace,
            &labels::operand_selector(operand),
        )
        .await?;
    MANAGED_RESOURCE_WRITES
        .with_label_values(&[&target.kind, "delete"])
        .inc();
    info!("Waiting for {} to be deleted", target);

    wait_for_deletion(client, config, target, existing.metadata.uid.as_deref()).await?;
    info!("Deleted {}", target);
    Ok(())
}

/// Poll until `target` is absent, bounded by the configured timeout.
///
/// An object seen under a different UID than the deleted one was recreated by
/// someone else and is reported as such rather than as a timeout.
pub async fn wait_for_deletion(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    target: &ResourceRef,
    deleted_uid: Option<&str>,
) -> Result<()> {
    let deadline = Instant::now() + config.delete_poll_timeout();
    loop {
        match client.get_resource(target).await? {
            None => return Ok(()),
            Some(obj) => {
                let uid = obj.metadata.uid.as_deref();
                if deleted_uid.is_some() && uid.is_some() && uid != deleted_uid {
                    return Err(Error::DeleteRecreated {
                        kind: target.kind.clone(),
                        name: target.name.clone(),
                        namespace: target.namespace.clone(),
                    });
                }
            }
        }
        if Instant::now() >= deadline {
            return Err(Error::DeleteTimeout {
                kind: target.kind.clone(),
                name: target.name.clone(),
                namespace: target.namespace.clone(),
            });
        }
        tokio::time::sleep(config.delete_poll_interval()).await;
    }
}

/// Install phase of the operator backing `operand`, read from OLM directly
async fn member_operator_phase(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    key: &RegistryKey,
    operand: &str,
) -> Result<CsvPhase> {
    let Some(registry) = client.get_registry(&key.name, &key.namespace).await? else {
        return Ok(CsvPhase::None);
    };
    match registry.spec.operator(operand) {
        Some(operator) => install::csv_phase(client, config, operator).await,
        None => Ok(CsvPhase::None),
    }
}

fn set_conditions(status: &mut OperandRequestStatus, errors: &MultiError) {
    let now = Utc::now();
    let ready = status.phase == ServicePhase::Running;
    status.set_condition(Condition {
        type_: "Ready".to_string(),
        status: if ready { "True" } else { "False" }.to_string(),
        last_transition_time: now,
        reason: Some(status.phase.to_string()),
        message: Some(format!("OperandRequest is {}", status.phase.to_string().to_lowercase())),
    });
    status.set_condition(Condition {
        type_: "OperandsReconciled".to_string(),
        status: if errors.is_empty() { "True" } else { "False" }.to_string(),
        last_transition_time: now,
        reason: Some(
            if errors.is_empty() {
                "ReconcileSucceeded"
            } else {
                "ReconcileFailed"
            }
            .to_string(),
        ),
        message: (!errors.is_empty()).then(|| errors.to_string()),
    });
}
