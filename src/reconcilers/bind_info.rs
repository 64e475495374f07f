//! Reconciliation logic for OperandBindInfo resources
//!
//! Public secrets and config maps of an operand are copied into the namespace
//! of every request that consumes the operand.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::adapters::events::{self, actions, reasons};
use crate::adapters::{secrets, ClusterClient, CreateOutcome};
use crate::config::OperatorConfig;
use crate::crd::{
    BindInfoPhase, Operand, OperandBindInfo, OperandBindInfoStatus, OperandRequest,
};
use crate::error::MultiError;
use crate::metrics::prometheus::MANAGED_RESOURCE_WRITES;
use crate::reconcilers::tracker;
use crate::{Error, Result};

/// Outcome of syncing the bindings into one namespace
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyncOutcome {
    Synced,
    /// A source secret or config map does not exist yet
    SourceMissing,
}

/// Replicate the public bindings into every consuming namespace and publish
/// the resulting status
pub async fn reconcile(
    bind_info: &OperandBindInfo,
    client: &dyn ClusterClient,
    config: &OperatorConfig,
) -> Result<Action> {
    let name = bind_info.name_any();
    let ns = bind_info.namespace().unwrap_or_default();
    let operand = bind_info.spec.operand.as_str();
    let key = bind_info.registry_key();

    let Some(registry) = client.get_registry(&key.name, &key.namespace).await? else {
        info!("OperandRegistry {} not found, waiting for it", key);
        events::publish(
            client,
            bind_info,
            events::warning(
                reasons::NOT_FOUND,
                actions::RECONCILE,
                format!("NotFound OperandRegistry {} in namespace {}", key.name, key.namespace),
            ),
        )
        .await;
        publish_status(bind_info, client, BindInfoPhase::Waiting, Vec::new()).await?;
        return Ok(Action::requeue(config.requeue_interval()));
    };

    if !registry
        .reported_phase(operand)
        .is_some_and(|phase| phase.is_installed())
    {
        debug!("Operand {} not installed yet, nothing to share", operand);
        publish_status(bind_info, client, BindInfoPhase::Waiting, Vec::new()).await?;
        return Ok(Action::requeue(config.requeue_interval()));
    }

    let requests = client.list_requests().await?;
    let mut errors = MultiError::new();
    let mut synced = BTreeSet::new();
    let mut waiting = false;

    for referent in tracker::referents_via(&requests, operand, &key) {
        if referent.namespace == ns {
            continue;
        }
        let Some(request) = requests.iter().find(|r| {
            r.name_any() == referent.request
                && r.namespace().as_deref() == Some(referent.namespace.as_str())
        }) else {
            continue;
        };
        let Some((_, declared)) = request
            .declared_operands()
            .find(|(k, op)| op.name == operand && k == &key)
        else {
            continue;
        };

        match sync_namespace(client, bind_info, request, declared).await {
            Ok(SyncOutcome::Synced) => {
                synced.insert(referent.namespace.clone());
            }
            Ok(SyncOutcome::SourceMissing) => waiting = true,
            Err(e) => {
                warn!(
                    "Failed to share {} bindings with {}: {}",
                    operand, referent.namespace, e
                );
                errors.push(e);
            }
        }
    }

    let phase = if !errors.is_empty() {
        BindInfoPhase::Failed
    } else if waiting {
        BindInfoPhase::Waiting
    } else {
        BindInfoPhase::Completed
    };
    publish_status(bind_info, client, phase, synced.into_iter().collect()).await?;

    if !errors.is_empty() {
        events::publish(
            client,
            bind_info,
            events::warning(reasons::COPY_FAILED, actions::COPY, errors.to_string()),
        )
        .await;
    }
    errors.into_result()?;

    if waiting {
        Ok(Action::requeue(config.requeue_interval()))
    } else {
        Ok(Action::await_change())
    }
}

async fn publish_status(
    bind_info: &OperandBindInfo,
    client: &dyn ClusterClient,
    phase: BindInfoPhase,
    request_namespaces: Vec<String>,
) -> Result<()> {
    let status = OperandBindInfoStatus {
        phase,
        request_namespaces,
    };
    if bind_info.status.as_ref() == Some(&status) {
        return Ok(());
    }
    let name = bind_info.name_any();
    let ns = bind_info.namespace().unwrap_or_default();
    client.patch_bind_info_status(&name, &ns, &status).await?;
    info!("Updated status for OperandBindInfo {}/{}: phase={}", ns, name, status.phase);
    Ok(())
}

/// Copy every public binding into the namespace of `request`
async fn sync_namespace(
    client: &dyn ClusterClient,
    bind_info: &OperandBindInfo,
    request: &OperandRequest,
    declared: &Operand,
) -> Result<SyncOutcome> {
    let source_ns = bind_info.namespace().unwrap_or_default();
    let target_ns = request.namespace().unwrap_or_default();
    let owner = request.controller_owner_ref(&());
    let origin = format!("{}/{}", source_ns, bind_info.name_any());

    let mut outcome = SyncOutcome::Synced;
    let mut errors = MultiError::new();

    for (scope, binding) in bind_info.public_bindings() {
        let local = declared.bindings.get(scope);

        if let Some(source_name) = &binding.secret {
            let target = target_name(source_name, local.and_then(|l| l.secret.as_ref()));
            match client.get_secret(source_name, &source_ns).await {
                Ok(Some(source)) => {
                    let copy = secrets::secret_copy(&source, target, &target_ns, owner.clone(), &origin);
                    if let Err(e) = upsert_secret(client, copy).await {
                        errors.push(e);
                    }
                }
                Ok(None) => {
                    source_missing(client, bind_info, "Secret", source_name, &source_ns).await;
                    outcome = SyncOutcome::SourceMissing;
                }
                Err(e) => errors.push(e),
            }
        }

        if let Some(source_name) = &binding.configmap {
            let target = target_name(source_name, local.and_then(|l| l.configmap.as_ref()));
            match client.get_config_map(source_name, &source_ns).await {
                Ok(Some(source)) => {
                    let copy =
                        secrets::config_map_copy(&source, target, &target_ns, owner.clone(), &origin);
                    if let Err(e) = upsert_config_map(client, copy).await {
                        errors.push(e);
                    }
                }
                Ok(None) => {
                    source_missing(client, bind_info, "ConfigMap", source_name, &source_ns).await;
                    outcome = SyncOutcome::SourceMissing;
                }
                Err(e) => errors.push(e),
            }
        }
    }

    errors.into_result()?;
    Ok(outcome)
}

/// Local name for a copy: the request's override when it gives one
fn target_name<'a>(source: &'a str, local: Option<&'a String>) -> &'a str {
    local
        .map(String::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or(source)
}

async fn source_missing(
    client: &dyn ClusterClient,
    bind_info: &OperandBindInfo,
    kind: &str,
    name: &str,
    namespace: &str,
) {
    info!("{} {}/{} not found, waiting for it", kind, namespace, name);
    events::publish(
        client,
        bind_info,
        events::warning(
            reasons::NOT_FOUND,
            actions::COPY,
            format!("NotFound {} {} in namespace {}", kind, name, namespace),
        ),
    )
    .await;
}

async fn upsert_secret(client: &dyn ClusterClient, desired: Secret) -> Result<()> {
    let name = desired.metadata.name.clone().unwrap_or_default();
    let ns = desired.metadata.namespace.clone().unwrap_or_default();
    match client.create_secret(&desired).await? {
        CreateOutcome::Created => {
            MANAGED_RESOURCE_WRITES.with_label_values(&["Secret", "create"]).inc();
            info!("Copied Secret {}/{}", ns, name);
        }
        CreateOutcome::AlreadyExists => {
            let Some(mut existing) = client.get_secret(&name, &ns).await? else {
                return Err(Error::KubeError(format!(
                    "Secret {}/{} vanished after create reported a conflict",
                    ns, name
                )));
            };
            if secrets::sync_secret(&mut existing, &desired) {
                client.replace_secret(&existing).await?;
                MANAGED_RESOURCE_WRITES.with_label_values(&["Secret", "update"]).inc();
                info!("Updated Secret {}/{}", ns, name);
            }
        }
    }
    Ok(())
}

async fn upsert_config_map(
    client: &dyn ClusterClient,
    desired: ConfigMap,
) -> Result<()> {
    let name = desired.metadata.name.clone().unwrap_or_default();
    let ns = desired.metadata.namespace.clone().unwrap_or_default();
    match client.create_config_map(&desired).await? {
        CreateOutcome::Created => {
            MANAGED_RESOURCE_WRITES.with_label_values(&["ConfigMap", "create"]).inc();
            info!("Copied ConfigMap {}/{}", ns, name);
        }
        CreateOutcome::AlreadyExists => {
            let Some(mut existing) = client.get_config_map(&name, &ns).await? else {
                return Err(Error::KubeError(format!(
                    "ConfigMap {}/{} vanished after create reported a conflict",
                    ns, name
                )));
            };
            if secrets::sync_config_map(&mut existing, &desired) {
                client.replace_config_map(&existing).await?;
                MANAGED_RESOURCE_WRITES.with_label_values(&["ConfigMap", "update"]).inc();
                info!("Updated ConfigMap {}/{}", ns, name);
            }
        }
    }
    Ok(())
}
