//! Reconciliation logic for OperandConfig resources
//!
//! The status is rebuilt from scratch on every pass; this reconciler never
//! writes managed resources.

use std::collections::BTreeMap;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::adapters::events::{self, actions, reasons};
use crate::adapters::{templates, ClusterClient, ResourceRef};
use crate::config::OperatorConfig;
use crate::crd::{OperandConfig, OperandConfigStatus, ServicePhase};
use crate::error::MultiError;
use crate::reconcilers::install;
use crate::Result;

/// Observe the managed resources of every installed operand and publish the
/// resulting status if it changed
pub async fn reconcile(
    config_catalog: &OperandConfig,
    client: &dyn ClusterClient,
    config: &OperatorConfig,
) -> Result<Action> {
    let name = config_catalog.name_any();
    let ns = config_catalog.namespace().unwrap_or_default();

    let Some(registry) = client.get_registry(&name, &ns).await? else {
        info!("OperandRegistry {}/{} not found, waiting for it", ns, name);
        events::publish(
            client,
            config_catalog,
            events::warning(
                reasons::NOT_FOUND,
                actions::RECONCILE,
                format!("NotFound OperandRegistry {} in namespace {}", name, ns),
            ),
        )
        .await;
        return Ok(Action::requeue(config.requeue_interval()));
    };

    let mut errors = MultiError::new();
    let mut service_status: BTreeMap<String, BTreeMap<String, ServicePhase>> = BTreeMap::new();

    for op in &registry.spec.operators {
        let Some(service) = config_catalog.spec.service(&op.name) else {
            continue;
        };

        if !registry
            .reported_phase(&op.name)
            .is_some_and(|phase| phase.is_installed())
        {
            debug!("Operator {} not installed yet, skipping its status", op.name);
            continue;
        }

        let csv = match install::resolve_installed_csv(client, config, op).await {
            Ok(Some(csv)) => csv,
            Ok(None) => {
                debug!("No installed ClusterServiceVersion for {} yet", op.name);
                continue;
            }
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        let csv_ns = csv.namespace().unwrap_or_default();

        let examples = match templates::examples(&csv) {
            Ok(examples) => examples,
            Err(e) => {
                warn!("Skipping {}: {}", op.name, e);
                errors.push(e);
                continue;
            }
        };

        let kinds = service_status.entry(op.name.clone()).or_default();
        for example in examples {
            if !service.declares_kind(&example.kind) || example.name.is_empty() {
                continue;
            }
            let target = ResourceRef::new(
                example.api_version.clone(),
                example.kind.clone(),
                example.name.clone(),
                csv_ns.clone(),
            );
            match client.get_resource(&target).await {
                Ok(Some(_)) => {
                    kinds.insert(example.kind.clone(), ServicePhase::Running);
                }
                // Creation belongs to the request controller
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to look up {}: {}", target, e);
                    kinds.insert(example.kind.clone(), ServicePhase::Failed);
                }
            }
        }
    }

    let mut status = OperandConfigStatus {
        phase: ServicePhase::Init,
        service_status,
    };
    status.phase = status.aggregate_phase();

    if config_catalog.status.as_ref() != Some(&status) {
        client.patch_config_status(&name, &ns, &status).await?;
        info!("Updated status for OperandConfig {}/{}: phase={}", ns, name, status.phase);
    }

    errors.into_result()?;

    if status.phase.is_settled() {
        Ok(Action::await_change())
    } else {
        debug!("Waiting for all the services of {}/{} to be deployed", ns, name);
        Ok(Action::requeue(config.requeue_interval()))
    }
}
