//! Resolution of an operator's install state through OLM

use tracing::debug;

use crate::adapters::ClusterClient;
use crate::config::OperatorConfig;
use crate::crd::{ClusterServiceVersion, CsvPhase, Operator, OperatorPhase, Subscription, INSTALL_MODE_CLUSTER};
use crate::Result;

/// Namespace the operator's Subscription lives in
pub fn operator_namespace(config: &OperatorConfig, operator: &Operator) -> String {
    match operator.install_mode.as_deref() {
        Some(INSTALL_MODE_CLUSTER) => config.cluster_operator_namespace.clone(),
        _ => operator.namespace.clone(),
    }
}

/// Subscription named after the operator, falling back to its package name
pub async fn find_subscription(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    operator: &Operator,
) -> Result<Option<Subscription>> {
    let namespace = operator_namespace(config, operator);
    if let Some(sub) = client.get_subscription(&operator.name, &namespace).await? {
        return Ok(Some(sub));
    }
    if operator.package_name.is_empty() || operator.package_name == operator.name {
        return Ok(None);
    }
    client
        .get_subscription(&operator.package_name, &namespace)
        .await
}

/// CSV the subscription resolved to, if it exists yet
pub async fn installed_csv(
    client: &dyn ClusterClient,
    subscription: &Subscription,
) -> Result<Option<ClusterServiceVersion>> {
    let Some(csv_name) = subscription.resolved_csv() else {
        return Ok(None);
    };
    let namespace = subscription.metadata.namespace.clone().unwrap_or_default();
    client.get_cluster_service_version(csv_name, &namespace).await
}

/// Installed CSV of an operator; `None` while the operator is not installed
pub async fn resolve_installed_csv(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    operator: &Operator,
) -> Result<Option<ClusterServiceVersion>> {
    match find_subscription(client, config, operator).await? {
        Some(sub) => installed_csv(client, &sub).await,
        None => {
            debug!(
                "No Subscription for operator {} in {}",
                operator.name,
                operator_namespace(config, operator)
            );
            Ok(None)
        }
    }
}

/// Install phase of an operator as seen by OLM, `None` when not subscribed
pub async fn csv_phase(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    operator: &Operator,
) -> Result<CsvPhase> {
    let Some(sub) = find_subscription(client, config, operator).await? else {
        return Ok(CsvPhase::None);
    };
    Ok(installed_csv(client, &sub)
        .await?
        .map(|csv| csv.phase())
        .unwrap_or(CsvPhase::Pending))
}

/// Registry-level install phase of an operator
pub async fn operator_phase(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    operator: &Operator,
) -> Result<OperatorPhase> {
    let Some(sub) = find_subscription(client, config, operator).await? else {
        return Ok(OperatorPhase::None);
    };
    Ok(match installed_csv(client, &sub).await? {
        Some(csv) => csv.phase().operator_phase(),
        None => OperatorPhase::Pending,
    })
}
