//! Controller implementations for watching and reconciling resources

pub mod bind_info_controller;
pub mod config_controller;
pub mod registry_controller;
pub mod request_controller;

use kube::runtime::controller::Action;
use kube::runtime::finalizer;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{ClusterClient, KubeClusterClient};
use crate::config::OperatorConfig;
use crate::Error;

/// Shared context for controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Cluster access used by the reconcilers
    pub cluster: Arc<dyn ClusterClient>,
    /// Operator configuration
    pub config: OperatorConfig,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, config: OperatorConfig) -> Arc<Self> {
        let cluster = Arc::new(KubeClusterClient::new(client.clone(), &config.field_manager));
        Arc::new(Self {
            client,
            cluster,
            config,
        })
    }
}

/// Requeue delay after a failed reconcile, by error type
pub(crate) fn backoff(err: &Error) -> Action {
    match err {
        Error::KubeError(_) => Action::requeue(Duration::from_secs(30)),
        Error::ConfigError(_) => Action::requeue(Duration::from_secs(300)),
        e if e.is_data_error() => Action::requeue(Duration::from_secs(300)),
        Error::Aggregate(errors) if errors.errors().iter().all(Error::is_data_error) => {
            Action::requeue(Duration::from_secs(300))
        }
        Error::FinalizerError(inner) => match inner.as_ref() {
            finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => backoff(e),
            _ => Action::requeue(Duration::from_secs(30)),
        },
        _ => Action::requeue(Duration::from_secs(60)),
    }
}
