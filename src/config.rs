//! Operator-level configuration
//!
//! Every field has a default so the operator runs without a config file. When
//! `OPERAND_OPERATOR_CONFIG` names a YAML file, values from it override the
//! defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable naming the optional YAML config file
pub const CONFIG_PATH_ENV: &str = "OPERAND_OPERATOR_CONFIG";

/// Operator configuration
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Delay before re-checking an object whose phase is not yet settled
    pub requeue_interval_secs: u64,

    /// Interval between checks that a deleted managed resource is gone
    pub delete_poll_interval_ms: u64,

    /// Upper bound on waiting for a managed resource deletion
    pub delete_poll_timeout_ms: u64,

    /// Namespace holding operators installed in cluster-wide mode
    pub cluster_operator_namespace: String,

    /// Port of the metrics / health HTTP server
    pub metrics_port: u16,

    /// Field manager and event reporter name
    pub field_manager: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            requeue_interval_secs: 20,
            delete_poll_interval_ms: 20_000,
            delete_poll_timeout_ms: 600_000,
            cluster_operator_namespace: "openshift-operators".to_string(),
            metrics_port: 8080,
            field_manager: "operand-lifecycle-operator".to_string(),
        }
    }
}

impl OperatorConfig {
    /// Load from the file named by `OPERAND_OPERATOR_CONFIG`, or use defaults
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: OperatorConfig = serde_yaml::from_str(raw)
            .map_err(|e| Error::ConfigError(format!("Invalid operator config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.delete_poll_interval_ms == 0 {
            return Err(Error::ConfigError(
                "deletePollIntervalMs must be >= 1".to_string(),
            ));
        }
        if self.delete_poll_timeout_ms < self.delete_poll_interval_ms {
            return Err(Error::ConfigError(
                "deletePollTimeoutMs must be >= deletePollIntervalMs".to_string(),
            ));
        }
        if self.cluster_operator_namespace.is_empty() {
            return Err(Error::ConfigError(
                "clusterOperatorNamespace cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    pub fn delete_poll_interval(&self) -> Duration {
        Duration::from_millis(self.delete_poll_interval_ms)
    }

    pub fn delete_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.delete_poll_timeout_ms)
    }
}
