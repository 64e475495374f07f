//! Error types for the Operand Lifecycle Operator

use std::fmt;

use thiserror::Error;

/// Result type for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the operator
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(String),

    /// Operator configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Malformed input to the spec merge
    #[error("Merge error: {0}")]
    MergeError(String),

    /// Malformed alm-examples payload or example resource
    #[error("Template error: {0}")]
    TemplateError(String),

    /// A declared dependency (registry, config, operator) does not exist
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// Deleted resource was still present when the poll bound expired
    #[error("Timed out waiting for {kind} {namespace}/{name} to be deleted")]
    DeleteTimeout {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Deleted resource reappeared under a new UID while polling
    #[error("{kind} {namespace}/{name} was recreated while waiting for its deletion")]
    DeleteRecreated {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Several independent failures collected during one reconcile
    #[error("{0}")]
    Aggregate(MultiError),

    /// Finalizer error
    #[error("Finalizer error: {0}")]
    FinalizerError(Box<kube::runtime::finalizer::Error<Error>>),
}

impl Error {
    /// Permanent data errors are not fixed by retrying soon
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Error::MergeError(_) | Error::TemplateError(_) | Error::ValidationError(_)
        )
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::KubeError(err.to_string())
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(err))
    }
}

/// Collects per-item failures so that one bad operand never blocks its siblings
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: Error) {
        match err {
            Error::Aggregate(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// `Ok(())` when nothing failed, otherwise the collected errors
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(f, "{} error(s): [{}]", self.errors.len(), messages.join("; "))
    }
}
