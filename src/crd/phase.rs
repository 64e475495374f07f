//! Phase vocabularies shared by the custom resources

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Phase of an operand, a request, or a configuration catalog
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ServicePhase {
    #[default]
    Init,
    Creating,
    Running,
    Updating,
    Deleting,
    Failed,
    Pending,
    None,
}

impl ServicePhase {
    /// Phases in which no periodic re-check is needed
    pub fn is_settled(self) -> bool {
        matches!(self, ServicePhase::Init | ServicePhase::Running)
    }
}

impl fmt::Display for ServicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Install phase of an operator as published by the registry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum OperatorPhase {
    #[default]
    None,
    Pending,
    Installing,
    Ready,
    Failed,
    Updating,
    Deleting,
}

impl OperatorPhase {
    /// A usable build of the operator is present in the cluster
    pub fn is_installed(self) -> bool {
        matches!(self, OperatorPhase::Ready | OperatorPhase::Updating)
    }
}

impl fmt::Display for OperatorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Phase reported by an OLM ClusterServiceVersion
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum CsvPhase {
    #[default]
    #[serde(alias = "")]
    None,
    Pending,
    InstallReady,
    Installing,
    Succeeded,
    Failed,
    Replacing,
    Deleting,
    #[serde(other)]
    Unknown,
}

impl CsvPhase {
    /// Registry-level view of this install phase
    pub fn operator_phase(self) -> OperatorPhase {
        match self {
            CsvPhase::None | CsvPhase::Pending => OperatorPhase::Pending,
            CsvPhase::InstallReady | CsvPhase::Installing => OperatorPhase::Installing,
            CsvPhase::Succeeded => OperatorPhase::Ready,
            CsvPhase::Failed | CsvPhase::Unknown => OperatorPhase::Failed,
            CsvPhase::Replacing => OperatorPhase::Updating,
            CsvPhase::Deleting => OperatorPhase::Deleting,
        }
    }

    /// Rank used when folding member phases into a request phase; higher wins
    fn precedence(self) -> u8 {
        match self {
            CsvPhase::Pending => 6,
            CsvPhase::Failed | CsvPhase::Unknown => 5,
            CsvPhase::Replacing => 4,
            CsvPhase::Deleting => 3,
            CsvPhase::Installing | CsvPhase::InstallReady => 2,
            CsvPhase::None => 1,
            CsvPhase::Succeeded => 0,
        }
    }

    /// Request phase implied by an operator in this install phase
    pub fn request_phase(self) -> ServicePhase {
        match self {
            CsvPhase::Pending => ServicePhase::Pending,
            CsvPhase::Failed | CsvPhase::Unknown => ServicePhase::Failed,
            CsvPhase::Replacing => ServicePhase::Updating,
            CsvPhase::Deleting => ServicePhase::Deleting,
            CsvPhase::Installing | CsvPhase::InstallReady => ServicePhase::Creating,
            CsvPhase::None => ServicePhase::None,
            CsvPhase::Succeeded => ServicePhase::Running,
        }
    }
}

/// Fold operator install phases into one request phase.
///
/// The highest-precedence phase observed wins; an empty input is Running.
pub fn request_phase<I>(phases: I) -> ServicePhase
where
    I: IntoIterator<Item = CsvPhase>,
{
    phases
        .into_iter()
        .max_by_key(|p| p.precedence())
        .map(CsvPhase::request_phase)
        .unwrap_or(ServicePhase::Running)
}

/// Phase of an OperandBindInfo
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum BindInfoPhase {
    #[default]
    Init,
    Completed,
    Failed,
    Waiting,
    Updating,
}

impl fmt::Display for BindInfoPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
