//! Error types for impact analysis
//!
//! Two families, mirroring how a caller should react:
//! - "cannot analyze, fix the model": [`GraphIntegrityError`], [`IntakeError`]
//! - "analysis did not finish": [`AnalysisError::Timeout`], [`AnalysisError::Cancelled`]
//!
//! [`CycleDetectedError`] is only fatal for rollout planning; the pipeline
//! turns it into a report flag.

use ripple_model::{ContractId, Datum, DocumentError, FieldRef, GraphIntegrityError, ServiceName};
use std::time::Duration;

/// Failure to resolve a change request against the graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    /// The datum touched by a delta has no unique source of truth
    #[error("ambiguous ownership of datum {datum} touched by {field}: {}", describe_claimants(.claimants))]
    AmbiguousOwnership {
        /// Field the delta targets
        field: FieldRef,
        /// Datum carried by the field
        datum: Datum,
        /// Services claiming the datum (empty when unclaimed)
        claimants: Vec<ServiceName>,
    },

    /// The referenced contract or field is not modeled, or could not be retrieved
    #[error("incomplete contract {contract}: {reason}")]
    IncompleteContract {
        /// Contract concerned
        contract: ContractId,
        /// Field concerned, if any
        field: Option<String>,
        /// What is missing
        reason: String,
    },
}

fn describe_claimants(claimants: &[ServiceName]) -> String {
    if claimants.is_empty() {
        return "no owner".to_string();
    }
    let names: Vec<&str> = claimants.iter().map(ServiceName::as_str).collect();
    format!("claimed by {}", names.join(", "))
}

impl IntakeError {
    /// Missing contract
    #[must_use]
    pub fn unknown_contract(contract: ContractId) -> Self {
        Self::IncompleteContract {
            contract,
            field: None,
            reason: "contract not present in graph".to_string(),
        }
    }

    /// Missing field on an existing contract
    #[must_use]
    pub fn unknown_field(target: &FieldRef) -> Self {
        Self::IncompleteContract {
            contract: target.contract.clone(),
            field: Some(target.field.clone()),
            reason: format!("field '{}' not present on contract", target.field),
        }
    }

    /// Contract the error refers to
    #[must_use]
    pub fn contract(&self) -> &ContractId {
        match self {
            Self::AmbiguousOwnership { field, .. } => &field.contract,
            Self::IncompleteContract { contract, .. } => contract,
        }
    }

    /// Short machine-readable kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AmbiguousOwnership { .. } => "ambiguous_ownership",
            Self::IncompleteContract { .. } => "incomplete_contract",
        }
    }
}

/// Failure of the external contract-retrieval collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrievalError {
    /// The source does not know the contract
    #[error("contract {0} not found by source")]
    NotFound(ContractId),

    /// The source failed
    #[error("retrieval of {contract} failed: {message}")]
    Failed {
        /// Contract requested
        contract: ContractId,
        /// Source-specific message
        message: String,
    },

    /// The source did not answer in time
    #[error("retrieval of {contract} timed out after {elapsed:?}")]
    TimedOut {
        /// Contract requested
        contract: ContractId,
        /// Configured limit
        elapsed: Duration,
    },
}

impl RetrievalError {
    /// Contract the retrieval was for
    #[must_use]
    pub fn contract(&self) -> &ContractId {
        match self {
            Self::NotFound(contract)
            | Self::Failed { contract, .. }
            | Self::TimedOut { contract, .. } => contract,
        }
    }
}

impl From<RetrievalError> for IntakeError {
    fn from(err: RetrievalError) -> Self {
        Self::IncompleteContract {
            contract: err.contract().clone(),
            field: None,
            reason: err.to_string(),
        }
    }
}

/// Blocking dependencies among the services to roll out form a cycle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("blocking dependency cycle: {}", render_cycle(.cycle))]
pub struct CycleDetectedError {
    /// Minimal cycle in consumption order: each service consumes the next
    /// one's contract and the last consumes the first's
    pub cycle: Vec<ServiceName>,
}

fn render_cycle(cycle: &[ServiceName]) -> String {
    let mut names: Vec<&str> = cycle.iter().map(ServiceName::as_str).collect();
    if let Some(first) = names.first().copied() {
        names.push(first);
    }
    names.join(" -> ")
}

/// Invalid or unreadable configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML syntax or shape error
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML syntax or shape error
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Unrecognised file extension
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// Values out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Malformed change document
#[derive(Debug, thiserror::Error)]
pub enum ChangeDocumentError {
    /// JSON syntax or shape error
    #[error("invalid change document JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML syntax or shape error
    #[error("invalid change document YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An `add` without a type
    #[error("add of {0} does not declare a type")]
    MissingType(FieldRef),
}

/// Any failure of an analysis run
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Graph failed to load
    #[error(transparent)]
    Integrity(#[from] GraphIntegrityError),

    /// Graph document failed to parse or load
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Change document failed to parse
    #[error(transparent)]
    ChangeDocument(#[from] ChangeDocumentError),

    /// Change could not be resolved
    #[error(transparent)]
    Intake(#[from] IntakeError),

    /// Run exceeded its deadline; partial results were discarded
    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),

    /// Run was cancelled; partial results were discarded
    #[error("analysis cancelled")]
    Cancelled,

    /// Blocking worker failed
    #[error("analysis worker failed: {0}")]
    Worker(String),
}

impl AnalysisError {
    /// Whether the run failed because of the model or the request
    /// ("cannot analyze, fix the model") rather than because it did not finish
    #[must_use]
    pub fn is_model_error(&self) -> bool {
        matches!(
            self,
            Self::Integrity(_) | Self::Document(_) | Self::ChangeDocument(_) | Self::Intake(_)
        )
    }
}

/// Result alias for analysis runs
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_renders_closed_loop() {
        let err = CycleDetectedError {
            cycle: vec!["A".into(), "B".into(), "C".into()],
        };
        assert_eq!(err.to_string(), "blocking dependency cycle: A -> B -> C -> A");
    }

    #[test]
    fn retrieval_failure_becomes_incomplete_contract() {
        let err: IntakeError = RetrievalError::TimedOut {
            contract: "UserProfile".into(),
            elapsed: Duration::from_millis(50),
        }
        .into();
        assert_eq!(err.kind(), "incomplete_contract");
        assert_eq!(err.contract().as_str(), "UserProfile");
    }

    #[test]
    fn ambiguous_ownership_names_claimants() {
        let err = IntakeError::AmbiguousOwnership {
            field: "Ledger.balance".parse().unwrap(),
            datum: "accountBalance".into(),
            claimants: vec!["ledger-service".into(), "wallet-service".into()],
        };
        let text = err.to_string();
        assert!(text.contains("ledger-service, wallet-service"));
    }

    #[test]
    fn model_errors_are_distinguished_from_interruptions() {
        assert!(AnalysisError::from(IntakeError::unknown_contract("Inventory".into())).is_model_error());
        assert!(!AnalysisError::Timeout(Duration::from_secs(1)).is_model_error());
        assert!(!AnalysisError::Cancelled.is_model_error());
    }
}
