//! Error types for the graph model
//!
//! - [`GraphIntegrityError`]: structural violations found while loading
//! - [`DocumentError`]: malformed graph/system-map documents

use crate::ids::{ContractId, Datum, ServiceName};

/// Structural violation found while loading a graph
///
/// Always fatal: no analysis runs over a graph that failed to load, since a
/// partial graph produces silently wrong impact sets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphIntegrityError {
    /// Two services share a name
    #[error("duplicate service: {0}")]
    DuplicateService(ServiceName),

    /// Two fields of one contract share a name
    #[error("duplicate field '{field}' in contract {contract}")]
    DuplicateField {
        /// Contract declaring the field twice
        contract: ContractId,
        /// Repeated field name
        field: String,
    },

    /// A contract is declared by more than one producer
    #[error("contract {contract} has more than one producer: {first} and {second}")]
    DuplicateProducer {
        /// Contract declared twice
        contract: ContractId,
        /// First declaring producer
        first: ServiceName,
        /// Second declaring producer
        second: ServiceName,
    },

    /// A contract's producer is not a loaded service
    #[error("orphan contract {contract}: producer {producer} does not exist")]
    OrphanContract {
        /// Orphaned contract
        contract: ContractId,
        /// Missing producer
        producer: ServiceName,
    },

    /// A service lists a listening contract it does not produce
    #[error("service {service} declares contract {contract} it does not produce")]
    UndeclaredContract {
        /// Declaring service
        service: ServiceName,
        /// Contract not produced by it
        contract: ContractId,
    },

    /// Edge endpoint missing
    #[error("dangling edge {from} -> {to}: {missing} does not exist")]
    DanglingEdge {
        /// Consumer side
        from: ServiceName,
        /// Producer side
        to: ServiceName,
        /// The endpoint that is missing
        missing: ServiceName,
    },

    /// Edge names a contract that is not in the graph
    #[error("edge {from} -> {to} references unknown contract {contract}")]
    UnknownContract {
        /// Consumer side
        from: ServiceName,
        /// Producer side
        to: ServiceName,
        /// Unknown contract
        contract: ContractId,
    },

    /// Edge names a contract produced by some other service
    #[error("edge {from} -> {to}: contract {contract} is produced by {producer}, not {to}")]
    ContractNotOnTarget {
        /// Consumer side
        from: ServiceName,
        /// Producer side as declared on the edge
        to: ServiceName,
        /// Contract
        contract: ContractId,
        /// Actual producer
        producer: ServiceName,
    },

    /// A service consumes its own contract
    #[error("service {service} depends on its own contract {contract}")]
    SelfDependency {
        /// The service
        service: ServiceName,
        /// The contract
        contract: ContractId,
    },

    /// Edge read-set names a field the contract does not have
    #[error("edge {from} -> {to} reads unknown field {contract}.{field}")]
    UnknownReadField {
        /// Consumer side
        from: ServiceName,
        /// Producer side
        to: ServiceName,
        /// Contract
        contract: ContractId,
        /// Unknown field
        field: String,
    },

    /// Several services claim write-ownership of one datum
    #[error("datum {datum} is owned by several services without a precedence rule: {claimants:?}")]
    DuplicateOwnership {
        /// Contested datum
        datum: Datum,
        /// All claimants, sorted
        claimants: Vec<ServiceName>,
    },

    /// Precedence rule does not resolve a real conflict
    #[error("invalid precedence rule for datum {datum}: {owner} is not a claimant")]
    InvalidPrecedence {
        /// Datum named by the rule
        datum: Datum,
        /// Owner named by the rule
        owner: ServiceName,
    },

    /// A field carries a datum nobody owns
    #[error("field {contract}.{field} carries datum {datum} that no service owns")]
    UnownedDatum {
        /// Contract
        contract: ContractId,
        /// Field
        field: String,
        /// Unowned datum
        datum: Datum,
    },
}

impl GraphIntegrityError {
    /// Short machine-readable category
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateService(_) => "duplicate_service",
            Self::DuplicateField { .. } => "duplicate_field",
            Self::DuplicateProducer { .. } => "duplicate_producer",
            Self::OrphanContract { .. } => "orphan_contract",
            Self::UndeclaredContract { .. } => "undeclared_contract",
            Self::DanglingEdge { .. } => "dangling_edge",
            Self::UnknownContract { .. } => "unknown_contract",
            Self::ContractNotOnTarget { .. } => "contract_not_on_target",
            Self::SelfDependency { .. } => "self_dependency",
            Self::UnknownReadField { .. } => "unknown_read_field",
            Self::DuplicateOwnership { .. } => "duplicate_ownership",
            Self::InvalidPrecedence { .. } => "invalid_precedence",
            Self::UnownedDatum { .. } => "unowned_datum",
        }
    }
}

/// Errors reading graph or system-map documents
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// JSON syntax or shape error
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML syntax or shape error
    #[error("invalid YAML document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Document parsed but failed structural validation
    #[error("graph integrity: {0}")]
    Integrity(#[from] GraphIntegrityError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_error_names_offender() {
        let err = GraphIntegrityError::DanglingEdge {
            from: "order-service".into(),
            to: "ghost-service".into(),
            missing: "ghost-service".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("order-service -> ghost-service"));
        assert_eq!(err.kind(), "dangling_edge");
    }

    #[test]
    fn duplicate_ownership_lists_claimants() {
        let err = GraphIntegrityError::DuplicateOwnership {
            datum: "accountBalance".into(),
            claimants: vec!["ledger-service".into(), "wallet-service".into()],
        };
        assert!(err.to_string().contains("accountBalance"));
        assert!(err.to_string().contains("wallet-service"));
    }
}
