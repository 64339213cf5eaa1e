//! Change intake
//!
//! Resolves every [`FieldDelta`] of a [`ChangeRequest`] against the graph:
//! the contract and its producer, the field descriptor being changed, who
//! reads the field, and which service is the source of truth for the datum
//! it carries.
//!
//! Ownership is re-checked per request even though strict loads already
//! reject conflicts, because staged loads defer them.
//!
//! Contracts whose cached snapshot is marked stale must be refreshed through
//! a [`ContractSource`] first ([`ChangeIntake::refresh`]); a stale contract
//! that was not refreshed is never trusted.

use crate::change::{ChangeRequest, DeclaredIntent, DeltaOp, FieldDelta};
use crate::error::{IntakeError, RetrievalError};
use ripple_model::{
    ContractId, Datum, FieldDescriptor, GraphModel, OwnershipResolution, ServiceName,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// External collaborator returning the current field descriptors of a contract
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ContractSource: Send + Sync {
    /// Fetch the current descriptors of `contract`
    async fn fetch(&self, contract: &ContractId) -> Result<Vec<FieldDescriptor>, RetrievalError>;
}

/// Which intake failures may be skipped instead of failing the request
///
/// Both default to `false`: partial authority resolution is unsafe unless a
/// caller asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakePolicy {
    /// Skip deltas whose datum has no unique owner
    pub allow_partial_ownership: bool,
    /// Skip deltas whose contract or field is missing or could not be retrieved
    pub allow_partial_contracts: bool,
}

impl IntakePolicy {
    /// Skip both kinds of failing delta
    #[must_use]
    pub fn partial() -> Self {
        Self {
            allow_partial_ownership: true,
            allow_partial_contracts: true,
        }
    }

    fn allows(self, err: &IntakeError) -> bool {
        match err {
            IntakeError::AmbiguousOwnership { .. } => self.allow_partial_ownership,
            IntakeError::IncompleteContract { .. } => self.allow_partial_contracts,
        }
    }
}

/// Contract snapshots fetched for stale contracts
#[derive(Debug, Clone, Default)]
pub struct SnapshotSet {
    fetched: BTreeMap<ContractId, Vec<FieldDescriptor>>,
    failed: BTreeMap<ContractId, IntakeError>,
}

impl SnapshotSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fetched snapshot
    #[must_use]
    pub fn with_snapshot(mut self, contract: ContractId, fields: Vec<FieldDescriptor>) -> Self {
        self.failed.remove(&contract);
        self.fetched.insert(contract, fields);
        self
    }

    /// Fetched descriptors of `contract`
    #[must_use]
    pub fn get(&self, contract: &ContractId) -> Option<&[FieldDescriptor]> {
        self.fetched.get(contract).map(Vec::as_slice)
    }

    /// Failed retrieval of `contract`
    #[must_use]
    pub fn failure(&self, contract: &ContractId) -> Option<&IntakeError> {
        self.failed.get(contract)
    }

    /// Number of fetched snapshots
    #[must_use]
    pub fn len(&self) -> usize {
        self.fetched.len()
    }

    /// Whether nothing was fetched
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fetched.is_empty()
    }
}

/// Who reads a field, per consumer edge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReaderSummary {
    /// Consumers declaring that they read the field
    pub readers: BTreeSet<ServiceName>,
    /// Consumers declaring a read-set without the field
    pub non_readers: BTreeSet<ServiceName>,
    /// Consumers whose read-set is unknown
    pub unknown: BTreeSet<ServiceName>,
}

impl ReaderSummary {
    fn collect(graph: &GraphModel, contract: &ContractId, field: &str) -> Self {
        let mut summary = Self::default();
        for edge in graph.consumer_edges(contract) {
            let bucket = match edge.reads_field(field) {
                Some(true) => &mut summary.readers,
                Some(false) => &mut summary.non_readers,
                None => &mut summary.unknown,
            };
            bucket.insert(edge.source.clone());
        }
        summary
    }

    /// Whether at least one consumer is known to read the field
    #[inline]
    #[must_use]
    pub fn is_read(&self) -> bool {
        !self.readers.is_empty()
    }

    /// Whether some consumer's read-set is unknown
    #[inline]
    #[must_use]
    pub fn has_unknown(&self) -> bool {
        !self.unknown.is_empty()
    }
}

/// A delta resolved against the graph
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDelta {
    /// The original delta
    pub delta: FieldDelta,
    /// Producer of the targeted contract
    pub producer: ServiceName,
    /// Descriptor of the field before the change (`None` when absent)
    pub previous: Option<FieldDescriptor>,
    /// Read-set summary over the contract's consumers
    pub readers: ReaderSummary,
    /// Datum carried by the field, if any
    pub datum: Option<Datum>,
    /// Source of truth for the change: the datum's owner, else the producer
    pub authority: ServiceName,
    /// Whether the contract declares a transition window
    pub transition_window: bool,
}

impl ResolvedDelta {
    /// Contract targeted
    #[inline]
    #[must_use]
    pub fn contract(&self) -> &ContractId {
        self.delta.contract()
    }
}

/// A delta that was skipped under a partial [`IntakePolicy`]
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedDelta {
    /// The delta
    pub delta: FieldDelta,
    /// Why it could not be resolved
    pub error: IntakeError,
}

/// Result of intake
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedChange {
    /// Resolved deltas, in request order
    pub deltas: Vec<ResolvedDelta>,
    /// Deltas skipped under a partial policy
    pub skipped: Vec<SkippedDelta>,
    /// Declared intent, carried through for comparison
    pub intent: DeclaredIntent,
}

impl ResolvedChange {
    /// Contracts touched by resolved deltas
    #[must_use]
    pub fn touched_contracts(&self) -> BTreeSet<&ContractId> {
        self.deltas.iter().map(ResolvedDelta::contract).collect()
    }

    /// Whether any delta was skipped
    #[inline]
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// Resolves change requests against a graph
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeIntake {
    policy: IntakePolicy,
}

impl ChangeIntake {
    /// Create with a policy
    #[inline]
    #[must_use]
    pub fn new(policy: IntakePolicy) -> Self {
        Self { policy }
    }

    /// Policy in effect
    #[inline]
    #[must_use]
    pub fn policy(&self) -> IntakePolicy {
        self.policy
    }

    /// Resolve using the graph's cached contract snapshots
    ///
    /// # Errors
    /// The first [`IntakeError`] the policy does not allow skipping, or the
    /// first skipped error when nothing resolved.
    pub fn resolve(
        &self,
        request: &ChangeRequest,
        graph: &GraphModel,
    ) -> Result<ResolvedChange, IntakeError> {
        self.resolve_with(request, graph, &SnapshotSet::default())
    }

    /// Resolve, preferring freshly fetched snapshots over cached descriptors
    ///
    /// # Errors
    /// As [`ChangeIntake::resolve`]
    pub fn resolve_with(
        &self,
        request: &ChangeRequest,
        graph: &GraphModel,
        snapshots: &SnapshotSet,
    ) -> Result<ResolvedChange, IntakeError> {
        let mut resolved = ResolvedChange {
            intent: request.intent,
            ..ResolvedChange::default()
        };

        for delta in &request.deltas {
            match Self::resolve_delta(delta, graph, snapshots) {
                Ok(r) => {
                    tracing::debug!(delta = %delta, authority = %r.authority, "delta resolved");
                    resolved.deltas.push(r);
                }
                Err(err) if self.policy.allows(&err) => {
                    tracing::warn!(delta = %delta, error = %err, "skipping unresolved delta");
                    resolved.skipped.push(SkippedDelta {
                        delta: delta.clone(),
                        error: err,
                    });
                }
                Err(err) => return Err(err),
            }
        }

        if resolved.deltas.is_empty() && !resolved.skipped.is_empty() {
            return Err(resolved.skipped.swap_remove(0).error);
        }

        tracing::info!(
            resolved = resolved.deltas.len(),
            skipped = resolved.skipped.len(),
            "change intake complete"
        );
        Ok(resolved)
    }

    fn resolve_delta(
        delta: &FieldDelta,
        graph: &GraphModel,
        snapshots: &SnapshotSet,
    ) -> Result<ResolvedDelta, IntakeError> {
        let contract_id = delta.contract();
        let contract = graph
            .contract(contract_id)
            .ok_or_else(|| IntakeError::unknown_contract(contract_id.clone()))?;

        let fields: &[FieldDescriptor] = match snapshots.get(contract_id) {
            Some(fresh) => fresh,
            None if contract.stale => {
                return Err(snapshots.failure(contract_id).cloned().unwrap_or_else(|| {
                    IntakeError::IncompleteContract {
                        contract: contract_id.clone(),
                        field: None,
                        reason: "cached snapshot is stale and was not refreshed".to_string(),
                    }
                }));
            }
            None => &contract.fields,
        };

        let field_name = delta.target.field.as_str();
        let previous = fields.iter().find(|f| f.name == field_name).cloned();

        let datum = match (&delta.op, &previous) {
            (DeltaOp::Add { datum, .. }, None) => datum.clone(),
            (DeltaOp::Add { datum, .. }, Some(prev)) => datum.clone().or_else(|| prev.datum.clone()),
            (DeltaOp::Remove | DeltaOp::Modify { .. }, Some(prev)) => prev.datum.clone(),
            (DeltaOp::Remove | DeltaOp::Modify { .. }, None) => {
                return Err(IntakeError::unknown_field(&delta.target));
            }
        };

        let authority = match &datum {
            None => contract.producer.clone(),
            Some(d) => match graph.owner_of(d) {
                OwnershipResolution::Unique(owner) => owner,
                OwnershipResolution::Contested(claimants) => {
                    return Err(IntakeError::AmbiguousOwnership {
                        field: delta.target.clone(),
                        datum: d.clone(),
                        claimants,
                    });
                }
                OwnershipResolution::Unclaimed => {
                    return Err(IntakeError::AmbiguousOwnership {
                        field: delta.target.clone(),
                        datum: d.clone(),
                        claimants: Vec::new(),
                    });
                }
            },
        };

        Ok(ResolvedDelta {
            delta: delta.clone(),
            producer: contract.producer.clone(),
            previous,
            readers: ReaderSummary::collect(graph, contract_id, field_name),
            datum,
            authority,
            transition_window: contract.transition_window,
        })
    }

    /// Fetch current descriptors for every stale contract the request touches
    ///
    /// Each retrieval is bounded by `timeout`. Failures are recorded in the
    /// returned set and surface as [`IntakeError::IncompleteContract`] when
    /// the request is resolved.
    pub async fn refresh(
        &self,
        request: &ChangeRequest,
        graph: &GraphModel,
        source: &dyn ContractSource,
        timeout: Duration,
    ) -> SnapshotSet {
        let stale: BTreeSet<&ContractId> = request
            .deltas
            .iter()
            .map(FieldDelta::contract)
            .filter(|id| graph.contract(id).is_some_and(|c| c.stale))
            .collect();

        let mut snapshots = SnapshotSet::new();
        for contract in stale {
            let outcome = match tokio::time::timeout(timeout, source.fetch(contract)).await {
                Ok(result) => result,
                Err(_) => Err(RetrievalError::TimedOut {
                    contract: contract.clone(),
                    elapsed: timeout,
                }),
            };
            match outcome {
                Ok(fields) => {
                    tracing::debug!(contract = %contract, fields = fields.len(), "refreshed stale contract");
                    snapshots = snapshots.with_snapshot(contract.clone(), fields);
                }
                Err(err) => {
                    tracing::warn!(contract = %contract, error = %err, "contract retrieval failed");
                    snapshots.failed.insert(contract.clone(), err.into());
                }
            }
        }
        snapshots
    }
}
