//! Impact report
//!
//! The structured, serializable result of an analysis run. It is the only
//! artifact handed to the external report writer; assembling it is a pure
//! transformation with no I/O.

use crate::change::DeclaredIntent;
use crate::compat::{ClassifiedChange, ClassifiedDelta, CompatibilityClass, Rule};
use crate::error::{CycleDetectedError, IntakeError};
use crate::intake::ResolvedChange;
use crate::planner::{RolloutPlan, RolloutStage};
use crate::traversal::{ImpactEntry, ImpactSet};
use ripple_model::{ContractId, Datum, FieldRef, GraphIntegrityError, GraphModel, ServiceName};
use serde::Serialize;

/// Something a human has to look at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "flag")]
pub enum Flag {
    /// A touched contract could not be classified with confidence
    AmbiguousClassification {
        /// Contract
        contract: ContractId,
        /// Fields whose deltas were ambiguous
        fields: Vec<FieldRef>,
    },
    /// Blocking dependencies form a cycle; no rollout order was produced
    CycleDetected {
        /// Minimal cycle in consumption order
        cycle: Vec<ServiceName>,
    },
    /// Compatibility bridges contradicted the blocking order and were
    /// dropped; the listed contracts roll out producer first
    BridgeConflict {
        /// Contracts whose bridge was dropped
        contracts: Vec<ContractId>,
        /// Loop the bridges closed, in deploy-before order
        services: Vec<ServiceName>,
    },
    /// A datum has no unique source of truth
    UnresolvedOwnership {
        /// Field whose delta was skipped, if the issue came from the request
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<FieldRef>,
        /// Datum
        datum: Datum,
        /// Claimants (empty when unclaimed)
        claimants: Vec<ServiceName>,
    },
    /// A delta was skipped because its contract is incomplete
    IncompleteContract {
        /// Contract
        contract: ContractId,
        /// Field, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        /// What is missing
        reason: String,
    },
    /// Breaking or ambiguous change without a declared transition window
    CompatibilityViolation {
        /// Contract
        contract: ContractId,
        /// Its class
        class: CompatibilityClass,
    },
    /// A field was deprecated
    DeprecationWarning {
        /// Field
        field: FieldRef,
        /// Annotation
        message: String,
    },
    /// Declared intent contradicts the computed class
    IntentMismatch {
        /// What the requester claimed
        declared: DeclaredIntent,
        /// What classification found
        computed: CompatibilityClass,
    },
}

impl Flag {
    /// Flag name as serialized
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AmbiguousClassification { .. } => "AmbiguousClassification",
            Self::CycleDetected { .. } => "CycleDetected",
            Self::BridgeConflict { .. } => "BridgeConflict",
            Self::UnresolvedOwnership { .. } => "UnresolvedOwnership",
            Self::IncompleteContract { .. } => "IncompleteContract",
            Self::CompatibilityViolation { .. } => "CompatibilityViolation",
            Self::DeprecationWarning { .. } => "DeprecationWarning",
            Self::IntentMismatch { .. } => "IntentMismatch",
        }
    }
}

/// Per-contract section of the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchedContractReport {
    /// Contract
    pub contract: ContractId,
    /// Producer
    pub producer: ServiceName,
    /// Most severe delta class
    pub class: CompatibilityClass,
    /// Whether consumers must move first
    pub retracts: bool,
    /// Declared transition window
    pub transition_window: bool,
    /// Per-delta verdicts
    pub deltas: Vec<ClassifiedDelta>,
}

/// Result of an analysis run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactReport {
    /// Fingerprint of the graph snapshot analyzed
    pub graph_fingerprint: String,
    /// Revision marker of that snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_revision: Option<String>,
    /// Declared intent of the request
    pub declared_intent: DeclaredIntent,
    /// Most severe class over the request
    pub overall_class: CompatibilityClass,
    /// Touched contracts
    pub touched_contracts: Vec<TouchedContractReport>,
    /// Impacted services
    pub impact_set: Vec<ImpactEntry>,
    /// Rollout order (empty when a cycle was detected)
    pub rollout_stages: Vec<RolloutStage>,
    /// Flags
    pub flags: Vec<Flag>,
}

impl ImpactReport {
    /// Whether a human has to decide the staging: the order could not be
    /// computed or had to drop a bridge, or some change could not be
    /// classified
    #[must_use]
    pub fn requires_manual_staging(&self) -> bool {
        self.flags.iter().any(|f| {
            matches!(
                f,
                Flag::CycleDetected { .. }
                    | Flag::BridgeConflict { .. }
                    | Flag::AmbiguousClassification { .. }
            )
        })
    }

    /// Whether a flag of `kind` is present
    #[must_use]
    pub fn has_flag(&self, kind: &str) -> bool {
        self.flags.iter().any(|f| f.kind() == kind)
    }

    /// Entry for `service`
    #[must_use]
    pub fn impact_of(&self, service: &str) -> Option<&ImpactEntry> {
        self.impact_set.iter().find(|e| e.service.as_str() == service)
    }

    /// Pretty JSON
    ///
    /// # Errors
    /// Serialization failure
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Packages stage results into an [`ImpactReport`]
#[derive(Debug, Clone, Copy)]
pub struct ReportAssembler<'g> {
    graph: &'g GraphModel,
}

impl<'g> ReportAssembler<'g> {
    /// Assembler for reports over `graph`
    #[inline]
    #[must_use]
    pub fn new(graph: &'g GraphModel) -> Self {
        Self { graph }
    }

    /// Build the report
    #[must_use]
    pub fn assemble(
        &self,
        resolved: &ResolvedChange,
        classified: &ClassifiedChange,
        impact: &ImpactSet,
        plan: Result<&RolloutPlan, &CycleDetectedError>,
    ) -> ImpactReport {
        let overall = classified.overall();
        let mut flags = Vec::new();

        if overall.contradicts(resolved.intent) {
            flags.push(Flag::IntentMismatch {
                declared: resolved.intent,
                computed: overall,
            });
        }

        for contract in &classified.contracts {
            let ambiguous: Vec<FieldRef> = contract
                .deltas
                .iter()
                .filter(|d| d.verdict.class == CompatibilityClass::Ambiguous)
                .map(|d| d.field.clone())
                .collect();
            if !ambiguous.is_empty() {
                flags.push(Flag::AmbiguousClassification {
                    contract: contract.contract.clone(),
                    fields: ambiguous,
                });
            }
            if contract.class != CompatibilityClass::Additive && !contract.transition_window {
                flags.push(Flag::CompatibilityViolation {
                    contract: contract.contract.clone(),
                    class: contract.class,
                });
            }
            for delta in &contract.deltas {
                if let (Rule::DeprecationOnly, Some(message)) = (delta.verdict.rule, &delta.verdict.warning) {
                    flags.push(Flag::DeprecationWarning {
                        field: delta.field.clone(),
                        message: message.clone(),
                    });
                }
            }
        }

        for skipped in &resolved.skipped {
            flags.push(match &skipped.error {
                IntakeError::AmbiguousOwnership {
                    field,
                    datum,
                    claimants,
                } => Flag::UnresolvedOwnership {
                    field: Some(field.clone()),
                    datum: datum.clone(),
                    claimants: claimants.clone(),
                },
                IntakeError::IncompleteContract {
                    contract,
                    field,
                    reason,
                } => Flag::IncompleteContract {
                    contract: contract.clone(),
                    field: field.clone(),
                    reason: reason.clone(),
                },
            });
        }

        for issue in self.graph.deferred_issues() {
            if let GraphIntegrityError::DuplicateOwnership { datum, claimants } = issue {
                flags.push(Flag::UnresolvedOwnership {
                    field: None,
                    datum: datum.clone(),
                    claimants: claimants.clone(),
                });
            }
        }

        let rollout_stages = match plan {
            Ok(plan) => {
                flags.extend(plan.conflicts.iter().map(|c| Flag::BridgeConflict {
                    contracts: c.contracts.clone(),
                    services: c.services.clone(),
                }));
                plan.stages.clone()
            }
            Err(cycle) => {
                flags.push(Flag::CycleDetected {
                    cycle: cycle.cycle.clone(),
                });
                Vec::new()
            }
        };

        for flag in &flags {
            tracing::warn!(flag = flag.kind(), "report flag raised");
        }

        ImpactReport {
            graph_fingerprint: self.graph.fingerprint().to_string(),
            graph_revision: self.graph.revision().map(str::to_string),
            declared_intent: resolved.intent,
            overall_class: overall,
            touched_contracts: classified
                .contracts
                .iter()
                .map(|c| TouchedContractReport {
                    contract: c.contract.clone(),
                    producer: c.producer.clone(),
                    class: c.class,
                    retracts: c.retracts,
                    transition_window: c.transition_window,
                    deltas: c.deltas.clone(),
                })
                .collect(),
            impact_set: impact.entries().cloned().collect(),
            rollout_stages,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeRequest, FieldDelta};
    use crate::compat::ContractDiffChecker;
    use crate::intake::{ChangeIntake, IntakePolicy};
    use crate::planner::RolloutPlanner;
    use crate::traversal::ImpactTraversal;
    use pretty_assertions::assert_eq;
    use ripple_model::{
        Contract, DependencyEdge, FieldDescriptor, FieldType, GraphBuilder, RuntimeKind, ServiceNode,
    };

    fn graph() -> GraphModel {
        GraphBuilder::new()
            .revision("r1")
            .service(ServiceNode::new("user-service", RuntimeKind::HttpService).listening("UserProfile"))
            .service(ServiceNode::new("loyalty-service", RuntimeKind::HttpService))
            .contract(
                Contract::new("UserProfile", "user-service")
                    .with_field(FieldDescriptor::new("email", FieldType::String).required())
                    .with_field(FieldDescriptor::new("roles", FieldType::String)),
            )
            .edge(DependencyEdge::blocking("loyalty-service", "user-service", "UserProfile"))
            .build()
            .unwrap()
    }

    fn report(request: &ChangeRequest, graph: &GraphModel, policy: IntakePolicy) -> ImpactReport {
        let resolved = ChangeIntake::new(policy).resolve(request, graph).unwrap();
        let classified = ContractDiffChecker::classify_change(&resolved);
        let impact = ImpactTraversal::new().compute_impact(&classified, graph);
        let plan = RolloutPlanner::plan(&impact, graph);
        ReportAssembler::new(graph).assemble(&resolved, &classified, &impact, plan.as_ref())
    }

    #[test]
    fn breaking_change_without_window_is_flagged() {
        let g = graph();
        let request = ChangeRequest::new(DeclaredIntent::Additive).with_delta(
            FieldDelta::add(FieldRef::new("UserProfile", "loyaltyTier"), FieldType::String).required(),
        );
        let report = report(&request, &g, IntakePolicy::default());

        assert_eq!(report.overall_class, CompatibilityClass::Breaking);
        assert!(report.has_flag("CompatibilityViolation"));
        assert!(report.has_flag("IntentMismatch"));
        assert!(!report.requires_manual_staging());
        assert_eq!(report.graph_revision.as_deref(), Some("r1"));
        assert_eq!(report.graph_fingerprint, g.fingerprint());
    }

    #[test]
    fn deprecation_and_skips_become_flags() {
        let g = graph();
        let request = ChangeRequest::default()
            .with_delta(FieldDelta::modify(FieldRef::new("UserProfile", "roles")).set_deprecated(true))
            .with_delta(FieldDelta::remove(FieldRef::new("Inventory", "sku")));
        let report = report(&request, &g, IntakePolicy::partial());

        let kinds: Vec<&str> = report.flags.iter().map(Flag::kind).collect();
        assert_eq!(kinds, vec!["DeprecationWarning", "IncompleteContract"]);
        assert_eq!(report.overall_class, CompatibilityClass::Additive);
    }

    #[test]
    fn bridge_conflicts_require_manual_staging() {
        let g = graph();
        let request = ChangeRequest::default()
            .with_delta(FieldDelta::modify(FieldRef::new("UserProfile", "roles")).set_deprecated(true));
        let resolved = ChangeIntake::default().resolve(&request, &g).unwrap();
        let classified = ContractDiffChecker::classify_change(&resolved);
        let impact = ImpactTraversal::new().compute_impact(&classified, &g);
        let mut plan = RolloutPlanner::plan(&impact, &g).unwrap();
        plan.conflicts.push(crate::planner::BridgeConflict {
            contracts: vec!["UserProfile".into()],
            services: vec!["loyalty-service".into(), "user-service".into()],
        });

        let report = ReportAssembler::new(&g).assemble(&resolved, &classified, &impact, Ok(&plan));
        assert!(report.has_flag("BridgeConflict"));
        assert!(report.requires_manual_staging());
        assert_eq!(report.rollout_stages, plan.stages);
    }

    #[test]
    fn serializes_camel_case() {
        let g = graph();
        let request = ChangeRequest::default()
            .with_delta(FieldDelta::add(FieldRef::new("UserProfile", "nickname"), FieldType::String));
        let json = report(&request, &g, IntakePolicy::default()).to_json_pretty().unwrap();
        assert!(json.contains("\"graphFingerprint\""));
        assert!(json.contains("\"rolloutStages\""));
        assert!(json.contains("\"flag\": \"AmbiguousClassification\""));
        assert!(json.contains("\"causalChain\""));
    }
}
