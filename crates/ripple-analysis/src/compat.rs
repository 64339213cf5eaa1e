//! Compatibility classification
//!
//! Deterministic rules over a [`ResolvedDelta`], independent of the declared
//! intent. First matching rule wins; anything the rules cannot place is
//! [`CompatibilityClass::Ambiguous`] so it is escalated instead of guessed.
//!
//! | delta | condition | class |
//! |---|---|---|
//! | add | new, optional, default | additive |
//! | add | new, required, no default | breaking |
//! | remove | optional, every read-set known, nobody reads it | additive |
//! | remove | read by at least one consumer | breaking |
//! | modify | incompatible type change | breaking |
//! | modify | optional to required | breaking |
//! | modify | deprecation only | additive (warning) |
//! | any | otherwise | ambiguous |

use crate::change::{DeclaredIntent, DeltaOp};
use crate::intake::{ResolvedChange, ResolvedDelta};
use rayon::prelude::*;
use ripple_model::{ContractId, FieldRef, ServiceName, TypeChange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Compatibility class, ordered by severity (`Additive < Breaking < Ambiguous`)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CompatibilityClass {
    /// Existing consumers keep working
    #[default]
    Additive,
    /// Existing consumers break
    Breaking,
    /// Could not be decided; needs a manual staging decision
    Ambiguous,
}

impl CompatibilityClass {
    /// Whether the declared intent contradicts this computed class
    #[must_use]
    pub fn contradicts(self, intent: DeclaredIntent) -> bool {
        match intent {
            DeclaredIntent::Unknown => false,
            DeclaredIntent::Additive => self != Self::Additive,
            DeclaredIntent::Breaking => self == Self::Additive,
        }
    }
}

impl fmt::Display for CompatibilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Additive => "additive",
            Self::Breaking => "breaking",
            Self::Ambiguous => "ambiguous",
        })
    }
}

/// The rule that decided a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// New optional field with a default
    OptionalAddWithDefault,
    /// New required field without a default
    RequiredAddWithoutDefault,
    /// Optional field nobody reads removed
    UnusedOptionalRemoval,
    /// Field read by a consumer removed
    RemovalOfReadField,
    /// Type changed to something old values do not satisfy
    IncompatibleTypeChange,
    /// Optional field made required
    RequiredTightening,
    /// Field deprecated, nothing else changed
    DeprecationOnly,
    /// Add of a field that already exists
    AddOfExistingField,
    /// New optional field without a default
    OptionalAddWithoutDefault,
    /// New required field with a default
    RequiredAddWithDefault,
    /// Removal where some consumer's read-set is unknown
    RemovalWithUnknownReaders,
    /// Required field removed with no known reader
    UnreadRequiredRemoval,
    /// Type widened (e.g. integer to float)
    TypeWidening,
    /// Type change involving a type the model does not understand
    UnknownTypeChange,
    /// Required field made optional
    RequiredRelaxed,
    /// Deprecation flag cleared
    Undeprecation,
    /// Modify that changes nothing recognisable
    NoOpModify,
}

impl Rule {
    /// Class this rule assigns
    #[must_use]
    pub fn class(self) -> CompatibilityClass {
        match self {
            Self::OptionalAddWithDefault | Self::UnusedOptionalRemoval | Self::DeprecationOnly => {
                CompatibilityClass::Additive
            }
            Self::RequiredAddWithoutDefault
            | Self::RemovalOfReadField
            | Self::IncompatibleTypeChange
            | Self::RequiredTightening => CompatibilityClass::Breaking,
            Self::AddOfExistingField
            | Self::OptionalAddWithoutDefault
            | Self::RequiredAddWithDefault
            | Self::RemovalWithUnknownReaders
            | Self::UnreadRequiredRemoval
            | Self::TypeWidening
            | Self::UnknownTypeChange
            | Self::RequiredRelaxed
            | Self::Undeprecation
            | Self::NoOpModify => CompatibilityClass::Ambiguous,
        }
    }

    /// Whether the rule takes away something consumers rely on, so
    /// consumers have to move before the producer
    #[must_use]
    pub fn retracts(self) -> bool {
        matches!(
            self,
            Self::RemovalOfReadField | Self::IncompatibleTypeChange | Self::RequiredTightening
        )
    }
}

/// Classification of one delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    /// Class
    pub class: CompatibilityClass,
    /// Deciding rule
    pub rule: Rule,
    /// Annotation for additive changes consumers should still act on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Verdict {
    fn of(rule: Rule) -> Self {
        Self {
            class: rule.class(),
            rule,
            warning: None,
        }
    }
}

/// A classified delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedDelta {
    /// Field changed
    pub field: FieldRef,
    /// `add`, `remove` or `modify`
    pub op: &'static str,
    /// Verdict
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Classification of every delta on one contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractChange {
    /// Contract
    pub contract: ContractId,
    /// Its producer
    pub producer: ServiceName,
    /// Most severe delta class
    pub class: CompatibilityClass,
    /// Whether a breaking delta retracts something consumers rely on
    pub retracts: bool,
    /// Whether the contract declares a transition window
    pub transition_window: bool,
    /// Per-delta verdicts, in request order
    pub deltas: Vec<ClassifiedDelta>,
}

/// Classification of a whole change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedChange {
    /// Touched contracts, sorted by id
    pub contracts: Vec<ContractChange>,
}

impl ClassifiedChange {
    /// Most severe class over every delta
    #[must_use]
    pub fn overall(&self) -> CompatibilityClass {
        self.contracts
            .iter()
            .map(|c| c.class)
            .max()
            .unwrap_or_default()
    }

    /// Look up a touched contract
    #[must_use]
    pub fn contract(&self, id: &ContractId) -> Option<&ContractChange> {
        self.contracts.iter().find(|c| &c.contract == id)
    }
}

/// Classifies deltas by compatibility
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractDiffChecker;

impl ContractDiffChecker {
    /// Class of a delta
    #[must_use]
    pub fn classify(delta: &ResolvedDelta) -> CompatibilityClass {
        Self::assess(delta).class
    }

    /// Class, rule and warning of a delta
    #[must_use]
    pub fn assess(delta: &ResolvedDelta) -> Verdict {
        match &delta.delta.op {
            DeltaOp::Add {
                required, default, ..
            } => Verdict::of(Self::add_rule(delta, *required, default.is_some())),
            DeltaOp::Remove => Verdict::of(Self::remove_rule(delta)),
            DeltaOp::Modify {
                ty,
                required,
                deprecated,
            } => {
                let rule = Self::modify_rule(delta, ty.as_ref(), *required, *deprecated);
                let mut verdict = Verdict::of(rule);
                if rule == Rule::DeprecationOnly {
                    verdict.warning = Some(format!(
                        "{} is deprecated; consumers should stop reading it",
                        delta.delta.target
                    ));
                }
                verdict
            }
        }
    }

    fn add_rule(delta: &ResolvedDelta, required: bool, has_default: bool) -> Rule {
        if delta.previous.is_some() {
            return Rule::AddOfExistingField;
        }
        match (required, has_default) {
            (false, true) => Rule::OptionalAddWithDefault,
            (true, false) => Rule::RequiredAddWithoutDefault,
            (false, false) => Rule::OptionalAddWithoutDefault,
            (true, true) => Rule::RequiredAddWithDefault,
        }
    }

    fn remove_rule(delta: &ResolvedDelta) -> Rule {
        let optional = delta.previous.as_ref().is_some_and(|p| !p.required);
        let readers = &delta.readers;
        if optional && !readers.is_read() && !readers.has_unknown() {
            Rule::UnusedOptionalRemoval
        } else if readers.is_read() {
            Rule::RemovalOfReadField
        } else if readers.has_unknown() {
            Rule::RemovalWithUnknownReaders
        } else {
            Rule::UnreadRequiredRemoval
        }
    }

    fn modify_rule(
        delta: &ResolvedDelta,
        ty: Option<&ripple_model::FieldType>,
        required: Option<bool>,
        deprecated: Option<bool>,
    ) -> Rule {
        // intake guarantees the field exists for modify
        let Some(previous) = delta.previous.as_ref() else {
            return Rule::NoOpModify;
        };

        let type_change = ty.map_or(TypeChange::Unchanged, |new| previous.ty.change_to(new));
        let tightened = required == Some(true) && !previous.required;
        let relaxed = required == Some(false) && previous.required;
        let deprecating = deprecated == Some(true) && !previous.deprecated;
        let undeprecating = deprecated == Some(false) && previous.deprecated;

        match type_change {
            TypeChange::Incompatible => Rule::IncompatibleTypeChange,
            _ if tightened => Rule::RequiredTightening,
            TypeChange::Unchanged if deprecating && !relaxed => Rule::DeprecationOnly,
            TypeChange::Unknown => Rule::UnknownTypeChange,
            TypeChange::SafeWidening => Rule::TypeWidening,
            TypeChange::Unchanged if relaxed => Rule::RequiredRelaxed,
            TypeChange::Unchanged if undeprecating => Rule::Undeprecation,
            TypeChange::Unchanged => Rule::NoOpModify,
        }
    }

    /// Classify every resolved delta, one contract per rayon task
    #[must_use]
    pub fn classify_change(change: &ResolvedChange) -> ClassifiedChange {
        let mut groups: BTreeMap<&ContractId, Vec<&ResolvedDelta>> = BTreeMap::new();
        for delta in &change.deltas {
            groups.entry(delta.contract()).or_default().push(delta);
        }
        let groups: Vec<(&ContractId, Vec<&ResolvedDelta>)> = groups.into_iter().collect();

        let contracts: Vec<ContractChange> = groups
            .into_par_iter()
            .map(|(contract, deltas)| Self::classify_contract(contract, &deltas))
            .collect();

        for c in &contracts {
            tracing::debug!(
                contract = %c.contract,
                class = %c.class,
                retracts = c.retracts,
                "contract classified"
            );
        }
        let classified = ClassifiedChange { contracts };
        tracing::info!(
            contracts = classified.contracts.len(),
            overall = %classified.overall(),
            "classification complete"
        );
        classified
    }

    fn classify_contract(contract: &ContractId, deltas: &[&ResolvedDelta]) -> ContractChange {
        let mut class = CompatibilityClass::Additive;
        let mut retracts = false;
        let mut classified = Vec::with_capacity(deltas.len());
        let mut producer = ServiceName::new("");
        let mut transition_window = false;

        for delta in deltas {
            let verdict = Self::assess(delta);
            class = class.max(verdict.class);
            retracts |= verdict.rule.retracts();
            producer = delta.producer.clone();
            transition_window = delta.transition_window;
            classified.push(ClassifiedDelta {
                field: delta.delta.target.clone(),
                op: delta.delta.op.keyword(),
                verdict,
            });
        }

        ContractChange {
            contract: contract.clone(),
            producer,
            class,
            retracts,
            transition_window,
            deltas: classified,
        }
    }
}
