//! Ripple Analysis
//!
//! Change-impact analysis and rollout ordering over a validated
//! [`ripple_model::GraphModel`].
//!
//! # Core Concepts
//!
//! Every run is a pipeline of pure stages over one immutable snapshot:
//! 1. [`ChangeIntake`]: resolve each field delta to its contract, producer
//!    and authority
//! 2. [`ContractDiffChecker`]: classify deltas as additive, breaking or
//!    ambiguous
//! 3. [`ImpactTraversal`]: transitive closure of affected services with
//!    causal chains and risk labels
//! 4. [`RolloutPlanner`]: layered, dependency-respecting stages with
//!    compatibility bridges
//! 5. [`ReportAssembler`]: the serializable [`ImpactReport`]
//!
//! [`ImpactAnalyzer`] runs all of them, synchronously or under a deadline.
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_analysis::{AnalysisConfig, ChangeRequest, FieldDelta, ImpactAnalyzer};
//! use ripple_model::{FieldType, GraphModel};
//!
//! let graph = GraphModel::from_yaml_str(&std::fs::read_to_string("system.yaml")?)?;
//! let request = ChangeRequest::default().with_delta(
//!     FieldDelta::add("UserProfile.loyaltyTier".parse()?, FieldType::String).required(),
//! );
//! let report = ImpactAnalyzer::new(AnalysisConfig::default()).analyze(&graph, &request)?;
//! println!("{}", report.to_json_pretty()?);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod change;
pub mod compat;
pub mod config;
pub mod error;
pub mod intake;
pub mod pipeline;
pub mod planner;
pub mod report;
pub mod telemetry;
pub mod traversal;

pub use change::{
    ChangeDocument, ChangeRequest, DeclaredIntent, DeltaDescriptor, DeltaKind, DeltaOp, FieldDelta,
};
pub use compat::{
    ClassifiedChange, ClassifiedDelta, CompatibilityClass, ContractChange, ContractDiffChecker,
    Rule, Verdict,
};
pub use config::AnalysisConfig;
pub use error::{
    AnalysisError, ChangeDocumentError, ConfigError, CycleDetectedError, IntakeError,
    RetrievalError,
};
pub use intake::{
    ChangeIntake, ContractSource, IntakePolicy, ReaderSummary, ResolvedChange, ResolvedDelta,
    SkippedDelta, SnapshotSet,
};
pub use pipeline::ImpactAnalyzer;
pub use planner::{BridgeConflict, RolloutPlan, RolloutPlanner, RolloutStage, TransitionWindow};
pub use report::{Flag, ImpactReport, ReportAssembler, TouchedContractReport};
pub use traversal::{Hop, ImpactEntry, ImpactSet, ImpactTraversal, TouchedContract};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
