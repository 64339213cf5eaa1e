//! Ripple Model
//!
//! Typed, validated, immutable representation of a microservice system:
//! services, the contracts they produce, and the dependency edges between
//! them.
//!
//! # Core Concepts
//!
//! - [`ServiceNode`]: a deployable unit producing/consuming contracts
//! - [`Contract`]: a versioned, single-producer schema/operation unit
//! - [`DependencyEdge`]: `source` consumes `target`'s contract, tagged with
//!   [`Criticality`] and [`Protocol`]
//! - [`GraphModel`]: the validated snapshot; only constructible through
//!   [`GraphBuilder`] / [`GraphModel::load`]
//! - [`GraphDocument`] / [`SystemMap`]: serialized inputs
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_model::{GraphModel, GraphIntegrityError};
//!
//! let graph = GraphModel::from_yaml_str(&std::fs::read_to_string("system.yaml")?)?;
//! for edge in graph.consumer_edges(&"UserProfile".into()) {
//!     println!("{} consumes UserProfile", edge.source);
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod document;
pub mod error;
pub mod graph;
pub mod ids;
pub mod system_map;
pub mod types;

pub use document::{ContractDescriptor, EdgeDescriptor, GraphDocument, ServiceDescriptor};
pub use error::{DocumentError, GraphIntegrityError};
pub use graph::{GraphBuilder, GraphModel, LoadMode, OwnershipResolution};
pub use ids::{ContractId, Datum, FieldRef, FieldRefParseError, ServiceName};
pub use system_map::{DropReason, DroppedEdge, Endpoint, ImportSummary, SystemMap};
pub use types::{
    Contract, Criticality, DependencyEdge, FieldDescriptor, FieldType, PrecedenceRule, Protocol,
    RuntimeKind, ServiceNode, TypeChange,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
