//! Core model types
//!
//! - [`ServiceNode`]: a deployable unit producing/consuming contracts
//! - [`Contract`]: a versioned, single-producer schema/operation unit
//! - [`DependencyEdge`]: directed, criticality-tagged consumption relation
//! - [`FieldDescriptor`] / [`FieldType`]: contract field shapes

use crate::ids::{ContractId, Datum, ServiceName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Runtime kind of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeKind {
    /// Network service answering synchronous calls
    HttpService,
    /// Library linked into other services
    Library,
    /// Background worker / event consumer
    Worker,
    /// Infrastructure definition
    Infra,
    /// Test suite exercising other services
    TestSuite,
    /// Kind could not be determined
    #[default]
    Unknown,
}

/// Whether a dependency blocks deployment ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    /// Consumer cannot work until the producer is deployed
    Blocking,
    /// Consumer tolerates the producer lagging behind
    Eventual,
}

/// Call style of a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Request/response call
    #[default]
    Synchronous,
    /// Event or message
    Asynchronous,
}

impl Protocol {
    /// Criticality assumed when a document does not declare one
    #[inline]
    #[must_use]
    pub fn default_criticality(self) -> Criticality {
        match self {
            Self::Synchronous => Criticality::Blocking,
            Self::Asynchronous => Criticality::Eventual,
        }
    }
}

/// Type of a contract field
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    /// Text
    String,
    /// Whole number
    Integer,
    /// Floating point number
    Float,
    /// true/false
    Boolean,
    /// Point in time
    Timestamp,
    /// Nested named object
    Object(String),
    /// Homogeneous list
    Array(Box<FieldType>),
    /// Type name the model does not understand
    Other(String),
}

/// How a field type changed between two contract versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeChange {
    /// Same type
    Unchanged,
    /// Every old value is still a valid new value (e.g. integer → float)
    SafeWidening,
    /// Old and new values are not interchangeable (e.g. integer → string)
    Incompatible,
    /// At least one side is a type the model does not understand
    Unknown,
}

impl FieldType {
    /// Compare an old type with a new one
    #[must_use]
    pub fn change_to(&self, new: &FieldType) -> TypeChange {
        if self == new {
            return TypeChange::Unchanged;
        }
        match (self, new) {
            (Self::Other(_), _) | (_, Self::Other(_)) => TypeChange::Unknown,
            (Self::Integer, Self::Float) => TypeChange::SafeWidening,
            (Self::Array(old), Self::Array(new)) => old.change_to(new),
            _ => TypeChange::Incompatible,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Integer => f.write_str("integer"),
            Self::Float => f.write_str("float"),
            Self::Boolean => f.write_str("boolean"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::Object(name) => write!(f, "object:{name}"),
            Self::Array(inner) => write!(f, "array<{inner}>"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

impl FromStr for FieldType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let lower = raw.to_ascii_lowercase();
        let ty = match lower.as_str() {
            "string" | "str" | "text" => Self::String,
            "integer" | "int" | "long" => Self::Integer,
            "float" | "double" | "number" | "decimal" => Self::Float,
            "boolean" | "bool" => Self::Boolean,
            "timestamp" | "datetime" => Self::Timestamp,
            _ => {
                if let Some(name) = raw.strip_prefix("object:") {
                    Self::Object(name.trim().to_string())
                } else if lower.starts_with("array<") && lower.ends_with('>') {
                    let inner = &raw["array<".len()..raw.len() - 1];
                    Self::Array(Box::new(inner.parse()?))
                } else {
                    Self::Other(raw.to_string())
                }
            }
        };
        Ok(ty)
    }
}

impl TryFrom<String> for FieldType {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.to_string()
    }
}

/// One field of a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Field type
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Whether the field must be present
    #[serde(default)]
    pub required: bool,
    /// Whether the field is deprecated
    #[serde(default)]
    pub deprecated: bool,
    /// Default value used when the field is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Datum this field carries, if it is source-of-truth data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datum: Option<Datum>,
}

impl FieldDescriptor {
    /// Optional, non-deprecated field without default
    #[must_use]
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            deprecated: false,
            default: None,
            datum: None,
        }
    }

    /// Mark as required
    #[inline]
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as deprecated
    #[inline]
    #[must_use]
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Set default value
    #[inline]
    #[must_use]
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Tag with the datum it carries
    #[inline]
    #[must_use]
    pub fn with_datum(mut self, datum: impl Into<Datum>) -> Self {
        self.datum = Some(datum.into());
        self
    }
}

/// A single-producer schema/operation unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Contract identifier
    pub id: ContractId,
    /// The one service producing this contract
    pub producer: ServiceName,
    /// Version marker
    #[serde(default)]
    pub version: String,
    /// Ordered field descriptors
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// Producer and consumers tolerate old and new shapes during rollout
    #[serde(default)]
    pub transition_window: bool,
    /// Cached snapshot is stale and must be refreshed before intake
    #[serde(default)]
    pub stale: bool,
}

impl Contract {
    /// Create an empty contract
    #[must_use]
    pub fn new(id: impl Into<ContractId>, producer: impl Into<ServiceName>) -> Self {
        Self {
            id: id.into(),
            producer: producer.into(),
            version: String::new(),
            fields: Vec::new(),
            transition_window: false,
            stale: false,
        }
    }

    /// Append a field
    #[inline]
    #[must_use]
    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Set version marker
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Declare a transition window
    #[inline]
    #[must_use]
    pub fn with_transition_window(mut self) -> Self {
        self.transition_window = true;
        self
    }

    /// Mark the cached snapshot as stale
    #[inline]
    #[must_use]
    pub fn mark_stale(mut self) -> Self {
        self.stale = true;
        self
    }

    /// Look up a field by name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A deployable unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNode {
    /// Unique name
    pub name: ServiceName,
    /// Runtime kind
    #[serde(default)]
    pub kind: RuntimeKind,
    /// Contracts this service listens on (produces)
    #[serde(default)]
    pub contracts: BTreeSet<ContractId>,
    /// Data this service is the source of truth for
    #[serde(default)]
    pub owns: BTreeSet<Datum>,
}

impl ServiceNode {
    /// Create a service with no contracts or ownership
    #[must_use]
    pub fn new(name: impl Into<ServiceName>, kind: RuntimeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            contracts: BTreeSet::new(),
            owns: BTreeSet::new(),
        }
    }

    /// Declare a listening contract
    #[inline]
    #[must_use]
    pub fn listening(mut self, contract: impl Into<ContractId>) -> Self {
        self.contracts.insert(contract.into());
        self
    }

    /// Declare write-ownership of a datum
    #[inline]
    #[must_use]
    pub fn owning(mut self, datum: impl Into<Datum>) -> Self {
        self.owns.insert(datum.into());
        self
    }
}

/// `source` consumes `target`'s `contract`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Consumer
    pub source: ServiceName,
    /// Producer
    pub target: ServiceName,
    /// Contract consumed
    pub contract: ContractId,
    /// Whether the edge constrains deployment order
    pub criticality: Criticality,
    /// Call style
    pub protocol: Protocol,
    /// Fields the consumer reads; `None` when unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reads: Option<BTreeSet<String>>,
}

impl DependencyEdge {
    /// Synchronous blocking edge with unknown read-set
    #[must_use]
    pub fn blocking(
        source: impl Into<ServiceName>,
        target: impl Into<ServiceName>,
        contract: impl Into<ContractId>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            contract: contract.into(),
            criticality: Criticality::Blocking,
            protocol: Protocol::Synchronous,
            reads: None,
        }
    }

    /// Asynchronous eventual edge with unknown read-set
    #[must_use]
    pub fn eventual(
        source: impl Into<ServiceName>,
        target: impl Into<ServiceName>,
        contract: impl Into<ContractId>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            contract: contract.into(),
            criticality: Criticality::Eventual,
            protocol: Protocol::Asynchronous,
            reads: None,
        }
    }

    /// Declare the fields the consumer reads
    #[must_use]
    pub fn reading<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Whether the edge constrains deployment order
    #[inline]
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.criticality == Criticality::Blocking
    }

    /// Whether the consumer reads `field`; `None` when the read-set is unknown
    #[inline]
    #[must_use]
    pub fn reads_field(&self, field: &str) -> Option<bool> {
        self.reads.as_ref().map(|r| r.contains(field))
    }
}

/// Explicit resolution for a datum claimed by several services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecedenceRule {
    /// Contested datum
    pub datum: Datum,
    /// Claimant that wins
    pub owner: ServiceName,
}

impl PrecedenceRule {
    /// Create a precedence rule
    #[must_use]
    pub fn new(datum: impl Into<Datum>, owner: impl Into<ServiceName>) -> Self {
        Self {
            datum: datum.into(),
            owner: owner.into(),
        }
    }
}
