//! Structural graph document
//!
//! The serialized form of the system map handed to the engine by an external
//! collaborator: service descriptors with their declared contracts, plus
//! dependency edges. Accepted as JSON or YAML.

use crate::error::{DocumentError, GraphIntegrityError};
use crate::graph::{GraphBuilder, GraphModel, LoadMode};
use crate::ids::{ContractId, Datum, ServiceName};
use crate::types::{
    Contract, Criticality, DependencyEdge, FieldDescriptor, PrecedenceRule, Protocol, RuntimeKind,
    ServiceNode,
};
use serde::{Deserialize, Serialize};

/// Whole-graph document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Revision marker of the system map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Service descriptors
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
    /// Dependency edges
    #[serde(default)]
    pub edges: Vec<EdgeDescriptor>,
    /// Ownership precedence rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub precedence: Vec<PrecedenceRule>,
}

/// One service and the contracts it produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Unique service name
    pub name: ServiceName,
    /// Runtime kind
    #[serde(default)]
    pub kind: RuntimeKind,
    /// Contracts produced (and listened on) by the service
    #[serde(default)]
    pub contracts: Vec<ContractDescriptor>,
    /// Data the service is source of truth for
    #[serde(default)]
    pub owns: Vec<Datum>,
}

/// A contract as declared inside its producer's descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDescriptor {
    /// Contract identifier
    pub id: ContractId,
    /// Version marker
    #[serde(default)]
    pub version: String,
    /// Ordered fields
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// Declared transition window (dual-read/dual-write)
    #[serde(default)]
    pub transition_window: bool,
    /// Snapshot needs refreshing before intake
    #[serde(default)]
    pub stale: bool,
}

/// A dependency edge as written in the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescriptor {
    /// Consumer
    pub source: ServiceName,
    /// Producer
    pub target: ServiceName,
    /// Contract consumed
    pub contract: ContractId,
    /// Call style (defaults to synchronous)
    #[serde(default)]
    pub protocol: Protocol,
    /// Criticality (defaults from the protocol)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality: Option<Criticality>,
    /// Fields read by the consumer, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reads: Option<Vec<String>>,
}

impl From<EdgeDescriptor> for DependencyEdge {
    fn from(d: EdgeDescriptor) -> Self {
        Self {
            criticality: d.criticality.unwrap_or_else(|| d.protocol.default_criticality()),
            source: d.source,
            target: d.target,
            contract: d.contract,
            protocol: d.protocol,
            reads: d.reads.map(|r| r.into_iter().collect()),
        }
    }
}

impl GraphDocument {
    /// Parse from JSON
    ///
    /// # Errors
    /// [`DocumentError::Json`] on malformed input
    pub fn from_json_str(input: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Parse from YAML
    ///
    /// # Errors
    /// [`DocumentError::Yaml`] on malformed input
    pub fn from_yaml_str(input: &str) -> Result<Self, DocumentError> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Flatten into a [`GraphBuilder`]
    #[must_use]
    pub fn into_builder(self) -> GraphBuilder {
        let mut builder = GraphBuilder::new();
        if let Some(version) = self.version {
            builder = builder.revision(version);
        }
        for service in self.services {
            let mut node = ServiceNode::new(service.name.clone(), service.kind);
            for datum in service.owns {
                node = node.owning(datum);
            }
            for descriptor in service.contracts {
                node = node.listening(descriptor.id.clone());
                builder = builder.contract(Contract {
                    id: descriptor.id,
                    producer: service.name.clone(),
                    version: descriptor.version,
                    fields: descriptor.fields,
                    transition_window: descriptor.transition_window,
                    stale: descriptor.stale,
                });
            }
            builder = builder.service(node);
        }
        for edge in self.edges {
            builder = builder.edge(edge.into());
        }
        for rule in self.precedence {
            builder = builder.precedence(rule);
        }
        builder
    }

    /// Validate into a [`GraphModel`]
    ///
    /// # Errors
    /// The first [`GraphIntegrityError`]
    pub fn into_model(self, mode: LoadMode) -> Result<GraphModel, GraphIntegrityError> {
        let builder = self.into_builder();
        match mode {
            LoadMode::Strict => builder.build(),
            LoadMode::Staged => builder.build_staged(),
        }
    }
}

impl GraphModel {
    /// Parse a JSON graph document and validate it strictly
    ///
    /// # Errors
    /// Parse or integrity failure
    pub fn from_json_str(input: &str) -> Result<Self, DocumentError> {
        Ok(GraphDocument::from_json_str(input)?.into_model(LoadMode::Strict)?)
    }

    /// Parse a YAML graph document and validate it strictly
    ///
    /// # Errors
    /// Parse or integrity failure
    pub fn from_yaml_str(input: &str) -> Result<Self, DocumentError> {
        Ok(GraphDocument::from_yaml_str(input)?.into_model(LoadMode::Strict)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    const YAML: &str = r#"
version: "2024-06-01"
services:
  - name: user-service
    kind: http-service
    owns: [email]
    contracts:
      - id: UserProfile
        version: "3"
        fields:
          - { name: email, type: string, required: true, datum: email }
          - { name: roles, type: "array<string>" }
  - name: loyalty-service
    kind: worker
edges:
  - source: loyalty-service
    target: user-service
    contract: UserProfile
    reads: [email]
  - source: user-service
    target: loyalty-service
    contract: UserProfile
    protocol: asynchronous
"#;

    #[test]
    fn yaml_document_parses() {
        let doc = GraphDocument::from_yaml_str(YAML).unwrap();
        assert_eq!(doc.services.len(), 2);
        assert_eq!(doc.services[0].kind, RuntimeKind::HttpService);
        let profile = &doc.services[0].contracts[0];
        assert_eq!(profile.fields[1].ty, FieldType::Array(Box::new(FieldType::String)));
    }

    #[test]
    fn edge_criticality_defaults_from_protocol() {
        let doc = GraphDocument::from_yaml_str(YAML).unwrap();
        let first: DependencyEdge = doc.edges[0].clone().into();
        let second: DependencyEdge = doc.edges[1].clone().into();
        assert_eq!(first.criticality, Criticality::Blocking);
        assert_eq!(second.criticality, Criticality::Eventual);
    }

    #[test]
    fn invalid_edge_surfaces_as_integrity_error() {
        // second edge claims loyalty-service produces UserProfile
        let err = GraphModel::from_yaml_str(YAML).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Integrity(GraphIntegrityError::ContractNotOnTarget { .. })
        ));
    }

    #[test]
    fn json_document_loads() {
        let json = r#"{
            "services": [
                {"name": "a", "contracts": [{"id": "A", "fields": [{"name": "x", "type": "integer"}]}]},
                {"name": "b"}
            ],
            "edges": [{"source": "b", "target": "a", "contract": "A", "criticality": "eventual"}]
        }"#;
        let graph = GraphModel::from_json_str(json).unwrap();
        assert_eq!(graph.edges().len(), 1);
        assert!(!graph.edges()[0].is_blocking());
        assert_eq!(graph.service(&"a".into()).map(|s| s.contracts.len()), Some(1));
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            GraphDocument::from_json_str("{ not json"),
            Err(DocumentError::Json(_))
        ));
    }
}
