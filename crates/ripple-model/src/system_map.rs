//! System map import
//!
//! Converts a best-effort `systems_map.json` (repository inventory with
//! derived dependency hints) into a [`GraphDocument`]. The map only knows
//! repositories and which ones call which, so every service gets a surface
//! contract `<name>:http` that all imported edges target. Endpoints the map
//! found in a repository's OpenAPI file or README become additional
//! contracts `<name>:<METHOD> <path>`. None of them carry field descriptors;
//! field-level detail has to come from a richer graph document.

use crate::document::{ContractDescriptor, EdgeDescriptor, GraphDocument, ServiceDescriptor};
use crate::error::DocumentError;
use crate::ids::{ContractId, ServiceName};
use crate::types::{Criticality, Protocol, RuntimeKind};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// Top-level `systems_map.json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemMap {
    /// Schema version of the map
    #[serde(default)]
    pub schema_version: Option<String>,
    /// Generation timestamp
    #[serde(default)]
    pub generated_at: Option<String>,
    /// Repository entries
    #[serde(default)]
    pub repos: Vec<RepoEntry>,
    /// Flattened dependency edges
    #[serde(default)]
    pub dependency_edges: Vec<MapEdge>,
}

/// One repository entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoEntry {
    /// `owner/repo`
    pub full_name: String,
    /// Fetch error, when the repository could not be read
    #[serde(default)]
    pub error: Option<String>,
    /// Archived repositories are not deployed
    #[serde(default)]
    pub archived: Option<bool>,
    /// Derived facts
    #[serde(default)]
    pub derived: Option<Derived>,
}

/// Facts derived from a repository's files
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Derived {
    /// `service`, `library`, `infra`, `tests` or `unknown`
    #[serde(default)]
    pub repo_kind: Option<String>,
    /// Dependency hints
    #[serde(default)]
    pub depends_on: Vec<DependsOn>,
    /// Endpoints the service exposes
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// An HTTP endpoint found in a repository
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Endpoint {
    /// Upper-case HTTP method, `ANY` when the source did not say
    #[serde(default = "any_method")]
    pub method: String,
    /// Request path
    pub path: String,
    /// `openapi` or `readme`
    #[serde(default)]
    pub source: Option<String>,
    /// Confidence label
    #[serde(default)]
    pub confidence: Option<String>,
}

fn any_method() -> String {
    "ANY".to_string()
}

/// A dependency hint inside a repository entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DependsOn {
    /// Target repository name
    pub target: String,
    /// Transport (`http`, `grpc`, `event`, ...)
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// `high`, `medium` or `low`
    #[serde(default)]
    pub confidence: Option<String>,
}

/// A top-level dependency edge
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MapEdge {
    /// Consumer repository name
    pub from: String,
    /// Producer repository name
    pub to: String,
    /// Transport
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Confidence label
    #[serde(default)]
    pub confidence: Option<String>,
}

/// Why an edge was not imported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Target is not a repository in the map
    UnknownTarget,
    /// Source is not a repository in the map
    UnknownSource,
    /// Repository depends on itself
    SelfEdge,
    /// Same edge listed more than once
    Duplicate,
}

/// An edge that was skipped during import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEdge {
    /// Consumer name
    pub from: String,
    /// Producer name
    pub to: String,
    /// Reason
    pub reason: DropReason,
}

/// What the import produced and skipped
#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    /// Services imported
    pub services: usize,
    /// Edges imported
    pub edges: usize,
    /// Repositories skipped (fetch errors or archived)
    pub skipped_repos: Vec<String>,
    /// Edges skipped
    pub dropped: Vec<DroppedEdge>,
}

impl SystemMap {
    /// Parse `systems_map.json`
    ///
    /// # Errors
    /// [`DocumentError::Json`] on malformed input
    pub fn from_json_str(input: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Surface contract id for a service
    #[must_use]
    pub fn surface_contract(service: &ServiceName) -> ContractId {
        ContractId::new(format!("{service}:http"))
    }

    /// Contract id for one endpoint of a service
    #[must_use]
    pub fn endpoint_contract(service: &ServiceName, endpoint: &Endpoint) -> ContractId {
        ContractId::new(format!(
            "{service}:{} {}",
            endpoint.method.to_ascii_uppercase(),
            endpoint.path
        ))
    }

    /// Convert into a graph document
    #[must_use]
    pub fn to_graph_document(&self) -> (GraphDocument, ImportSummary) {
        let mut summary = ImportSummary::default();
        let mut services: BTreeMap<String, (RuntimeKind, &[Endpoint])> = BTreeMap::new();

        for repo in &self.repos {
            let name = short_name(&repo.full_name);
            if repo.error.is_some() || repo.archived == Some(true) {
                summary.skipped_repos.push(repo.full_name.clone());
                continue;
            }
            let kind = repo
                .derived
                .as_ref()
                .and_then(|d| d.repo_kind.as_deref())
                .map_or(RuntimeKind::Unknown, runtime_kind);
            let endpoints = repo.derived.as_ref().map_or(&[][..], |d| d.endpoints.as_slice());
            services.insert(name.to_string(), (kind, endpoints));
        }

        // Top-level edges first, then per-repo hints that were not flattened
        let mut candidates: Vec<(String, String, Option<String>, Option<String>)> = self
            .dependency_edges
            .iter()
            .map(|e| (e.from.clone(), e.to.clone(), e.kind.clone(), e.confidence.clone()))
            .collect();
        for repo in &self.repos {
            if let Some(derived) = &repo.derived {
                for dep in &derived.depends_on {
                    candidates.push((
                        short_name(&repo.full_name).to_string(),
                        dep.target.clone(),
                        dep.kind.clone(),
                        dep.confidence.clone(),
                    ));
                }
            }
        }

        let mut seen = BTreeSet::new();
        let mut edges = Vec::new();
        for (from, to, kind, confidence) in candidates {
            let reason = if from == to {
                Some(DropReason::SelfEdge)
            } else if !services.contains_key(&from) {
                Some(DropReason::UnknownSource)
            } else if !services.contains_key(&to) {
                Some(DropReason::UnknownTarget)
            } else if !seen.insert((from.clone(), to.clone())) {
                Some(DropReason::Duplicate)
            } else {
                None
            };
            if let Some(reason) = reason {
                // duplicates are expected: top-level edges repeat per-repo hints
                if reason != DropReason::Duplicate {
                    tracing::warn!(from = %from, to = %to, ?reason, "dropping system map edge");
                }
                summary.dropped.push(DroppedEdge { from, to, reason });
                continue;
            }

            let protocol = match kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
                None | Some("http" | "https" | "grpc" | "rest") => Protocol::Synchronous,
                Some(_) => Protocol::Asynchronous,
            };
            let mut criticality = protocol.default_criticality();
            if confidence.as_deref() == Some("low") {
                criticality = Criticality::Eventual;
            }
            let target = ServiceName::new(to);
            edges.push(EdgeDescriptor {
                source: ServiceName::new(from),
                contract: Self::surface_contract(&target),
                target,
                protocol,
                criticality: Some(criticality),
                reads: None,
            });
        }

        let services: Vec<ServiceDescriptor> = services
            .into_iter()
            .map(|(name, (kind, endpoints))| {
                let name = ServiceName::new(name);
                let ids: BTreeSet<ContractId> = endpoints
                    .iter()
                    .map(|e| Self::endpoint_contract(&name, e))
                    .collect();
                let contracts = std::iter::once(Self::surface_contract(&name))
                    .chain(ids)
                    .map(|id| ContractDescriptor {
                        id,
                        version: String::new(),
                        fields: Vec::new(),
                        transition_window: false,
                        stale: false,
                    })
                    .collect();
                ServiceDescriptor {
                    contracts,
                    name,
                    kind,
                    owns: Vec::new(),
                }
            })
            .collect();

        summary.services = services.len();
        summary.edges = edges.len();
        tracing::info!(
            services = summary.services,
            edges = summary.edges,
            dropped = summary.dropped.len(),
            "imported system map"
        );

        let document = GraphDocument {
            version: self.generated_at.clone().or_else(|| self.schema_version.clone()),
            services,
            edges,
            precedence: Vec::new(),
        };
        (document, summary)
    }
}

fn short_name(full_name: &str) -> &str {
    full_name.rsplit('/').next().unwrap_or(full_name)
}

fn runtime_kind(repo_kind: &str) -> RuntimeKind {
    match repo_kind {
        "service" => RuntimeKind::HttpService,
        "library" => RuntimeKind::Library,
        "infra" => RuntimeKind::Infra,
        "tests" => RuntimeKind::TestSuite,
        "worker" => RuntimeKind::Worker,
        _ => RuntimeKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LoadMode;

    const MAP: &str = r#"{
        "schema_version": "1.1",
        "generated_at": "2024-05-01T10:00:00Z",
        "repos": [
            {"full_name": "acme/user-service", "derived": {"repo_kind": "service", "depends_on": []}},
            {"full_name": "acme/loyalty-service", "derived": {"repo_kind": "service",
                "depends_on": [{"target": "user-service", "type": "http", "confidence": "medium"}]}},
            {"full_name": "acme/order-service", "derived": {"repo_kind": "service",
                "depends_on": [
                    {"target": "loyalty-service", "type": "event", "confidence": "medium"},
                    {"target": "payment-service", "type": "http", "confidence": "medium"}
                ]}},
            {"full_name": "acme/auth-middleware", "derived": {"repo_kind": "library"}},
            {"full_name": "acme/legacy", "error": "not_found"}
        ],
        "dependency_edges": [
            {"from": "loyalty-service", "to": "user-service", "type": "http", "confidence": "medium"}
        ]
    }"#;

    #[test]
    fn imports_services_and_edges() {
        let map = SystemMap::from_json_str(MAP).unwrap();
        let (doc, summary) = map.to_graph_document();

        assert_eq!(summary.services, 4);
        assert_eq!(summary.edges, 2);
        assert_eq!(summary.skipped_repos, vec!["acme/legacy".to_string()]);
        assert!(summary
            .dropped
            .iter()
            .any(|d| d.to == "payment-service" && d.reason == DropReason::UnknownTarget));
        assert!(summary
            .dropped
            .iter()
            .any(|d| d.reason == DropReason::Duplicate));

        let lib = doc.services.iter().find(|s| s.name.as_str() == "auth-middleware").unwrap();
        assert_eq!(lib.kind, RuntimeKind::Library);
        assert_eq!(doc.version.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn event_edges_become_eventual() {
        let map = SystemMap::from_json_str(MAP).unwrap();
        let (doc, _) = map.to_graph_document();
        let graph = doc.into_model(LoadMode::Strict).unwrap();

        let order_edges: Vec<_> = graph.edges_from(&"order-service".into()).collect();
        assert_eq!(order_edges.len(), 1);
        assert_eq!(order_edges[0].criticality, Criticality::Eventual);
        assert_eq!(order_edges[0].protocol, Protocol::Asynchronous);
        assert_eq!(order_edges[0].contract.as_str(), "loyalty-service:http");
    }

    #[test]
    fn endpoints_become_contracts_beside_the_surface() {
        let json = r#"{
            "repos": [
                {"full_name": "acme/user-service", "derived": {"repo_kind": "service", "endpoints": [
                    {"method": "GET", "path": "/users/{id}", "source": "readme", "confidence": "medium"},
                    {"method": "ANY", "path": "/users", "source": "openapi", "confidence": "high"},
                    {"method": "get", "path": "/users/{id}", "source": "readme"}
                ]}},
                {"full_name": "acme/loyalty-service", "derived": {"repo_kind": "service"}}
            ],
            "dependency_edges": [{"from": "loyalty-service", "to": "user-service", "type": "http"}]
        }"#;
        let (doc, _) = SystemMap::from_json_str(json).unwrap().to_graph_document();
        let graph = doc.into_model(LoadMode::Strict).unwrap();

        let user = ServiceName::new("user-service");
        let contracts: Vec<&str> = graph.contracts_of(&user).map(|c| c.id.as_str()).collect();
        assert_eq!(
            contracts,
            vec!["user-service:ANY /users", "user-service:GET /users/{id}", "user-service:http"]
        );
        assert_eq!(
            graph.producer_of(&ContractId::new("user-service:GET /users/{id}")),
            Some(&user)
        );
        let edge = graph.edges_from(&"loyalty-service".into()).next().unwrap();
        assert_eq!(edge.contract, SystemMap::surface_contract(&user));
    }

    #[test]
    fn low_confidence_edges_do_not_block() {
        let json = r#"{
            "repos": [{"full_name": "a/x"}, {"full_name": "a/y"}],
            "dependency_edges": [{"from": "x", "to": "y", "type": "http", "confidence": "low"}]
        }"#;
        let (doc, _) = SystemMap::from_json_str(json).unwrap().to_graph_document();
        assert_eq!(doc.edges[0].criticality, Some(Criticality::Eventual));
        assert_eq!(doc.edges[0].protocol, Protocol::Synchronous);
    }
}
