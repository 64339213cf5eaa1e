//! Graph Model
//!
//! The immutable, validated snapshot of services, contracts and dependency
//! edges that every analysis run reads from.
//!
//! A [`GraphModel`] can only be obtained through [`GraphBuilder::build`]
//! (or the [`GraphModel::load`] shorthand), so every graph reaching
//! analysis has passed structural validation:
//! 1. every edge references existing services and a contract on its target
//! 2. every contract has exactly one producer
//! 3. no datum has two owners without an explicit precedence rule

use crate::error::GraphIntegrityError;
use crate::ids::{ContractId, Datum, ServiceName};
use crate::types::{Contract, DependencyEdge, PrecedenceRule, ServiceNode};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// How strictly ownership is validated at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Every violation is fatal
    #[default]
    Strict,
    /// Partial/staged load: ownership conflicts and unowned data are recorded
    /// instead of rejected. Every other check stays fatal.
    Staged,
}

/// Outcome of looking up who owns a datum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipResolution {
    /// Exactly one owner (possibly via a precedence rule)
    Unique(ServiceName),
    /// Several claimants and no precedence rule
    Contested(Vec<ServiceName>),
    /// Nobody claims the datum
    Unclaimed,
}

impl OwnershipResolution {
    /// The owner, if unique
    #[inline]
    #[must_use]
    pub fn owner(&self) -> Option<&ServiceName> {
        match self {
            Self::Unique(owner) => Some(owner),
            _ => None,
        }
    }
}

/// Collects graph parts and validates them into a [`GraphModel`]
///
/// ```rust,ignore
/// let graph = GraphBuilder::new()
///     .service(ServiceNode::new("user-service", RuntimeKind::HttpService))
///     .contract(Contract::new("UserProfile", "user-service"))
///     .edge(DependencyEdge::blocking("loyalty-service", "user-service", "UserProfile"))
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    services: Vec<ServiceNode>,
    contracts: Vec<Contract>,
    edges: Vec<DependencyEdge>,
    precedence: Vec<PrecedenceRule>,
    revision: Option<String>,
}

impl GraphBuilder {
    /// Create an empty builder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service
    #[must_use]
    pub fn service(mut self, service: ServiceNode) -> Self {
        self.services.push(service);
        self
    }

    /// Add a contract
    #[must_use]
    pub fn contract(mut self, contract: Contract) -> Self {
        self.contracts.push(contract);
        self
    }

    /// Add a dependency edge
    #[must_use]
    pub fn edge(mut self, edge: DependencyEdge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Add an ownership precedence rule
    #[must_use]
    pub fn precedence(mut self, rule: PrecedenceRule) -> Self {
        self.precedence.push(rule);
        self
    }

    /// Label the snapshot with a revision marker from the source document
    #[must_use]
    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Validate strictly and build
    ///
    /// # Errors
    /// The first [`GraphIntegrityError`] found
    pub fn build(self) -> Result<GraphModel, GraphIntegrityError> {
        GraphModel::validate(self, LoadMode::Strict)
    }

    /// Validate as a staged (partial) load and build
    ///
    /// # Errors
    /// The first non-ownership [`GraphIntegrityError`] found
    pub fn build_staged(self) -> Result<GraphModel, GraphIntegrityError> {
        GraphModel::validate(self, LoadMode::Staged)
    }
}

/// Validated, immutable dependency graph
#[derive(Debug, Clone)]
pub struct GraphModel {
    mode: LoadMode,
    revision: Option<String>,
    services: BTreeMap<ServiceName, ServiceNode>,
    contracts: BTreeMap<ContractId, Contract>,
    edges: Vec<DependencyEdge>,
    /// contract -> indices into `edges` of its consumer edges
    consumers: BTreeMap<ContractId, Vec<usize>>,
    /// service -> indices into `edges` where it is the consumer
    outgoing: BTreeMap<ServiceName, Vec<usize>>,
    produced: BTreeMap<ServiceName, BTreeSet<ContractId>>,
    claimants: BTreeMap<Datum, BTreeSet<ServiceName>>,
    precedence: BTreeMap<Datum, ServiceName>,
    deferred: Vec<GraphIntegrityError>,
    fingerprint: String,
}

impl GraphModel {
    /// Load and strictly validate a graph
    ///
    /// # Errors
    /// Fails fast with a [`GraphIntegrityError`] naming the offending
    /// service, contract, edge or datum.
    pub fn load(
        services: Vec<ServiceNode>,
        contracts: Vec<Contract>,
        edges: Vec<DependencyEdge>,
    ) -> Result<Self, GraphIntegrityError> {
        Self::validate(
            GraphBuilder {
                services,
                contracts,
                edges,
                ..GraphBuilder::default()
            },
            LoadMode::Strict,
        )
    }

    /// Load as a staged (partial) graph, deferring ownership conflicts
    ///
    /// # Errors
    /// Any non-ownership [`GraphIntegrityError`]
    pub fn load_staged(
        services: Vec<ServiceNode>,
        contracts: Vec<Contract>,
        edges: Vec<DependencyEdge>,
        precedence: Vec<PrecedenceRule>,
    ) -> Result<Self, GraphIntegrityError> {
        Self::validate(
            GraphBuilder {
                services,
                contracts,
                edges,
                precedence,
                revision: None,
            },
            LoadMode::Staged,
        )
    }

    fn validate(parts: GraphBuilder, mode: LoadMode) -> Result<Self, GraphIntegrityError> {
        let GraphBuilder {
            services: service_list,
            contracts: contract_list,
            edges,
            precedence: precedence_list,
            revision,
        } = parts;

        let mut services = BTreeMap::new();
        for service in service_list {
            if services.contains_key(&service.name) {
                return Err(GraphIntegrityError::DuplicateService(service.name));
            }
            services.insert(service.name.clone(), service);
        }

        let mut contracts: BTreeMap<ContractId, Contract> = BTreeMap::new();
        let mut produced: BTreeMap<ServiceName, BTreeSet<ContractId>> = BTreeMap::new();
        for contract in contract_list {
            let mut seen = HashSet::new();
            for field in &contract.fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(GraphIntegrityError::DuplicateField {
                        contract: contract.id.clone(),
                        field: field.name.clone(),
                    });
                }
            }
            if let Some(existing) = contracts.get(&contract.id) {
                return Err(GraphIntegrityError::DuplicateProducer {
                    contract: contract.id.clone(),
                    first: existing.producer.clone(),
                    second: contract.producer,
                });
            }
            if !services.contains_key(&contract.producer) {
                return Err(GraphIntegrityError::OrphanContract {
                    contract: contract.id,
                    producer: contract.producer,
                });
            }
            produced
                .entry(contract.producer.clone())
                .or_default()
                .insert(contract.id.clone());
            contracts.insert(contract.id.clone(), contract);
        }

        for service in services.values() {
            for declared in &service.contracts {
                let ok = contracts
                    .get(declared)
                    .is_some_and(|c| c.producer == service.name);
                if !ok {
                    return Err(GraphIntegrityError::UndeclaredContract {
                        service: service.name.clone(),
                        contract: declared.clone(),
                    });
                }
            }
        }

        let mut consumers: BTreeMap<ContractId, Vec<usize>> = BTreeMap::new();
        let mut outgoing: BTreeMap<ServiceName, Vec<usize>> = BTreeMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            Self::check_edge(edge, &services, &contracts)?;
            consumers.entry(edge.contract.clone()).or_default().push(idx);
            outgoing.entry(edge.source.clone()).or_default().push(idx);
        }

        let mut claimants: BTreeMap<Datum, BTreeSet<ServiceName>> = BTreeMap::new();
        for service in services.values() {
            for datum in &service.owns {
                claimants
                    .entry(datum.clone())
                    .or_default()
                    .insert(service.name.clone());
            }
        }

        let mut deferred = Vec::new();
        let mut precedence = BTreeMap::new();
        for rule in precedence_list {
            let valid = claimants
                .get(&rule.datum)
                .is_some_and(|c| c.contains(&rule.owner));
            if !valid {
                return Err(GraphIntegrityError::InvalidPrecedence {
                    datum: rule.datum,
                    owner: rule.owner,
                });
            }
            precedence.insert(rule.datum, rule.owner);
        }

        let ownership_issues = Self::ownership_issues(&claimants, &precedence, &contracts);
        if let Some(first) = ownership_issues.first() {
            match mode {
                LoadMode::Strict => return Err(first.clone()),
                LoadMode::Staged => {
                    for issue in &ownership_issues {
                        tracing::warn!(issue = %issue, "deferring ownership issue in staged load");
                    }
                    deferred = ownership_issues;
                }
            }
        }

        let fingerprint = compute_fingerprint(&services, &contracts, &edges, &precedence);

        tracing::debug!(
            services = services.len(),
            contracts = contracts.len(),
            edges = edges.len(),
            fingerprint = %fingerprint,
            "graph loaded"
        );

        Ok(Self {
            mode,
            revision,
            services,
            contracts,
            edges,
            consumers,
            outgoing,
            produced,
            claimants,
            precedence,
            deferred,
            fingerprint,
        })
    }

    fn check_edge(
        edge: &DependencyEdge,
        services: &BTreeMap<ServiceName, ServiceNode>,
        contracts: &BTreeMap<ContractId, Contract>,
    ) -> Result<(), GraphIntegrityError> {
        for endpoint in [&edge.source, &edge.target] {
            if !services.contains_key(endpoint) {
                return Err(GraphIntegrityError::DanglingEdge {
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        let Some(contract) = contracts.get(&edge.contract) else {
            return Err(GraphIntegrityError::UnknownContract {
                from: edge.source.clone(),
                to: edge.target.clone(),
                contract: edge.contract.clone(),
            });
        };
        if contract.producer != edge.target {
            return Err(GraphIntegrityError::ContractNotOnTarget {
                from: edge.source.clone(),
                to: edge.target.clone(),
                contract: edge.contract.clone(),
                producer: contract.producer.clone(),
            });
        }
        if edge.source == edge.target {
            return Err(GraphIntegrityError::SelfDependency {
                service: edge.source.clone(),
                contract: edge.contract.clone(),
            });
        }
        if let Some(reads) = &edge.reads {
            if let Some(unknown) = reads.iter().find(|f| contract.field(f).is_none()) {
                return Err(GraphIntegrityError::UnknownReadField {
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                    contract: edge.contract.clone(),
                    field: unknown.clone(),
                });
            }
        }
        Ok(())
    }

    fn ownership_issues(
        claimants: &BTreeMap<Datum, BTreeSet<ServiceName>>,
        precedence: &BTreeMap<Datum, ServiceName>,
        contracts: &BTreeMap<ContractId, Contract>,
    ) -> Vec<GraphIntegrityError> {
        let mut issues = Vec::new();
        for (datum, owners) in claimants {
            if owners.len() > 1 && !precedence.contains_key(datum) {
                issues.push(GraphIntegrityError::DuplicateOwnership {
                    datum: datum.clone(),
                    claimants: owners.iter().cloned().collect(),
                });
            }
        }
        for contract in contracts.values() {
            for field in &contract.fields {
                if let Some(datum) = &field.datum {
                    if !claimants.contains_key(datum) {
                        issues.push(GraphIntegrityError::UnownedDatum {
                            contract: contract.id.clone(),
                            field: field.name.clone(),
                            datum: datum.clone(),
                        });
                    }
                }
            }
        }
        issues
    }

    /// Load mode the graph was validated with
    #[inline]
    #[must_use]
    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    /// Revision marker from the source document, if any
    #[inline]
    #[must_use]
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Ownership issues deferred by a staged load
    #[inline]
    #[must_use]
    pub fn deferred_issues(&self) -> &[GraphIntegrityError] {
        &self.deferred
    }

    /// SHA-256 over the sorted graph structure (hex)
    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Look up a service
    #[inline]
    #[must_use]
    pub fn service(&self, name: &ServiceName) -> Option<&ServiceNode> {
        self.services.get(name)
    }

    /// All services, sorted by name
    pub fn services(&self) -> impl Iterator<Item = &ServiceNode> {
        self.services.values()
    }

    /// Look up a contract
    #[inline]
    #[must_use]
    pub fn contract(&self, id: &ContractId) -> Option<&Contract> {
        self.contracts.get(id)
    }

    /// All contracts, sorted by id
    pub fn contracts(&self) -> impl Iterator<Item = &Contract> {
        self.contracts.values()
    }

    /// All edges in load order
    #[inline]
    #[must_use]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Contracts produced by `service`
    pub fn contracts_of<'a>(&'a self, service: &ServiceName) -> impl Iterator<Item = &'a Contract> + 'a {
        self.produced
            .get(service)
            .into_iter()
            .flatten()
            .filter_map(|id| self.contracts.get(id))
    }

    /// Edges consuming `contract`
    pub fn consumer_edges<'a>(&'a self, contract: &ContractId) -> impl Iterator<Item = &'a DependencyEdge> + 'a {
        self.consumers
            .get(contract)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    /// Services consuming `contract`, sorted and deduplicated
    #[must_use]
    pub fn consumers_of(&self, contract: &ContractId) -> BTreeSet<&ServiceName> {
        self.consumer_edges(contract).map(|e| &e.source).collect()
    }

    /// Producer of `contract`
    #[must_use]
    pub fn producer_of(&self, contract: &ContractId) -> Option<&ServiceName> {
        self.contracts.get(contract).map(|c| &c.producer)
    }

    /// Edges where `service` is the consumer
    pub fn edges_from<'a>(&'a self, service: &ServiceName) -> impl Iterator<Item = &'a DependencyEdge> + 'a {
        self.outgoing
            .get(service)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    /// Resolve the source-of-truth owner of `datum`
    #[must_use]
    pub fn owner_of(&self, datum: &Datum) -> OwnershipResolution {
        if let Some(owner) = self.precedence.get(datum) {
            return OwnershipResolution::Unique(owner.clone());
        }
        let Some(owners) = self.claimants.get(datum) else {
            return OwnershipResolution::Unclaimed;
        };
        let mut iter = owners.iter();
        match (iter.next(), iter.next()) {
            (None, _) => OwnershipResolution::Unclaimed,
            (Some(only), None) => OwnershipResolution::Unique(only.clone()),
            _ => OwnershipResolution::Contested(owners.iter().cloned().collect()),
        }
    }
}

/// Compute the graph fingerprint
///
/// Binds a report to the exact structure it was computed from.
fn compute_fingerprint(
    services: &BTreeMap<ServiceName, ServiceNode>,
    contracts: &BTreeMap<ContractId, Contract>,
    edges: &[DependencyEdge],
    precedence: &BTreeMap<Datum, ServiceName>,
) -> String {
    let mut hasher = Sha256::new();

    for service in services.values() {
        hasher.update(service.name.as_str().as_bytes());
        hasher.update([0]);
        for datum in &service.owns {
            hasher.update(datum.as_str().as_bytes());
            hasher.update([1]);
        }
    }

    for contract in contracts.values() {
        hasher.update(contract.id.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(contract.producer.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(contract.version.as_bytes());
        hasher.update([u8::from(contract.transition_window)]);
        for field in &contract.fields {
            hasher.update(field.name.as_bytes());
            hasher.update([0]);
            hasher.update(field.ty.to_string().as_bytes());
            hasher.update([u8::from(field.required), u8::from(field.deprecated)]);
            if let Some(default) = &field.default {
                hasher.update(default.to_string().as_bytes());
            }
            hasher.update([1]);
        }
    }

    // Edges sorted for determinism
    let mut sorted: Vec<String> = edges
        .iter()
        .map(|e| {
            format!(
                "{}>{}:{}:{:?}:{:?}:{:?}",
                e.source, e.target, e.contract, e.criticality, e.protocol, e.reads
            )
        })
        .collect();
    sorted.sort();
    for line in sorted {
        hasher.update(line.as_bytes());
        hasher.update([0]);
    }

    for (datum, owner) in precedence {
        hasher.update(datum.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(owner.as_str().as_bytes());
        hasher.update([1]);
    }

    hex::encode(hasher.finalize())
}
