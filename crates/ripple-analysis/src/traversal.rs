//! Impact traversal
//!
//! Breadth-first propagation from every touched contract:
//! 1. first hop: every consumer edge of the touched contract, blocking or
//!    eventual (anything reading the contract is impacted)
//! 2. further hops: from an impacted service, the blocking consumer edges of
//!    every contract it produces
//!
//! A service already visited from a root is never re-expanded, so cyclic
//! graphs terminate. Roots are partitioned by weakly-connected component and
//! components are traversed on rayon workers; the partial results are merged
//! by a single writer that keeps, per service, the most severe risk and the
//! shortest causal chain.

use crate::compat::{ClassifiedChange, CompatibilityClass, ContractChange};
use petgraph::unionfind::UnionFind;
use rayon::prelude::*;
use ripple_model::{ContractId, Criticality, DependencyEdge, GraphModel, ServiceName};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// One step of a causal chain
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "hop", rename_all = "camelCase")]
pub enum Hop {
    /// The touched contract the chain starts from
    Contract {
        /// Contract id
        contract: ContractId,
    },
    /// `consumer` consumes `producer`'s `contract`
    Edge {
        /// Consuming service
        consumer: ServiceName,
        /// Producing service
        producer: ServiceName,
        /// Contract consumed
        contract: ContractId,
        /// Edge criticality
        criticality: Criticality,
    },
}

impl Hop {
    fn edge(edge: &DependencyEdge) -> Self {
        Self::Edge {
            consumer: edge.source.clone(),
            producer: edge.target.clone(),
            contract: edge.contract.clone(),
            criticality: edge.criticality,
        }
    }
}

/// A touched contract, as seen by traversal and planning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchedContract {
    /// Contract id
    pub contract: ContractId,
    /// Its producer
    pub producer: ServiceName,
    /// Computed class
    pub class: CompatibilityClass,
    /// Whether the change retracts something consumers rely on
    pub retracts: bool,
    /// Whether a transition window is declared
    pub transition_window: bool,
}

impl From<&ContractChange> for TouchedContract {
    fn from(c: &ContractChange) -> Self {
        Self {
            contract: c.contract.clone(),
            producer: c.producer.clone(),
            class: c.class,
            retracts: c.retracts,
            transition_window: c.transition_window,
        }
    }
}

/// An impacted service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactEntry {
    /// Service
    pub service: ServiceName,
    /// Severity of the most severe touched contract reaching the service
    pub risk: CompatibilityClass,
    /// Shortest chain from such a contract: `Contract`, then `Edge` hops
    pub causal_chain: Vec<Hop>,
}

impl ImpactEntry {
    /// Touched contract the chain starts from
    #[must_use]
    pub fn root(&self) -> Option<&ContractId> {
        match self.causal_chain.first() {
            Some(Hop::Contract { contract }) => Some(contract),
            _ => None,
        }
    }

    /// Number of edges between the root and the service
    #[must_use]
    pub fn depth(&self) -> usize {
        self.causal_chain.len().saturating_sub(1)
    }

    fn consumers(&self) -> impl Iterator<Item = &ServiceName> {
        self.causal_chain.iter().filter_map(|hop| match hop {
            Hop::Edge { consumer, .. } => Some(consumer),
            Hop::Contract { .. } => None,
        })
    }

    /// Ordering used by the merge: higher risk, shorter chain, smaller root
    /// id, then smaller service names along the chain win
    fn preference(&self, other: &Self) -> Ordering {
        other
            .risk
            .cmp(&self.risk)
            .then_with(|| self.causal_chain.len().cmp(&other.causal_chain.len()))
            .then_with(|| self.root().cmp(&other.root()))
            .then_with(|| self.consumers().cmp(other.consumers()))
    }
}

/// Transitive impact of a change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImpactSet {
    touched: Vec<TouchedContract>,
    entries: BTreeMap<ServiceName, ImpactEntry>,
    propagated: BTreeSet<ContractId>,
}

impl ImpactSet {
    /// Touched contracts, sorted by id
    #[must_use]
    pub fn touched(&self) -> &[TouchedContract] {
        &self.touched
    }

    /// Entry for `service`
    #[must_use]
    pub fn entry(&self, service: &ServiceName) -> Option<&ImpactEntry> {
        self.entries.get(service)
    }

    /// Whether `service` is impacted
    #[must_use]
    pub fn contains(&self, service: &ServiceName) -> bool {
        self.entries.contains_key(service)
    }

    /// Impacted entries, sorted by service
    pub fn entries(&self) -> impl Iterator<Item = &ImpactEntry> {
        self.entries.values()
    }

    /// Impacted services, sorted
    pub fn services(&self) -> impl Iterator<Item = &ServiceName> {
        self.entries.keys()
    }

    /// Contracts that carried propagation, including the touched ones
    #[must_use]
    pub fn propagated_contracts(&self) -> &BTreeSet<ContractId> {
        &self.propagated
    }

    /// Number of impacted services
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is impacted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Partial result of traversing one component
#[derive(Debug, Default)]
struct Partial {
    entries: Vec<ImpactEntry>,
    propagated: BTreeSet<ContractId>,
}

/// Computes [`ImpactSet`]s
#[derive(Debug, Clone, Copy)]
pub struct ImpactTraversal {
    parallel: bool,
    parallel_threshold: usize,
}

impl Default for ImpactTraversal {
    fn default() -> Self {
        Self {
            parallel: true,
            parallel_threshold: 2,
        }
    }
}

impl ImpactTraversal {
    /// Create with defaults (parallel from two components)
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable rayon traversal
    #[inline]
    #[must_use]
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Minimum number of components before traversal goes parallel
    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Compute the impact of a classified change
    #[must_use]
    pub fn compute_impact(&self, change: &ClassifiedChange, graph: &GraphModel) -> ImpactSet {
        let touched: Vec<TouchedContract> = change.contracts.iter().map(TouchedContract::from).collect();
        let components = Self::partition(&touched, graph);

        let partials: Vec<Partial> = if self.parallel && components.len() >= self.parallel_threshold {
            tracing::debug!(components = components.len(), "traversing components in parallel");
            components
                .into_par_iter()
                .map(|roots| Self::traverse_component(&roots, graph))
                .collect()
        } else {
            components
                .into_iter()
                .map(|roots| Self::traverse_component(&roots, graph))
                .collect()
        };

        let set = Self::merge(touched, partials);
        tracing::info!(
            touched = set.touched.len(),
            impacted = set.entries.len(),
            "impact traversal complete"
        );
        set
    }

    /// Group roots by weakly-connected component of the dependency graph
    fn partition<'a>(touched: &'a [TouchedContract], graph: &GraphModel) -> Vec<Vec<&'a TouchedContract>> {
        let index: HashMap<&ServiceName, usize> = graph
            .services()
            .enumerate()
            .map(|(i, s)| (&s.name, i))
            .collect();

        let mut components = UnionFind::<usize>::new(index.len());
        for edge in graph.edges() {
            if let (Some(&a), Some(&b)) = (index.get(&edge.source), index.get(&edge.target)) {
                components.union(a, b);
            }
        }

        let mut groups: BTreeMap<usize, Vec<&TouchedContract>> = BTreeMap::new();
        for root in touched {
            let Some(&idx) = index.get(&root.producer) else {
                continue;
            };
            groups.entry(components.find_mut(idx)).or_default().push(root);
        }
        groups.into_values().collect()
    }

    fn traverse_component(roots: &[&TouchedContract], graph: &GraphModel) -> Partial {
        let mut partial = Partial::default();
        for root in roots {
            Self::traverse_root(root, graph, &mut partial);
        }
        partial
    }

    fn traverse_root(root: &TouchedContract, graph: &GraphModel, partial: &mut Partial) {
        let mut visited: BTreeSet<ServiceName> = BTreeSet::new();
        let mut queue: VecDeque<(ServiceName, Vec<Hop>)> = VecDeque::new();
        let start = vec![Hop::Contract {
            contract: root.contract.clone(),
        }];

        partial.propagated.insert(root.contract.clone());
        for edge in Self::sorted(graph.consumer_edges(&root.contract)) {
            if visited.insert(edge.source.clone()) {
                let mut chain = start.clone();
                chain.push(Hop::edge(edge));
                queue.push_back((edge.source.clone(), chain));
            }
        }

        while let Some((service, chain)) = queue.pop_front() {
            for contract in graph.contracts_of(&service) {
                let blocking = graph.consumer_edges(&contract.id).filter(|e| e.is_blocking());
                for edge in Self::sorted(blocking) {
                    if visited.insert(edge.source.clone()) {
                        tracing::trace!(
                            from = %service,
                            to = %edge.source,
                            contract = %contract.id,
                            "impact propagates"
                        );
                        partial.propagated.insert(contract.id.clone());
                        let mut next = chain.clone();
                        next.push(Hop::edge(edge));
                        queue.push_back((edge.source.clone(), next));
                    }
                }
            }
            partial.entries.push(ImpactEntry {
                service,
                risk: root.class,
                causal_chain: chain,
            });
        }
    }

    /// Consumer edges ordered by consumer name, blocking first
    fn sorted<'g>(edges: impl Iterator<Item = &'g DependencyEdge>) -> Vec<&'g DependencyEdge> {
        let mut edges: Vec<&DependencyEdge> = edges.collect();
        edges.sort_by(|a, b| {
            a.source
                .cmp(&b.source)
                .then_with(|| a.criticality.cmp(&b.criticality))
        });
        edges
    }

    /// Single-writer merge of partial results
    fn merge(touched: Vec<TouchedContract>, partials: Vec<Partial>) -> ImpactSet {
        let mut set = ImpactSet {
            touched,
            ..ImpactSet::default()
        };
        for partial in partials {
            set.propagated.extend(partial.propagated);
            for entry in partial.entries {
                match set.entries.get(&entry.service) {
                    Some(existing) if existing.preference(&entry) != Ordering::Greater => {}
                    _ => {
                        set.entries.insert(entry.service.clone(), entry);
                    }
                }
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_model::{Contract, GraphBuilder, RuntimeKind, ServiceNode};

    fn touched(contract: &str, producer: &str, class: CompatibilityClass) -> ContractChange {
        ContractChange {
            contract: contract.into(),
            producer: producer.into(),
            class,
            retracts: false,
            transition_window: false,
            deltas: Vec::new(),
        }
    }

    fn svc(name: &str, produces: &str) -> ServiceNode {
        ServiceNode::new(name, RuntimeKind::HttpService).listening(produces)
    }

    /// a <- b <- c (blocking), d <- e (separate component)
    fn chain_graph() -> GraphModel {
        GraphBuilder::new()
            .service(svc("a", "A"))
            .service(svc("b", "B"))
            .service(svc("c", "C"))
            .service(svc("d", "D"))
            .service(svc("e", "E"))
            .contract(Contract::new("A", "a"))
            .contract(Contract::new("B", "b"))
            .contract(Contract::new("C", "c"))
            .contract(Contract::new("D", "d"))
            .contract(Contract::new("E", "e"))
            .edge(DependencyEdge::blocking("b", "a", "A"))
            .edge(DependencyEdge::blocking("c", "b", "B"))
            .edge(DependencyEdge::blocking("e", "d", "D"))
            .build()
            .unwrap()
    }

    #[test]
    fn follows_blocking_edges_transitively() {
        let change = ClassifiedChange {
            contracts: vec![touched("A", "a", CompatibilityClass::Breaking)],
        };
        let set = ImpactTraversal::new().compute_impact(&change, &chain_graph());

        let names: Vec<&str> = set.services().map(ServiceName::as_str).collect();
        assert_eq!(names, vec!["b", "c"]);
        let c = set.entry(&"c".into()).unwrap();
        assert_eq!(c.depth(), 2);
        assert_eq!(c.root().map(ContractId::as_str), Some("A"));
        assert!(matches!(&c.causal_chain[1], Hop::Edge { consumer, .. } if consumer.as_str() == "b"));
        assert!(set.propagated_contracts().contains(&ContractId::from("B")));
    }

    #[test]
    fn eventual_edges_only_count_on_first_hop() {
        let graph = GraphBuilder::new()
            .service(svc("a", "A"))
            .service(svc("b", "B"))
            .service(svc("c", "C"))
            .contract(Contract::new("A", "a"))
            .contract(Contract::new("B", "b"))
            .contract(Contract::new("C", "c"))
            .edge(DependencyEdge::eventual("b", "a", "A"))
            .edge(DependencyEdge::eventual("c", "b", "B"))
            .build()
            .unwrap();
        let change = ClassifiedChange {
            contracts: vec![touched("A", "a", CompatibilityClass::Additive)],
        };
        let set = ImpactTraversal::new().compute_impact(&change, &graph);
        assert!(set.contains(&"b".into()));
        assert!(!set.contains(&"c".into()));
    }

    #[test]
    fn most_severe_root_wins() {
        let change = ClassifiedChange {
            contracts: vec![
                touched("A", "a", CompatibilityClass::Additive),
                touched("B", "b", CompatibilityClass::Breaking),
            ],
        };
        let set = ImpactTraversal::new().compute_impact(&change, &chain_graph());
        let c = set.entry(&"c".into()).unwrap();
        assert_eq!(c.risk, CompatibilityClass::Breaking);
        assert_eq!(c.root().map(ContractId::as_str), Some("B"));
        assert_eq!(set.entry(&"b".into()).unwrap().risk, CompatibilityClass::Additive);
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let change = ClassifiedChange {
            contracts: vec![
                touched("A", "a", CompatibilityClass::Breaking),
                touched("D", "d", CompatibilityClass::Ambiguous),
            ],
        };
        let graph = chain_graph();
        let parallel = ImpactTraversal::new().with_threshold(1).compute_impact(&change, &graph);
        let sequential = ImpactTraversal::new()
            .with_parallelism(false)
            .compute_impact(&change, &graph);
        assert_eq!(parallel, sequential);
        assert_eq!(parallel.len(), 3);
    }

    #[test]
    fn cycles_terminate() {
        let graph = GraphBuilder::new()
            .service(svc("a", "A"))
            .service(svc("b", "B"))
            .contract(Contract::new("A", "a"))
            .contract(Contract::new("B", "b"))
            .edge(DependencyEdge::blocking("b", "a", "A"))
            .edge(DependencyEdge::blocking("a", "b", "B"))
            .build()
            .unwrap();
        let change = ClassifiedChange {
            contracts: vec![touched("A", "a", CompatibilityClass::Breaking)],
        };
        let set = ImpactTraversal::new().compute_impact(&change, &graph);
        assert_eq!(set.len(), 2);
        assert_eq!(set.entry(&"a".into()).unwrap().depth(), 2);
    }
}
