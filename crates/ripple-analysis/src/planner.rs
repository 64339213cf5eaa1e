//! Rollout planning
//!
//! Orders the services affected by a change into stages that respect
//! blocking dependencies:
//! - nodes: producers of touched contracts plus every impacted service
//! - edges: blocking dependency edges between those nodes; eventual edges
//!   never constrain order
//! - base order: a producer deploys before its consumers
//!
//! Breaking touched contracts get a compatibility bridge. With a declared
//! transition window the producer and its blocking consumers share a stage
//! (annotated with a [`TransitionWindow`]). Without one, a change that
//! retracts something consumers rely on puts the producer after those
//! consumers.
//!
//! Ordering is decided per consumer/producer pair: a consumers-first bridge
//! on any contract between the two wins over the other contracts they share.
//! Bridges that still close a loop through other pairs are dropped and
//! recorded as [`BridgeConflict`]s instead of failing the plan.
//!
//! Stages come from layered Kahn grouping, so independent services deploy
//! together.

use crate::compat::CompatibilityClass;
use crate::error::CycleDetectedError;
use crate::traversal::{ImpactSet, TouchedContract};
use petgraph::graphmap::DiGraphMap;
use petgraph::unionfind::UnionFind;
use petgraph::Direction;
use ripple_model::{ContractId, GraphModel, ServiceName};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Producer and consumers of a contract rolled out together while both
/// shapes are tolerated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionWindow {
    /// Contract under transition
    pub contract: ContractId,
    /// Its producer
    pub producer: ServiceName,
    /// Blocking consumers sharing the stage
    pub consumers: Vec<ServiceName>,
}

/// Services deployable together
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStage {
    /// Position in the rollout, from zero
    pub index: usize,
    /// Services, sorted by name
    pub services: Vec<ServiceName>,
    /// Transition windows opened in this stage
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transition_windows: Vec<TransitionWindow>,
}

/// Totally ordered list of stages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RolloutPlan {
    /// Stages in deployment order
    pub stages: Vec<RolloutStage>,
    /// Bridges dropped because they contradicted the dependency order
    #[serde(skip)]
    pub conflicts: Vec<BridgeConflict>,
}

/// Compatibility bridges that could not be honored together with the
/// blocking dependency order
///
/// The listed contracts fall back to producer-first ordering, which is
/// always consistent because the blocking subgraph is acyclic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConflict {
    /// Touched contracts whose bridge was dropped
    pub contracts: Vec<ContractId>,
    /// Loop the bridges closed, in deploy-before order
    pub services: Vec<ServiceName>,
}

impl RolloutPlan {
    /// Stage index of `service`
    #[must_use]
    pub fn stage_of(&self, service: &ServiceName) -> Option<usize> {
        self.stages
            .iter()
            .find(|s| s.services.contains(service))
            .map(|s| s.index)
    }

    /// Service names per stage
    #[must_use]
    pub fn service_names(&self) -> Vec<Vec<&str>> {
        self.stages
            .iter()
            .map(|s| s.services.iter().map(ServiceName::as_str).collect())
            .collect()
    }

    /// Number of stages
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether there is nothing to roll out
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// How a touched contract bends the base order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bridge {
    /// Producer first
    None,
    /// Producer and consumers share a stage
    Window,
    /// Consumers first
    ConsumersFirst,
}

impl Bridge {
    fn for_contract(touched: &TouchedContract) -> Self {
        if touched.class == CompatibilityClass::Additive {
            Self::None
        } else if touched.transition_window {
            Self::Window
        } else if touched.retracts {
            Self::ConsumersFirst
        } else {
            Self::None
        }
    }
}

/// Deploy-before graph over stage groups for one set of active bridges
struct Bridged {
    group_of: Vec<usize>,
    order: DiGraphMap<usize, ()>,
    windows: Vec<TransitionWindow>,
    /// consumers-first edge -> contracts whose bridge put it there
    reasons: HashMap<(usize, usize), BTreeSet<ContractId>>,
    /// merged group -> contracts whose transition window merged it
    merged_by: HashMap<usize, BTreeSet<ContractId>>,
}

impl Bridged {
    fn build(
        bridges: &BTreeMap<&ContractId, (Bridge, &TouchedContract)>,
        nodes: &[&ServiceName],
        index: &HashMap<&ServiceName, usize>,
        blocking: &[(usize, usize, &ContractId)],
    ) -> Self {
        let mut groups = UnionFind::<usize>::new(nodes.len());
        let mut windows: Vec<TransitionWindow> = Vec::new();
        let mut opened: Vec<(usize, ContractId)> = Vec::new();
        for (contract, (bridge, touched)) in bridges {
            if *bridge != Bridge::Window {
                continue;
            }
            let Some(&p) = index.get(&touched.producer) else {
                continue;
            };
            let mut consumers = BTreeSet::new();
            for &(c, producer, k) in blocking {
                if k == *contract && producer == p {
                    groups.union(c, p);
                    consumers.insert(nodes[c].clone());
                }
            }
            if !consumers.is_empty() {
                tracing::debug!(contract = %contract, "opening transition window");
                opened.push((p, (*contract).clone()));
                windows.push(TransitionWindow {
                    contract: (*contract).clone(),
                    producer: touched.producer.clone(),
                    consumers: consumers.into_iter().collect(),
                });
            }
        }
        let group_of: Vec<usize> = (0..nodes.len()).map(|i| groups.find_mut(i)).collect();

        let mut merged_by: HashMap<usize, BTreeSet<ContractId>> = HashMap::new();
        for (p, contract) in opened {
            merged_by.entry(group_of[p]).or_default().insert(contract);
        }

        // One constraint per consumer/producer pair; a consumers-first bridge
        // on any of the pair's contracts overrides the base order
        let mut pairs: BTreeMap<(usize, usize), Vec<&ContractId>> = BTreeMap::new();
        for &(c, p, k) in blocking {
            pairs.entry((c, p)).or_default().push(k);
        }

        let mut order: DiGraphMap<usize, ()> = DiGraphMap::new();
        for &g in &group_of {
            order.add_node(g);
        }
        let mut reasons: HashMap<(usize, usize), BTreeSet<ContractId>> = HashMap::new();
        for ((c, p), contracts) in pairs {
            let (gc, gp) = (group_of[c], group_of[p]);
            if gc == gp {
                continue;
            }
            let first: BTreeSet<ContractId> = contracts
                .into_iter()
                .filter(|k| matches!(bridges.get(*k), Some((Bridge::ConsumersFirst, _))))
                .cloned()
                .collect();
            if first.is_empty() {
                order.add_edge(gp, gc, ());
            } else {
                order.add_edge(gc, gp, ());
                reasons.entry((gc, gp)).or_default().extend(first);
            }
        }

        Self {
            group_of,
            order,
            windows,
            reasons,
            merged_by,
        }
    }

    /// Bridged contracts responsible for a loop in the order
    fn culprits(&self, cycle: &[usize]) -> BTreeSet<ContractId> {
        let mut culprits = BTreeSet::new();
        for (i, &g) in cycle.iter().enumerate() {
            let next = cycle[(i + 1) % cycle.len()];
            if let Some(contracts) = self.reasons.get(&(g, next)) {
                culprits.extend(contracts.iter().cloned());
            }
            if let Some(contracts) = self.merged_by.get(&g) {
                culprits.extend(contracts.iter().cloned());
            }
        }
        culprits
    }
}

/// Orders impacted services into rollout stages
#[derive(Debug, Clone, Copy, Default)]
pub struct RolloutPlanner;

impl RolloutPlanner {
    /// Plan the rollout of an impact set
    ///
    /// # Errors
    /// [`CycleDetectedError`] when the blocking subgraph among the planned
    /// services contains a cycle
    pub fn plan(impact: &ImpactSet, graph: &GraphModel) -> Result<RolloutPlan, CycleDetectedError> {
        let nodes: Vec<&ServiceName> = impact
            .touched()
            .iter()
            .map(|t| &t.producer)
            .chain(impact.services())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: HashMap<&ServiceName, usize> =
            nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        // consumer -> producer, one entry per blocking edge inside the node set
        let mut blocking: Vec<(usize, usize, &ContractId)> = Vec::new();
        let mut consumption: DiGraphMap<usize, ()> = DiGraphMap::new();
        for i in 0..nodes.len() {
            consumption.add_node(i);
        }
        for edge in graph.edges().iter().filter(|e| e.is_blocking()) {
            if let (Some(&c), Some(&p)) = (index.get(&edge.source), index.get(&edge.target)) {
                consumption.add_edge(c, p, ());
                blocking.push((c, p, &edge.contract));
            }
        }

        if petgraph::algo::is_cyclic_directed(&consumption) {
            let cycle: Vec<ServiceName> = shortest_cycle(&consumption, &nodes)
                .unwrap_or_default()
                .into_iter()
                .map(|i| nodes[i].clone())
                .collect();
            tracing::warn!(cycle = ?cycle, "blocking dependency cycle among impacted services");
            return Err(CycleDetectedError { cycle });
        }

        let mut bridges: BTreeMap<&ContractId, (Bridge, &TouchedContract)> = impact
            .touched()
            .iter()
            .map(|t| (&t.contract, (Bridge::for_contract(t), t)))
            .collect();

        // Without bridges the order is the acyclic consumption graph
        // reversed, so revoking the bridges on each loop terminates.
        let mut conflicts = Vec::new();
        let bridged = loop {
            let bridged = Bridged::build(&bridges, &nodes, &index, &blocking);
            if !petgraph::algo::is_cyclic_directed(&bridged.order) {
                break bridged;
            }
            let Some(cycle) = shortest_cycle(&bridged.order, &nodes) else {
                break bridged;
            };
            let mut culprits = bridged.culprits(&cycle);
            if culprits.is_empty() {
                culprits = bridges
                    .iter()
                    .filter(|(_, (b, _))| *b != Bridge::None)
                    .map(|(k, _)| (*k).clone())
                    .collect();
            }
            let services: Vec<ServiceName> = cycle.iter().map(|&g| nodes[g].clone()).collect();
            tracing::warn!(
                contracts = ?culprits,
                services = ?services,
                "compatibility bridges conflict with dependency order, falling back to producer first"
            );
            for contract in &culprits {
                if let Some((bridge, _)) = bridges.get_mut(contract) {
                    *bridge = Bridge::None;
                }
            }
            conflicts.push(BridgeConflict {
                contracts: culprits.into_iter().collect(),
                services,
            });
        };

        let mut plan = Self::layer(&bridged.order, &bridged.group_of, &nodes, bridged.windows);
        plan.conflicts = conflicts;
        tracing::info!(
            services = nodes.len(),
            stages = plan.len(),
            conflicts = plan.conflicts.len(),
            "rollout planned"
        );
        Ok(plan)
    }

    /// Layered Kahn grouping
    fn layer(
        order: &DiGraphMap<usize, ()>,
        group_of: &[usize],
        nodes: &[&ServiceName],
        mut windows: Vec<TransitionWindow>,
    ) -> RolloutPlan {
        let mut members: BTreeMap<usize, Vec<ServiceName>> = BTreeMap::new();
        for (i, &g) in group_of.iter().enumerate() {
            members.entry(g).or_default().push(nodes[i].clone());
        }

        let mut in_degree: BTreeMap<usize, usize> = members
            .keys()
            .map(|&g| (g, order.neighbors_directed(g, Direction::Incoming).count()))
            .collect();
        let mut ready: Vec<usize> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(&g, _)| g)
            .collect();

        let mut stages = Vec::new();
        while !ready.is_empty() {
            let mut services: Vec<ServiceName> = Vec::new();
            let mut next = Vec::new();
            for &g in &ready {
                if let Some(m) = members.get(&g) {
                    services.extend(m.iter().cloned());
                }
                for succ in order.neighbors_directed(g, Direction::Outgoing) {
                    if let Some(d) = in_degree.get_mut(&succ) {
                        *d -= 1;
                        if *d == 0 {
                            next.push(succ);
                        }
                    }
                }
            }
            services.sort();

            let (here, rest): (Vec<_>, Vec<_>) = windows
                .into_iter()
                .partition(|w| services.contains(&w.producer));
            windows = rest;

            stages.push(RolloutStage {
                index: stages.len(),
                services,
                transition_windows: here,
            });
            next.sort_unstable();
            ready = next;
        }

        RolloutPlan {
            stages,
            conflicts: Vec::new(),
        }
    }
}

/// Shortest directed cycle as node indices, rotated to start at its
/// smallest service name
///
/// A globally shortest cycle has no chord, so no strict subsequence of it is
/// itself a cycle.
fn shortest_cycle(graph: &DiGraphMap<usize, ()>, names: &[&ServiceName]) -> Option<Vec<usize>> {
    let mut best: Option<Vec<usize>> = None;
    let mut starts: Vec<usize> = graph.nodes().collect();
    starts.sort_unstable();

    for start in starts {
        let mut parent: HashMap<usize, usize> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut closing = None;
        'bfs: while let Some(node) = queue.pop_front() {
            let mut succs: Vec<usize> = graph.neighbors(node).collect();
            succs.sort_unstable();
            for succ in succs {
                if succ == start {
                    closing = Some(node);
                    break 'bfs;
                }
                if let std::collections::hash_map::Entry::Vacant(slot) = parent.entry(succ) {
                    slot.insert(node);
                    queue.push_back(succ);
                }
            }
        }

        let Some(mut node) = closing else {
            continue;
        };
        let mut path = vec![node];
        while node != start {
            let Some(&prev) = parent.get(&node) else {
                break;
            };
            node = prev;
            path.push(node);
        }
        path.reverse();

        let candidate = rotate_to_smallest(path, names);
        let better = match &best {
            None => true,
            Some(b) => {
                let key = |c: &[usize]| (c.len(), c.iter().map(|&i| names[i]).collect::<Vec<_>>());
                key(&candidate) < key(b)
            }
        };
        if better {
            best = Some(candidate);
        }
    }
    best
}

fn rotate_to_smallest(mut cycle: Vec<usize>, names: &[&ServiceName]) -> Vec<usize> {
    if let Some(pos) = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| names[*a.1].cmp(names[*b.1]))
        .map(|(i, _)| i)
    {
        cycle.rotate_left(pos);
    }
    cycle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::{ClassifiedChange, ContractChange};
    use crate::traversal::ImpactTraversal;
    use ripple_model::{Contract, DependencyEdge, GraphBuilder, RuntimeKind, ServiceNode};

    fn svc(name: &str, produces: &str) -> ServiceNode {
        ServiceNode::new(name, RuntimeKind::HttpService).listening(produces)
    }

    fn change(contract: &str, producer: &str, class: CompatibilityClass, retracts: bool, window: bool) -> ClassifiedChange {
        ClassifiedChange {
            contracts: vec![ContractChange {
                contract: contract.into(),
                producer: producer.into(),
                class,
                retracts,
                transition_window: window,
                deltas: Vec::new(),
            }],
        }
    }

    /// b and c consume A; d consumes B; c consumes B eventually
    fn fan_graph() -> GraphModel {
        GraphBuilder::new()
            .service(svc("a", "A"))
            .service(svc("b", "B"))
            .service(ServiceNode::new("c", RuntimeKind::Worker))
            .service(ServiceNode::new("d", RuntimeKind::Worker))
            .contract(Contract::new("A", "a"))
            .contract(Contract::new("B", "b"))
            .edge(DependencyEdge::blocking("b", "a", "A"))
            .edge(DependencyEdge::blocking("c", "a", "A"))
            .edge(DependencyEdge::blocking("d", "b", "B"))
            .edge(DependencyEdge::eventual("c", "b", "B"))
            .build()
            .unwrap()
    }

    fn plan(change: &ClassifiedChange, graph: &GraphModel) -> Result<RolloutPlan, CycleDetectedError> {
        let impact = ImpactTraversal::new().compute_impact(change, graph);
        RolloutPlanner::plan(&impact, graph)
    }

    #[test]
    fn producers_deploy_first_in_layers() {
        let graph = fan_graph();
        let plan = plan(&change("A", "a", CompatibilityClass::Additive, false, false), &graph).unwrap();
        assert_eq!(plan.service_names(), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
        assert_eq!(plan.stage_of(&"d".into()), Some(2));
    }

    #[test]
    fn retracting_change_puts_consumers_first() {
        let graph = fan_graph();
        let plan = plan(&change("A", "a", CompatibilityClass::Breaking, true, false), &graph).unwrap();
        // b before a (bridge), b before d (base order)
        assert_eq!(plan.service_names(), vec![vec!["b", "c"], vec!["a", "d"]]);
    }

    #[test]
    fn transition_window_shares_stage() {
        let graph = fan_graph();
        let plan = plan(&change("A", "a", CompatibilityClass::Breaking, true, true), &graph).unwrap();
        assert_eq!(plan.service_names(), vec![vec!["a", "b", "c"], vec!["d"]]);
        let window = &plan.stages[0].transition_windows[0];
        assert_eq!(window.contract.as_str(), "A");
        assert_eq!(window.consumers.len(), 2);
        assert!(plan.stages[1].transition_windows.is_empty());
    }

    #[test]
    fn non_retracting_breaking_change_keeps_base_order() {
        let graph = fan_graph();
        let plan = plan(&change("A", "a", CompatibilityClass::Breaking, false, false), &graph).unwrap();
        assert_eq!(plan.stage_of(&"a".into()), Some(0));
    }

    #[test]
    fn blocking_cycle_is_reported_minimal_and_rotated() {
        // x consumes Y, y consumes Z, z consumes X; w consumes X too
        let graph = GraphBuilder::new()
            .service(svc("x", "X"))
            .service(svc("y", "Y"))
            .service(svc("z", "Z"))
            .service(ServiceNode::new("w", RuntimeKind::Worker))
            .contract(Contract::new("X", "x"))
            .contract(Contract::new("Y", "y"))
            .contract(Contract::new("Z", "z"))
            .edge(DependencyEdge::blocking("x", "y", "Y"))
            .edge(DependencyEdge::blocking("y", "z", "Z"))
            .edge(DependencyEdge::blocking("z", "x", "X"))
            .edge(DependencyEdge::blocking("w", "x", "X"))
            .build()
            .unwrap();
        let err = plan(&change("Y", "y", CompatibilityClass::Breaking, false, false), &graph).unwrap_err();
        let names: Vec<&str> = err.cycle.iter().map(ServiceName::as_str).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
    }

    #[test]
    fn eventual_back_edge_does_not_block_bridge() {
        let graph = GraphBuilder::new()
            .service(svc("a", "A"))
            .service(svc("b", "B"))
            .contract(Contract::new("A", "a"))
            .contract(Contract::new("B", "b"))
            .edge(DependencyEdge::blocking("b", "a", "A"))
            .edge(DependencyEdge::eventual("a", "b", "B"))
            .build()
            .unwrap();
        let plan = plan(&change("A", "a", CompatibilityClass::Breaking, true, false), &graph).unwrap();
        assert_eq!(plan.service_names(), vec![vec!["b"], vec!["a"]]);
    }

    #[test]
    fn bridge_wins_over_unchanged_sibling_contract() {
        // b consumes A (retracting change) and A2 (unchanged), both from a
        let graph = GraphBuilder::new()
            .service(svc("a", "A").listening("A2"))
            .service(ServiceNode::new("b", RuntimeKind::Worker))
            .contract(Contract::new("A", "a"))
            .contract(Contract::new("A2", "a"))
            .edge(DependencyEdge::blocking("b", "a", "A"))
            .edge(DependencyEdge::blocking("b", "a", "A2"))
            .build()
            .unwrap();
        let plan = plan(&change("A", "a", CompatibilityClass::Breaking, true, false), &graph).unwrap();
        assert_eq!(plan.service_names(), vec![vec!["b"], vec!["a"]]);
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn conflicting_bridge_is_dropped_and_recorded() {
        // c must precede a for A, but a precedes x (A2) which precedes c (X)
        let graph = GraphBuilder::new()
            .service(svc("a", "A").listening("A2"))
            .service(svc("x", "X"))
            .service(ServiceNode::new("c", RuntimeKind::Worker))
            .contract(Contract::new("A", "a"))
            .contract(Contract::new("A2", "a"))
            .contract(Contract::new("X", "x"))
            .edge(DependencyEdge::blocking("c", "a", "A"))
            .edge(DependencyEdge::blocking("x", "a", "A2"))
            .edge(DependencyEdge::blocking("c", "x", "X"))
            .build()
            .unwrap();
        let mut classified = change("A", "a", CompatibilityClass::Breaking, true, false);
        classified
            .contracts
            .extend(change("X", "x", CompatibilityClass::Additive, false, false).contracts);

        let plan = plan(&classified, &graph).unwrap();
        assert_eq!(plan.service_names(), vec![vec!["a"], vec!["x"], vec!["c"]]);
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].contracts, vec![ContractId::from("A")]);
        let loop_: Vec<&str> = plan.conflicts[0].services.iter().map(ServiceName::as_str).collect();
        assert_eq!(loop_, vec!["a", "x", "c"]);
    }

    #[test]
    fn rotation_starts_at_smallest() {
        let (a, b, c) = (ServiceName::new("a"), ServiceName::new("b"), ServiceName::new("c"));
        let names = [&c, &a, &b];
        assert_eq!(rotate_to_smallest(vec![0, 1, 2], &names), vec![1, 2, 0]);
    }
}
