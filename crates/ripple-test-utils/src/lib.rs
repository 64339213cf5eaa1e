//! Testing utilities for the ripple workspace
//!
//! Scenario graphs, change builders, stub contract sources and proptest
//! strategies shared by the integration tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use proptest::prelude::*;
use ripple_analysis::{ChangeRequest, ContractSource, DeclaredIntent, FieldDelta, RetrievalError};
use ripple_model::{
    Contract, ContractId, DependencyEdge, FieldDescriptor, FieldRef, FieldType, GraphBuilder,
    GraphModel, RuntimeKind, ServiceNode,
};
use std::collections::BTreeMap;
use std::time::Duration;

pub fn field(target: &str) -> FieldRef {
    target.parse().unwrap()
}

pub fn http(name: &str) -> ServiceNode {
    ServiceNode::new(name, RuntimeKind::HttpService)
}

fn user_profile() -> Contract {
    Contract::new("UserProfile", "user-service")
        .with_version("3")
        .with_field(FieldDescriptor::new("email", FieldType::String).required())
        .with_field(FieldDescriptor::new("roles", FieldType::Array(Box::new(FieldType::String))))
}

fn user_loyalty_builder(profile: Contract) -> GraphBuilder {
    GraphBuilder::new()
        .service(http("user-service").listening("UserProfile"))
        .service(http("loyalty-service").listening("LoyaltyBalance"))
        .contract(profile)
        .contract(
            Contract::new("LoyaltyBalance", "loyalty-service")
                .with_field(FieldDescriptor::new("points", FieldType::Integer).required()),
        )
        .edge(DependencyEdge::blocking("loyalty-service", "user-service", "UserProfile"))
}

/// `user-service` produces `UserProfile{email, roles}`, consumed by `loyalty-service`
pub fn user_loyalty() -> GraphModel {
    user_loyalty_builder(user_profile()).build().unwrap()
}

/// As [`user_loyalty`], with a transition window declared on `UserProfile`
pub fn user_loyalty_with_window() -> GraphModel {
    user_loyalty_builder(user_profile().with_transition_window())
        .build()
        .unwrap()
}

/// As [`user_loyalty`] plus an order/loyalty cycle made of eventual edges
pub fn order_loyalty_eventual_cycle() -> GraphModel {
    user_loyalty_builder(user_profile())
        .service(http("order-service").listening("OrderAccrual"))
        .contract(
            Contract::new("OrderAccrual", "order-service")
                .with_field(FieldDescriptor::new("orderId", FieldType::String).required()),
        )
        .edge(DependencyEdge::eventual("order-service", "loyalty-service", "LoyaltyBalance"))
        .edge(DependencyEdge::eventual("loyalty-service", "order-service", "OrderAccrual"))
        .build()
        .unwrap()
}

/// Two services claiming `accountBalance`, no precedence rule
pub fn duplicate_ownership() -> GraphBuilder {
    GraphBuilder::new()
        .service(http("ledger-service").listening("Ledger").owning("accountBalance"))
        .service(http("wallet-service").listening("Wallet").owning("accountBalance"))
        .contract(
            Contract::new("Ledger", "ledger-service")
                .with_field(FieldDescriptor::new("balance", FieldType::Float).with_datum("accountBalance")),
        )
        .contract(
            Contract::new("Wallet", "wallet-service")
                .with_field(FieldDescriptor::new("balance", FieldType::Float).with_datum("accountBalance")),
        )
        .edge(DependencyEdge::blocking("wallet-service", "ledger-service", "Ledger"))
}

/// `catalog-service` produces `Product{sku, legacyCode}`; three consumers
/// read only `sku`
pub fn catalog_three_consumers() -> GraphModel {
    let mut builder = GraphBuilder::new()
        .service(http("catalog-service").listening("Product"))
        .contract(
            Contract::new("Product", "catalog-service")
                .with_field(FieldDescriptor::new("sku", FieldType::String).required())
                .with_field(FieldDescriptor::new("legacyCode", FieldType::String)),
        );
    for consumer in ["cart-service", "pricing-service", "search-service"] {
        builder = builder
            .service(http(consumer))
            .edge(DependencyEdge::blocking(consumer, "catalog-service", "Product").reading(["sku"]));
    }
    builder.build().unwrap()
}

/// catalog-service produces `Product` and `Stock`; cart-service consumes both
/// and reads `Product.sku`
pub fn catalog_two_contracts() -> GraphModel {
    GraphBuilder::new()
        .service(http("catalog-service").listening("Product").listening("Stock"))
        .service(http("cart-service"))
        .contract(
            Contract::new("Product", "catalog-service")
                .with_field(FieldDescriptor::new("sku", FieldType::String).required()),
        )
        .contract(
            Contract::new("Stock", "catalog-service")
                .with_field(FieldDescriptor::new("available", FieldType::Integer)),
        )
        .edge(DependencyEdge::blocking("cart-service", "catalog-service", "Product").reading(["sku"]))
        .edge(DependencyEdge::blocking("cart-service", "catalog-service", "Stock"))
        .build()
        .unwrap()
}

/// A consumes B, B consumes C, C consumes A; all blocking
pub fn blocking_triangle() -> GraphModel {
    GraphBuilder::new()
        .service(http("A").listening("ContractA"))
        .service(http("B").listening("ContractB"))
        .service(http("C").listening("ContractC"))
        .contract(Contract::new("ContractA", "A").with_field(FieldDescriptor::new("id", FieldType::String)))
        .contract(Contract::new("ContractB", "B").with_field(FieldDescriptor::new("id", FieldType::String)))
        .contract(Contract::new("ContractC", "C").with_field(FieldDescriptor::new("id", FieldType::String)))
        .edge(DependencyEdge::blocking("A", "B", "ContractB"))
        .edge(DependencyEdge::blocking("B", "C", "ContractC"))
        .edge(DependencyEdge::blocking("C", "A", "ContractA"))
        .build()
        .unwrap()
}

/// Mark `UserProfile` stale in [`user_loyalty`]
pub fn user_loyalty_stale() -> GraphModel {
    user_loyalty_builder(user_profile().mark_stale()).build().unwrap()
}

pub fn add_required(target: &str, ty: FieldType) -> ChangeRequest {
    ChangeRequest::new(DeclaredIntent::Unknown).with_delta(FieldDelta::add(field(target), ty).required())
}

pub fn remove(target: &str) -> ChangeRequest {
    ChangeRequest::new(DeclaredIntent::Unknown).with_delta(FieldDelta::remove(field(target)))
}

/// Returns fixed snapshots; unknown contracts are `NotFound`
#[derive(Debug, Clone, Default)]
pub struct StaticContractSource {
    snapshots: BTreeMap<ContractId, Vec<FieldDescriptor>>,
}

impl StaticContractSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, contract: &str, fields: Vec<FieldDescriptor>) -> Self {
        self.snapshots.insert(contract.into(), fields);
        self
    }
}

#[async_trait]
impl ContractSource for StaticContractSource {
    async fn fetch(&self, contract: &ContractId) -> Result<Vec<FieldDescriptor>, RetrievalError> {
        self.snapshots
            .get(contract)
            .cloned()
            .ok_or_else(|| RetrievalError::NotFound(contract.clone()))
    }
}

/// Answers after `delay`
#[derive(Debug, Clone)]
pub struct SlowContractSource {
    pub delay: Duration,
    pub fields: Vec<FieldDescriptor>,
}

#[async_trait]
impl ContractSource for SlowContractSource {
    async fn fetch(&self, _contract: &ContractId) -> Result<Vec<FieldDescriptor>, RetrievalError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.fields.clone())
    }
}

/// Service name for index `i`, zero-padded so names sort by index
pub fn service_name(i: usize) -> String {
    format!("svc-{i:02}")
}

pub fn contract_name(i: usize) -> String {
    format!("C{i:02}")
}

/// Graph where service `i` produces contract `i` with one optional field `f`
pub fn indexed_graph(n: usize, edges: &[(usize, usize, bool)]) -> GraphModel {
    let mut builder = GraphBuilder::new();
    for i in 0..n {
        builder = builder
            .service(http(&service_name(i)).listening(contract_name(i)))
            .contract(
                Contract::new(contract_name(i), service_name(i))
                    .with_field(FieldDescriptor::new("f", FieldType::String)),
            );
    }
    for &(consumer, producer, blocking) in edges {
        let (c, p, k) = (service_name(consumer), service_name(producer), contract_name(producer));
        builder = builder.edge(if blocking {
            DependencyEdge::blocking(c, p, k)
        } else {
            DependencyEdge::eventual(c, p, k)
        });
    }
    builder.build().unwrap()
}

/// Edge lists `(consumer, producer, blocking)` over `n` services, no self-edges
pub fn arb_edges(n: usize, max_edges: usize) -> impl Strategy<Value = Vec<(usize, usize, bool)>> {
    prop::collection::vec((0..n, 0..n, any::<bool>()), 0..=max_edges).prop_map(|edges| {
        edges
            .into_iter()
            .filter(|(c, p, _)| c != p)
            .collect()
    })
}

/// Acyclic edge lists: consumers always have a higher index than producers
pub fn arb_dag_edges(n: usize, max_edges: usize) -> impl Strategy<Value = Vec<(usize, usize, bool)>> {
    arb_edges(n, max_edges).prop_map(|edges| {
        edges
            .into_iter()
            .map(|(a, b, blocking)| (a.max(b), a.min(b), blocking))
            .collect()
    })
}

/// Delta against contract `C<i>`: edits `f` or adds `g`
pub fn arb_delta(n: usize) -> impl Strategy<Value = FieldDelta> {
    let target = (0..n).prop_map(|i| FieldRef::new(contract_name(i), "f"));
    (target, 0u8..6, any::<bool>()).prop_map(|(target, kind, flag)| match kind {
        0 => FieldDelta::remove(target),
        1 => FieldDelta::modify(target).with_type(if flag { FieldType::Integer } else { FieldType::String }),
        2 => FieldDelta::modify(target).set_deprecated(flag),
        3 if flag => FieldDelta::modify(target).required(),
        3 => FieldDelta::modify(target).optional(),
        4 => FieldDelta::add(FieldRef::new(target.contract, "g"), FieldType::String).required(),
        _ => FieldDelta::add(FieldRef::new(target.contract, "g"), FieldType::Boolean)
            .with_default(serde_json::Value::Bool(flag)),
    })
}
