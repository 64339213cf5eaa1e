//! Loading graphs from documents and system maps

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use ripple_model::{
    Contract, Criticality, DependencyEdge, DocumentError, FieldDescriptor, FieldType, GraphDocument,
    GraphIntegrityError, GraphModel, LoadMode, OwnershipResolution, RuntimeKind, ServiceName,
    ServiceNode, SystemMap,
};

const LEDGER: &str = r#"
services:
  - name: ledger-service
    owns: [accountBalance]
    contracts:
      - id: Ledger
        fields:
          - { name: balance, type: float, datum: accountBalance }
  - name: wallet-service
    owns: [accountBalance]
    contracts:
      - id: Wallet
        fields:
          - { name: balance, type: float, datum: accountBalance }
edges:
  - { source: wallet-service, target: ledger-service, contract: Ledger, reads: [balance] }
"#;

#[test]
fn duplicate_ownership_fails_before_any_request() {
    let err = GraphModel::from_yaml_str(LEDGER).unwrap_err();
    match err {
        DocumentError::Integrity(GraphIntegrityError::DuplicateOwnership { datum, .. }) => {
            assert_eq!(datum.as_str(), "accountBalance");
        }
        other => panic!("expected duplicate ownership, got {other:?}"),
    }
}

#[test]
fn precedence_rule_settles_ownership() {
    let with_rule = format!("{LEDGER}precedence:\n  - {{ datum: accountBalance, owner: ledger-service }}\n");
    let graph = GraphModel::from_yaml_str(&with_rule).unwrap();
    assert_eq!(
        graph.owner_of(&"accountBalance".into()),
        OwnershipResolution::Unique(ServiceName::new("ledger-service"))
    );
}

#[test]
fn precedence_for_non_claimant_is_invalid() {
    let with_rule = format!("{LEDGER}precedence:\n  - {{ datum: accountBalance, owner: audit-service }}\n");
    let err = GraphModel::from_yaml_str(&with_rule).unwrap_err();
    assert!(matches!(
        err,
        DocumentError::Integrity(GraphIntegrityError::InvalidPrecedence { .. })
    ));
}

#[test]
fn staged_load_defers_ownership_conflicts() {
    let graph = GraphDocument::from_yaml_str(LEDGER)
        .unwrap()
        .into_model(LoadMode::Staged)
        .unwrap();
    assert_eq!(graph.deferred_issues().len(), 1);
    assert_eq!(graph.deferred_issues()[0].kind(), "duplicate_ownership");
    assert!(matches!(graph.owner_of(&"accountBalance".into()), OwnershipResolution::Contested(_)));
}

#[test]
fn staged_load_keeps_structural_checks_fatal() {
    let broken = LEDGER.replace("target: ledger-service", "target: billing-service");
    let err = GraphDocument::from_yaml_str(&broken)
        .unwrap()
        .into_model(LoadMode::Staged)
        .unwrap_err();
    assert!(matches!(err, GraphIntegrityError::DanglingEdge { .. }));
}

#[test]
fn json_and_yaml_documents_agree() {
    let json = r#"{
        "services": [
            {"name": "wallet-service", "owns": ["accountBalance"], "contracts": [
                {"id": "Wallet", "fields": [{"name": "balance", "type": "float", "datum": "accountBalance"}]}]},
            {"name": "ledger-service", "owns": ["accountBalance"], "contracts": [
                {"id": "Ledger", "fields": [{"name": "balance", "type": "float", "datum": "accountBalance"}]}]}
        ],
        "edges": [{"source": "wallet-service", "target": "ledger-service", "contract": "Ledger", "reads": ["balance"]}]
    }"#;
    let from_json = GraphDocument::from_json_str(json).unwrap().into_model(LoadMode::Staged).unwrap();
    let from_yaml = GraphDocument::from_yaml_str(LEDGER).unwrap().into_model(LoadMode::Staged).unwrap();
    assert_eq!(from_json.fingerprint(), from_yaml.fingerprint());
}

#[test]
fn edge_criticality_defaults_from_protocol() {
    let yaml = r#"
services:
  - name: order-service
    contracts: [{ id: OrderAccrual }]
  - name: loyalty-service
    contracts: [{ id: LoyaltyBalance }]
edges:
  - { source: order-service, target: loyalty-service, contract: LoyaltyBalance, protocol: asynchronous }
  - { source: loyalty-service, target: order-service, contract: OrderAccrual, protocol: asynchronous }
"#;
    let graph = GraphModel::from_yaml_str(yaml).unwrap();
    assert!(graph.edges().iter().all(|e| e.criticality == Criticality::Eventual));
}

#[test]
fn system_map_loads_as_a_strict_graph() {
    let map = r#"{
        "schema_version": "1.1",
        "repos": [
            {"full_name": "acme/user-service", "derived": {"repo_kind": "service"}},
            {"full_name": "acme/loyalty-service", "derived": {"repo_kind": "service"}},
            {"full_name": "acme/order-service", "derived": {"repo_kind": "service"}}
        ],
        "dependency_edges": [
            {"from": "loyalty-service", "to": "user-service", "type": "http", "confidence": "high"},
            {"from": "order-service", "to": "loyalty-service", "type": "kafka", "confidence": "medium"},
            {"from": "loyalty-service", "to": "order-service", "type": "kafka", "confidence": "medium"},
            {"from": "order-service", "to": "order-service", "type": "http"}
        ]
    }"#;
    let (document, summary) = SystemMap::from_json_str(map).unwrap().to_graph_document();
    assert_eq!(summary.edges, 3);
    assert_eq!(summary.dropped.len(), 1);

    let graph = document.into_model(LoadMode::Strict).unwrap();
    let blocking: Vec<_> = graph.edges().iter().filter(|e| e.is_blocking()).collect();
    assert_eq!(blocking.len(), 1);
    assert_eq!(blocking[0].source.as_str(), "loyalty-service");
    assert_eq!(
        graph.producer_of(&SystemMap::surface_contract(&"user-service".into())),
        Some(&ServiceName::new("user-service"))
    );
}

/// Chain of six services, each consuming its predecessor, closed by an
/// eventual edge back to the first
fn chain_parts() -> (Vec<ServiceNode>, Vec<Contract>, Vec<DependencyEdge>) {
    let name = |i: usize| format!("svc-{i}");
    let contract = |i: usize| format!("C{i}");
    let services = (0..6)
        .map(|i| {
            ServiceNode::new(name(i), RuntimeKind::HttpService)
                .listening(contract(i))
                .owning(format!("datum{i}"))
        })
        .collect();
    let contracts = (0..6)
        .map(|i| {
            Contract::new(contract(i), name(i))
                .with_field(FieldDescriptor::new("id", FieldType::String).required().with_datum(format!("datum{i}")))
        })
        .collect();
    let mut edges: Vec<DependencyEdge> = (1..6)
        .map(|i| DependencyEdge::blocking(name(i), name(i - 1), contract(i - 1)).reading(["id"]))
        .collect();
    edges.push(DependencyEdge::eventual(name(0), name(5), contract(5)));
    (services, contracts, edges)
}

proptest! {
    #[test]
    fn fingerprint_ignores_declaration_order(
        services in Just(chain_parts().0).prop_shuffle(),
        contracts in Just(chain_parts().1).prop_shuffle(),
        edges in Just(chain_parts().2).prop_shuffle(),
    ) {
        let (s, c, e) = chain_parts();
        let reference = GraphModel::load(s, c, e).unwrap();
        let shuffled = GraphModel::load(services, contracts, edges).unwrap();
        prop_assert_eq!(reference.fingerprint(), shuffled.fingerprint());
    }
}
