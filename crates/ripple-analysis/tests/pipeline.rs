//! Async runs: contract refresh, deadlines and cancellation

use ripple_analysis::{
    AnalysisConfig, AnalysisError, CompatibilityClass, ContractSource, ImpactAnalyzer, IntakeError,
};
use ripple_model::{FieldDescriptor, FieldType};
use ripple_test_utils::*;
use std::sync::Arc;
use std::time::Duration;

fn profile_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new("email", FieldType::String).required(),
        FieldDescriptor::new("nickname", FieldType::String),
    ]
}

#[tokio::test]
async fn stale_contract_is_refreshed_before_intake() {
    let source: Arc<dyn ContractSource> =
        Arc::new(StaticContractSource::new().with("UserProfile", profile_fields()));
    let graph = Arc::new(user_loyalty_stale());

    // `nickname` only exists in the fetched snapshot
    let report = ImpactAnalyzer::default()
        .run(graph, remove("UserProfile.nickname"), Some(source))
        .await
        .unwrap();
    assert_eq!(report.touched_contracts[0].contract.as_str(), "UserProfile");
    assert_eq!(report.overall_class, CompatibilityClass::Ambiguous);
}

#[tokio::test]
async fn missing_snapshot_is_incomplete_contract() {
    let source: Arc<dyn ContractSource> = Arc::new(StaticContractSource::new());
    let err = ImpactAnalyzer::default()
        .run(Arc::new(user_loyalty_stale()), remove("UserProfile.roles"), Some(source))
        .await
        .unwrap_err();
    assert!(err.is_model_error());
    assert!(matches!(err, AnalysisError::Intake(IntakeError::IncompleteContract { .. })));
}

#[tokio::test]
async fn stale_contract_without_source_is_incomplete_contract() {
    let err = ImpactAnalyzer::default()
        .run(Arc::new(user_loyalty_stale()), remove("UserProfile.roles"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Intake(IntakeError::IncompleteContract { .. })));
}

#[tokio::test]
async fn slow_retrieval_times_out_as_incomplete_contract() {
    let source: Arc<dyn ContractSource> = Arc::new(SlowContractSource {
        delay: Duration::from_secs(30),
        fields: profile_fields(),
    });
    let config = AnalysisConfig::default().with_retrieval_timeout(Duration::from_millis(20));
    let err = ImpactAnalyzer::new(config)
        .run(Arc::new(user_loyalty_stale()), remove("UserProfile.roles"), Some(source))
        .await
        .unwrap_err();
    match err {
        AnalysisError::Intake(IntakeError::IncompleteContract { reason, .. }) => {
            assert!(reason.contains("timed out"), "{reason}");
        }
        other => panic!("expected incomplete contract, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn run_deadline_discards_everything() {
    let source: Arc<dyn ContractSource> = Arc::new(SlowContractSource {
        delay: Duration::from_secs(600),
        fields: profile_fields(),
    });
    let config = AnalysisConfig::default()
        .with_run_timeout(Duration::from_secs(1))
        .with_retrieval_timeout(Duration::from_secs(3600));
    let err = ImpactAnalyzer::new(config)
        .run(Arc::new(user_loyalty_stale()), remove("UserProfile.roles"), Some(source))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Timeout(d) if d == Duration::from_secs(1)));
    assert!(!err.is_model_error());
}

#[tokio::test]
async fn cancellation_aborts_the_run() {
    let source: Arc<dyn ContractSource> = Arc::new(SlowContractSource {
        delay: Duration::from_secs(30),
        fields: profile_fields(),
    });
    let err = ImpactAnalyzer::default()
        .run_until(
            Arc::new(user_loyalty_stale()),
            remove("UserProfile.roles"),
            Some(source),
            tokio::time::sleep(Duration::from_millis(10)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Cancelled));
}

#[tokio::test]
async fn concurrent_runs_share_one_snapshot() {
    let graph = Arc::new(catalog_three_consumers());
    let analyzer = ImpactAnalyzer::default();
    let (a, b) = tokio::join!(
        analyzer.run(Arc::clone(&graph), remove("Product.legacyCode"), None),
        analyzer.run(Arc::clone(&graph), remove("Product.sku"), None),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.graph_fingerprint, b.graph_fingerprint);
    assert_eq!(a.overall_class, CompatibilityClass::Additive);
    assert_eq!(b.overall_class, CompatibilityClass::Breaking);
}
