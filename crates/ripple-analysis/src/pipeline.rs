//! Analysis pipeline
//!
//! Runs intake, classification, traversal, planning and report assembly over
//! one immutable graph snapshot. Integrity and intake errors abort the run;
//! cycles and ambiguity only degrade the report.
//!
//! The async entry points bound the whole run by the configured deadline.
//! On timeout or cancellation nothing partial is returned, and the blocking
//! worker stops at its next stage boundary.

use crate::change::{ChangeDocument, ChangeRequest};
use crate::compat::ContractDiffChecker;
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::intake::{ChangeIntake, ContractSource, SnapshotSet};
use crate::planner::RolloutPlanner;
use crate::report::{ImpactReport, ReportAssembler};
use crate::traversal::ImpactTraversal;
use ripple_model::GraphModel;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set when the awaiting side drops the run
#[derive(Debug, Default)]
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Entry point for analysis runs
#[derive(Debug, Clone, Default)]
pub struct ImpactAnalyzer {
    config: AnalysisConfig,
}

impl ImpactAnalyzer {
    /// Create with a configuration
    #[inline]
    #[must_use]
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Configuration in effect
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn traversal(&self) -> ImpactTraversal {
        ImpactTraversal::new()
            .with_parallelism(self.config.parallel_traversal)
            .with_threshold(self.config.parallel_threshold)
    }

    /// Analyze synchronously using the graph's cached contract snapshots
    ///
    /// # Errors
    /// [`AnalysisError::Intake`] when the change cannot be resolved
    pub fn analyze(&self, graph: &GraphModel, request: &ChangeRequest) -> Result<ImpactReport> {
        self.run_stages(graph, request, &SnapshotSet::default(), &AtomicBool::new(false))
    }

    /// Parse a JSON graph document and a JSON change document, then analyze
    ///
    /// # Errors
    /// Parse, integrity or intake failures
    pub fn analyze_json(&self, graph_json: &str, change_json: &str) -> Result<ImpactReport> {
        let graph = GraphModel::from_json_str(graph_json)?;
        let request = ChangeDocument::from_json_str(change_json)?.into_request()?;
        self.analyze(&graph, &request)
    }

    fn run_stages(
        &self,
        graph: &GraphModel,
        request: &ChangeRequest,
        snapshots: &SnapshotSet,
        abandoned: &AtomicBool,
    ) -> Result<ImpactReport> {
        let span = tracing::info_span!("analysis", graph = %graph.fingerprint(), deltas = request.deltas.len());
        let _enter = span.enter();
        let checkpoint = |stage: &'static str| {
            if abandoned.load(Ordering::Acquire) {
                tracing::debug!(stage, "run abandoned, stopping worker");
                Err(AnalysisError::Cancelled)
            } else {
                Ok(())
            }
        };

        checkpoint("intake")?;
        let resolved = ChangeIntake::new(self.config.intake).resolve_with(request, graph, snapshots)?;
        checkpoint("classification")?;
        let classified = ContractDiffChecker::classify_change(&resolved);
        checkpoint("traversal")?;
        let impact = self.traversal().compute_impact(&classified, graph);
        checkpoint("planning")?;
        let plan = RolloutPlanner::plan(&impact, graph);
        checkpoint("report")?;
        let report = ReportAssembler::new(graph).assemble(&resolved, &classified, &impact, plan.as_ref());

        tracing::info!(
            overall = %report.overall_class,
            impacted = report.impact_set.len(),
            stages = report.rollout_stages.len(),
            flags = report.flags.len(),
            "analysis complete"
        );
        Ok(report)
    }

    /// Analyze asynchronously under the run deadline
    ///
    /// Stale contracts are refreshed through `source` first; the CPU-bound
    /// stages then run on a blocking worker.
    ///
    /// # Errors
    /// [`AnalysisError::Timeout`] when the deadline passes, otherwise as
    /// [`ImpactAnalyzer::analyze`]
    pub async fn run(
        &self,
        graph: Arc<GraphModel>,
        request: ChangeRequest,
        source: Option<Arc<dyn ContractSource>>,
    ) -> Result<ImpactReport> {
        let deadline = self.config.run_timeout();
        if let Ok(result) = tokio::time::timeout(deadline, self.run_inner(graph, request, source)).await {
            result
        } else {
            tracing::warn!(timeout = ?deadline, "analysis timed out, discarding partial results");
            Err(AnalysisError::Timeout(deadline))
        }
    }

    /// [`ImpactAnalyzer::run`] that also stops when `cancel` completes
    ///
    /// # Errors
    /// [`AnalysisError::Cancelled`] when `cancel` completes first, otherwise
    /// as [`ImpactAnalyzer::run`]
    pub async fn run_until<F>(
        &self,
        graph: Arc<GraphModel>,
        request: ChangeRequest,
        source: Option<Arc<dyn ContractSource>>,
        cancel: F,
    ) -> Result<ImpactReport>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run(graph, request, source) => result,
            () = cancel => {
                tracing::warn!("analysis cancelled, discarding partial results");
                Err(AnalysisError::Cancelled)
            }
        }
    }

    async fn run_inner(
        &self,
        graph: Arc<GraphModel>,
        request: ChangeRequest,
        source: Option<Arc<dyn ContractSource>>,
    ) -> Result<ImpactReport> {
        let guard = AbandonOnDrop::default();
        let abandoned = Arc::clone(&guard.0);
        let intake = ChangeIntake::new(self.config.intake);
        let snapshots = match source {
            Some(source) => {
                intake
                    .refresh(&request, &graph, source.as_ref(), self.config.retrieval_timeout())
                    .await
            }
            None => SnapshotSet::default(),
        };

        let analyzer = self.clone();
        let result = tokio::task::spawn_blocking(move || {
            analyzer.run_stages(&graph, &request, &snapshots, &abandoned)
        })
        .await
        .map_err(|e| AnalysisError::Worker(e.to_string()))?;
        drop(guard);
        result
    }
}
