/// Retrieval evaluation harness.
///
/// Runs BEIR-style query sets through the orchestrator under each algorithm
/// hint and scores the rankings against relevance judgments (qrels): nDCG@k,
/// Recall@k, Hits@1 and MRR, plus latency and partial-response counts.

pub mod dataset;
pub mod metrics;
pub mod report;
pub mod runner;

use serde::{Deserialize, Serialize};

use crate::search::AlgorithmHint;

/// Metrics for one query under one algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_id: String,
    pub algorithm: AlgorithmHint,
    pub ndcg_at_k: f64,
    pub recall_at_k: f64,
    pub hits_at_1: f64,
    pub reciprocal_rank: f64,
    pub retrieved_count: usize,
    pub partial: bool,
    pub latency_ms: u64,
    /// Set when the search itself failed; all metrics are then zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
