/// Evaluation runner.
///
/// Drives every query through the orchestrator once per algorithm hint and
/// scores the ranking. Queries without judgments are skipped, as in BEIR.

use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

use super::dataset::{EvalQuery, Qrels};
use super::metrics::{hits_at_k, ndcg_at_k, recall_at_k, reciprocal_rank};
use super::QueryResult;
use crate::search::{AlgorithmHint, QueryOrchestrator, SearchRequest};

/// Run `queries` under `algorithm`, retrieving `k` results per query.
pub async fn run_algorithm(
    orchestrator: &QueryOrchestrator,
    queries: &[EvalQuery],
    qrels: &Qrels,
    algorithm: AlgorithmHint,
    k: usize,
    show_progress: bool,
) -> Vec<QueryResult> {
    let judged: Vec<&EvalQuery> = queries.iter().filter(|q| qrels.contains_key(&q.id)).collect();
    if judged.len() < queries.len() {
        tracing::info!(
            algorithm = %algorithm,
            skipped = queries.len() - judged.len(),
            "Skipping queries without relevance judgments"
        );
    }

    let pb = if show_progress {
        ProgressBar::new(judged.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:>9} [{pos}/{len}] {msg} [{elapsed_precise} / {eta_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_prefix(algorithm.to_string());

    let mut results = Vec::with_capacity(judged.len());
    for query in judged {
        pb.set_message(query.id.clone());
        let judgments = &qrels[&query.id];

        let mut request = SearchRequest::new(query.text.clone())
            .with_algorithm(algorithm)
            .with_top_k(k);
        request.query_embedding = query.embedding.clone();

        let start = Instant::now();
        let outcome = orchestrator.search(request).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(response) => {
                let ranked = response.document_ids();
                QueryResult {
                    query_id: query.id.clone(),
                    algorithm,
                    ndcg_at_k: ndcg_at_k(&ranked, judgments, k),
                    recall_at_k: recall_at_k(&ranked, judgments, k),
                    hits_at_1: hits_at_k(&ranked, judgments, 1),
                    reciprocal_rank: reciprocal_rank(&ranked, judgments),
                    retrieved_count: ranked.len(),
                    partial: response.partial,
                    latency_ms,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(query_id = %query.id, algorithm = %algorithm, error = %e, "Search failed during evaluation");
                QueryResult {
                    query_id: query.id.clone(),
                    algorithm,
                    ndcg_at_k: 0.0,
                    recall_at_k: 0.0,
                    hits_at_1: 0.0,
                    reciprocal_rank: 0.0,
                    retrieved_count: 0,
                    partial: false,
                    latency_ms,
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(result);
        pb.inc(1);
    }

    pb.finish_with_message("done");
    results
}
