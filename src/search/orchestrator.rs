/// Query orchestration
///
/// One query walks a fixed state machine:
///
/// ```text
/// Received → FeaturesExtracted → RetrievalDispatched → RetrievalComplete
///          → Selected → Fused (fusion strategies only) → Ranked → Done
/// ```
///
/// Retrievers run concurrently as tasks in a `JoinSet`, each under its own
/// deadline, against the snapshot captured when the query was received. A
/// retriever that fails or times out is dropped from this query only and the
/// response is marked partial. Dropping the `JoinSet` aborts whatever is
/// still running, which is how cancellation reaches in-flight retrievers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::fusion::{reciprocal_rank_fusion, weighted_reciprocal_rank_fusion};
use super::snippet::extract_snippet;
use super::{AlgorithmHint, FailedRetriever, ScoreBreakdown, SearchHit, SearchRequest, SearchResponse, SignalScore};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::errors::MosaicError;
use crate::features::FeatureExtractor;
use crate::index::lexical::Bm25Params;
use crate::index::IndexHandle;
use crate::retrieval::{
    Bm25Retriever, Candidate, DenseRetriever, RetrievalQuery, Retriever, RetrieverError, RetrieverKind,
};
use crate::selector::{AlgorithmSelector, DecisionSource, SelectionDecision, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueryStage {
    Received,
    FeaturesExtracted,
    RetrievalDispatched,
    RetrievalComplete,
    Selected,
    Fused,
    Ranked,
    Done,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStage::Received => "received",
            QueryStage::FeaturesExtracted => "features_extracted",
            QueryStage::RetrievalDispatched => "retrieval_dispatched",
            QueryStage::RetrievalComplete => "retrieval_complete",
            QueryStage::Selected => "selected",
            QueryStage::Fused => "fused",
            QueryStage::Ranked => "ranked",
            QueryStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Per-query progress tracker. Stages only move forward.
struct QueryRun {
    query_id: String,
    stage: QueryStage,
    started: Instant,
}

impl QueryRun {
    fn start() -> Self {
        let run = QueryRun {
            query_id: uuid::Uuid::new_v4().to_string(),
            stage: QueryStage::Received,
            started: Instant::now(),
        };
        tracing::debug!(query_id = %run.query_id, stage = %run.stage, "Query stage");
        run
    }

    fn advance(&mut self, next: QueryStage) {
        debug_assert!(next > self.stage, "query stage moved backwards: {} -> {}", self.stage, next);
        self.stage = next;
        tracing::debug!(
            query_id = %self.query_id,
            stage = %next,
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "Query stage"
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorOptions {
    pub rrf_k: f64,
    /// Candidates requested from each retriever; raised to top_k when smaller
    pub candidate_depth: usize,
    pub retriever_timeout: Duration,
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub snippet_chars: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        OrchestratorOptions::from(&Config::default())
    }
}

impl From<&Config> for OrchestratorOptions {
    fn from(config: &Config) -> Self {
        OrchestratorOptions {
            rrf_k: config.fusion.rrf_k,
            candidate_depth: config.fusion.candidate_depth,
            retriever_timeout: config.search.retriever_timeout(),
            default_top_k: config.search.default_top_k,
            max_top_k: config.search.max_top_k,
            snippet_chars: config.search.snippet_chars,
        }
    }
}

pub struct QueryOrchestrator {
    index: Arc<IndexHandle>,
    retrievers: Vec<Arc<dyn Retriever>>,
    selector: AlgorithmSelector,
    options: OrchestratorOptions,
}

type RetrievalOutcome = (RetrieverKind, Result<Vec<Candidate>, RetrieverError>);

impl QueryOrchestrator {
    pub fn new(
        index: Arc<IndexHandle>,
        retrievers: Vec<Arc<dyn Retriever>>,
        selector: AlgorithmSelector,
        options: OrchestratorOptions,
    ) -> Self {
        QueryOrchestrator {
            index,
            retrievers,
            selector,
            options,
        }
    }

    /// The standard BM25 + dense pipeline.
    pub fn from_config(
        config: &Config,
        index: Arc<IndexHandle>,
        embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
        selector: AlgorithmSelector,
    ) -> Self {
        let retrievers: Vec<Arc<dyn Retriever>> = vec![
            Arc::new(Bm25Retriever::new(Bm25Params::from(&config.bm25))),
            Arc::new(DenseRetriever::new(embedding_provider)),
        ];
        QueryOrchestrator::new(index, retrievers, selector, OrchestratorOptions::from(config))
    }

    pub fn index(&self) -> &Arc<IndexHandle> {
        &self.index
    }

    pub fn selector(&self) -> &AlgorithmSelector {
        &self.selector
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, MosaicError> {
        self.search_with_cancellation(request, &CancellationToken::new()).await
    }

    /// Run one query. Cancelling `cancel` aborts in-flight retrievers and
    /// returns `MosaicError::Cancelled`; index state is never touched.
    pub async fn search_with_cancellation(
        &self,
        request: SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, MosaicError> {
        let mut run = QueryRun::start();

        if request.query.trim().is_empty() {
            return Err(MosaicError::EmptyQuery);
        }
        let top_k = request
            .top_k
            .unwrap_or(self.options.default_top_k)
            .clamp(1, self.options.max_top_k.max(1));
        let depth = top_k.max(self.options.candidate_depth);

        let snapshot = self.index.snapshot();
        let features = FeatureExtractor::new(snapshot.lexical()).extract(&request.query);
        run.advance(QueryStage::FeaturesExtracted);

        let query = Arc::new(RetrievalQuery::new(&request.query, request.query_embedding.clone()));
        let mut tasks: JoinSet<RetrievalOutcome> = JoinSet::new();
        let mut task_kinds = HashMap::new();
        for retriever in &self.retrievers {
            let retriever = Arc::clone(retriever);
            let snapshot = Arc::clone(&snapshot);
            let query = Arc::clone(&query);
            let timeout = self.options.retriever_timeout;
            let kind = retriever.kind();
            let handle = tasks.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, retriever.retrieve(snapshot, query, depth)).await {
                    Ok(result) => result,
                    Err(_) => Err(RetrieverError::Timeout(timeout)),
                };
                (kind, outcome)
            });
            task_kinds.insert(handle.id(), kind);
        }
        run.advance(QueryStage::RetrievalDispatched);

        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(query_id = %run.query_id, stage = %run.stage, "Query cancelled");
                return Err(MosaicError::Cancelled);
            }
            outcomes = collect(&mut tasks, &task_kinds) => outcomes,
        };

        let mut lists: BTreeMap<RetrieverKind, Vec<Candidate>> = BTreeMap::new();
        let mut failed = Vec::new();
        for (kind, outcome) in outcomes {
            match outcome {
                Ok(candidates) => {
                    tracing::debug!(query_id = %run.query_id, retriever = %kind, count = candidates.len(), "Retriever returned");
                    lists.insert(kind, candidates);
                }
                Err(e) => {
                    tracing::warn!(
                        query_id = %run.query_id,
                        retriever = %kind,
                        error = %e,
                        "Retriever failed, continuing without it"
                    );
                    failed.push(FailedRetriever { retriever: kind, error: e.to_string() });
                }
            }
        }
        failed.sort_by_key(|f| f.retriever);
        run.advance(QueryStage::RetrievalComplete);

        if lists.is_empty() {
            let reasons: Vec<String> = failed.iter().map(|f| format!("{}: {}", f.retriever, f.error)).collect();
            return Err(MosaicError::RetrievalFailed(reasons.join("; ")));
        }
        if cancel.is_cancelled() {
            return Err(MosaicError::Cancelled);
        }

        let decision = match request.algorithm {
            AlgorithmHint::Bm25 => forced_single(RetrieverKind::Bm25, &lists),
            AlgorithmHint::Dense => forced_single(RetrieverKind::Dense, &lists),
            AlgorithmHint::Fusion => SelectionDecision::default_rrf(DecisionSource::Hint),
            AlgorithmHint::Adaptive => self.selector.select(&features, &lists),
        };
        run.advance(QueryStage::Selected);

        let ranked: Vec<(String, f64, Option<f64>)> = match decision.strategy.required_retriever() {
            Some(kind) => lists
                .get(&kind)
                .map(|list| list.iter().map(|c| (c.document_id.clone(), c.score, None)).collect())
                .unwrap_or_default(),
            None => {
                let named: BTreeMap<String, Vec<Candidate>> =
                    lists.iter().map(|(kind, list)| (kind.name().to_string(), list.clone())).collect();
                let fused = match &decision.per_retriever_weight {
                    Some(weights) => {
                        let weights: BTreeMap<String, f64> =
                            weights.iter().map(|(kind, w)| (kind.name().to_string(), *w)).collect();
                        weighted_reciprocal_rank_fusion(&named, &weights, self.options.rrf_k)
                    }
                    None => reciprocal_rank_fusion(&named, self.options.rrf_k),
                };
                run.advance(QueryStage::Fused);
                fused
                    .into_iter()
                    .map(|f| (f.document_id, f.fused_score, Some(f.fused_score)))
                    .collect()
            }
        };

        let signals: HashMap<(RetrieverKind, &str), SignalScore> = lists
            .iter()
            .flat_map(|(kind, list)| {
                list.iter()
                    .map(move |c| ((*kind, c.document_id.as_str()), SignalScore { score: c.score, rank: c.rank }))
            })
            .collect();

        let hits: Vec<SearchHit> = ranked
            .into_iter()
            .filter_map(|(document_id, final_score, fused)| {
                let doc = snapshot.document_by_id(&document_id)?;
                let mut score_breakdown = ScoreBreakdown { fused, ..Default::default() };
                for kind in RetrieverKind::ALL {
                    *score_breakdown.signal_mut(kind) = signals.get(&(kind, document_id.as_str())).copied();
                }
                Some((doc, document_id, final_score, score_breakdown))
            })
            .take(top_k)
            .enumerate()
            .map(|(i, (doc, document_id, final_score, score_breakdown))| SearchHit {
                rank: i + 1,
                document_id,
                title: doc.title.clone(),
                snippet: extract_snippet(&query.terms, &doc.text, self.options.snippet_chars),
                final_score,
                score_breakdown,
            })
            .collect();
        run.advance(QueryStage::Ranked);

        let took_ms = run.started.elapsed().as_millis() as u64;
        let response = SearchResponse {
            query_id: run.query_id.clone(),
            query: request.query,
            algorithm: request.algorithm,
            strategy: decision.strategy,
            decision_source: decision.source,
            retriever_weights: decision.per_retriever_weight,
            partial: !failed.is_empty(),
            failed_retrievers: failed,
            generation: snapshot.generation(),
            features,
            took_ms,
            hits,
        };
        run.advance(QueryStage::Done);

        tracing::info!(
            query_id = %response.query_id,
            algorithm = %response.algorithm,
            strategy = %response.strategy,
            partial = response.partial,
            results = response.hits.len(),
            generation = response.generation,
            took_ms,
            "Search completed"
        );
        Ok(response)
    }
}

/// A caller-forced single retriever. When it failed, rank by the survivor.
fn forced_single(kind: RetrieverKind, lists: &BTreeMap<RetrieverKind, Vec<Candidate>>) -> SelectionDecision {
    let strategy_for = |kind| match kind {
        RetrieverKind::Bm25 => Strategy::Bm25Only,
        RetrieverKind::Dense => Strategy::DenseOnly,
    };
    if lists.contains_key(&kind) {
        return SelectionDecision {
            strategy: strategy_for(kind),
            per_retriever_weight: None,
            source: DecisionSource::Hint,
        };
    }
    match lists.keys().next() {
        Some(&survivor) => SelectionDecision {
            strategy: strategy_for(survivor),
            per_retriever_weight: None,
            source: DecisionSource::Fallback,
        },
        None => SelectionDecision::default_rrf(DecisionSource::Fallback),
    }
}

/// Wait for every retriever task. A panicked or aborted task is reported as a
/// failure of the retriever it was running.
async fn collect(
    tasks: &mut JoinSet<RetrievalOutcome>,
    task_kinds: &HashMap<tokio::task::Id, RetrieverKind>,
) -> Vec<RetrievalOutcome> {
    let mut outcomes = Vec::with_capacity(task_kinds.len());
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((_, outcome)) => outcomes.push(outcome),
            Err(e) => {
                if let Some(&kind) = task_kinds.get(&e.id()) {
                    outcomes.push((kind, Err(RetrieverError::Task(e.to_string()))));
                }
            }
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_support::tony_stark_corpus;
    use crate::index::{IndexOptions, IndexSnapshot};

    fn orchestrator() -> QueryOrchestrator {
        let snapshot = IndexSnapshot::build(tony_stark_corpus(), &IndexOptions::default()).unwrap();
        QueryOrchestrator::from_config(
            &Config::default(),
            Arc::new(IndexHandle::new(snapshot)),
            None,
            AlgorithmSelector::null(),
        )
    }

    #[test]
    fn test_stages_are_ordered() {
        assert!(QueryStage::Received < QueryStage::FeaturesExtracted);
        assert!(QueryStage::Selected < QueryStage::Fused);
        assert!(QueryStage::Ranked < QueryStage::Done);
        assert_eq!(QueryStage::RetrievalComplete.to_string(), "retrieval_complete");
    }

    #[tokio::test]
    async fn test_bm25_hint_ranks_tony_stark_documents() {
        let response = orchestrator()
            .search(SearchRequest::new("tony stark").with_algorithm(AlgorithmHint::Bm25))
            .await
            .unwrap();
        assert_eq!(response.document_ids(), vec!["doc_c", "doc_a"]);
        assert_eq!(response.strategy, Strategy::Bm25Only);
        // Dense has no provider and no precomputed embedding.
        assert!(response.partial);
        assert_eq!(response.failed_retrievers[0].retriever, RetrieverKind::Dense);
        assert_eq!(response.generation, 1);
        let top = &response.hits[0];
        assert_eq!(top.rank, 1);
        assert_eq!(top.title, "Title doc_c");
        assert_eq!(top.score_breakdown.bm25.map(|s| s.rank), Some(1));
        assert!(top.score_breakdown.fused.is_none());
    }

    #[tokio::test]
    async fn test_dense_hint_falls_back_to_survivor() {
        let response = orchestrator()
            .search(SearchRequest::new("tony stark").with_algorithm(AlgorithmHint::Dense))
            .await
            .unwrap();
        assert_eq!(response.strategy, Strategy::Bm25Only);
        assert_eq!(response.decision_source, DecisionSource::Fallback);
        assert!(response.partial);
    }

    #[tokio::test]
    async fn test_fusion_reports_both_signals() {
        let response = orchestrator()
            .search(
                SearchRequest::new("tony stark")
                    .with_algorithm(AlgorithmHint::Fusion)
                    .with_embedding(vec![1.0, 0.0]),
            )
            .await
            .unwrap();
        assert!(!response.partial);
        assert_eq!(response.strategy, Strategy::RrfFusion);
        // doc_a: bm25 rank 2, dense rank 1; doc_c: bm25 rank 1, dense rank 2. Tie → id order.
        assert_eq!(response.document_ids(), vec!["doc_a", "doc_c", "doc_b"]);
        let a = &response.hits[0];
        assert_eq!(a.final_score, 1.0 / 62.0 + 1.0 / 61.0);
        assert_eq!(a.score_breakdown.dense.map(|s| s.rank), Some(1));
        assert_eq!(a.score_breakdown.fused, Some(a.final_score));
    }

    #[tokio::test]
    async fn test_adaptive_weighting_head_drives_weighted_fusion() {
        use crate::selector::model::{test_artifacts::WEIGHTING, LoadedModel, RankingModel};

        let snapshot = IndexSnapshot::build(tony_stark_corpus(), &IndexOptions::default()).unwrap();
        let model = LoadedModel::from_json(WEIGHTING).unwrap();
        let orchestrator = QueryOrchestrator::from_config(
            &Config::default(),
            Arc::new(IndexHandle::new(snapshot)),
            None,
            AlgorithmSelector::new(RankingModel::Loaded(model)),
        );
        // One of three query terms is out of vocabulary.
        let response = orchestrator
            .search(SearchRequest::new("tony stark xyzzy").with_embedding(vec![1.0, 0.0]))
            .await
            .unwrap();

        assert_eq!(response.strategy, Strategy::RrfFusion);
        assert_eq!(response.decision_source, DecisionSource::Model);
        let weights = response.retriever_weights.clone().expect("weighting head reports weights");
        let bm25_w = 1.0 / (1.0 + (8.0f64 / 3.0).exp());
        let dense_w = 1.0 / (1.0 + (-8.0f64 / 3.0).exp());
        assert!((weights[&RetrieverKind::Bm25] - bm25_w).abs() < 1e-12);
        assert!((weights[&RetrieverKind::Dense] - dense_w).abs() < 1e-12);

        // bm25 ranks doc_c, doc_a; dense ranks doc_a, doc_c, doc_b
        assert_eq!(response.document_ids(), vec!["doc_a", "doc_c", "doc_b"]);
        let expected = [
            bm25_w / 62.0 + dense_w / 61.0,
            bm25_w / 61.0 + dense_w / 62.0,
            dense_w / 63.0,
        ];
        for (hit, want) in response.hits.iter().zip(expected) {
            assert!((hit.final_score - want).abs() < 1e-12, "{}: {} != {}", hit.document_id, hit.final_score, want);
            assert_eq!(hit.score_breakdown.fused, Some(hit.final_score));
        }
    }

    #[tokio::test]
    async fn test_top_k_is_clamped() {
        let response = orchestrator()
            .search(SearchRequest::new("tony stark").with_top_k(0).with_embedding(vec![1.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(response.hits.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let err = orchestrator().search(SearchRequest::new("  \t ")).await.unwrap_err();
        assert!(matches!(err, MosaicError::EmptyQuery));
    }

    #[tokio::test]
    async fn test_no_candidates_is_empty_not_error() {
        let response = orchestrator()
            .search(SearchRequest::new("thor").with_algorithm(AlgorithmHint::Bm25))
            .await
            .unwrap();
        assert!(response.hits.is_empty());
    }
}
