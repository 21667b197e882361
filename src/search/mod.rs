pub mod fusion;
pub mod orchestrator;
pub mod snippet;

// Re-export key types for convenience
pub use fusion::{reciprocal_rank_fusion, weighted_reciprocal_rank_fusion, FusedResult, DEFAULT_RRF_K};
pub use orchestrator::{OrchestratorOptions, QueryOrchestrator, QueryStage};
pub use snippet::extract_snippet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::features::QueryFeatures;
use crate::retrieval::RetrieverKind;
use crate::selector::{DecisionSource, Strategy};

/// Caller-selected retrieval path. Everything except `Adaptive` bypasses the
/// router, which is how the four comparison modes are served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmHint {
    Bm25,
    Dense,
    Fusion,
    #[default]
    Adaptive,
}

impl AlgorithmHint {
    pub const ALL: [AlgorithmHint; 4] = [
        AlgorithmHint::Bm25,
        AlgorithmHint::Dense,
        AlgorithmHint::Fusion,
        AlgorithmHint::Adaptive,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmHint::Bm25 => "bm25",
            AlgorithmHint::Dense => "dense",
            AlgorithmHint::Fusion => "fusion",
            AlgorithmHint::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for AlgorithmHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlgorithmHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bm25" => Ok(AlgorithmHint::Bm25),
            "dense" => Ok(AlgorithmHint::Dense),
            "fusion" | "rrf" => Ok(AlgorithmHint::Fusion),
            "adaptive" => Ok(AlgorithmHint::Adaptive),
            other => Err(format!(
                "unknown algorithm '{}' (expected bm25, dense, fusion, or adaptive)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub algorithm: AlgorithmHint,
    /// Defaults to `search.default_top_k`; clamped to [1, `search.max_top_k`]
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Precomputed query embedding; required when no embedding provider is configured
    #[serde(default)]
    pub query_embedding: Option<Vec<f32>>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        SearchRequest {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_algorithm(mut self, algorithm: AlgorithmHint) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.query_embedding = Some(embedding);
        self
    }
}

/// One retriever's score and rank for a hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SignalScore {
    pub score: f64,
    pub rank: usize,
}

/// Per-signal scores behind a hit's final score. A signal is absent when the
/// retriever did not return the document (or failed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoreBreakdown {
    pub bm25: Option<SignalScore>,
    pub dense: Option<SignalScore>,
    /// RRF score, present when the hit was ranked by fusion
    pub fused: Option<f64>,
}

impl ScoreBreakdown {
    pub fn signal(&self, kind: RetrieverKind) -> Option<SignalScore> {
        match kind {
            RetrieverKind::Bm25 => self.bm25,
            RetrieverKind::Dense => self.dense,
        }
    }

    pub(crate) fn signal_mut(&mut self, kind: RetrieverKind) -> &mut Option<SignalScore> {
        match kind {
            RetrieverKind::Bm25 => &mut self.bm25,
            RetrieverKind::Dense => &mut self.dense,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// 1-based position in the final ranking
    pub rank: usize,
    pub document_id: String,
    pub title: String,
    pub snippet: String,
    #[serde(rename = "score")]
    pub final_score: f64,
    pub score_breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRetriever {
    pub retriever: RetrieverKind,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query_id: String,
    pub query: String,
    pub algorithm: AlgorithmHint,
    /// Ranking path actually taken
    pub strategy: Strategy,
    pub decision_source: DecisionSource,
    /// Weighted-fusion weights chosen by the router, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retriever_weights: Option<std::collections::BTreeMap<RetrieverKind, f64>>,
    /// True when at least one retriever failed or timed out
    pub partial: bool,
    pub failed_retrievers: Vec<FailedRetriever>,
    /// Index generation the query ran against
    pub generation: u64,
    pub features: QueryFeatures,
    pub took_ms: u64,
    #[serde(rename = "results")]
    pub hits: Vec<SearchHit>,
}

impl SearchResponse {
    pub fn document_ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.document_id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_parsing() {
        assert_eq!("BM25".parse::<AlgorithmHint>(), Ok(AlgorithmHint::Bm25));
        assert_eq!("rrf".parse::<AlgorithmHint>(), Ok(AlgorithmHint::Fusion));
        assert!("splade".parse::<AlgorithmHint>().is_err());
        for hint in AlgorithmHint::ALL {
            assert_eq!(hint.name().parse::<AlgorithmHint>(), Ok(hint));
        }
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: SearchRequest = serde_json::from_str(r#"{"query": "tony stark"}"#).unwrap();
        assert_eq!(request.algorithm, AlgorithmHint::Adaptive);
        assert_eq!(request.top_k, None);
        assert!(request.query_embedding.is_none());
    }

    #[test]
    fn test_hit_serializes_score_field() {
        let hit = SearchHit {
            rank: 1,
            document_id: "doc_a".to_string(),
            title: "A".to_string(),
            snippet: "tony stark".to_string(),
            final_score: 0.5,
            score_breakdown: ScoreBreakdown::default(),
        };
        let value = serde_json::to_value(&hit).unwrap();
        assert_eq!(value["score"], 0.5);
        assert!(value["score_breakdown"]["bm25"].is_null());
    }
}
