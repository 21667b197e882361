/// Retriever trait and per-query candidate types
///
/// Each retriever reads one index of a captured snapshot and returns a ranked
/// candidate list. Failures are per-query and recovered by the orchestrator.

pub mod dense;
pub mod lexical;

pub use dense::DenseRetriever;
pub use lexical::Bm25Retriever;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::index::IndexSnapshot;
use crate::text::normalize_tokens;

/// One retriever's verdict on one document for one query.
///
/// `score` is retriever-specific and not comparable across retrievers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub document_id: String,
    pub score: f64,
    /// 1-based position in the retriever's ordering
    pub rank: usize,
}

/// Identifies a retriever in fusion inputs and score breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieverKind {
    Bm25,
    Dense,
}

impl RetrieverKind {
    pub const ALL: [RetrieverKind; 2] = [RetrieverKind::Bm25, RetrieverKind::Dense];

    pub fn name(&self) -> &'static str {
        match self {
            RetrieverKind::Bm25 => "bm25",
            RetrieverKind::Dense => "dense",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bm25" => Some(RetrieverKind::Bm25),
            "dense" => Some(RetrieverKind::Dense),
            _ => None,
        }
    }
}

impl fmt::Display for RetrieverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The query as seen by retrievers: raw text, its normalized terms, and an
/// optional precomputed embedding.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub text: String,
    pub terms: Vec<String>,
    pub embedding: Option<Vec<f32>>,
}

impl RetrievalQuery {
    pub fn new(text: &str, embedding: Option<Vec<f32>>) -> Self {
        RetrievalQuery {
            text: text.to_string(),
            terms: normalize_tokens(text),
            embedding,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetrieverError {
    #[error("Retriever timed out after {0:?}")]
    Timeout(Duration),

    #[error("Query embedding unavailable: {0}")]
    Embedding(String),

    #[error("Query embedding dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector search failed: {0}")]
    Index(String),

    #[error("Retriever task failed: {0}")]
    Task(String),
}

/// A query executor over one index of a snapshot.
///
/// Implementations must be cheap to call concurrently; the snapshot is shared
/// read-only by every in-flight query.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn kind(&self) -> RetrieverKind;

    /// Return at most `k` candidates, score-descending, ties by ascending
    /// document id, ranks 1-based.
    async fn retrieve(
        &self,
        snapshot: Arc<IndexSnapshot>,
        query: Arc<RetrievalQuery>,
        k: usize,
    ) -> Result<Vec<Candidate>, RetrieverError>;
}

/// Turn ordinal-scored hits into ranked candidates.
pub(crate) fn to_candidates<S: Into<f64> + Copy>(snapshot: &IndexSnapshot, scored: &[(u32, S)]) -> Vec<Candidate> {
    scored
        .iter()
        .filter_map(|&(ord, score)| snapshot.document(ord).map(|doc| (doc.id.clone(), score.into())))
        .enumerate()
        .map(|(i, (document_id, score))| Candidate { document_id, score, rank: i + 1 })
        .collect()
}
