/// Nearest-neighbor index over document embeddings
///
/// Vectors are stored row-major in one flat buffer. With the cosine metric,
/// document vectors are L2-normalized at build time and the query at search
/// time, so scoring is a plain dot product for both metrics.
///
/// The flat buffer always answers exactly. An HNSW graph (USearch) can be
/// layered on top for large corpora; it is built from the same stored vectors
/// and trades a little recall for sub-linear search.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::lexical::DocOrdinal;

/// Similarity function, fixed when the index is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    InnerProduct,
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimilarityMetric::Cosine => write!(f, "cosine"),
            SimilarityMetric::InnerProduct => write!(f, "inner_product"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum VectorError {
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding contains non-finite values")]
    NonFinite,

    #[error("HNSW index error: {0}")]
    Ann(String),
}

/// Search structure used by the dense retriever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorIndexKind {
    /// Brute-force scan over every vector
    #[default]
    Exact,
    /// Approximate search over an HNSW graph
    Hnsw,
}

impl fmt::Display for VectorIndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorIndexKind::Exact => write!(f, "exact"),
            VectorIndexKind::Hnsw => write!(f, "hnsw"),
        }
    }
}

/// HNSW graph parameters (M, ef_construction, ef_search).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswParams {
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        HnswParams {
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
        }
    }
}

/// USearch graph keyed by document ordinal.
#[derive(Clone)]
struct AnnGraph {
    index: Arc<Index>,
    params: HnswParams,
}

impl fmt::Debug for AnnGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnGraph")
            .field("size", &self.index.size())
            .field("params", &self.params)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dimension: usize,
    metric: SimilarityMetric,
    vectors: Vec<f32>,
    ann: Option<AnnGraph>,
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

fn ann_error(e: impl fmt::Display) -> VectorError {
    VectorError::Ann(e.to_string())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl VectorIndex {
    /// Build from embeddings in ordinal order. All embeddings must share one
    /// non-zero dimension; an empty iterator yields an empty index.
    pub fn build<'a, I>(embeddings: I, metric: SimilarityMetric) -> Result<Self, VectorError>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let mut dimension = 0usize;
        let mut vectors = Vec::new();
        for (i, embedding) in embeddings.into_iter().enumerate() {
            if i == 0 {
                if embedding.is_empty() {
                    return Err(VectorError::DimensionMismatch { expected: 1, actual: 0 });
                }
                dimension = embedding.len();
            } else if embedding.len() != dimension {
                return Err(VectorError::DimensionMismatch { expected: dimension, actual: embedding.len() });
            }
            if embedding.iter().any(|x| !x.is_finite()) {
                return Err(VectorError::NonFinite);
            }
            let start = vectors.len();
            vectors.extend_from_slice(embedding);
            if metric == SimilarityMetric::Cosine {
                l2_normalize(&mut vectors[start..]);
            }
        }
        Ok(VectorIndex { dimension, metric, vectors, ann: None })
    }

    /// Add an HNSW graph over the stored vectors. Stored vectors are already
    /// normalized for cosine, so the graph uses inner-product distance for
    /// both metrics. An empty index stays exact.
    pub fn with_hnsw(mut self, params: HnswParams) -> Result<Self, VectorError> {
        if self.is_empty() {
            return Ok(self);
        }
        let options = IndexOptions {
            dimensions: self.dimension,
            metric: MetricKind::IP,
            quantization: ScalarKind::F32,
            connectivity: params.connectivity,
            expansion_add: params.expansion_add,
            expansion_search: params.expansion_search,
            multi: false,
        };
        let index = Index::new(&options).map_err(ann_error)?;
        index.reserve(self.len()).map_err(ann_error)?;
        for (ordinal, vector) in self.vectors.chunks_exact(self.dimension).enumerate() {
            index.add(ordinal as u64, vector).map_err(ann_error)?;
        }
        tracing::debug!(
            vectors = self.len(),
            connectivity = params.connectivity,
            expansion_search = params.expansion_search,
            "HNSW graph built"
        );
        self.ann = Some(AnnGraph { index: Arc::new(index), params });
        Ok(self)
    }

    pub fn kind(&self) -> VectorIndexKind {
        if self.ann.is_some() { VectorIndexKind::Hnsw } else { VectorIndexKind::Exact }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 { 0 } else { self.vectors.len() / self.dimension }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored (possibly normalized) vector for a document.
    pub fn vector(&self, doc: DocOrdinal) -> Option<&[f32]> {
        if doc as usize >= self.len() {
            return None;
        }
        let start = doc as usize * self.dimension;
        self.vectors.get(start..start + self.dimension)
    }

    /// Top-`k` documents by similarity, descending, ties by ascending ordinal.
    /// An empty index returns no results regardless of the query.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(DocOrdinal, f32)>, VectorError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(VectorError::DimensionMismatch { expected: self.dimension, actual: query.len() });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(VectorError::NonFinite);
        }

        let mut q = query.to_vec();
        if self.metric == SimilarityMetric::Cosine {
            l2_normalize(&mut q);
        }

        let by_score = |a: &(DocOrdinal, f32), b: &(DocOrdinal, f32)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));

        if let Some(ann) = &self.ann {
            let matches = ann
                .index
                .search(q.as_slice(), k.min(self.len()))
                .map_err(ann_error)?;
            // Inner-product distance is 1 - dot.
            let mut scored: Vec<(DocOrdinal, f32)> = matches
                .keys
                .iter()
                .zip(matches.distances.iter())
                .map(|(&key, &distance)| (key as DocOrdinal, 1.0 - distance))
                .collect();
            scored.sort_by(by_score);
            return Ok(scored);
        }

        let mut scored: Vec<(DocOrdinal, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(i, v)| (i as DocOrdinal, dot(&q, v)))
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_score);
            scored.truncate(k);
        }
        scored.sort_by(by_score);
        Ok(scored)
    }
}
