/// Dense retriever over the snapshot's vector index
///
/// Uses the query's precomputed embedding when present, otherwise asks the
/// configured embedding provider. With neither, the retriever fails for that
/// query and the orchestrator carries on with the lexical signal.

use async_trait::async_trait;
use std::sync::Arc;

use super::{to_candidates, Candidate, RetrievalQuery, Retriever, RetrieverError, RetrieverKind};
use crate::embedding::EmbeddingProvider;
use crate::index::vector::VectorError;
use crate::index::IndexSnapshot;

pub struct DenseRetriever {
    provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl DenseRetriever {
    pub fn new(provider: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        DenseRetriever { provider }
    }

    /// A retriever that only accepts precomputed query embeddings.
    pub fn precomputed_only() -> Self {
        DenseRetriever { provider: None }
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_ref().map(|p| p.model_name())
    }

    async fn query_embedding(&self, query: &RetrievalQuery) -> Result<Vec<f32>, RetrieverError> {
        if let Some(embedding) = &query.embedding {
            return Ok(embedding.clone());
        }
        match &self.provider {
            Some(provider) => provider
                .embed(&query.text)
                .await
                .map_err(|e| RetrieverError::Embedding(e.to_string())),
            None => Err(RetrieverError::Embedding(
                "no embedding provider configured and no query_embedding supplied".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Retriever for DenseRetriever {
    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Dense
    }

    async fn retrieve(
        &self,
        snapshot: Arc<IndexSnapshot>,
        query: Arc<RetrievalQuery>,
        k: usize,
    ) -> Result<Vec<Candidate>, RetrieverError> {
        if snapshot.vector().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.query_embedding(&query).await?;
        let expected = snapshot.vector().dimension();
        if embedding.len() != expected {
            return Err(RetrieverError::DimensionMismatch { expected, actual: embedding.len() });
        }

        tokio::task::spawn_blocking(move || {
            let scored = snapshot.vector().search(&embedding, k).map_err(|e| match e {
                VectorError::DimensionMismatch { expected, actual } => {
                    RetrieverError::DimensionMismatch { expected, actual }
                }
                VectorError::NonFinite => {
                    RetrieverError::Embedding("query embedding contains non-finite values".to_string())
                }
                VectorError::Ann(message) => RetrieverError::Index(message),
            })?;
            Ok(to_candidates(&snapshot, &scored))
        })
        .await
        .map_err(|e| RetrieverError::Task(e.to_string()))?
    }
}
