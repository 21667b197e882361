/// BM25 retriever over the snapshot's lexical index.

use async_trait::async_trait;
use std::sync::Arc;

use super::{to_candidates, Candidate, RetrievalQuery, Retriever, RetrieverError, RetrieverKind};
use crate::index::lexical::Bm25Params;
use crate::index::IndexSnapshot;

pub struct Bm25Retriever {
    params: Bm25Params,
}

impl Bm25Retriever {
    pub fn new(params: Bm25Params) -> Self {
        Bm25Retriever { params }
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }
}

impl Default for Bm25Retriever {
    fn default() -> Self {
        Bm25Retriever::new(Bm25Params::default())
    }
}

#[async_trait]
impl Retriever for Bm25Retriever {
    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Bm25
    }

    async fn retrieve(
        &self,
        snapshot: Arc<IndexSnapshot>,
        query: Arc<RetrievalQuery>,
        k: usize,
    ) -> Result<Vec<Candidate>, RetrieverError> {
        if query.terms.is_empty() {
            return Ok(Vec::new());
        }
        let params = self.params;
        // Posting traversal is CPU-bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let scored = snapshot.lexical().score(&query.terms, params, k);
            to_candidates(&snapshot, &scored)
        })
        .await
        .map_err(|e| RetrieverError::Task(e.to_string()))
    }
}
