/// Immutable index snapshots and the handle that swaps them
///
/// A snapshot bundles the documents with their lexical and vector indexes and
/// is never mutated after construction. Queries capture an `Arc` of the
/// current snapshot at start and use it for their whole lifetime. A rebuild
/// produces a new snapshot off to the side and installs it under a short write
/// lock; in-flight queries keep reading their old snapshot.

pub mod lexical;
pub mod storage;
pub mod vector;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::corpus::{Document, RawDocument};
use crate::errors::MosaicError;
use lexical::{DocOrdinal, LexicalIndex};
use vector::{HnswParams, SimilarityMetric, VectorIndex, VectorIndexKind};

/// Build-time options recorded alongside the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub metric: SimilarityMetric,
    /// Model that produced the document embeddings, if known
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub index_kind: VectorIndexKind,
    #[serde(default)]
    pub hnsw: HnswParams,
}

pub struct IndexSnapshot {
    generation: u64,
    documents: Vec<Document>,
    id_lookup: HashMap<String, DocOrdinal>,
    lexical: LexicalIndex,
    vector: VectorIndex,
    options: IndexOptions,
    built_at: DateTime<Utc>,
}

/// Summary of the serving snapshot, exposed by `index_stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub generation: u64,
    pub document_count: usize,
    pub vocabulary_size: usize,
    pub average_document_length: f64,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    pub index_kind: VectorIndexKind,
    pub embedding_model: Option<String>,
    pub built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    /// Build both indexes over `raw`. Documents are ordered by id so that
    /// ordinal order doubles as the document-id tie-break order.
    pub fn build(mut raw: Vec<RawDocument>, options: &IndexOptions) -> Result<Self, MosaicError> {
        raw.sort_by(|a, b| a.id.cmp(&b.id));
        for pair in raw.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(MosaicError::IndexBuild(format!("duplicate document id '{}'", pair[0].id)));
            }
        }
        if let Some(doc) = raw.iter().find(|d| d.id.trim().is_empty()) {
            return Err(MosaicError::IndexBuild(format!("document with blank id (title '{}')", doc.title)));
        }

        let documents: Vec<Document> = raw.into_iter().map(Document::from_raw).collect();
        let id_lookup = documents
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i as DocOrdinal))
            .collect();
        let lexical = LexicalIndex::build(&documents);
        let mut vector = VectorIndex::build(documents.iter().map(|d| d.embedding.as_slice()), options.metric)
            .map_err(|e| MosaicError::IndexBuild(e.to_string()))?;
        if options.index_kind == VectorIndexKind::Hnsw {
            vector = vector.with_hnsw(options.hnsw).map_err(|e| MosaicError::IndexBuild(e.to_string()))?;
        }

        Ok(IndexSnapshot {
            generation: 0,
            documents,
            id_lookup,
            lexical,
            vector,
            options: options.clone(),
            built_at: Utc::now(),
        })
    }

    /// An empty snapshot: every query returns no candidates.
    pub fn empty() -> Self {
        IndexSnapshot {
            generation: 0,
            documents: Vec::new(),
            id_lookup: HashMap::new(),
            lexical: LexicalIndex::default(),
            vector: VectorIndex::default(),
            options: IndexOptions::default(),
            built_at: Utc::now(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn document(&self, doc: DocOrdinal) -> Option<&Document> {
        self.documents.get(doc as usize)
    }

    pub fn document_by_id(&self, id: &str) -> Option<&Document> {
        self.id_lookup.get(id).and_then(|&ord| self.document(ord))
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    pub fn vector(&self) -> &VectorIndex {
        &self.vector
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            generation: self.generation,
            document_count: self.documents.len(),
            vocabulary_size: self.lexical.vocabulary_size(),
            average_document_length: self.lexical.average_document_length(),
            dimension: self.vector.dimension(),
            metric: self.options.metric,
            index_kind: self.vector.kind(),
            embedding_model: self.options.embedding_model.clone(),
            built_at: self.built_at,
        }
    }
}

/// Shared entry point to the serving snapshot.
///
/// The lock only guards the `Arc` pointer, never index data, so readers hold
/// it for a clone and writers for a pointer store.
pub struct IndexHandle {
    current: RwLock<Arc<IndexSnapshot>>,
    last_generation: AtomicU64,
}

impl IndexHandle {
    /// Wrap an initial snapshot as generation 1.
    pub fn new(mut snapshot: IndexSnapshot) -> Self {
        snapshot.generation = 1;
        IndexHandle {
            current: RwLock::new(Arc::new(snapshot)),
            last_generation: AtomicU64::new(1),
        }
    }

    /// Capture the current snapshot for the lifetime of one query.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            // A writer can only panic between lock and pointer store; the Arc is still whole.
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Atomically replace the serving snapshot and return its generation.
    pub fn install(&self, mut snapshot: IndexSnapshot) -> u64 {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Numbered under the write lock so the serving generation is always the newest issued
        let generation = self.last_generation.fetch_add(1, Ordering::SeqCst) + 1;
        snapshot.generation = generation;
        *guard = Arc::new(snapshot);
        drop(guard);
        tracing::info!(generation, "Index snapshot installed");
        generation
    }

    /// Build a replacement snapshot outside the lock, then install it.
    /// On error the current snapshot keeps serving.
    pub fn rebuild(&self, raw: Vec<RawDocument>, options: &IndexOptions) -> Result<u64, MosaicError> {
        let snapshot = IndexSnapshot::build(raw, options)?;
        Ok(self.install(snapshot))
    }
}
