/// Corpus records and JSON Lines I/O
///
/// The index build interface: one JSON object per line, BEIR-style `_id`
/// accepted as an alias of `id`. Records may carry a precomputed embedding;
/// those without one are embedded at build time by the configured provider.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::embedding::EmbeddingProvider;
use crate::errors::MosaicError;
use crate::text::normalize_tokens;

/// A document as supplied by the index builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocument {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub text: String,
    /// Precomputed embedding. Every document in a corpus shares one dimension.
    /// Empty when the build should embed the document itself.
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl RawDocument {
    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }

    /// Text fed to the embedding model: title and body.
    pub fn embedding_text(&self) -> String {
        if self.title.is_empty() {
            self.text.clone()
        } else {
            format!("{} {}", self.title, self.text)
        }
    }
}

/// Per-document term statistics computed once at indexing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermStatistics {
    /// Number of normalized tokens (the BM25 document length)
    pub length: u32,
    pub unique_terms: u32,
}

/// An indexed, immutable document. Retired only by an index rebuild.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub term_stats: TermStatistics,
}

impl Document {
    pub fn from_raw(raw: RawDocument) -> Self {
        let tokens = normalize_tokens(&raw.text);
        let mut unique: Vec<&str> = tokens.iter().map(String::as_str).collect();
        unique.sort_unstable();
        unique.dedup();
        let term_stats = TermStatistics {
            length: tokens.len() as u32,
            unique_terms: unique.len() as u32,
        };
        Document {
            id: raw.id,
            title: raw.title,
            text: raw.text,
            embedding: raw.embedding,
            term_stats,
        }
    }

    pub fn to_raw(&self) -> RawDocument {
        RawDocument {
            id: self.id.clone(),
            title: self.title.clone(),
            text: self.text.clone(),
            embedding: self.embedding.clone(),
        }
    }
}

/// Read a JSON Lines corpus. Blank lines are skipped; `limit` caps the count.
pub fn load_corpus(path: &Path, limit: Option<usize>) -> Result<Vec<RawDocument>, MosaicError> {
    let file = std::fs::File::open(path)
        .map_err(|e| MosaicError::Storage(format!("Failed to open corpus {}: {}", path.display(), e)))?;
    read_corpus(BufReader::new(file), limit)
}

pub fn read_corpus<R: BufRead>(reader: R, limit: Option<usize>) -> Result<Vec<RawDocument>, MosaicError> {
    let mut docs = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        if limit.is_some_and(|n| docs.len() >= n) {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: RawDocument = serde_json::from_str(&line).map_err(|e| {
            MosaicError::Storage(format!("Invalid corpus record on line {}: {}", line_no + 1, e))
        })?;
        docs.push(doc);
    }
    Ok(docs)
}

/// Keep a reproducible random subset of `n` documents. The same seed over the
/// same corpus always selects the same documents.
pub fn sample_documents(mut docs: Vec<RawDocument>, n: usize, seed: u64) -> Vec<RawDocument> {
    if n >= docs.len() {
        return docs;
    }
    // Shuffle a canonical order so the subset does not depend on file order.
    docs.sort_by(|a, b| a.id.cmp(&b.id));
    let mut rng = StdRng::seed_from_u64(seed);
    docs.shuffle(&mut rng);
    docs.truncate(n);
    docs
}

/// Embed every document that has no embedding, `batch_size` texts per
/// provider call. Returns how many documents were embedded.
pub async fn embed_missing(
    docs: &mut [RawDocument],
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<usize, MosaicError> {
    let missing: Vec<usize> = docs
        .iter()
        .enumerate()
        .filter(|(_, d)| !d.has_embedding())
        .map(|(i, _)| i)
        .collect();
    if missing.is_empty() {
        return Ok(0);
    }

    tracing::info!(
        documents = missing.len(),
        model = %provider.model_name(),
        batch_size,
        "Embedding documents"
    );
    for (batch_no, batch) in missing.chunks(batch_size.max(1)).enumerate() {
        let texts: Vec<String> = batch.iter().map(|&i| docs[i].embedding_text()).collect();
        let embeddings = provider
            .embed_batch(&texts)
            .await
            .map_err(|e| MosaicError::IndexBuild(format!("failed to embed documents: {}", e)))?;
        if embeddings.len() != batch.len() {
            return Err(MosaicError::IndexBuild(format!(
                "embedding provider returned {} vectors for {} documents",
                embeddings.len(),
                batch.len()
            )));
        }
        for (&i, embedding) in batch.iter().zip(embeddings) {
            docs[i].embedding = embedding;
        }
        tracing::debug!(batch = batch_no + 1, size = batch.len(), "Embedded batch");
    }
    Ok(missing.len())
}

pub fn write_corpus(path: &Path, docs: &[RawDocument]) -> Result<(), MosaicError> {
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    for doc in docs {
        serde_json::to_writer(&mut writer, doc)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_corpus_accepts_beir_id_alias() {
        let input = "{\"_id\": \"d1\", \"title\": \"Iron Man\", \"text\": \"tony stark\", \"embedding\": [1.0, 0.0]}\n\
                     \n\
                     {\"id\": \"d2\", \"text\": \"steve rogers\", \"embedding\": [0.0, 1.0]}\n";
        let docs = read_corpus(input.as_bytes(), None).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "d1");
        assert_eq!(docs[0].title, "Iron Man");
        assert_eq!(docs[1].title, "");
    }

    #[test]
    fn test_read_corpus_respects_limit() {
        let input = "{\"id\": \"a\", \"text\": \"x\", \"embedding\": [1.0]}\n\
                     {\"id\": \"b\", \"text\": \"y\", \"embedding\": [1.0]}\n";
        let docs = read_corpus(input.as_bytes(), Some(1)).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "a");
    }

    #[test]
    fn test_read_corpus_reports_bad_line() {
        let input = "{\"id\": \"a\", \"text\": \"x\", \"embedding\": [1.0]}\nnot json\n";
        let err = read_corpus(input.as_bytes(), None).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{}", err);
    }

    #[test]
    fn test_embedding_is_optional() {
        let input = "{\"id\": \"a\", \"title\": \"Iron Man\", \"text\": \"tony stark\"}\n";
        let docs = read_corpus(input.as_bytes(), None).unwrap();
        assert!(!docs[0].has_embedding());
        assert_eq!(docs[0].embedding_text(), "Iron Man tony stark");
    }

    fn numbered(n: usize) -> Vec<RawDocument> {
        (0..n)
            .map(|i| RawDocument {
                id: format!("doc_{:03}", i),
                title: String::new(),
                text: format!("document {}", i),
                embedding: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn test_sample_is_reproducible_and_order_independent() {
        let first = sample_documents(numbered(50), 10, 42);
        let mut reversed = numbered(50);
        reversed.reverse();
        let second = sample_documents(reversed, 10, 42);
        let ids = |docs: &[RawDocument]| docs.iter().map(|d| d.id.clone()).collect::<Vec<_>>();
        assert_eq!(first.len(), 10);
        assert_eq!(ids(&first), ids(&second));
        assert_ne!(ids(&first), ids(&sample_documents(numbered(50), 10, 7)));
    }

    #[test]
    fn test_sample_larger_than_corpus_keeps_everything() {
        assert_eq!(sample_documents(numbered(3), 10, 42).len(), 3);
    }

    /// Embeds by text length and counts provider calls.
    struct LengthEmbedder {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::embedding::EmbeddingError> {
            Ok(vec![text.len() as f32, 1.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, crate::embedding::EmbeddingError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn model_name(&self) -> &str {
            "length"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn test_embed_missing_fills_only_empty_embeddings() {
        let mut docs = numbered(5);
        docs[2].embedding = vec![9.0, 9.0];
        let provider = LengthEmbedder { calls: Default::default() };

        let embedded = embed_missing(&mut docs, &provider, 2).await.unwrap();
        assert_eq!(embedded, 4);
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(docs[2].embedding, vec![9.0, 9.0]);
        assert_eq!(docs[0].embedding, vec!["document 0".len() as f32, 1.0]);
        assert!(docs.iter().all(RawDocument::has_embedding));
    }

    #[test]
    fn test_term_statistics() {
        let doc = Document::from_raw(RawDocument {
            id: "a".into(),
            title: String::new(),
            text: "Tony Stark, tony stark iron man".into(),
            embedding: vec![],
        });
        assert_eq!(doc.term_stats.length, 6);
        assert_eq!(doc.term_stats.unique_terms, 4);
    }
}
