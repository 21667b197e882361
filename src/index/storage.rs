/// On-disk layout of a built index
///
/// `meta.json` describes the build; `documents.jsonl` holds the documents with
/// their embeddings. Postings are rebuilt on load, which keeps the format
/// independent of the in-memory layout. Both files are written under a temp
/// name and renamed into place, so a reader never sees a half-written file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{IndexOptions, IndexSnapshot};
use super::vector::{HnswParams, SimilarityMetric, VectorIndexKind};
use crate::corpus::{load_corpus, write_corpus, RawDocument};
use crate::errors::MosaicError;

const FORMAT_VERSION: u32 = 1;
const META_FILE: &str = "meta.json";
const DOCUMENTS_FILE: &str = "documents.jsonl";
const TEMP_SUFFIX: &str = ".tmp";

fn temp_path(dir: &Path, file: &str) -> PathBuf {
    dir.join(format!("{}{}", file, TEMP_SUFFIX))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub format_version: u32,
    pub document_count: usize,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    #[serde(default)]
    pub index_kind: VectorIndexKind,
    #[serde(default)]
    pub hnsw: HnswParams,
    pub embedding_model: Option<String>,
    pub built_at: DateTime<Utc>,
}

/// Write `snapshot` into `dir`, creating it if needed.
pub fn save(dir: &Path, snapshot: &IndexSnapshot) -> Result<IndexMeta, MosaicError> {
    std::fs::create_dir_all(dir)?;

    let docs: Vec<RawDocument> = snapshot.documents().iter().map(|d| d.to_raw()).collect();
    let documents_tmp = temp_path(dir, DOCUMENTS_FILE);
    write_corpus(&documents_tmp, &docs)?;

    let meta = IndexMeta {
        format_version: FORMAT_VERSION,
        document_count: docs.len(),
        dimension: snapshot.vector().dimension(),
        metric: snapshot.options().metric,
        index_kind: snapshot.options().index_kind,
        hnsw: snapshot.options().hnsw,
        embedding_model: snapshot.options().embedding_model.clone(),
        built_at: snapshot.built_at(),
    };
    let meta_tmp = temp_path(dir, META_FILE);
    std::fs::write(&meta_tmp, serde_json::to_string_pretty(&meta)?)?;

    // Documents first: meta.json only ever names a documents file that is complete.
    std::fs::rename(&documents_tmp, dir.join(DOCUMENTS_FILE))?;
    std::fs::rename(&meta_tmp, dir.join(META_FILE))?;

    tracing::info!(
        dir = %dir.display(),
        documents = meta.document_count,
        dimension = meta.dimension,
        "Index saved"
    );
    Ok(meta)
}

/// Load and rebuild the index stored in `dir`.
///
/// Every failure is reported as `IndexUnavailable`: a missing or corrupt index
/// is fatal at startup and rejected by reloads.
pub fn load(dir: &Path) -> Result<IndexSnapshot, MosaicError> {
    let unavailable = |msg: String| MosaicError::IndexUnavailable(format!("{}: {}", dir.display(), msg));

    let meta_json = std::fs::read_to_string(dir.join(META_FILE))
        .map_err(|e| unavailable(format!("cannot read {}: {}", META_FILE, e)))?;
    let meta: IndexMeta = serde_json::from_str(&meta_json)
        .map_err(|e| unavailable(format!("invalid {}: {}", META_FILE, e)))?;
    if meta.format_version != FORMAT_VERSION {
        return Err(unavailable(format!(
            "unsupported format version {} (expected {})",
            meta.format_version, FORMAT_VERSION
        )));
    }

    let docs = load_corpus(&dir.join(DOCUMENTS_FILE), None).map_err(|e| unavailable(e.to_string()))?;
    if docs.len() != meta.document_count {
        return Err(unavailable(format!(
            "meta.json lists {} documents but {} were found",
            meta.document_count,
            docs.len()
        )));
    }

    let options = IndexOptions {
        metric: meta.metric,
        embedding_model: meta.embedding_model.clone(),
        index_kind: meta.index_kind,
        hnsw: meta.hnsw,
    };
    let snapshot = IndexSnapshot::build(docs, &options).map_err(|e| unavailable(e.to_string()))?;
    if snapshot.vector().dimension() != meta.dimension {
        return Err(unavailable(format!(
            "meta.json dimension {} does not match stored embeddings ({})",
            meta.dimension,
            snapshot.vector().dimension()
        )));
    }
    snapshot.lexical().check_invariants().map_err(unavailable)?;

    tracing::info!(
        dir = %dir.display(),
        documents = snapshot.len(),
        dimension = meta.dimension,
        metric = %meta.metric,
        index_kind = %meta.index_kind,
        "Index loaded"
    );
    Ok(snapshot)
}
