/// BEIR-style evaluation inputs.
///
/// `queries.jsonl` holds one `{"_id", "text", "embedding"?}` object per line;
/// qrels are tab-separated `query-id  corpus-id  score` rows with an optional
/// header line.

use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::errors::MosaicError;

#[derive(Debug, Clone, Deserialize)]
pub struct EvalQuery {
    #[serde(alias = "_id")]
    pub id: String,
    pub text: String,
    /// Precomputed query embedding, for runs without an embedding provider
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// query id → (document id → graded relevance)
pub type Qrels = HashMap<String, HashMap<String, u32>>;

pub fn read_queries<R: BufRead>(reader: R) -> Result<Vec<EvalQuery>, MosaicError> {
    let mut queries = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let query: EvalQuery = serde_json::from_str(&line).map_err(|e| {
            MosaicError::validation("queries", &format!("line {}: {}", i + 1, e))
        })?;
        queries.push(query);
    }
    Ok(queries)
}

pub fn load_queries(path: &Path) -> Result<Vec<EvalQuery>, MosaicError> {
    let file = std::fs::File::open(path)?;
    read_queries(BufReader::new(file))
}

pub fn read_qrels<R: BufRead>(reader: R) -> Result<Qrels, MosaicError> {
    let mut qrels: Qrels = HashMap::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() != 3 {
            return Err(MosaicError::validation(
                "qrels",
                &format!("line {}: expected 3 columns, found {}", i + 1, fields.len()),
            ));
        }
        let score = match fields[2].parse::<i64>() {
            Ok(score) => score,
            // Header row: "query-id corpus-id score"
            Err(_) if i == 0 => continue,
            Err(_) => {
                return Err(MosaicError::validation(
                    "qrels",
                    &format!("line {}: invalid score '{}'", i + 1, fields[2]),
                ))
            }
        };
        qrels
            .entry(fields[0].to_string())
            .or_default()
            .insert(fields[1].to_string(), score.max(0) as u32);
    }
    Ok(qrels)
}

pub fn load_qrels(path: &Path) -> Result<Qrels, MosaicError> {
    let file = std::fs::File::open(path)?;
    read_qrels(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_queries_accepts_beir_ids() {
        let input = "{\"_id\": \"q1\", \"text\": \"who is tony stark\"}\n\n{\"id\": \"q2\", \"text\": \"thor\", \"embedding\": [0.5, 0.5]}\n";
        let queries = read_queries(input.as_bytes()).unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].id, "q1");
        assert!(queries[0].embedding.is_none());
        assert_eq!(queries[1].embedding.as_deref(), Some(&[0.5, 0.5][..]));
    }

    #[test]
    fn test_read_qrels_skips_header() {
        let input = "query-id\tcorpus-id\tscore\nq1\tdoc_a\t2\nq1\tdoc_c\t1\nq2\tdoc_b\t0\n";
        let qrels = read_qrels(input.as_bytes()).unwrap();
        assert_eq!(qrels["q1"]["doc_a"], 2);
        assert_eq!(qrels["q1"].len(), 2);
        assert_eq!(qrels["q2"]["doc_b"], 0);
    }

    #[test]
    fn test_read_qrels_rejects_bad_rows() {
        assert!(read_qrels("q1\tdoc_a\n".as_bytes()).is_err());
        assert!(read_qrels("q1\tdoc_a\t1\nq2\tdoc_b\thigh\n".as_bytes()).is_err());
    }
}
