/// Query-level features for routing decisions
///
/// Extraction is pure and deterministic: it reads only the query text and the
/// lexical statistics of the captured snapshot. No I/O.

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use crate::index::lexical::LexicalIndex;
use crate::text::normalize_tokens;

/// Closed query taxonomy used by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Short-answer questions ("who played tony stark")
    Factoid,
    /// Short named-entity lookups ("Tony Stark", "Apollo 11")
    Entity,
    /// Explanations and long natural-language requests
    Descriptive,
    Other,
}

impl QueryType {
    pub fn label(&self) -> &'static str {
        match self {
            QueryType::Factoid => "factoid",
            QueryType::Entity => "entity",
            QueryType::Descriptive => "descriptive",
            QueryType::Other => "other",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryFeatures {
    /// Tokens after normalization (lowercase, punctuation stripped)
    pub token_count: usize,
    /// Mean document frequency over the distinct query terms; 0 for empty queries
    pub average_term_document_frequency: f64,
    /// Share of distinct query terms missing from the vocabulary
    pub out_of_vocabulary_ratio: f64,
    pub query_type: QueryType,
}

const FACTOID_LEADS: &[&str] = &["who", "what", "when", "where", "which", "whom", "whose"];
const DESCRIPTIVE_LEADS: &[&str] = &["why", "how", "explain", "describe"];
const ENTITY_MAX_TOKENS: usize = 4;
const DESCRIPTIVE_MIN_TOKENS: usize = 6;

/// Capital letters, quotes, or digits in the raw text mark entity-like queries.
fn entity_marker() -> Option<&'static Regex> {
    static ENTITY: OnceLock<Option<Regex>> = OnceLock::new();
    ENTITY
        .get_or_init(|| Regex::new(r#"\p{Lu}|["“”]|\d"#).ok())
        .as_ref()
}

/// Label a query. Rules apply in order; the first match wins.
pub fn classify_query(text: &str, tokens: &[String]) -> QueryType {
    let Some(first) = tokens.first().map(String::as_str) else {
        return QueryType::Other;
    };
    let second = tokens.get(1).map(String::as_str);

    if FACTOID_LEADS.contains(&first) || (first == "how" && matches!(second, Some("many") | Some("much"))) {
        return QueryType::Factoid;
    }
    if DESCRIPTIVE_LEADS.contains(&first) {
        return QueryType::Descriptive;
    }
    if tokens.len() <= ENTITY_MAX_TOKENS && entity_marker().is_some_and(|re| re.is_match(text)) {
        return QueryType::Entity;
    }
    if tokens.len() >= DESCRIPTIVE_MIN_TOKENS {
        return QueryType::Descriptive;
    }
    QueryType::Other
}

pub struct FeatureExtractor<'a> {
    index: &'a LexicalIndex,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(index: &'a LexicalIndex) -> Self {
        FeatureExtractor { index }
    }

    pub fn extract(&self, query_text: &str) -> QueryFeatures {
        let tokens = normalize_tokens(query_text);

        let mut seen = HashSet::new();
        let distinct: Vec<&str> = tokens
            .iter()
            .map(String::as_str)
            .filter(|t| seen.insert(*t))
            .collect();

        let (average_term_document_frequency, out_of_vocabulary_ratio) = if distinct.is_empty() {
            (0.0, 0.0)
        } else {
            let dfs: Vec<usize> = distinct.iter().map(|t| self.index.document_frequency(t)).collect();
            let total: usize = dfs.iter().sum();
            let oov = dfs.iter().filter(|&&df| df == 0).count();
            (
                total as f64 / distinct.len() as f64,
                oov as f64 / distinct.len() as f64,
            )
        };

        QueryFeatures {
            token_count: tokens.len(),
            average_term_document_frequency,
            out_of_vocabulary_ratio,
            query_type: classify_query(query_text, &tokens),
        }
    }
}
