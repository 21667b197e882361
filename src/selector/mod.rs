/// Adaptive algorithm selection
///
/// The selector turns query features and the retrieved candidate lists into a
/// `SelectionDecision`. It never fails: a missing model, an inference error,
/// or a decision that needs a list the query does not have all degrade to
/// default RRF fusion over whatever lists are available.

pub mod model;

pub use model::{LoadedModel, ModelArtifact, RankingModel};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

use crate::features::{QueryFeatures, QueryType};
use crate::retrieval::{Candidate, RetrieverKind};

/// Names of every feature a router model may reference.
pub const ROUTING_FEATURES: &[&str] = &[
    "token_count",
    "avg_term_df",
    "oov_ratio",
    "is_factoid",
    "is_entity",
    "is_descriptive",
    "is_other",
    "bm25_top_score",
    "bm25_count",
    "dense_top_score",
    "dense_count",
    "top10_overlap",
];

const OVERLAP_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Bm25Only,
    DenseOnly,
    RrfFusion,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Bm25Only => "bm25_only",
            Strategy::DenseOnly => "dense_only",
            Strategy::RrfFusion => "rrf_fusion",
        }
    }

    /// The single list this strategy ranks by, if any.
    pub fn required_retriever(&self) -> Option<RetrieverKind> {
        match self {
            Strategy::Bm25Only => Some(RetrieverKind::Bm25),
            Strategy::DenseOnly => Some(RetrieverKind::Dense),
            Strategy::RrfFusion => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// The loaded router model
    Model,
    /// The caller forced a path with an algorithm hint
    Hint,
    /// No model loaded
    Default,
    /// The model failed or chose an unavailable signal
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionDecision {
    pub strategy: Strategy,
    /// Weights for weighted RRF; `None` means plain RRF or a single list
    pub per_retriever_weight: Option<BTreeMap<RetrieverKind, f64>>,
    pub source: DecisionSource,
}

impl SelectionDecision {
    pub fn default_rrf(source: DecisionSource) -> Self {
        SelectionDecision {
            strategy: Strategy::RrfFusion,
            per_retriever_weight: None,
            source,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SelectorError {
    #[error("Router inference failed: {0}")]
    InferenceFailure(String),

    #[error("Invalid router model artifact: {0}")]
    InvalidArtifact(String),
}

/// Named numeric inputs for the router model.
///
/// List features are present only for retrievers that returned a list for
/// this query; a failed retriever leaves them unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingFeatures {
    values: BTreeMap<&'static str, f64>,
}

fn flag(on: bool) -> f64 {
    if on { 1.0 } else { 0.0 }
}

impl RoutingFeatures {
    pub fn from_parts(features: &QueryFeatures, lists: &BTreeMap<RetrieverKind, Vec<Candidate>>) -> Self {
        let mut values = BTreeMap::new();
        values.insert("token_count", features.token_count as f64);
        values.insert("avg_term_df", features.average_term_document_frequency);
        values.insert("oov_ratio", features.out_of_vocabulary_ratio);
        values.insert("is_factoid", flag(features.query_type == QueryType::Factoid));
        values.insert("is_entity", flag(features.query_type == QueryType::Entity));
        values.insert("is_descriptive", flag(features.query_type == QueryType::Descriptive));
        values.insert("is_other", flag(features.query_type == QueryType::Other));

        let top_score = |list: &[Candidate]| list.first().map_or(0.0, |c| c.score);
        if let Some(bm25) = lists.get(&RetrieverKind::Bm25) {
            values.insert("bm25_top_score", top_score(bm25));
            values.insert("bm25_count", bm25.len() as f64);
        }
        if let Some(dense) = lists.get(&RetrieverKind::Dense) {
            values.insert("dense_top_score", top_score(dense));
            values.insert("dense_count", dense.len() as f64);
        }
        if let (Some(bm25), Some(dense)) = (lists.get(&RetrieverKind::Bm25), lists.get(&RetrieverKind::Dense)) {
            let top: HashSet<&str> = bm25.iter().take(OVERLAP_DEPTH).map(|c| c.document_id.as_str()).collect();
            let shared = dense
                .iter()
                .take(OVERLAP_DEPTH)
                .filter(|c| top.contains(c.document_id.as_str()))
                .count();
            values.insert("top10_overlap", shared as f64 / OVERLAP_DEPTH as f64);
        }
        RoutingFeatures { values }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn as_map(&self) -> &BTreeMap<&'static str, f64> {
        &self.values
    }
}

pub struct AlgorithmSelector {
    model: RankingModel,
}

impl AlgorithmSelector {
    pub fn new(model: RankingModel) -> Self {
        AlgorithmSelector { model }
    }

    /// A selector with no model: every decision is default RRF.
    pub fn null() -> Self {
        AlgorithmSelector::new(RankingModel::Null)
    }

    /// Load the configured model. A broken artifact is logged and replaced
    /// by the null model.
    pub fn from_model_path(path: Option<&std::path::Path>) -> Self {
        match RankingModel::load(path) {
            Ok(model) => {
                tracing::info!(model = %model.name(), loaded = model.is_loaded(), "Router model ready");
                AlgorithmSelector::new(model)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load router model, falling back to RRF fusion");
                AlgorithmSelector::null()
            }
        }
    }

    pub fn model(&self) -> &RankingModel {
        &self.model
    }

    pub fn select(
        &self,
        features: &QueryFeatures,
        lists: &BTreeMap<RetrieverKind, Vec<Candidate>>,
    ) -> SelectionDecision {
        let routing = RoutingFeatures::from_parts(features, lists);
        let decision = match self.model.infer(&routing) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    model = %self.model.name(),
                    error = %e,
                    "Router inference failed, falling back to RRF fusion"
                );
                return SelectionDecision::default_rrf(DecisionSource::Fallback);
            }
        };

        if let Some(required) = decision.strategy.required_retriever() {
            if !lists.contains_key(&required) {
                tracing::warn!(
                    strategy = %decision.strategy,
                    retriever = %required,
                    "Router chose a failed retriever, falling back to RRF fusion"
                );
                return SelectionDecision::default_rrf(DecisionSource::Fallback);
            }
        }
        decision
    }
}
