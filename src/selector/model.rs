/// Serialized router models
///
/// A model artifact is a JSON document holding a linear head over named
/// routing features:
///
/// ```json
/// {
///   "format_version": 1,
///   "name": "router-v3",
///   "feature_names": ["token_count", "is_factoid", "top10_overlap"],
///   "normalization": {"mean": [4.1, 0.3, 0.2], "scale": [2.0, 0.45, 0.2]},
///   "head": {
///     "type": "classifier",
///     "strategies": ["bm25_only", "dense_only", "rrf_fusion"],
///     "weights": [[0.2, 1.1, -0.4], [-0.3, -0.8, -0.2], [0.0, 0.1, 0.9]],
///     "bias": [0.0, 0.1, 0.3]
///   }
/// }
/// ```
///
/// A `weighting` head lists `retrievers` instead of `strategies`; its outputs
/// are softmaxed into per-retriever weights for weighted RRF. Training happens
/// elsewhere; this module only validates and evaluates artifacts.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::{DecisionSource, RoutingFeatures, SelectionDecision, SelectorError, Strategy, ROUTING_FEATURES};
use crate::retrieval::RetrieverKind;

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelHead {
    /// One linear score per strategy; the argmax wins.
    Classifier {
        strategies: Vec<Strategy>,
        weights: Vec<Vec<f64>>,
        bias: Vec<f64>,
    },
    /// One linear score per retriever, softmaxed into fusion weights.
    Weighting {
        retrievers: Vec<RetrieverKind>,
        weights: Vec<Vec<f64>>,
        bias: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub name: String,
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub normalization: Option<Normalization>,
    pub head: ModelHead,
}

fn invalid(msg: impl Into<String>) -> SelectorError {
    SelectorError::InvalidArtifact(msg.into())
}

fn check_finite(values: &[f64], what: &str) -> Result<(), SelectorError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(invalid(format!("{} contains non-finite values", what)))
    }
}

fn check_matrix(weights: &[Vec<f64>], bias: &[f64], outputs: usize, features: usize) -> Result<(), SelectorError> {
    if outputs == 0 {
        return Err(invalid("head has no outputs"));
    }
    if weights.len() != outputs || bias.len() != outputs {
        return Err(invalid(format!(
            "head has {} outputs but {} weight rows and {} biases",
            outputs,
            weights.len(),
            bias.len()
        )));
    }
    for (i, row) in weights.iter().enumerate() {
        if row.len() != features {
            return Err(invalid(format!(
                "weight row {} has {} entries, expected {}",
                i,
                row.len(),
                features
            )));
        }
        check_finite(row, "weights")?;
    }
    check_finite(bias, "bias")
}

fn check_unique<T: std::hash::Hash + Eq>(items: &[T], what: &str) -> Result<(), SelectorError> {
    let mut seen = HashSet::new();
    if items.iter().all(|item| seen.insert(item)) {
        Ok(())
    } else {
        Err(invalid(format!("duplicate {}", what)))
    }
}

impl ModelArtifact {
    /// Shape, vocabulary, and finiteness checks. Passing artifacts can only
    /// fail at inference on missing or non-finite feature values.
    pub fn validate(&self) -> Result<(), SelectorError> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(invalid(format!(
                "unsupported format_version {} (expected {})",
                self.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }
        if self.feature_names.is_empty() {
            return Err(invalid("feature_names is empty"));
        }
        if let Some(unknown) = self.feature_names.iter().find(|f| !ROUTING_FEATURES.contains(&f.as_str())) {
            return Err(invalid(format!("unknown feature '{}'", unknown)));
        }
        check_unique(&self.feature_names, "feature name")?;

        let n = self.feature_names.len();
        if let Some(norm) = &self.normalization {
            if norm.mean.len() != n || norm.scale.len() != n {
                return Err(invalid("normalization length does not match feature_names"));
            }
            check_finite(&norm.mean, "normalization.mean")?;
            check_finite(&norm.scale, "normalization.scale")?;
            if norm.scale.iter().any(|s| *s == 0.0) {
                return Err(invalid("normalization.scale contains zero"));
            }
        }

        match &self.head {
            ModelHead::Classifier { strategies, weights, bias } => {
                check_unique(strategies, "strategy")?;
                check_matrix(weights, bias, strategies.len(), n)
            }
            ModelHead::Weighting { retrievers, weights, bias } => {
                check_unique(retrievers, "retriever")?;
                check_matrix(weights, bias, retrievers.len(), n)
            }
        }
    }
}

/// A validated artifact ready for inference.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    artifact: ModelArtifact,
}

impl LoadedModel {
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, SelectorError> {
        artifact.validate()?;
        Ok(LoadedModel { artifact })
    }

    pub fn from_json(json: &str) -> Result<Self, SelectorError> {
        let artifact: ModelArtifact = serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;
        Self::from_artifact(artifact)
    }

    pub fn from_path(path: &Path) -> Result<Self, SelectorError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn name(&self) -> &str {
        &self.artifact.name
    }

    fn input_vector(&self, features: &RoutingFeatures) -> Result<Vec<f64>, SelectorError> {
        let norm = self.artifact.normalization.as_ref();
        self.artifact
            .feature_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let raw = features.get(name).ok_or_else(|| {
                    SelectorError::InferenceFailure(format!("feature '{}' unavailable for this query", name))
                })?;
                if !raw.is_finite() {
                    return Err(SelectorError::InferenceFailure(format!("feature '{}' is not finite", name)));
                }
                Ok(match norm {
                    Some(n) => (raw - n.mean[i]) / n.scale[i],
                    None => raw,
                })
            })
            .collect()
    }

    fn linear(weights: &[Vec<f64>], bias: &[f64], x: &[f64]) -> Result<Vec<f64>, SelectorError> {
        let z: Vec<f64> = weights
            .iter()
            .zip(bias)
            .map(|(row, b)| b + row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>())
            .collect();
        if z.iter().all(|v| v.is_finite()) {
            Ok(z)
        } else {
            Err(SelectorError::InferenceFailure("model produced a non-finite score".to_string()))
        }
    }

    pub fn infer(&self, features: &RoutingFeatures) -> Result<SelectionDecision, SelectorError> {
        let x = self.input_vector(features)?;
        match &self.artifact.head {
            ModelHead::Classifier { strategies, weights, bias } => {
                let z = Self::linear(weights, bias, &x)?;
                // Strict comparison keeps the first strategy on ties.
                let mut best = 0;
                for (i, score) in z.iter().enumerate() {
                    if *score > z[best] {
                        best = i;
                    }
                }
                Ok(SelectionDecision {
                    strategy: strategies[best],
                    per_retriever_weight: None,
                    source: DecisionSource::Model,
                })
            }
            ModelHead::Weighting { retrievers, weights, bias } => {
                let z = Self::linear(weights, bias, &x)?;
                let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let exp: Vec<f64> = z.iter().map(|v| (v - max).exp()).collect();
                let total: f64 = exp.iter().sum();
                let per_retriever_weight: BTreeMap<RetrieverKind, f64> =
                    retrievers.iter().copied().zip(exp.iter().map(|e| e / total)).collect();
                Ok(SelectionDecision {
                    strategy: Strategy::RrfFusion,
                    per_retriever_weight: Some(per_retriever_weight),
                    source: DecisionSource::Model,
                })
            }
        }
    }
}

/// The router's trained capability.
#[derive(Debug, Clone)]
pub enum RankingModel {
    Loaded(LoadedModel),
    /// No artifact: always answers with default RRF fusion.
    Null,
}

impl RankingModel {
    /// Load the artifact at `path`, or `Null` when no path is configured.
    pub fn load(path: Option<&Path>) -> Result<Self, SelectorError> {
        match path {
            Some(path) => Ok(RankingModel::Loaded(LoadedModel::from_path(path)?)),
            None => Ok(RankingModel::Null),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RankingModel::Loaded(model) => model.name(),
            RankingModel::Null => "null",
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, RankingModel::Loaded(_))
    }

    pub fn infer(&self, features: &RoutingFeatures) -> Result<SelectionDecision, SelectorError> {
        match self {
            RankingModel::Loaded(model) => model.infer(features),
            RankingModel::Null => Ok(SelectionDecision::default_rrf(DecisionSource::Default)),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_artifacts {
    /// Routes factoid queries to BM25, everything else to fusion.
    pub const FACTOID_CLASSIFIER: &str = r#"{
        "format_version": 1,
        "name": "factoid-router",
        "feature_names": ["is_factoid", "token_count"],
        "head": {
            "type": "classifier",
            "strategies": ["bm25_only", "dense_only", "rrf_fusion"],
            "weights": [[2.0, 0.0], [0.0, 0.0], [0.0, 0.0]],
            "bias": [0.0, -1.0, 1.0]
        }
    }"#;

    /// Needs the dense list, so it fails whenever the dense retriever did.
    pub const DENSE_DEPENDENT_CLASSIFIER: &str = r#"{
        "format_version": 1,
        "name": "dense-dependent",
        "feature_names": ["dense_top_score"],
        "head": {
            "type": "classifier",
            "strategies": ["dense_only", "bm25_only"],
            "weights": [[1.0], [-1.0]],
            "bias": [0.0, 0.0]
        }
    }"#;

    pub const WEIGHTING: &str = r#"{
        "format_version": 1,
        "name": "weighting",
        "feature_names": ["oov_ratio"],
        "normalization": {"mean": [0.0], "scale": [1.0]},
        "head": {
            "type": "weighting",
            "retrievers": ["bm25", "dense"],
            "weights": [[-4.0], [4.0]],
            "bias": [0.0, 0.0]
        }
    }"#;
}

#[cfg(test)]
mod tests {
    use super::test_artifacts::*;
    use super::*;
    use crate::features::{QueryFeatures, QueryType};

    fn features(query_type: QueryType, oov: f64) -> QueryFeatures {
        QueryFeatures {
            token_count: 3,
            average_term_document_frequency: 1.0,
            out_of_vocabulary_ratio: oov,
            query_type,
        }
    }

    fn routing(query_type: QueryType, oov: f64) -> RoutingFeatures {
        RoutingFeatures::from_parts(&features(query_type, oov), &BTreeMap::new())
    }

    #[test]
    fn test_classifier_picks_argmax() {
        let model = LoadedModel::from_json(FACTOID_CLASSIFIER).unwrap();
        let decision = model.infer(&routing(QueryType::Factoid, 0.0)).unwrap();
        assert_eq!(decision.strategy, Strategy::Bm25Only);
        assert_eq!(decision.source, DecisionSource::Model);

        let decision = model.infer(&routing(QueryType::Descriptive, 0.0)).unwrap();
        assert_eq!(decision.strategy, Strategy::RrfFusion);
    }

    #[test]
    fn test_weighting_head_softmaxes() {
        let model = LoadedModel::from_json(WEIGHTING).unwrap();
        let decision = model.infer(&routing(QueryType::Other, 0.5)).unwrap();
        assert_eq!(decision.strategy, Strategy::RrfFusion);
        let weights = decision.per_retriever_weight.unwrap();
        let bm25 = weights[&RetrieverKind::Bm25];
        let dense = weights[&RetrieverKind::Dense];
        assert!((bm25 + dense - 1.0).abs() < 1e-12);
        assert!(dense > bm25);
    }

    #[test]
    fn test_missing_list_feature_is_inference_failure() {
        let model = LoadedModel::from_json(DENSE_DEPENDENT_CLASSIFIER).unwrap();
        let err = model.infer(&routing(QueryType::Other, 0.0)).unwrap_err();
        assert!(matches!(err, SelectorError::InferenceFailure(_)));
    }

    #[test]
    fn test_null_model_returns_default_rrf() {
        let decision = RankingModel::Null.infer(&routing(QueryType::Factoid, 0.0)).unwrap();
        assert_eq!(decision, SelectionDecision::default_rrf(DecisionSource::Default));
    }

    #[test]
    fn test_validation_rejects_bad_artifacts() {
        let unknown_feature = FACTOID_CLASSIFIER.replace("token_count", "moon_phase");
        assert!(matches!(
            LoadedModel::from_json(&unknown_feature),
            Err(SelectorError::InvalidArtifact(_))
        ));

        let wrong_version = FACTOID_CLASSIFIER.replace("\"format_version\": 1", "\"format_version\": 2");
        assert!(LoadedModel::from_json(&wrong_version).is_err());

        let short_row = FACTOID_CLASSIFIER.replace("[2.0, 0.0]", "[2.0]");
        assert!(LoadedModel::from_json(&short_row).is_err());

        let zero_scale = WEIGHTING.replace("\"scale\": [1.0]", "\"scale\": [0.0]");
        assert!(LoadedModel::from_json(&zero_scale).is_err());

        assert!(LoadedModel::from_json("not json").is_err());
    }

    #[test]
    fn test_load_without_path_is_null() {
        let model = RankingModel::load(None).unwrap();
        assert!(!model.is_loaded());
        assert_eq!(model.name(), "null");
    }
}
