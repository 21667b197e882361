/// Embedding provider trait and supporting types
///
/// Query embeddings come from an external model. Providers are pluggable:
/// local fastembed models (default, no API key) and the OpenAI API. With the
/// "none" provider, callers must send a precomputed query embedding.

pub mod local;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::EmbeddingConfig;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// fastembed model initialization failure
    #[error("Model initialization error: {0}")]
    ModelInit(String),

    /// Embedding generation failure (inference error)
    #[error("Embedding generation error: {0}")]
    Generation(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Core trait for embedding text into fixed-dimension float vectors.
///
/// Implementations must be Send + Sync to support use in async contexts
/// and across thread boundaries (e.g., Arc<dyn EmbeddingProvider>).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several texts, returning one vector per input in input order.
    /// The default embeds them one at a time.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Return the model name identifier (e.g., "all-MiniLM-L6-v2").
    fn model_name(&self) -> &str;

    /// Return the dimension of the embedding vectors produced by this model.
    fn dimension(&self) -> usize;
}

/// Create the embedding provider named by `config.provider`.
///
/// Returns `Ok(None)` for "none".
pub async fn create_embedding_provider(
    config: &EmbeddingConfig,
) -> Result<Option<Arc<dyn EmbeddingProvider>>, EmbeddingError> {
    match config.provider.as_str() {
        "none" => Ok(None),
        "openai" => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EmbeddingError::NotConfigured(
                    "OpenAI API key required when provider is 'openai'. \
                     Set MOSAIC_EMBEDDING__OPENAI_API_KEY or embedding.openai_api_key in mosaic.toml"
                        .to_string(),
                )
            })?;
            Ok(Some(Arc::new(openai::OpenAIEmbeddingProvider::new(
                api_key,
                config.openai_model.clone(),
            )?)))
        }
        "local" => Ok(Some(Arc::new(local::LocalEmbeddingProvider::new(&config.cache_dir).await?))),
        other => Err(EmbeddingError::NotConfigured(format!(
            "Unknown embedding provider '{}'. Valid options: local, openai, none",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_none_provider() {
        let config = EmbeddingConfig {
            provider: "none".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedding_provider(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_openai_without_key_is_not_configured() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            openai_api_key: None,
            ..EmbeddingConfig::default()
        };
        let err = create_embedding_provider(&config).await.err().unwrap();
        assert!(matches!(err, EmbeddingError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let config = EmbeddingConfig {
            provider: "word2vec".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedding_provider(&config).await.is_err());
    }
}
