/// Domain-specific error types for mosaic
///
/// Only caller-facing failures live here. Retriever and selector failures have
/// their own enums and are recovered inside the query pipeline.

#[derive(Debug, thiserror::Error)]
pub enum MosaicError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Query is empty or whitespace-only")]
    EmptyQuery,

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Index build error: {0}")]
    IndexBuild(String),

    #[error("All retrievers failed: {0}")]
    RetrievalFailed(String),

    #[error("Search cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for MosaicError {
    fn from(e: std::io::Error) -> Self {
        MosaicError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for MosaicError {
    fn from(e: serde_json::Error) -> Self {
        MosaicError::Storage(e.to_string())
    }
}

impl From<crate::embedding::EmbeddingError> for MosaicError {
    fn from(e: crate::embedding::EmbeddingError) -> Self {
        MosaicError::Internal(e.to_string())
    }
}

impl MosaicError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use mosaic::errors::MosaicError;
    /// let err = MosaicError::validation("top_k", "top_k must be at least 1");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        MosaicError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }

    /// The request field a validation failure refers to, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            MosaicError::Validation { field, .. } => field.as_deref(),
            MosaicError::EmptyQuery => Some("query"),
            _ => None,
        }
    }
}
