//! Error types for dispatch, persistence and fulfillment.

use std::time::Duration;

use thiserror::Error;

use crate::ocr::ProviderType;

/// Errors surfaced by providers and the dispatch service.
///
/// Routine extraction failures are not errors: they travel inside a failed
/// [`crate::ocr::ExtractionResult`]. This type carries the "exception" channel.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("invalid extraction request: {0}")]
    InvalidRequest(String),

    #[error("OCR quota exceeded for user {user_id} on tier '{tier}'")]
    QuotaExceeded { user_id: String, tier: String },

    #[error("OCR provider not available: {0}")]
    ProviderUnavailable(String),

    #[error("{provider} provider failed: {message}")]
    Processing {
        provider: ProviderType,
        message: String,
        retryable: bool,
    },

    #[error("{provider} provider timed out after {}s", .after.as_secs())]
    Timeout {
        provider: ProviderType,
        after: Duration,
    },

    #[error("quota ledger error: {0}")]
    QuotaLedger(#[from] StoreError),
}

impl OcrError {
    /// Transient infrastructure failure (network, decoding).
    pub fn transient(provider: ProviderType, message: impl Into<String>) -> Self {
        Self::Processing {
            provider,
            message: message.into(),
            retryable: true,
        }
    }

    /// Defect in the request or provider configuration; never retried.
    pub fn defect(provider: ProviderType, message: impl Into<String>) -> Self {
        Self::Processing {
            provider,
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether a fallback provider may be tried after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Processing { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Provider that raised the error, if any ran.
    pub fn provider(&self) -> Option<ProviderType> {
        match self {
            Self::Processing { provider, .. } | Self::Timeout { provider, .. } => Some(*provider),
            _ => None,
        }
    }
}

/// Errors from the persistence adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("failed to decode store response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("concurrent update conflict: {0}")]
    Conflict(String),

    #[error("missing row: {0}")]
    Missing(String),
}

/// Errors that end a single `fulfill` call.
///
/// Dispatch failures never appear here; they are persisted as FAILED records.
#[derive(Debug, Error)]
pub enum FulfillError {
    #[error("collection {0} not found")]
    CollectionNotFound(String),

    #[error("document {document_id} is not a member of collection {collection_id}")]
    DocumentNotFound {
        collection_id: String,
        document_id: String,
    },

    #[error("no OCR record for document {0}")]
    OcrRecordNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FulfillError {
    pub fn is_not_found(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}
