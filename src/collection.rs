//! Collections, their member documents and per-document OCR records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ocr::{ExtractionResult, ProviderType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OcrStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OcrStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Derived status of a collection; never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionStatus {
    Processing,
    Processed,
    FailedOcr,
}

impl CollectionStatus {
    /// Fold member statuses into the collection status.
    ///
    /// An empty collection counts as processed.
    pub fn aggregate<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = OcrStatus>,
    {
        let (mut total, mut completed, mut failed) = (0usize, 0usize, 0usize);
        for status in statuses {
            total += 1;
            match status {
                OcrStatus::Completed => completed += 1,
                OcrStatus::Failed => failed += 1,
                _ => {}
            }
        }

        if completed == total {
            Self::Processed
        } else if completed + failed == total {
            Self::FailedOcr
        } else {
            Self::Processing
        }
    }
}

/// A stored file that belongs to a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDocument {
    pub id: String,
    pub file_url: String,
    pub mime_type: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub owner_id: String,
    pub status: CollectionStatus,
    pub documents: Vec<CollectionDocument>,
    /// Bumped on every status write; used for optimistic concurrency.
    pub version: u64,
}

impl Collection {
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            status: CollectionStatus::Processing,
            documents: Vec::new(),
            version: 0,
        }
    }

    pub fn with_document(mut self, document: CollectionDocument) -> Self {
        self.documents.push(document);
        self
    }

    pub fn document(&self, document_id: &str) -> Option<&CollectionDocument> {
        self.documents.iter().find(|d| d.id == document_id)
    }
}

/// Persisted OCR state for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrRecord {
    pub document_id: String,
    pub status: OcrStatus,
    pub extracted_text: Option<String>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub provider_used: Option<ProviderType>,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl OcrRecord {
    pub fn pending(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            status: OcrStatus::Pending,
            extracted_text: None,
            error_message: None,
            provider_used: None,
            confidence: None,
            updated_at: Utc::now(),
        }
    }

    /// Start an attempt; output of any earlier attempt is cleared.
    pub fn mark_processing(&mut self) {
        self.status = OcrStatus::Processing;
        self.error_message = None;
        self.provider_used = None;
        self.confidence = None;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, result: &ExtractionResult) {
        self.status = OcrStatus::Completed;
        self.extracted_text = result.extracted_text.clone();
        self.error_message = None;
        self.provider_used = Some(result.provider_used);
        self.confidence = result.confidence;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, message: impl Into<String>, provider: Option<ProviderType>) {
        self.status = OcrStatus::Failed;
        self.error_message = Some(message.into());
        self.provider_used = provider;
        self.confidence = None;
        self.updated_at = Utc::now();
    }
}
