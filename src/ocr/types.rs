//! Request, result and descriptor types shared by every provider.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two provider families known to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Self-hosted engine (no data leaves our infrastructure).
    Local,
    /// Third-party OCR API.
    Cloud,
}

impl ProviderType {
    pub const ALL: [ProviderType; 2] = [ProviderType::Local, ProviderType::Cloud];

    /// Machine code used in config, metadata and persisted rows.
    pub fn code(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Local => "Local OCR (Docling)",
            Self::Cloud => "Cloud OCR (Mistral)",
        }
    }

    /// The other provider family.
    pub fn other(self) -> Self {
        match self {
            Self::Local => Self::Cloud,
            Self::Cloud => Self::Local,
        }
    }

    /// Parse a config value or query parameter (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "docling" => Some(Self::Local),
            "cloud" | "mistral" | "mistral_ocr" => Some(Self::Cloud),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Where the provider reads the image from.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    Bytes(Vec<u8>),
}

impl ImageSource {
    fn is_empty(&self) -> bool {
        match self {
            Self::Url(url) => url.trim().is_empty(),
            Self::Bytes(data) => data.is_empty(),
        }
    }
}

// Byte payloads can be megabytes; keep them out of logs.
impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Input to a single extraction.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub source: Option<ImageSource>,
    pub mime_type: String,
    pub language_hint: Option<String>,
    pub document_id: Option<String>,
    pub collection_id: Option<String>,
    pub user_id: Option<String>,
    /// Ordering hint for upstream queues; not used for scheduling here.
    pub priority: Priority,
    pub preferred_provider: Option<ProviderType>,
    pub fallback_allowed: bool,
    pub metadata: HashMap<String, String>,
}

impl Default for ExtractionRequest {
    fn default() -> Self {
        Self {
            source: None,
            mime_type: String::new(),
            language_hint: None,
            document_id: None,
            collection_id: None,
            user_id: None,
            priority: Priority::Normal,
            preferred_provider: None,
            fallback_allowed: true,
            metadata: HashMap::new(),
        }
    }
}

impl ExtractionRequest {
    pub fn from_url(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            source: Some(ImageSource::Url(url.into())),
            mime_type: mime_type.into(),
            ..Self::default()
        }
    }

    pub fn from_bytes(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            source: Some(ImageSource::Bytes(data)),
            mime_type: mime_type.into(),
            ..Self::default()
        }
    }

    pub fn for_document(
        mut self,
        collection_id: impl Into<String>,
        document_id: impl Into<String>,
    ) -> Self {
        self.collection_id = Some(collection_id.into());
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language_hint = Some(language.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_preferred_provider(mut self, provider: ProviderType) -> Self {
        self.preferred_provider = Some(provider);
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.fallback_allowed = false;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True when a non-empty URL or byte payload is present.
    pub fn has_source(&self) -> bool {
        self.source.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Size of an inline payload; URL sources are sized by the provider.
    pub fn inline_size(&self) -> Option<u64> {
        match &self.source {
            Some(ImageSource::Bytes(data)) => Some(data.len() as u64),
            _ => None,
        }
    }

    /// File name hint for multipart uploads.
    pub fn file_name(&self) -> String {
        if let Some(name) = self.metadata.get("fileName") {
            return name.clone();
        }
        let stem = self.document_id.as_deref().unwrap_or("document");
        match extension_for(&self.mime_type) {
            Some(ext) => format!("{}.{}", stem, ext),
            None => stem.to_string(),
        }
    }
}

fn extension_for(mime_type: &str) -> Option<&'static str> {
    match mime_type.to_ascii_lowercase().as_str() {
        "application/pdf" => Some("pdf"),
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/tiff" => Some("tiff"),
        "image/webp" => Some("webp"),
        "image/bmp" => Some("bmp"),
        "image/avif" => Some("avif"),
        _ => None,
    }
}

/// Outcome of one provider invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub extracted_text: Option<String>,
    pub confidence: Option<f64>,
    pub provider_used: ProviderType,
    pub processing_duration_ms: u64,
    pub detected_language: Option<String>,
    /// Set iff `success` is false.
    pub error_message: Option<String>,
    pub success: bool,
    pub document_id: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl ExtractionResult {
    pub fn success(
        provider: ProviderType,
        request: &ExtractionRequest,
        text: String,
        confidence: Option<f64>,
    ) -> Self {
        Self {
            extracted_text: Some(text),
            confidence: confidence.map(|c| c.clamp(0.0, 1.0)),
            provider_used: provider,
            processing_duration_ms: 0,
            detected_language: None,
            error_message: None,
            success: true,
            document_id: request.document_id.clone(),
            completed_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn failure(
        provider: ProviderType,
        request: &ExtractionRequest,
        message: impl Into<String>,
    ) -> Self {
        Self {
            extracted_text: None,
            confidence: None,
            provider_used: provider,
            processing_duration_ms: 0,
            detected_language: None,
            error_message: Some(message.into()),
            success: false,
            document_id: request.document_id.clone(),
            completed_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.detected_language = language;
        self
    }

    pub fn char_count(&self) -> usize {
        self.extracted_text
            .as_deref()
            .map(|t| t.chars().count())
            .unwrap_or(0)
    }

    pub fn word_count(&self) -> usize {
        self.extracted_text
            .as_deref()
            .map(|t| t.split_whitespace().count())
            .unwrap_or(0)
    }
}

/// Static description of a registered provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub provider: ProviderType,
    pub code: &'static str,
    pub display_name: &'static str,
    pub available: bool,
    pub enabled: bool,
    pub mime_types: Vec<&'static str>,
    pub languages: Vec<&'static str>,
    pub max_file_size_bytes: Option<u64>,
}
