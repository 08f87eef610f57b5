//! Docling sidecar OCR provider (the LOCAL family).

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use super::{check_response, preflight, ExtractionRequest, ExtractionResult, ImageSource, OcrProvider, ProviderType};
use crate::config::LocalProviderConfig;
use crate::error::OcrError;

const KIND: ProviderType = ProviderType::Local;

const MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/tiff",
    "image/bmp",
];

const LANGUAGES: &[&str] = &["eng", "deu", "fra", "spa", "por", "ita", "nld"];

/// Docling sidecar response (private deserialization types).
#[derive(Debug, Deserialize)]
struct DoclingResponse {
    markdown: String,
    #[serde(default)]
    total_pages: Option<u32>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    metadata: serde_json::Value,
}

pub struct DoclingProvider {
    url: Option<String>,
    client: Client,
    timeout: Duration,
}

impl DoclingProvider {
    pub fn new(client: Client, config: &LocalProviderConfig) -> Self {
        Self {
            url: config
                .url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            client,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Fetch a URL source; the sidecar only accepts multipart uploads.
    async fn download(
        &self,
        url: &str,
        request: &ExtractionRequest,
    ) -> Result<Result<Vec<u8>, ExtractionResult>, OcrError> {
        info!("DoclingProvider: downloading {} for sidecar", url);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| OcrError::transient(KIND, format!("download failed: {}", e)))?;
        let resp = match check_response(KIND, resp, "Document download").await? {
            Ok(resp) => resp,
            Err(message) => return Ok(Err(ExtractionResult::failure(KIND, request, message))),
        };
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| OcrError::transient(KIND, format!("download interrupted: {}", e)))?;
        Ok(Ok(bytes.to_vec()))
    }
}

#[async_trait::async_trait]
impl OcrProvider for DoclingProvider {
    fn provider_type(&self) -> ProviderType {
        KIND
    }

    async fn extract_text(&self, request: &ExtractionRequest) -> Result<ExtractionResult, OcrError> {
        if let Some(rejected) = preflight(self, request)? {
            return Ok(rejected);
        }
        let base_url = self
            .url
            .as_deref()
            .ok_or_else(|| OcrError::defect(KIND, "Docling sidecar URL is not configured"))?;

        let data = match &request.source {
            Some(ImageSource::Bytes(data)) => data.clone(),
            Some(ImageSource::Url(url)) => match self.download(url, request).await? {
                Ok(data) => data,
                Err(failed) => return Ok(failed),
            },
            None => return Err(OcrError::defect(KIND, "request has no image source")),
        };

        let part = Part::bytes(data)
            .file_name(request.file_name())
            .mime_str(&request.mime_type)
            .map_err(|e| OcrError::defect(KIND, format!("invalid MIME type: {}", e)))?;

        let mut form = Form::new().part("file", part);
        if let Some(lang) = &request.language_hint {
            form = form.text("lang", lang.clone());
        }

        let response = self
            .client
            .post(format!("{}/convert", base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| OcrError::transient(KIND, format!("sidecar request failed: {}", e)))?;

        let response = match check_response(KIND, response, "Docling sidecar").await? {
            Ok(resp) => resp,
            Err(message) => return Ok(ExtractionResult::failure(KIND, request, message)),
        };

        let docling: DoclingResponse = response
            .json()
            .await
            .map_err(|e| OcrError::transient(KIND, format!("undecodable sidecar response: {}", e)))?;

        Ok(into_result(docling, request))
    }

    fn supported_mime_types(&self) -> &'static [&'static str] {
        MIME_TYPES
    }

    fn supported_languages(&self) -> &'static [&'static str] {
        LANGUAGES
    }

    fn is_available(&self) -> bool {
        self.url.is_some()
    }

    fn max_file_size_bytes(&self) -> Option<u64> {
        None
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn into_result(docling: DoclingResponse, request: &ExtractionRequest) -> ExtractionResult {
    let text = docling.markdown.trim();
    if text.is_empty() {
        return ExtractionResult::failure(KIND, request, "no text detected in document");
    }

    let language = docling
        .metadata
        .get("language")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let mut result = ExtractionResult::success(KIND, request, text.to_string(), docling.confidence)
        .with_language(language);
    if let Some(pages) = docling.total_pages {
        result
            .metadata
            .insert("pageCount".to_string(), pages.to_string());
    }
    result
}
