//! Mistral OCR provider (the CLOUD family, uses Mistral's OCR API).

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{check_response, preflight, ExtractionRequest, ExtractionResult, ImageSource, OcrProvider, ProviderType};
use crate::config::CloudProviderConfig;
use crate::error::OcrError;

const KIND: ProviderType = ProviderType::Cloud;

const MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "image/avif",
];

const LANGUAGES: &[&str] = &[
    "eng", "deu", "fra", "spa", "por", "ita", "nld", "pol", "ces", "swe", "dan", "nor", "fin",
    "rus", "ukr", "tur", "ara", "hin", "jpn", "kor", "zho",
];

const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

pub struct MistralOcrProvider {
    api_key: Option<String>,
    base_url: String,
    model: String,
    client: Client,
    timeout: Duration,
}

impl MistralOcrProvider {
    pub fn new(client: Client, config: &CloudProviderConfig) -> Self {
        Self {
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

// ── Mistral API request/response types ──────────────────────────────────────

#[derive(Serialize)]
struct OcrRequest {
    model: String,
    document: DocumentSource,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum DocumentSource {
    #[serde(rename = "document_url")]
    DocumentUrl { document_url: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: String },
    #[serde(rename = "file")]
    File { file_id: String },
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<MistralPage>,
}

#[derive(Deserialize)]
struct MistralPage {
    markdown: String,
}

#[derive(Deserialize)]
struct FileUploadResponse {
    id: String,
}

fn is_pdf(mime_type: &str) -> bool {
    mime_type.trim().eq_ignore_ascii_case("application/pdf")
}

// ── Provider implementation ─────────────────────────────────────────────────

#[async_trait::async_trait]
impl OcrProvider for MistralOcrProvider {
    fn provider_type(&self) -> ProviderType {
        KIND
    }

    async fn extract_text(&self, request: &ExtractionRequest) -> Result<ExtractionResult, OcrError> {
        if let Some(rejected) = preflight(self, request)? {
            return Ok(rejected);
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| OcrError::defect(KIND, "MISTRAL_API_KEY not set"))?;

        let document = match &request.source {
            Some(ImageSource::Url(url)) if is_pdf(&request.mime_type) => DocumentSource::DocumentUrl {
                document_url: url.clone(),
            },
            Some(ImageSource::Url(url)) => DocumentSource::ImageUrl {
                image_url: url.clone(),
            },
            Some(ImageSource::Bytes(data)) if is_pdf(&request.mime_type) => {
                match self.upload_file(api_key, request, data).await? {
                    Ok(file_id) => DocumentSource::File { file_id },
                    Err(message) => return Ok(ExtractionResult::failure(KIND, request, message)),
                }
            }
            Some(ImageSource::Bytes(data)) => DocumentSource::ImageUrl {
                image_url: format!("data:{};base64,{}", request.mime_type, BASE64.encode(data)),
            },
            None => return Err(OcrError::defect(KIND, "request has no image source")),
        };

        let body = OcrRequest {
            model: self.model.clone(),
            document,
        };

        info!("MistralOcrProvider: calling OCR API");

        let resp = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OcrError::transient(KIND, format!("OCR API request failed: {}", e)))?;

        let resp = match check_response(KIND, resp, "Mistral OCR API").await? {
            Ok(resp) => resp,
            Err(message) => return Ok(ExtractionResult::failure(KIND, request, message)),
        };

        let raw_text = resp
            .text()
            .await
            .map_err(|e| OcrError::transient(KIND, format!("OCR API response interrupted: {}", e)))?;
        debug!(
            "MistralOcrProvider: raw response ({} bytes): {}",
            raw_text.len(),
            raw_text.chars().take(500).collect::<String>()
        );
        let ocr: OcrResponse = serde_json::from_str(&raw_text)
            .map_err(|e| OcrError::transient(KIND, format!("undecodable OCR API response: {}", e)))?;

        Ok(into_result(ocr, &self.model, request))
    }

    fn supported_mime_types(&self) -> &'static [&'static str] {
        MIME_TYPES
    }

    fn supported_languages(&self) -> &'static [&'static str] {
        LANGUAGES
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn max_file_size_bytes(&self) -> Option<u64> {
        Some(MAX_FILE_SIZE)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl MistralOcrProvider {
    /// Upload raw PDF bytes to Mistral Files API, return the file_id.
    ///
    /// `Ok(Err(message))` when the API rejects the file.
    async fn upload_file(
        &self,
        api_key: &str,
        request: &ExtractionRequest,
        data: &[u8],
    ) -> Result<Result<String, String>, OcrError> {
        let filename = request.file_name();
        info!(
            "MistralOcrProvider: uploading {} ({} bytes) to Files API",
            filename,
            data.len()
        );

        let part = Part::bytes(data.to_vec())
            .file_name(filename)
            .mime_str("application/pdf")
            .map_err(|e| OcrError::defect(KIND, format!("invalid upload part: {}", e)))?;

        let form = Form::new().part("file", part).text("purpose", "ocr");

        let resp = self
            .client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| OcrError::transient(KIND, format!("Files API request failed: {}", e)))?;

        let resp = match check_response(KIND, resp, "Mistral Files API").await? {
            Ok(resp) => resp,
            Err(message) => return Ok(Err(message)),
        };

        let upload: FileUploadResponse = resp
            .json()
            .await
            .map_err(|e| OcrError::transient(KIND, format!("undecodable Files API response: {}", e)))?;
        info!("MistralOcrProvider: uploaded file_id={}", upload.id);
        Ok(Ok(upload.id))
    }
}

fn into_result(ocr: OcrResponse, model: &str, request: &ExtractionRequest) -> ExtractionResult {
    let total_pages = ocr.pages.len();

    // Build full markdown by concatenating per-page markdown
    let markdown = ocr
        .pages
        .iter()
        .map(|p| p.markdown.trim())
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    if markdown.is_empty() {
        return ExtractionResult::failure(KIND, request, "no text detected in document");
    }

    let mut result = ExtractionResult::success(KIND, request, markdown, None);
    result
        .metadata
        .insert("pageCount".to_string(), total_pages.to_string());
    result.metadata.insert("model".to_string(), model.to_string());
    result
}
