//! Modular OCR provider abstraction.
//!
//! Defines the [`OcrProvider`] trait and the request/result types so different
//! OCR backends (Docling sidecar, Mistral OCR) can be swapped by the registry.

pub mod docling;
pub mod mistral;
mod types;

use std::time::Duration;

pub use types::{
    ExtractionRequest, ExtractionResult, ImageSource, Priority, ProviderDescriptor, ProviderType,
};

use crate::error::OcrError;

/// Async trait implemented by each OCR backend.
///
/// Routine failures (unreadable image, unsupported type, no text) come back as
/// a failed [`ExtractionResult`]. `Err` is reserved for malformed requests and
/// infrastructure failures; see [`OcrError::is_retryable`].
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    async fn extract_text(&self, request: &ExtractionRequest) -> Result<ExtractionResult, OcrError>;

    fn supported_mime_types(&self) -> &'static [&'static str];

    fn supported_languages(&self) -> &'static [&'static str];

    /// Configuration/health check. Missing credentials or endpoint means false.
    fn is_available(&self) -> bool;

    /// `None` means unbounded.
    fn max_file_size_bytes(&self) -> Option<u64>;

    /// Upper bound for a single `extract_text` call.
    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Case-insensitive exact match against the allow-list.
    fn supports(&self, mime_type: &str) -> bool {
        let mime_type = mime_type.trim();
        self.supported_mime_types()
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mime_type))
    }

    fn descriptor(&self, enabled: bool) -> ProviderDescriptor {
        let provider = self.provider_type();
        ProviderDescriptor {
            provider,
            code: provider.code(),
            display_name: provider.display_name(),
            available: self.is_available(),
            enabled,
            mime_types: self.supported_mime_types().to_vec(),
            languages: self.supported_languages().to_vec(),
            max_file_size_bytes: self.max_file_size_bytes(),
        }
    }
}

/// Checks every provider runs before touching its backend.
///
/// Returns `Err` for a request with no source, `Ok(Some(failed))` for routine
/// rejections and `Ok(None)` when the request may proceed.
pub(crate) fn preflight(
    provider: &dyn OcrProvider,
    request: &ExtractionRequest,
) -> Result<Option<ExtractionResult>, OcrError> {
    let kind = provider.provider_type();
    if !request.has_source() {
        return Err(OcrError::defect(kind, "request has no image source"));
    }
    if !provider.supports(&request.mime_type) {
        return Ok(Some(ExtractionResult::failure(
            kind,
            request,
            format!("unsupported MIME type '{}'", request.mime_type),
        )));
    }
    if let (Some(limit), Some(size)) = (provider.max_file_size_bytes(), request.inline_size()) {
        if size > limit {
            return Ok(Some(ExtractionResult::failure(
                kind,
                request,
                format!("payload of {} bytes exceeds the {} byte limit", size, limit),
            )));
        }
    }
    Ok(None)
}

/// Statuses worth retrying on another provider.
pub(crate) fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
}

/// Split a backend response into usable, rejected (`Ok(Err(message))`) or
/// transient failure (`Err`).
pub(crate) async fn check_response(
    provider: ProviderType,
    resp: reqwest::Response,
    what: &str,
) -> Result<Result<reqwest::Response, String>, OcrError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(Ok(resp));
    }
    let text = resp.text().await.unwrap_or_default();
    let message = format!("{} error ({}): {}", what, status, text);
    if is_transient_status(status) {
        Err(OcrError::transient(provider, message))
    } else {
        Ok(Err(message))
    }
}
