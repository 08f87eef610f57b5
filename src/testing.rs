//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::collection::{Collection, CollectionDocument, OcrRecord};
use crate::entitlement::EntitlementLookup;
use crate::error::OcrError;
use crate::indexing::IndexingNotifier;
use crate::metrics::MetricsSink;
use crate::ocr::{preflight, ExtractionRequest, ExtractionResult, OcrProvider, ProviderType};

#[derive(Debug, Clone)]
enum Script {
    Succeed(String),
    Fail(String),
    Error { retryable: bool },
    Hang,
}

/// Provider whose every call follows a fixed script.
pub struct ScriptedProvider {
    kind: ProviderType,
    script: Script,
    available: bool,
    max_size: Option<u64>,
    timeout: Duration,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderType) -> Self {
        Self {
            kind,
            script: Script::Succeed(format!("{} text", kind)),
            available: true,
            max_size: None,
            timeout: Duration::from_secs(60),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(mut self, text: &str) -> Self {
        self.script = Script::Succeed(text.to_string());
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.script = Script::Fail(message.to_string());
        self
    }

    pub fn erroring(mut self, retryable: bool) -> Self {
        self.script = Script::Error { retryable };
        self
    }

    pub fn hanging(mut self) -> Self {
        self.script = Script::Hang;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sleep before answering so concurrent calls interleave.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrProvider for ScriptedProvider {
    fn provider_type(&self) -> ProviderType {
        self.kind
    }

    async fn extract_text(&self, request: &ExtractionRequest) -> Result<ExtractionResult, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(rejected) = preflight(self, request)? {
            return Ok(rejected);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            Script::Succeed(text) => Ok(ExtractionResult::success(
                self.kind,
                request,
                text.clone(),
                Some(0.9),
            )),
            Script::Fail(message) => Ok(ExtractionResult::failure(self.kind, request, message.clone())),
            Script::Error { retryable: true } => Err(OcrError::transient(self.kind, "connection reset")),
            Script::Error { retryable: false } => Err(OcrError::defect(self.kind, "malformed request")),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ExtractionResult::failure(self.kind, request, "woke up"))
            }
        }
    }

    fn supported_mime_types(&self) -> &'static [&'static str] {
        &["application/pdf", "image/png", "image/jpeg", "image/tiff"]
    }

    fn supported_languages(&self) -> &'static [&'static str] {
        &["eng"]
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn max_file_size_bytes(&self) -> Option<u64> {
        self.max_size
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    Start(ProviderType),
    Success(ProviderType),
    Error(ProviderType),
    Fallback(ProviderType, ProviderType),
}

/// Metrics sink that keeps the ordered event log.
#[derive(Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetrics {
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_request_start(&self, provider: ProviderType) {
        self.events.lock().push(MetricEvent::Start(provider));
    }

    fn record_success(&self, result: &ExtractionResult) {
        self.events.lock().push(MetricEvent::Success(result.provider_used));
    }

    fn record_error(&self, provider: ProviderType, _duration_ms: u64, _message: &str) {
        self.events.lock().push(MetricEvent::Error(provider));
    }

    fn record_fallback(&self, from: ProviderType, to: ProviderType) {
        self.events.lock().push(MetricEvent::Fallback(from, to));
    }
}

/// Notifier that records document ids and optionally fails.
#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    notified: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn notified(&self) -> Vec<String> {
        self.notified.lock().clone()
    }
}

#[async_trait]
impl IndexingNotifier for RecordingNotifier {
    async fn notify_document_indexed(
        &self,
        _collection: &Collection,
        document: &CollectionDocument,
        _record: &OcrRecord,
    ) -> anyhow::Result<()> {
        self.notified.lock().push(document.id.clone());
        if self.fail {
            anyhow::bail!("search cluster unreachable");
        }
        Ok(())
    }
}

/// Entitlement service that is always down.
pub struct BrokenEntitlements;

#[async_trait]
impl EntitlementLookup for BrokenEntitlements {
    async fn tier_for_user(&self, _user_id: &str) -> anyhow::Result<Option<String>> {
        anyhow::bail!("entitlement service timed out")
    }
}
