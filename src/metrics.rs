//! Per-provider OCR telemetry.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::ocr::{ExtractionResult, ProviderType};

/// Fire-and-forget sink; implementations must never fail or block for long.
pub trait MetricsSink: Send + Sync {
    fn record_request_start(&self, provider: ProviderType);
    fn record_success(&self, result: &ExtractionResult);
    fn record_error(&self, provider: ProviderType, duration_ms: u64, message: &str);
    fn record_fallback(&self, from: ProviderType, to: ProviderType);
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub total_duration_ms: u64,
    pub average_duration_ms: Option<u64>,
    pub characters_extracted: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackCount {
    pub from: ProviderType,
    pub to: ProviderType,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub providers: BTreeMap<ProviderType, ProviderStats>,
    pub fallbacks: Vec<FallbackCount>,
}

impl MetricsSnapshot {
    pub fn stats(&self, provider: ProviderType) -> ProviderStats {
        self.providers.get(&provider).cloned().unwrap_or_default()
    }

    pub fn fallback_count(&self, from: ProviderType, to: ProviderType) -> u64 {
        self.fallbacks
            .iter()
            .find(|f| f.from == from && f.to == to)
            .map_or(0, |f| f.count)
    }
}

#[derive(Default)]
struct MetricsState {
    providers: HashMap<ProviderType, ProviderStats>,
    fallbacks: HashMap<(ProviderType, ProviderType), u64>,
}

/// In-process counters, exposed through [`OcrMetrics::snapshot`].
#[derive(Default)]
pub struct OcrMetrics {
    state: Mutex<MetricsState>,
}

impl OcrMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        let providers = state
            .providers
            .iter()
            .map(|(kind, stats)| {
                let mut stats = stats.clone();
                let finished = stats.successes + stats.errors;
                stats.average_duration_ms = (finished > 0).then(|| stats.total_duration_ms / finished);
                (*kind, stats)
            })
            .collect();
        let mut fallbacks: Vec<FallbackCount> = state
            .fallbacks
            .iter()
            .map(|(&(from, to), &count)| FallbackCount { from, to, count })
            .collect();
        fallbacks.sort_by_key(|f| (f.from, f.to));
        MetricsSnapshot {
            providers,
            fallbacks,
        }
    }
}

impl MetricsSink for OcrMetrics {
    fn record_request_start(&self, provider: ProviderType) {
        self.state
            .lock()
            .providers
            .entry(provider)
            .or_default()
            .requests += 1;
    }

    fn record_success(&self, result: &ExtractionResult) {
        let mut state = self.state.lock();
        let stats = state.providers.entry(result.provider_used).or_default();
        stats.successes += 1;
        stats.total_duration_ms += result.processing_duration_ms;
        stats.characters_extracted += result.char_count() as u64;
        debug!(
            "OCR success on {} in {}ms ({} chars)",
            result.provider_used,
            result.processing_duration_ms,
            result.char_count()
        );
    }

    fn record_error(&self, provider: ProviderType, duration_ms: u64, message: &str) {
        let mut state = self.state.lock();
        let stats = state.providers.entry(provider).or_default();
        stats.errors += 1;
        stats.total_duration_ms += duration_ms;
        stats.last_error = Some(message.to_string());
        debug!("OCR error on {} after {}ms: {}", provider, duration_ms, message);
    }

    fn record_fallback(&self, from: ProviderType, to: ProviderType) {
        *self.state.lock().fallbacks.entry((from, to)).or_insert(0) += 1;
    }
}
