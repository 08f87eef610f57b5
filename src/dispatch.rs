//! OCR dispatch: tier routing, quota gating, single-hop fallback and metering.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::OcrError;
use crate::metrics::MetricsSink;
use crate::ocr::{ExtractionRequest, ExtractionResult, OcrProvider, ProviderType};
use crate::quota::QuotaGate;
use crate::registry::ProviderRegistry;
use crate::tier::{normalize_tier, TierPolicy};

/// Metadata key naming the provider that failed before a fallback hop.
pub const FALLBACK_FROM: &str = "fallbackFrom";
pub const DISPATCH_ID: &str = "dispatchId";

/// Timing span for one provider invocation.
///
/// Created right before the call and consumed by [`ProviderSpan::finish`], so
/// each invoked provider is recorded exactly once.
struct ProviderSpan<'a> {
    metrics: &'a dyn MetricsSink,
    provider: ProviderType,
    started: Instant,
}

impl<'a> ProviderSpan<'a> {
    fn start(metrics: &'a dyn MetricsSink, provider: ProviderType) -> Self {
        metrics.record_request_start(provider);
        Self {
            metrics,
            provider,
            started: Instant::now(),
        }
    }

    fn finish(
        self,
        outcome: Result<ExtractionResult, OcrError>,
    ) -> Result<ExtractionResult, OcrError> {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match outcome {
            Ok(mut result) => {
                result.processing_duration_ms = elapsed_ms;
                if result.success {
                    self.metrics.record_success(&result);
                } else {
                    let message = result.error_message.as_deref().unwrap_or("no text extracted");
                    self.metrics.record_error(self.provider, elapsed_ms, message);
                }
                Ok(result)
            }
            Err(e) => {
                self.metrics
                    .record_error(self.provider, elapsed_ms, &e.to_string());
                Err(e)
            }
        }
    }
}

pub struct OcrDispatcher {
    registry: Arc<ProviderRegistry>,
    quota: Arc<QuotaGate>,
    metrics: Arc<dyn MetricsSink>,
    tiers: TierPolicy,
}

impl OcrDispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        quota: Arc<QuotaGate>,
        metrics: Arc<dyn MetricsSink>,
        tiers: TierPolicy,
    ) -> Self {
        Self {
            registry,
            quota,
            metrics,
            tiers,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }

    /// Run OCR for a user, choosing the provider from their tier.
    ///
    /// Returns a failed result when the provider (and any fallback) ran but
    /// produced nothing usable; returns `Err` when no provider could run or the
    /// last attempt raised an error.
    pub async fn process_ocr(
        &self,
        request: &ExtractionRequest,
        user_id: &str,
        tier: Option<&str>,
    ) -> Result<ExtractionResult, OcrError> {
        validate(request)?;
        let tier = normalize_tier(tier);
        self.check_quota(user_id, &tier).await?;

        let mapped = self.tiers.provider_for(Some(&tier));
        let primary = self.primary_provider(mapped)?;
        let dispatch_id = Uuid::new_v4();
        info!(
            %dispatch_id,
            user_id,
            tier = %tier,
            provider = %primary.provider_type(),
            document_id = request.document_id.as_deref().unwrap_or("-"),
            "Dispatching OCR request"
        );

        let outcome = self
            .run_with_fallback(primary, request, self.fallback_allowed(request))
            .await;
        self.settle(outcome, user_id, &tier, dispatch_id).await
    }

    /// Single-shot extraction on an explicit provider: no tier mapping, no fallback.
    pub async fn process_ocr_with_provider(
        &self,
        request: &ExtractionRequest,
        provider: ProviderType,
        user_id: &str,
        tier: Option<&str>,
    ) -> Result<ExtractionResult, OcrError> {
        validate(request)?;
        let tier = normalize_tier(tier);
        self.check_quota(user_id, &tier).await?;

        let provider = self.registry.get(provider)?;
        let dispatch_id = Uuid::new_v4();
        info!(
            %dispatch_id,
            user_id,
            provider = %provider.provider_type(),
            "Dispatching OCR request on explicit provider"
        );

        let outcome = self.invoke(provider.as_ref(), request).await;
        self.settle(outcome, user_id, &tier, dispatch_id).await
    }

    /// Tier-less dispatch for internal jobs. Not quota-gated.
    pub async fn process_request(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResult, OcrError> {
        validate(request)?;
        let primary = self.registry.resolve_for_request(request)?;
        info!(
            provider = %primary.provider_type(),
            document_id = request.document_id.as_deref().unwrap_or("-"),
            "Dispatching internal OCR request"
        );
        self.run_with_fallback(primary, request, self.fallback_allowed(request))
            .await
    }

    fn fallback_allowed(&self, request: &ExtractionRequest) -> bool {
        request.fallback_allowed && self.registry.routing().fallback_enabled
    }

    async fn check_quota(&self, user_id: &str, tier: &str) -> Result<(), OcrError> {
        if self.quota.has_remaining_quota(user_id, tier).await? {
            return Ok(());
        }
        warn!("OCR quota exhausted for user {} (tier {})", user_id, tier);
        Err(OcrError::QuotaExceeded {
            user_id: user_id.to_string(),
            tier: tier.to_string(),
        })
    }

    fn primary_provider(&self, mapped: ProviderType) -> Result<Arc<dyn OcrProvider>, OcrError> {
        if let Some(provider) = self.registry.get_optional(mapped) {
            return Ok(provider);
        }
        let default = self.registry.routing().default_provider;
        warn!(
            "Tier-mapped {} provider unavailable, using default {}",
            mapped, default
        );
        self.registry.get(default)
    }

    /// Invoke `primary`, then at most one fallback provider.
    async fn run_with_fallback(
        &self,
        primary: Arc<dyn OcrProvider>,
        request: &ExtractionRequest,
        allow_fallback: bool,
    ) -> Result<ExtractionResult, OcrError> {
        let primary_type = primary.provider_type();

        match self.invoke(primary.as_ref(), request).await {
            Ok(result) if result.success => Ok(result),
            Ok(failed) => {
                if !allow_fallback {
                    return Ok(failed);
                }
                match self.registry.fallback_for(primary_type) {
                    Some(fallback) => self.invoke_fallback(primary_type, fallback, request).await,
                    None => Ok(failed),
                }
            }
            Err(e) => {
                if !e.is_retryable() || !allow_fallback {
                    return Err(e);
                }
                match self.registry.fallback_for(primary_type) {
                    Some(fallback) => {
                        warn!("{} raised '{}', trying fallback", primary_type, e);
                        self.invoke_fallback(primary_type, fallback, request).await
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn invoke_fallback(
        &self,
        from: ProviderType,
        fallback: Arc<dyn OcrProvider>,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResult, OcrError> {
        let to = fallback.provider_type();
        info!("Falling back from {} to {}", from, to);
        self.metrics.record_fallback(from, to);

        let mut result = self.invoke(fallback.as_ref(), request).await?;
        result
            .metadata
            .insert(FALLBACK_FROM.to_string(), from.code().to_string());
        Ok(result)
    }

    async fn invoke(
        &self,
        provider: &dyn OcrProvider,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResult, OcrError> {
        let kind = provider.provider_type();
        let budget = provider.timeout();
        let span = ProviderSpan::start(self.metrics.as_ref(), kind);

        let outcome = match tokio::time::timeout(budget, provider.extract_text(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(OcrError::Timeout {
                provider: kind,
                after: budget,
            }),
        };
        span.finish(outcome)
    }

    /// Charge quota iff the final result succeeded.
    async fn settle(
        &self,
        outcome: Result<ExtractionResult, OcrError>,
        user_id: &str,
        tier: &str,
        dispatch_id: Uuid,
    ) -> Result<ExtractionResult, OcrError> {
        let mut result = outcome?;
        result
            .metadata
            .insert(DISPATCH_ID.to_string(), dispatch_id.to_string());

        if result.success {
            // The text is already extracted; a metering failure must not discard it.
            if let Err(e) = self
                .quota
                .consume_quota(user_id, tier, result.provider_used)
                .await
            {
                error!(
                    "Failed to record OCR usage for {} ({}): {}",
                    user_id, dispatch_id, e
                );
            }
        } else {
            info!(
                "OCR failed on {} for {}: {}",
                result.provider_used,
                user_id,
                result.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(result)
    }
}

fn validate(request: &ExtractionRequest) -> Result<(), OcrError> {
    if request.has_source() {
        Ok(())
    } else {
        Err(OcrError::InvalidRequest(
            "request needs an image URL or inline bytes".to_string(),
        ))
    }
}
