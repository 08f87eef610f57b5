//! Provider registry: maps provider types to provider instances.
//!
//! Built once at startup from the configured providers and then shared
//! read-only behind an `Arc`. Lookups check enablement, registration and the
//! provider's own availability.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::OcrError;
use crate::ocr::{ExtractionRequest, OcrProvider, ProviderDescriptor, ProviderType};

/// Global routing switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub enabled: Vec<ProviderType>,
    /// Used when the tier-mapped provider is unavailable and for tier-less requests.
    pub default_provider: ProviderType,
    /// First choice when a provider fails.
    pub fallback_provider: ProviderType,
    pub fallback_enabled: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: ProviderType::ALL.to_vec(),
            default_provider: ProviderType::Local,
            fallback_provider: ProviderType::Cloud,
            fallback_enabled: true,
        }
    }
}

/// Registry of OCR providers keyed by type.
pub struct ProviderRegistry {
    providers: HashMap<ProviderType, Arc<dyn OcrProvider>>,
    routing: RoutingConfig,
}

impl ProviderRegistry {
    pub fn new(routing: RoutingConfig) -> Self {
        Self {
            providers: HashMap::new(),
            routing,
        }
    }

    /// Register a provider. Fails if its type is already taken.
    pub fn register(&mut self, provider: Arc<dyn OcrProvider>) -> anyhow::Result<()> {
        let kind = provider.provider_type();
        if self.providers.contains_key(&kind) {
            bail!("{} provider registered twice", kind);
        }
        debug!(
            "Registered {} provider (available={})",
            kind,
            provider.is_available()
        );
        self.providers.insert(kind, provider);
        Ok(())
    }

    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    pub fn is_enabled(&self, kind: ProviderType) -> bool {
        self.routing.enabled.contains(&kind)
    }

    /// Look up a usable provider or explain why it cannot be used.
    pub fn get(&self, kind: ProviderType) -> Result<Arc<dyn OcrProvider>, OcrError> {
        if !self.is_enabled(kind) {
            return Err(OcrError::ProviderUnavailable(format!(
                "{} provider is disabled",
                kind
            )));
        }
        let provider = self.providers.get(&kind).ok_or_else(|| {
            OcrError::ProviderUnavailable(format!("{} provider is not configured", kind))
        })?;
        if !provider.is_available() {
            return Err(OcrError::ProviderUnavailable(format!(
                "{} provider is not available",
                kind
            )));
        }
        Ok(Arc::clone(provider))
    }

    pub fn get_optional(&self, kind: ProviderType) -> Option<Arc<dyn OcrProvider>> {
        self.get(kind).ok()
    }

    /// First usable provider among `candidates`, in order.
    pub fn get_with_fallback(
        &self,
        candidates: &[ProviderType],
    ) -> Result<Arc<dyn OcrProvider>, OcrError> {
        for (i, kind) in candidates.iter().enumerate() {
            match self.get(*kind) {
                Ok(provider) => return Ok(provider),
                Err(e) if i + 1 < candidates.len() => debug!("Skipping candidate: {}", e),
                Err(_) => {}
            }
        }
        let tried: Vec<&str> = candidates.iter().map(|k| k.code()).collect();
        Err(OcrError::ProviderUnavailable(format!(
            "none of [{}] is available",
            tried.join(", ")
        )))
    }

    /// Pick a provider from the request's preference or the configured default.
    pub fn resolve_for_request(
        &self,
        request: &ExtractionRequest,
    ) -> Result<Arc<dyn OcrProvider>, OcrError> {
        let allow_fallback = request.fallback_allowed && self.routing.fallback_enabled;
        let primary = request
            .preferred_provider
            .unwrap_or(self.routing.default_provider);

        if allow_fallback {
            self.get_with_fallback(&[primary, self.routing.fallback_provider])
        } else {
            self.get(primary)
        }
    }

    /// Single-hop fallback target after `failed` produced a failure.
    ///
    /// The configured fallback type, or the other family when the configured
    /// one is the provider that just failed.
    pub fn fallback_for(&self, failed: ProviderType) -> Option<Arc<dyn OcrProvider>> {
        let candidate = if self.routing.fallback_provider == failed {
            failed.other()
        } else {
            self.routing.fallback_provider
        };
        match self.get(candidate) {
            Ok(provider) => Some(provider),
            Err(e) => {
                warn!("No fallback after {} failure: {}", failed, e);
                None
            }
        }
    }

    pub fn available_providers(&self) -> Vec<ProviderType> {
        ProviderType::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_ok())
            .collect()
    }

    /// Descriptors for every registered provider, ordered by type.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut descriptors: Vec<ProviderDescriptor> = self
            .providers
            .values()
            .map(|p| p.descriptor(self.is_enabled(p.provider_type())))
            .collect();
        descriptors.sort_by_key(|d| d.provider);
        descriptors
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
