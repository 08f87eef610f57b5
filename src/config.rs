//! Worker configuration.
//!
//! Settings come from an optional JSON file named by `OCR_CONFIG`, then
//! environment variables override individual fields.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ocr::ProviderType;
use crate::quota::QuotaLimits;
use crate::registry::RoutingConfig;
use crate::tier::TierPolicy;

/// Docling sidecar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalProviderConfig {
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 300,
        }
    }
}

/// Mistral OCR settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudProviderConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for CloudProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.mistral.ai/v1".to_string(),
            model: "mistral-ocr-latest".to_string(),
            timeout_secs: 120,
        }
    }
}

impl std::fmt::Debug for CloudProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    pub url: String,
    #[serde(skip_serializing)]
    pub service_role_key: String,
    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_schema() -> String {
    "public".to_string()
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub routing: RoutingConfig,
    pub tiers: TierPolicy,
    pub quota: QuotaLimits,
    pub local: LocalProviderConfig,
    pub cloud: CloudProviderConfig,
    pub indexing_webhook_url: Option<String>,
    pub supabase: Option<SupabaseConfig>,
    pub bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            routing: RoutingConfig::default(),
            tiers: TierPolicy::default(),
            quota: QuotaLimits::default(),
            local: LocalProviderConfig::default(),
            cloud: CloudProviderConfig::default(),
            indexing_webhook_url: None,
            supabase: None,
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Settings {
    /// Load from `OCR_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self> {
        let mut settings = match std::env::var("OCR_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::load_from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let settings: Settings = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {:?}", path))?;
        info!("Loaded OCR settings from {:?}", path);
        Ok(settings)
    }

    /// Override fields from environment-style lookups. Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(url) = var("DOCLING_URL") {
            self.local.url = Some(url);
        }
        if let Some(key) = var("MISTRAL_API_KEY") {
            self.cloud.api_key = Some(key);
        }
        if let Some(value) = var("OCR_DEFAULT_PROVIDER") {
            self.routing.default_provider = parse_provider("OCR_DEFAULT_PROVIDER", &value)?;
        }
        if let Some(value) = var("OCR_FALLBACK_PROVIDER") {
            self.routing.fallback_provider = parse_provider("OCR_FALLBACK_PROVIDER", &value)?;
        }
        if let Some(value) = var("OCR_FALLBACK_ENABLED") {
            self.routing.fallback_enabled = parse_bool("OCR_FALLBACK_ENABLED", &value)?;
        }
        if let Some(value) = var("OCR_ENABLED_PROVIDERS") {
            self.routing.enabled = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_provider("OCR_ENABLED_PROVIDERS", s))
                .collect::<Result<_>>()?;
        }
        if let Some(url) = var("INDEXING_WEBHOOK_URL") {
            self.indexing_webhook_url = Some(url);
        }
        match (var("SUPABASE_URL"), var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => {
                let schema = self
                    .supabase
                    .as_ref()
                    .map_or_else(default_schema, |s| s.schema.clone());
                self.supabase = Some(SupabaseConfig {
                    url,
                    service_role_key,
                    schema,
                });
            }
            (None, None) => {}
            _ => bail!("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set together"),
        }
        if let Some(addr) = var("BIND_ADDR") {
            self.bind_addr = addr;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.routing.enabled.is_empty() {
            bail!("at least one OCR provider must be enabled");
        }
        if !self.routing.enabled.contains(&self.routing.default_provider) {
            bail!(
                "default provider {} is not in the enabled set",
                self.routing.default_provider
            );
        }
        if self.local.timeout_secs == 0 || self.cloud.timeout_secs == 0 {
            bail!("provider timeouts must be positive");
        }
        Ok(())
    }
}

fn parse_provider(key: &str, value: &str) -> Result<ProviderType> {
    ProviderType::parse(value)
        .with_context(|| format!("{}: unknown OCR provider '{}'", key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{}: expected a boolean, got '{}'", key, value),
    }
}
