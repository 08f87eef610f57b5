//! Entitlement tier → provider routing table.

use serde::{Deserialize, Serialize};

use crate::ocr::ProviderType;

pub const FREE_TIER: &str = "free";

/// Lowercased, trimmed tier name; missing or blank tiers are treated as free.
pub fn normalize_tier(tier: Option<&str>) -> String {
    match tier.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_ascii_lowercase(),
        _ => FREE_TIER.to_string(),
    }
}

/// One row of the routing table.
///
/// A pattern is an exact tier name or a prefix ending in `*` (e.g. `trial*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRoute {
    pub tiers: Vec<String>,
    pub provider: ProviderType,
}

impl TierRoute {
    fn matches(&self, tier: &str) -> bool {
        self.tiers.iter().any(|pattern| {
            let pattern = pattern.trim().to_ascii_lowercase();
            match pattern.strip_suffix('*') {
                Some(prefix) => tier.starts_with(prefix),
                None => pattern == tier,
            }
        })
    }
}

/// Ordered routing table; the first matching route wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPolicy {
    pub routes: Vec<TierRoute>,
    /// Provider for tiers no route matches.
    pub default_provider: ProviderType,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            routes: vec![TierRoute {
                tiers: vec!["free".to_string(), "trial".to_string()],
                provider: ProviderType::Local,
            }],
            default_provider: ProviderType::Cloud,
        }
    }
}

impl TierPolicy {
    pub fn provider_for(&self, tier: Option<&str>) -> ProviderType {
        let tier = normalize_tier(tier);
        self.routes
            .iter()
            .find(|route| route.matches(&tier))
            .map(|route| route.provider)
            .unwrap_or(self.default_provider)
    }
}
