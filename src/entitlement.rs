//! Entitlement tier lookup.

use std::collections::HashMap;

use async_trait::async_trait;

/// Resolves a user's subscription tier. `Ok(None)` means no tier on record.
#[async_trait]
pub trait EntitlementLookup: Send + Sync {
    async fn tier_for_user(&self, user_id: &str) -> anyhow::Result<Option<String>>;
}

/// Fixed user → tier table, for local runs without an entitlement backend.
#[derive(Debug, Clone, Default)]
pub struct StaticEntitlements {
    tiers: HashMap<String, String>,
}

impl StaticEntitlements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tier(mut self, user_id: impl Into<String>, tier: impl Into<String>) -> Self {
        self.tiers.insert(user_id.into(), tier.into());
        self
    }
}

#[async_trait]
impl EntitlementLookup for StaticEntitlements {
    async fn tier_for_user(&self, user_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.tiers.get(user_id).cloned())
    }
}
