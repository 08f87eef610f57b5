//! Per-user monthly OCR quota.
//!
//! The gate is checked before dispatch and charged only after a successful
//! extraction. Check and charge are separate calls, so concurrent requests
//! for one user can overshoot the ceiling by the number in flight minus one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{OcrError, StoreError};
use crate::ocr::ProviderType;
use crate::tier::normalize_tier;

/// Counter identity: one row per user, tier and calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaKey {
    pub user_id: String,
    pub tier: String,
    /// `YYYY-MM` in UTC.
    pub period: String,
}

impl QuotaKey {
    pub fn current(user_id: &str, tier: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            tier: tier.to_string(),
            period: current_period(),
        }
    }
}

pub fn current_period() -> String {
    Utc::now().format("%Y-%m").to_string()
}

/// Storage for consumed-operation counters.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    async fn usage(&self, key: &QuotaKey) -> Result<u64, StoreError>;

    /// Atomically add one and return the new count.
    async fn increment(&self, key: &QuotaKey) -> Result<u64, StoreError>;
}

/// Monthly ceilings per tier. `None` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaLimits {
    pub per_tier: HashMap<String, Option<u64>>,
    /// Ceiling for tiers missing from `per_tier`.
    pub default_limit: Option<u64>,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        let per_tier = [
            ("free", Some(50)),
            ("trial", Some(100)),
            ("starter", Some(500)),
            ("pro", Some(2_000)),
            ("business", Some(10_000)),
            ("enterprise", None),
        ]
        .into_iter()
        .map(|(tier, limit)| (tier.to_string(), limit))
        .collect();

        Self {
            per_tier,
            default_limit: Some(50),
        }
    }
}

impl QuotaLimits {
    pub fn limit_for(&self, tier: &str) -> Option<u64> {
        self.per_tier
            .get(tier)
            .copied()
            .unwrap_or(self.default_limit)
    }
}

pub struct QuotaGate {
    ledger: Arc<dyn QuotaLedger>,
    limits: QuotaLimits,
}

impl QuotaGate {
    pub fn new(ledger: Arc<dyn QuotaLedger>, limits: QuotaLimits) -> Self {
        Self { ledger, limits }
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    pub async fn has_remaining_quota(&self, user_id: &str, tier: &str) -> Result<bool, OcrError> {
        Ok(self
            .remaining_quota(user_id, tier)
            .await?
            .map_or(true, |left| left > 0))
    }

    /// Operations left this period; `None` for unlimited tiers.
    pub async fn remaining_quota(&self, user_id: &str, tier: &str) -> Result<Option<u64>, OcrError> {
        let tier = normalize_tier(Some(tier));
        let Some(limit) = self.limits.limit_for(&tier) else {
            return Ok(None);
        };
        let used = self.ledger.usage(&QuotaKey::current(user_id, &tier)).await?;
        debug!("Quota for {} ({}): {}/{}", user_id, tier, used, limit);
        Ok(Some(limit.saturating_sub(used)))
    }

    /// Charge one operation. Unlimited tiers are still counted.
    pub async fn consume_quota(
        &self,
        user_id: &str,
        tier: &str,
        provider_used: ProviderType,
    ) -> Result<u64, OcrError> {
        let tier = normalize_tier(Some(tier));
        let used = self
            .ledger
            .increment(&QuotaKey::current(user_id, &tier))
            .await?;
        info!(
            user_id,
            tier = %tier,
            provider = %provider_used,
            used,
            "OCR quota consumed"
        );
        Ok(used)
    }
}

/// Process-local ledger.
#[derive(Debug, Default)]
pub struct InMemoryQuotaLedger {
    counts: Mutex<HashMap<QuotaKey, u64>>,
}

impl InMemoryQuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a counter, e.g. when restoring from a billing export.
    pub fn set_usage(&self, key: QuotaKey, used: u64) {
        self.counts.lock().insert(key, used);
    }
}

#[async_trait]
impl QuotaLedger for InMemoryQuotaLedger {
    async fn usage(&self, key: &QuotaKey) -> Result<u64, StoreError> {
        Ok(self.counts.lock().get(key).copied().unwrap_or(0))
    }

    async fn increment(&self, key: &QuotaKey) -> Result<u64, StoreError> {
        let mut counts = self.counts.lock();
        let count = counts.entry(key.clone()).or_insert(0);
        *count += 1;
        Ok(*count)
    }
}
