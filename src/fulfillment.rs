//! Per-document OCR fulfillment for collections.
//!
//! Drives one document's OCR record from PENDING (or FAILED) to a terminal
//! status, persists it and refreshes the owning collection's aggregate status.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::collection::{CollectionStatus, OcrStatus};
use crate::dispatch::OcrDispatcher;
use crate::entitlement::EntitlementLookup;
use crate::error::FulfillError;
use crate::indexing::IndexingNotifier;
use crate::ocr::{ExtractionRequest, ProviderType};
use crate::store::CollectionStore;
use crate::tier::FREE_TIER;

/// What a single `fulfill` call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FulfillOutcome {
    /// Record was already COMPLETED; nothing ran.
    AlreadyCompleted {
        #[serde(rename = "collectionStatus")]
        collection_status: CollectionStatus,
    },
    Completed {
        provider: ProviderType,
        characters: usize,
        #[serde(rename = "collectionStatus")]
        collection_status: CollectionStatus,
    },
    Failed {
        error: String,
        #[serde(rename = "collectionStatus")]
        collection_status: CollectionStatus,
    },
}

impl FulfillOutcome {
    pub fn collection_status(&self) -> CollectionStatus {
        match self {
            Self::AlreadyCompleted { collection_status }
            | Self::Completed { collection_status, .. }
            | Self::Failed { collection_status, .. } => *collection_status,
        }
    }
}

pub struct OcrFulfillment {
    store: Arc<dyn CollectionStore>,
    dispatcher: Arc<OcrDispatcher>,
    entitlements: Arc<dyn EntitlementLookup>,
    indexer: Option<Arc<dyn IndexingNotifier>>,
}

impl OcrFulfillment {
    pub fn new(
        store: Arc<dyn CollectionStore>,
        dispatcher: Arc<OcrDispatcher>,
        entitlements: Arc<dyn EntitlementLookup>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            entitlements,
            indexer: None,
        }
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn IndexingNotifier>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// Run OCR for one member document of a collection.
    ///
    /// Only missing entities and persistence failures are errors. Every
    /// dispatch failure ends as a FAILED record with its message.
    pub async fn fulfill(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<FulfillOutcome, FulfillError> {
        let collection = self
            .store
            .find_collection(collection_id)
            .await?
            .ok_or_else(|| FulfillError::CollectionNotFound(collection_id.to_string()))?;
        let document = collection
            .document(document_id)
            .cloned()
            .ok_or_else(|| FulfillError::DocumentNotFound {
                collection_id: collection_id.to_string(),
                document_id: document_id.to_string(),
            })?;
        let mut record = self
            .store
            .find_ocr_record(document_id)
            .await?
            .ok_or_else(|| FulfillError::OcrRecordNotFound(document_id.to_string()))?;

        if record.status == OcrStatus::Completed {
            info!(
                collection_id,
                document_id, "OCR already completed, skipping"
            );
            return Ok(FulfillOutcome::AlreadyCompleted {
                collection_status: collection.status,
            });
        }

        record.mark_processing();
        let processing_status = self
            .store
            .commit_ocr_outcome(collection_id, &record)
            .await?;
        debug!(
            collection_id,
            document_id,
            collection_status = ?processing_status,
            "OCR record marked processing"
        );

        let mut request = ExtractionRequest::from_url(&document.file_url, &document.mime_type)
            .for_document(collection_id, document_id)
            .with_user(&collection.owner_id);
        if let Some(name) = &document.file_name {
            request = request.with_metadata("fileName", name);
        }

        let tier = self.resolve_tier(&collection.owner_id).await;
        info!(
            collection_id,
            document_id,
            owner_id = %collection.owner_id,
            tier = %tier,
            "Starting OCR"
        );

        match self
            .dispatcher
            .process_ocr(&request, &collection.owner_id, Some(&tier))
            .await
        {
            Ok(result) if result.success => record.complete(&result),
            Ok(result) => {
                let message = result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "OCR produced no text".to_string());
                record.fail(message, Some(result.provider_used));
            }
            Err(e) => {
                warn!(collection_id, document_id, "OCR dispatch error: {}", e);
                record.fail(e.to_string(), e.provider());
            }
        }

        let collection_status = match self
            .store
            .commit_ocr_outcome(collection_id, &record)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                // Quota may already be charged; keep the outcome in the logs.
                error!(
                    collection_id,
                    document_id,
                    status = ?record.status,
                    provider = ?record.provider_used,
                    characters = record.extracted_text.as_deref().map_or(0, |t| t.chars().count()),
                    error_message = record.error_message.as_deref().unwrap_or("-"),
                    "Failed to persist OCR outcome: {}",
                    e
                );
                return Err(e.into());
            }
        };
        info!(
            collection_id,
            document_id,
            status = ?record.status,
            collection_status = ?collection_status,
            "OCR record committed"
        );

        if record.status != OcrStatus::Completed {
            return Ok(FulfillOutcome::Failed {
                error: record.error_message.clone().unwrap_or_default(),
                collection_status,
            });
        }

        if let Some(indexer) = &self.indexer {
            if let Err(e) = indexer
                .notify_document_indexed(&collection, &document, &record)
                .await
            {
                warn!(document_id, "Indexing notification failed: {:#}", e);
            }
        }

        Ok(FulfillOutcome::Completed {
            provider: record.provider_used.unwrap_or(ProviderType::Local),
            characters: record
                .extracted_text
                .as_deref()
                .map_or(0, |t| t.chars().count()),
            collection_status,
        })
    }

    /// Owner's tier, or free when unknown or the lookup fails.
    async fn resolve_tier(&self, user_id: &str) -> String {
        match self.entitlements.tier_for_user(user_id).await {
            Ok(Some(tier)) if !tier.trim().is_empty() => tier,
            Ok(_) => FREE_TIER.to_string(),
            Err(e) => {
                warn!(user_id, "Tier lookup failed, treating as free: {:#}", e);
                FREE_TIER.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::collection::{Collection, CollectionDocument, OcrRecord};
    use crate::entitlement::StaticEntitlements;
    use crate::error::{OcrError, StoreError};
    use crate::metrics::MetricsSink;
    use crate::ocr::{ExtractionResult, OcrProvider};
    use crate::quota::{InMemoryQuotaLedger, QuotaGate, QuotaKey, QuotaLedger, QuotaLimits};
    use crate::registry::{ProviderRegistry, RoutingConfig};
    use crate::store::InMemoryCollectionStore;
    use crate::testing::{
        BrokenEntitlements, MetricEvent, RecordingMetrics, RecordingNotifier, ScriptedProvider,
    };
    use crate::tier::TierPolicy;

    const OWNER: &str = "owner-1";

    struct Harness {
        fulfillment: OcrFulfillment,
        store: Arc<InMemoryCollectionStore>,
        local: Arc<ScriptedProvider>,
        cloud: Arc<ScriptedProvider>,
        ledger: Arc<InMemoryQuotaLedger>,
        metrics: Arc<RecordingMetrics>,
    }

    fn document(id: &str) -> CollectionDocument {
        CollectionDocument {
            id: id.to_string(),
            file_url: format!("https://files.example.com/{}.png", id),
            mime_type: "image/png".to_string(),
            file_name: Some(format!("{}.png", id)),
        }
    }

    fn harness(
        local: ScriptedProvider,
        cloud: ScriptedProvider,
        entitlements: Arc<dyn EntitlementLookup>,
    ) -> Harness {
        let local = Arc::new(local);
        let cloud = Arc::new(cloud);
        let mut registry = ProviderRegistry::new(RoutingConfig::default());
        registry.register(local.clone()).unwrap();
        registry.register(cloud.clone()).unwrap();

        let ledger = Arc::new(InMemoryQuotaLedger::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let sink: Arc<dyn MetricsSink> = metrics.clone();
        let dispatcher = Arc::new(OcrDispatcher::new(
            Arc::new(registry),
            Arc::new(QuotaGate::new(ledger.clone(), QuotaLimits::default())),
            sink,
            TierPolicy::default(),
        ));

        let store = Arc::new(InMemoryCollectionStore::new());
        store.insert_collection(
            Collection::new("c1", OWNER)
                .with_document(document("d1"))
                .with_document(document("d2")),
        );
        store.insert_collection(Collection::new("solo", OWNER).with_document(document("d3")));

        let fulfillment = OcrFulfillment::new(store.clone(), dispatcher, entitlements);
        Harness {
            fulfillment,
            store,
            local,
            cloud,
            ledger,
            metrics,
        }
    }

    fn free_user() -> Arc<dyn EntitlementLookup> {
        Arc::new(StaticEntitlements::new())
    }

    fn paid_user() -> Arc<dyn EntitlementLookup> {
        Arc::new(StaticEntitlements::new().with_tier(OWNER, "pro"))
    }

    async fn used(h: &Harness, tier: &str) -> u64 {
        h.ledger.usage(&QuotaKey::current(OWNER, tier)).await.unwrap()
    }

    async fn record(h: &Harness, document_id: &str) -> OcrRecord {
        h.store.find_ocr_record(document_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_paid_user_cloud_success() {
        let h = harness(
            ScriptedProvider::new(ProviderType::Local),
            ScriptedProvider::new(ProviderType::Cloud).succeeding("Invoice 2024-117"),
            paid_user(),
        );
        let outcome = h.fulfillment.fulfill("solo", "d3").await.unwrap();

        assert_eq!(
            outcome,
            FulfillOutcome::Completed {
                provider: ProviderType::Cloud,
                characters: 16,
                collection_status: CollectionStatus::Processed,
            }
        );
        let stored = record(&h, "d3").await;
        assert_eq!(stored.status, OcrStatus::Completed);
        assert_eq!(stored.extracted_text.as_deref(), Some("Invoice 2024-117"));
        assert_eq!(stored.provider_used, Some(ProviderType::Cloud));
        assert_eq!(used(&h, "pro").await, 1);
        assert_eq!(
            h.metrics.events(),
            vec![
                MetricEvent::Start(ProviderType::Cloud),
                MetricEvent::Success(ProviderType::Cloud),
            ]
        );
        assert_eq!(h.local.calls(), 0);
    }

    #[tokio::test]
    async fn test_free_user_local_failure_without_fallback() {
        let h = harness(
            ScriptedProvider::new(ProviderType::Local).failing("page is blank"),
            ScriptedProvider::new(ProviderType::Cloud).unavailable(),
            free_user(),
        );
        let outcome = h.fulfillment.fulfill("solo", "d3").await.unwrap();

        assert_eq!(
            outcome,
            FulfillOutcome::Failed {
                error: "page is blank".to_string(),
                collection_status: CollectionStatus::FailedOcr,
            }
        );
        let stored = record(&h, "d3").await;
        assert_eq!(stored.status, OcrStatus::Failed);
        assert_eq!(stored.provider_used, Some(ProviderType::Local));
        assert_eq!(h.cloud.calls(), 0);
        assert_eq!(used(&h, "free").await, 0);

        let collection = h.store.find_collection("solo").await.unwrap().unwrap();
        assert_eq!(collection.status, CollectionStatus::FailedOcr);
    }

    #[tokio::test]
    async fn test_completed_record_is_not_reprocessed() {
        let h = harness(
            ScriptedProvider::new(ProviderType::Local).succeeding("first pass"),
            ScriptedProvider::new(ProviderType::Cloud),
            free_user(),
        );
        h.fulfillment.fulfill("solo", "d3").await.unwrap();
        let before = record(&h, "d3").await;
        let version = h.store.find_collection("solo").await.unwrap().unwrap().version;

        let outcome = h.fulfillment.fulfill("solo", "d3").await.unwrap();

        assert_eq!(
            outcome,
            FulfillOutcome::AlreadyCompleted {
                collection_status: CollectionStatus::Processed,
            }
        );
        assert_eq!(h.local.calls(), 1);
        let after = record(&h, "d3").await;
        assert_eq!(after.extracted_text, before.extracted_text);
        assert_eq!(after.updated_at, before.updated_at);
        let collection = h.store.find_collection("solo").await.unwrap().unwrap();
        assert_eq!(collection.version, version);
        assert_eq!(used(&h, "free").await, 1);
    }

    #[tokio::test]
    async fn test_collection_status_follows_members() {
        let h = harness(
            ScriptedProvider::new(ProviderType::Local).succeeding("text"),
            ScriptedProvider::new(ProviderType::Cloud),
            free_user(),
        );
        let first = h.fulfillment.fulfill("c1", "d1").await.unwrap();
        assert_eq!(first.collection_status(), CollectionStatus::Processing);

        let second = h.fulfillment.fulfill("c1", "d2").await.unwrap();
        assert_eq!(second.collection_status(), CollectionStatus::Processed);
    }

    #[tokio::test]
    async fn test_failed_record_is_retried() {
        let h = harness(
            ScriptedProvider::new(ProviderType::Local).succeeding("second attempt"),
            ScriptedProvider::new(ProviderType::Cloud),
            free_user(),
        );
        let mut failed = OcrRecord::pending("d3");
        failed.fail("sidecar down", Some(ProviderType::Local));
        h.store.insert_record(failed);

        let outcome = h.fulfillment.fulfill("solo", "d3").await.unwrap();
        assert!(matches!(outcome, FulfillOutcome::Completed { .. }));
        let stored = record(&h, "d3").await;
        assert_eq!(stored.status, OcrStatus::Completed);
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_error_becomes_failed_record() {
        let h = harness(
            ScriptedProvider::new(ProviderType::Local),
            ScriptedProvider::new(ProviderType::Cloud),
            free_user(),
        );
        h.ledger.set_usage(QuotaKey::current(OWNER, "free"), 50);

        let outcome = h.fulfillment.fulfill("solo", "d3").await.unwrap();
        match outcome {
            FulfillOutcome::Failed {
                error,
                collection_status,
            } => {
                assert!(error.contains("quota"));
                assert_eq!(collection_status, CollectionStatus::FailedOcr);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.local.calls() + h.cloud.calls(), 0);
        assert!(record(&h, "d3").await.provider_used.is_none());
    }

    #[tokio::test]
    async fn test_retryable_error_records_raising_provider() {
        let h = harness(
            ScriptedProvider::new(ProviderType::Local).erroring(true),
            ScriptedProvider::new(ProviderType::Cloud).unavailable(),
            free_user(),
        );
        let outcome = h.fulfillment.fulfill("solo", "d3").await.unwrap();
        assert!(matches!(outcome, FulfillOutcome::Failed { .. }));
        assert_eq!(record(&h, "d3").await.provider_used, Some(ProviderType::Local));
    }

    #[tokio::test]
    async fn test_not_found_cases() {
        let h = harness(
            ScriptedProvider::new(ProviderType::Local),
            ScriptedProvider::new(ProviderType::Cloud),
            free_user(),
        );

        let err = h.fulfillment.fulfill("missing", "d1").await.unwrap_err();
        assert!(matches!(err, FulfillError::CollectionNotFound(_)));

        let err = h.fulfillment.fulfill("c1", "d3").await.unwrap_err();
        assert!(matches!(err, FulfillError::DocumentNotFound { .. }));

        h.store.remove_record("d1");
        let err = h.fulfillment.fulfill("c1", "d1").await.unwrap_err();
        assert!(matches!(err, FulfillError::OcrRecordNotFound(_)));
        assert!(err.is_not_found());

        assert_eq!(h.local.calls() + h.cloud.calls(), 0);
    }

    #[tokio::test]
    async fn test_entitlement_failure_means_free_tier() {
        let h = harness(
            ScriptedProvider::new(ProviderType::Local).succeeding("local text"),
            ScriptedProvider::new(ProviderType::Cloud),
            Arc::new(BrokenEntitlements),
        );
        let outcome = h.fulfillment.fulfill("solo", "d3").await.unwrap();

        assert!(matches!(
            outcome,
            FulfillOutcome::Completed {
                provider: ProviderType::Local,
                ..
            }
        ));
        assert_eq!(h.cloud.calls(), 0);
        assert_eq!(used(&h, "free").await, 1);
    }

    #[tokio::test]
    async fn test_indexer_runs_only_on_completion_and_failures_are_swallowed() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let h = harness(
            ScriptedProvider::new(ProviderType::Local).succeeding("indexed text"),
            ScriptedProvider::new(ProviderType::Cloud),
            free_user(),
        );
        let fulfillment = h.fulfillment.with_indexer(notifier.clone());

        let outcome = fulfillment.fulfill("solo", "d3").await.unwrap();
        assert!(matches!(outcome, FulfillOutcome::Completed { .. }));
        assert_eq!(notifier.notified(), vec!["d3".to_string()]);
        let stored = h.store.find_ocr_record("d3").await.unwrap().unwrap();
        assert_eq!(stored.status, OcrStatus::Completed);

        // Second call is a no-op and does not notify again.
        fulfillment.fulfill("solo", "d3").await.unwrap();
        assert_eq!(notifier.notified().len(), 1);
    }

    #[tokio::test]
    async fn test_indexer_skipped_on_failure() {
        let notifier = Arc::new(RecordingNotifier::default());
        let h = harness(
            ScriptedProvider::new(ProviderType::Local).failing("unreadable"),
            ScriptedProvider::new(ProviderType::Cloud).failing("unreadable"),
            free_user(),
        );
        let fulfillment = h.fulfillment.with_indexer(notifier.clone());

        let outcome = fulfillment.fulfill("solo", "d3").await.unwrap();
        assert!(matches!(outcome, FulfillOutcome::Failed { .. }));
        assert!(notifier.notified().is_empty());
    }

    #[test]
    fn test_outcome_wire_format() {
        let json = serde_json::to_value(FulfillOutcome::Completed {
            provider: ProviderType::Cloud,
            characters: 3,
            collection_status: CollectionStatus::Processed,
        })
        .unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["provider"], "cloud");
        assert_eq!(json["collectionStatus"], "PROCESSED");
    }

    /// Dispatcher over `local` with an unavailable cloud provider.
    fn local_only(local: Arc<dyn OcrProvider>) -> (Arc<OcrDispatcher>, Arc<InMemoryQuotaLedger>) {
        let mut registry = ProviderRegistry::new(RoutingConfig::default());
        registry.register(local).unwrap();
        registry
            .register(Arc::new(ScriptedProvider::new(ProviderType::Cloud).unavailable()))
            .unwrap();
        let ledger = Arc::new(InMemoryQuotaLedger::new());
        let dispatcher = Arc::new(OcrDispatcher::new(
            Arc::new(registry),
            Arc::new(QuotaGate::new(ledger.clone(), QuotaLimits::default())),
            Arc::new(RecordingMetrics::default()),
            TierPolicy::default(),
        ));
        (dispatcher, ledger)
    }

    /// Local provider that snapshots the stored collection and record mid-call.
    struct StatusSpy {
        store: Arc<InMemoryCollectionStore>,
        seen: Mutex<Option<(CollectionStatus, OcrStatus)>>,
    }

    #[async_trait]
    impl OcrProvider for StatusSpy {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Local
        }

        async fn extract_text(
            &self,
            request: &ExtractionRequest,
        ) -> Result<ExtractionResult, OcrError> {
            let collection = self.store.find_collection("solo").await.unwrap().unwrap();
            let record = self.store.find_ocr_record("d3").await.unwrap().unwrap();
            *self.seen.lock() = Some((collection.status, record.status));
            Ok(ExtractionResult::success(
                ProviderType::Local,
                request,
                "retried text".to_string(),
                None,
            ))
        }

        fn supported_mime_types(&self) -> &'static [&'static str] {
            &["image/png"]
        }

        fn supported_languages(&self) -> &'static [&'static str] {
            &["eng"]
        }

        fn is_available(&self) -> bool {
            true
        }

        fn max_file_size_bytes(&self) -> Option<u64> {
            None
        }
    }

    #[tokio::test]
    async fn test_retry_moves_collection_to_processing_before_dispatch() {
        let store = Arc::new(InMemoryCollectionStore::new());
        store.insert_collection(Collection::new("solo", OWNER).with_document(document("d3")));
        let mut failed = OcrRecord::pending("d3");
        failed.fail("sidecar down", Some(ProviderType::Local));
        store.commit_ocr_outcome("solo", &failed).await.unwrap();
        assert_eq!(
            store.find_collection("solo").await.unwrap().unwrap().status,
            CollectionStatus::FailedOcr
        );

        let spy = Arc::new(StatusSpy {
            store: store.clone(),
            seen: Mutex::new(None),
        });
        let (dispatcher, _) = local_only(spy.clone());
        let fulfillment = OcrFulfillment::new(store.clone(), dispatcher, free_user());

        let outcome = fulfillment.fulfill("solo", "d3").await.unwrap();

        assert_eq!(
            *spy.seen.lock(),
            Some((CollectionStatus::Processing, OcrStatus::Processing))
        );
        assert_eq!(outcome.collection_status(), CollectionStatus::Processed);
        let stored = store.find_ocr_record("d3").await.unwrap().unwrap();
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_siblings_settle_collection() {
        let h = harness(
            ScriptedProvider::new(ProviderType::Local)
                .succeeding("page text")
                .with_delay(Duration::from_millis(20)),
            ScriptedProvider::new(ProviderType::Cloud),
            free_user(),
        );

        let (first, second) = tokio::join!(
            h.fulfillment.fulfill("c1", "d1"),
            h.fulfillment.fulfill("c1", "d2"),
        );
        let mut statuses = vec![
            first.unwrap().collection_status(),
            second.unwrap().collection_status(),
        ];
        statuses.sort_by_key(|s| format!("{:?}", s));
        assert_eq!(
            statuses,
            vec![CollectionStatus::Processed, CollectionStatus::Processing]
        );

        let collection = h.store.find_collection("c1").await.unwrap().unwrap();
        assert_eq!(collection.status, CollectionStatus::Processed);
        // Each fulfill commits twice: PROCESSING, then the outcome.
        assert_eq!(collection.version, 4);
        assert_eq!(h.local.calls(), 2);
        assert_eq!(used(&h, "free").await, 2);
    }

    /// Store whose commits fail after the first one.
    struct OutcomeCommitFails {
        inner: InMemoryCollectionStore,
        commits: AtomicUsize,
    }

    #[async_trait]
    impl CollectionStore for OutcomeCommitFails {
        async fn find_collection(&self, collection_id: &str) -> Result<Option<Collection>, StoreError> {
            self.inner.find_collection(collection_id).await
        }

        async fn find_ocr_record(&self, document_id: &str) -> Result<Option<OcrRecord>, StoreError> {
            self.inner.find_ocr_record(document_id).await
        }

        async fn save_ocr_record(&self, record: &OcrRecord) -> Result<(), StoreError> {
            self.inner.save_ocr_record(record).await
        }

        async fn commit_ocr_outcome(
            &self,
            collection_id: &str,
            record: &OcrRecord,
        ) -> Result<CollectionStatus, StoreError> {
            if self.commits.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(StoreError::Conflict(format!(
                    "collection {} status update lost 5 races",
                    collection_id
                )));
            }
            self.inner.commit_ocr_outcome(collection_id, record).await
        }
    }

    #[tokio::test]
    async fn test_outcome_commit_failure_is_a_store_error() {
        let inner = InMemoryCollectionStore::new();
        inner.insert_collection(Collection::new("solo", OWNER).with_document(document("d3")));
        let store = Arc::new(OutcomeCommitFails {
            inner,
            commits: AtomicUsize::new(0),
        });
        let (dispatcher, ledger) =
            local_only(Arc::new(ScriptedProvider::new(ProviderType::Local).succeeding("lost text")));
        let fulfillment = OcrFulfillment::new(store.clone(), dispatcher, free_user());

        let err = fulfillment.fulfill("solo", "d3").await.unwrap_err();

        assert!(matches!(err, FulfillError::Store(StoreError::Conflict(_))));
        assert!(!err.is_not_found());
        // Extraction succeeded, so the operation was charged.
        assert_eq!(
            ledger.usage(&QuotaKey::current(OWNER, "free")).await.unwrap(),
            1
        );
        let stored = store.find_ocr_record("d3").await.unwrap().unwrap();
        assert_eq!(stored.status, OcrStatus::Processing);
    }
}
