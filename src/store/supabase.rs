//! Supabase (PostgREST) client for collections, OCR records, quota usage and
//! entitlement tiers.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::CollectionStore;
use crate::collection::{
    Collection, CollectionDocument, CollectionStatus, OcrRecord, OcrStatus,
};
use crate::config::SupabaseConfig;
use crate::entitlement::EntitlementLookup;
use crate::error::StoreError;
use crate::quota::{QuotaKey, QuotaLedger};

/// Attempts at the optimistic collection-status write before giving up.
const MAX_COMMIT_ATTEMPTS: usize = 5;

/// Supabase client configuration.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
    schema: String,
}

impl SupabaseClient {
    pub fn new(client: Client, config: &SupabaseConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            service_role_key: config.service_role_key.clone(),
            schema: config.schema.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, path);
        let profile_header = if method == Method::GET {
            "Accept-Profile"
        } else {
            "Content-Profile"
        };
        self.client
            .request(method, url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header(profile_header, &self.schema)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T, StoreError> {
        let resp = builder.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            debug!("Supabase {} failed: {} - {}", what, status, body);
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Helper: GET from Supabase REST API.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, StoreError> {
        self.send(self.request(Method::GET, path), path).await
    }

    /// PATCH rows matching `path` and return the updated rows.
    async fn patch_returning<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let builder = self
            .request(Method::PATCH, path)
            .header("Prefer", "return=representation")
            .json(body);
        self.send(builder, path).await
    }

    async fn document_statuses(
        &self,
        document_ids: &[String],
    ) -> Result<Vec<OcrStatus>, StoreError> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<StatusRow> = self
            .get_json(&format!(
                "document_ocr?document_id=in.({})&select=document_id,status",
                document_ids.join(",")
            ))
            .await?;

        // A member without a row has not entered the pipeline yet.
        Ok(document_ids
            .iter()
            .map(|id| {
                rows.iter()
                    .find(|r| &r.document_id == id)
                    .map_or(OcrStatus::Pending, |r| r.status)
            })
            .collect())
    }
}

// ============================================================================
// Collection store
// ============================================================================

#[async_trait]
impl CollectionStore for SupabaseClient {
    async fn find_collection(&self, collection_id: &str) -> Result<Option<Collection>, StoreError> {
        let rows: Vec<CollectionRow> = self
            .get_json(&format!(
                "collections?id=eq.{}&select=id,owner_id,status,version",
                collection_id
            ))
            .await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let documents: Vec<CollectionDocument> = self
            .get_json(&format!(
                "collection_documents?collection_id=eq.{}&select=id,file_url,mime_type,file_name&order=created_at.asc",
                collection_id
            ))
            .await?;

        Ok(Some(Collection {
            id: row.id,
            owner_id: row.owner_id,
            status: row.status,
            documents,
            version: row.version,
        }))
    }

    async fn find_ocr_record(&self, document_id: &str) -> Result<Option<OcrRecord>, StoreError> {
        let rows: Vec<OcrRecord> = self
            .get_json(&format!(
                "document_ocr?document_id=eq.{}&select=*",
                document_id
            ))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn save_ocr_record(&self, record: &OcrRecord) -> Result<(), StoreError> {
        let updated = self
            .patch_returning(
                &format!("document_ocr?document_id=eq.{}", record.document_id),
                record,
            )
            .await?;
        if updated.is_empty() {
            return Err(StoreError::Missing(format!(
                "document_ocr row for {}",
                record.document_id
            )));
        }
        debug!("Saved OCR record {} ({:?})", record.document_id, record.status);
        Ok(())
    }

    /// PostgREST has no multi-statement transactions, so the collection row is
    /// written with a compare-and-set on `version` and retried on conflict.
    async fn commit_ocr_outcome(
        &self,
        collection_id: &str,
        record: &OcrRecord,
    ) -> Result<CollectionStatus, StoreError> {
        self.save_ocr_record(record).await?;
        commit_collection_status(self, collection_id).await
    }
}

// ============================================================================
// Collection status compare-and-set
// ============================================================================

/// Versioned access to a collection row and its members' OCR statuses.
#[async_trait]
trait VersionedCollections: Send + Sync {
    /// Current row version and the status of every member.
    async fn member_statuses(&self, collection_id: &str) -> Result<(u64, Vec<OcrStatus>), StoreError>;

    /// Write `status` only if the row is still at `expected_version`.
    async fn compare_and_set_status(
        &self,
        collection_id: &str,
        expected_version: u64,
        status: CollectionStatus,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
impl VersionedCollections for SupabaseClient {
    async fn member_statuses(&self, collection_id: &str) -> Result<(u64, Vec<OcrStatus>), StoreError> {
        let collection = self
            .find_collection(collection_id)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("collection {}", collection_id)))?;
        let ids: Vec<String> = collection.documents.iter().map(|d| d.id.clone()).collect();
        Ok((collection.version, self.document_statuses(&ids).await?))
    }

    async fn compare_and_set_status(
        &self,
        collection_id: &str,
        expected_version: u64,
        status: CollectionStatus,
    ) -> Result<bool, StoreError> {
        let body = json!({
            "status": status,
            "version": expected_version + 1,
            "updated_at": Utc::now(),
        });
        let updated = self
            .patch_returning(
                &format!(
                    "collections?id=eq.{}&version=eq.{}",
                    collection_id, expected_version
                ),
                &body,
            )
            .await?;
        Ok(!updated.is_empty())
    }
}

/// Recompute the aggregate from fresh member statuses and write it, re-reading
/// after every lost race.
async fn commit_collection_status<R>(rows: &R, collection_id: &str) -> Result<CollectionStatus, StoreError>
where
    R: VersionedCollections + ?Sized,
{
    for attempt in 1..=MAX_COMMIT_ATTEMPTS {
        let (version, statuses) = rows.member_statuses(collection_id).await?;
        let status = CollectionStatus::aggregate(statuses);

        if rows.compare_and_set_status(collection_id, version, status).await? {
            info!(
                "Collection {} status {:?} (version {})",
                collection_id,
                status,
                version + 1
            );
            return Ok(status);
        }
        warn!(
            "Collection {} changed concurrently (attempt {}/{}), retrying",
            collection_id, attempt, MAX_COMMIT_ATTEMPTS
        );
    }

    Err(StoreError::Conflict(format!(
        "collection {} status update lost {} races",
        collection_id, MAX_COMMIT_ATTEMPTS
    )))
}

// ============================================================================
// Quota ledger
// ============================================================================

#[async_trait]
impl QuotaLedger for SupabaseClient {
    async fn usage(&self, key: &QuotaKey) -> Result<u64, StoreError> {
        let rows: Vec<UsageRow> = self
            .get_json(&format!(
                "ocr_usage?user_id=eq.{}&tier=eq.{}&period=eq.{}&select=consumed",
                key.user_id, key.tier, key.period
            ))
            .await?;
        Ok(rows.first().map_or(0, |r| r.consumed))
    }

    /// Single-row upsert-and-increment inside the database function.
    async fn increment(&self, key: &QuotaKey) -> Result<u64, StoreError> {
        let builder = self.request(Method::POST, "rpc/increment_ocr_usage").json(&json!({
            "p_user_id": key.user_id,
            "p_tier": key.tier,
            "p_period": key.period,
        }));
        self.send(builder, "rpc/increment_ocr_usage").await
    }
}

// ============================================================================
// Entitlements
// ============================================================================

#[async_trait]
impl EntitlementLookup for SupabaseClient {
    async fn tier_for_user(&self, user_id: &str) -> anyhow::Result<Option<String>> {
        let rows: Vec<ProfileRow> = self
            .get_json(&format!(
                "profiles?id=eq.{}&select=subscription_tier",
                user_id
            ))
            .await?;
        Ok(rows.into_iter().next().and_then(|r| r.subscription_tier))
    }
}

// ============================================================================
// Supabase row types
// ============================================================================

#[derive(Debug, Deserialize)]
struct CollectionRow {
    id: String,
    owner_id: String,
    status: CollectionStatus,
    version: u64,
}

#[derive(Debug, Deserialize)]
struct StatusRow {
    document_id: String,
    status: OcrStatus,
}

#[derive(Debug, Deserialize)]
struct UsageRow {
    consumed: u64,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    subscription_tier: Option<String>,
}
