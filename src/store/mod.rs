//! Persistence for collections and OCR records.

mod memory;
mod supabase;

use async_trait::async_trait;

pub use memory::InMemoryCollectionStore;
pub use supabase::SupabaseClient;

use crate::collection::{Collection, CollectionStatus, OcrRecord};
use crate::error::StoreError;

#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Collection with its member documents.
    async fn find_collection(&self, collection_id: &str) -> Result<Option<Collection>, StoreError>;

    async fn find_ocr_record(&self, document_id: &str) -> Result<Option<OcrRecord>, StoreError>;

    async fn save_ocr_record(&self, record: &OcrRecord) -> Result<(), StoreError>;

    /// Save `record`, recompute the collection status from the currently
    /// stored status of every member, and save the collection, as one unit of
    /// work. Returns the new collection status.
    async fn commit_ocr_outcome(
        &self,
        collection_id: &str,
        record: &OcrRecord,
    ) -> Result<CollectionStatus, StoreError>;
}
