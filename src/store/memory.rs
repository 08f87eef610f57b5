//! Process-local collection store.
//!
//! One mutex guards collections and records together, so a commit reads and
//! writes sibling statuses in a single critical section.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::CollectionStore;
use crate::collection::{Collection, CollectionStatus, OcrRecord, OcrStatus};
use crate::error::StoreError;

#[derive(Default)]
struct State {
    collections: HashMap<String, Collection>,
    records: HashMap<String, OcrRecord>,
}

#[derive(Default)]
pub struct InMemoryCollectionStore {
    state: Mutex<State>,
}

impl InMemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collection and a PENDING record for each member lacking one.
    pub fn insert_collection(&self, collection: Collection) {
        let mut state = self.state.lock();
        for document in &collection.documents {
            state
                .records
                .entry(document.id.clone())
                .or_insert_with(|| OcrRecord::pending(&document.id));
        }
        state.collections.insert(collection.id.clone(), collection);
    }

    pub fn insert_record(&self, record: OcrRecord) {
        self.state
            .lock()
            .records
            .insert(record.document_id.clone(), record);
    }

    pub fn remove_record(&self, document_id: &str) -> Option<OcrRecord> {
        self.state.lock().records.remove(document_id)
    }
}

#[async_trait]
impl CollectionStore for InMemoryCollectionStore {
    async fn find_collection(&self, collection_id: &str) -> Result<Option<Collection>, StoreError> {
        Ok(self.state.lock().collections.get(collection_id).cloned())
    }

    async fn find_ocr_record(&self, document_id: &str) -> Result<Option<OcrRecord>, StoreError> {
        Ok(self.state.lock().records.get(document_id).cloned())
    }

    async fn save_ocr_record(&self, record: &OcrRecord) -> Result<(), StoreError> {
        self.insert_record(record.clone());
        Ok(())
    }

    async fn commit_ocr_outcome(
        &self,
        collection_id: &str,
        record: &OcrRecord,
    ) -> Result<CollectionStatus, StoreError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let collection = state
            .collections
            .get_mut(collection_id)
            .ok_or_else(|| StoreError::Missing(format!("collection {}", collection_id)))?;
        state
            .records
            .insert(record.document_id.clone(), record.clone());

        // Members without a record have not entered the pipeline yet.
        let status = CollectionStatus::aggregate(collection.documents.iter().map(|d| {
            state
                .records
                .get(&d.id)
                .map_or(OcrStatus::Pending, |r| r.status)
        }));
        collection.status = status;
        collection.version += 1;

        debug!(
            "Collection {} status {:?} (version {})",
            collection_id, status, collection.version
        );
        Ok(status)
    }
}
