//! Search-indexing notification after a document's text is available.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::collection::{Collection, CollectionDocument, OcrRecord};

/// Best-effort hook; callers log and drop failures.
#[async_trait]
pub trait IndexingNotifier: Send + Sync {
    async fn notify_document_indexed(
        &self,
        collection: &Collection,
        document: &CollectionDocument,
        record: &OcrRecord,
    ) -> anyhow::Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexPayload<'a> {
    collection_id: &'a str,
    document_id: &'a str,
    owner_id: &'a str,
    file_name: Option<&'a str>,
    mime_type: &'a str,
    text: &'a str,
    char_count: usize,
}

/// POSTs the extracted text to the indexing service's webhook.
pub struct HttpIndexingNotifier {
    client: Client,
    url: String,
}

impl HttpIndexingNotifier {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl IndexingNotifier for HttpIndexingNotifier {
    async fn notify_document_indexed(
        &self,
        collection: &Collection,
        document: &CollectionDocument,
        record: &OcrRecord,
    ) -> anyhow::Result<()> {
        let text = record.extracted_text.as_deref().unwrap_or_default();
        let payload = IndexPayload {
            collection_id: &collection.id,
            document_id: &document.id,
            owner_id: &collection.owner_id,
            file_name: document.file_name.as_deref(),
            mime_type: &document.mime_type,
            text,
            char_count: text.chars().count(),
        };

        let resp = self.client.post(&self.url).json(&payload).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Indexing webhook error ({}): {}", status, body);
        }

        debug!("Indexing notified for document {}", document.id);
        Ok(())
    }
}
