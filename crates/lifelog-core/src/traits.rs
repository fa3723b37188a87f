//! Collaborator contracts the search core consumes but does not implement.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::{
    Document, DocumentId, ReasoningOptions, ReasoningOutcome, ScoredRef, VectorDocument, VectorIndexStats,
    VectorSearchOptions,
};

/// Durable, date-indexed storage of raw lifelogs. Read-only from the core.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_all(&self) -> anyhow::Result<Vec<Document>>;

    /// Ids and dates of every document recorded within `[start, end]`.
    async fn load_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> anyhow::Result<Vec<(DocumentId, NaiveDate)>>;

    async fn load(&self, id: &str, date: NaiveDate) -> anyhow::Result<Option<Document>>;
}

/// Embedding-backed similarity search, treated as a black box.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn initialize(&self) -> anyhow::Result<()>;

    async fn search_by_text(&self, query: &str, opts: &VectorSearchOptions) -> anyhow::Result<Vec<ScoredRef>>;

    /// Insert or replace documents.
    async fn add_documents(&self, docs: &[Document]) -> anyhow::Result<()>;

    async fn get_documents(&self, ids: &[DocumentId]) -> anyhow::Result<Vec<VectorDocument>>;

    async fn list_document_ids(&self) -> anyhow::Result<Vec<DocumentId>>;

    async fn stats(&self) -> anyhow::Result<VectorIndexStats>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Optional analytical fallback for complex queries. Availability must be
/// probed before every use.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn execute_complex_search(
        &self,
        query: &str,
        candidates: &[Document],
        opts: &ReasoningOptions,
    ) -> anyhow::Result<ReasoningOutcome>;
}
