use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use lifelog_core::config::HybridConfig;
use lifelog_core::traits::VectorIndex;
use lifelog_core::types::{DocumentId, ScoredRef, SearchResult, StrategyKind, VectorDocument, VectorSearchOptions};
use lifelog_core::{Error, Result};

use crate::bm25::Bm25Index;
use crate::rrf::{fuse, RankedList};

#[derive(Debug, Clone, PartialEq)]
pub struct HybridSearchOptions {
    pub top_k: usize,
    /// Keyword share of the fusion weight; `None` uses the configured default.
    pub hybrid_weight: Option<f64>,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self { top_k: 20, hybrid_weight: None }
    }
}

/// A fused hit with the per-list evidence behind it. Ranks are zero-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridResult {
    pub id: DocumentId,
    pub score: f64,
    pub keyword_score: Option<f64>,
    pub vector_score: Option<f64>,
    pub keyword_rank: Option<usize>,
    pub vector_rank: Option<usize>,
    pub content: Option<String>,
}

impl HybridResult {
    pub fn into_search_result(self) -> SearchResult {
        let mut result = SearchResult::new(self.id, self.score);
        if self.keyword_rank.is_some() {
            result.add_source(StrategyKind::Lexical);
        }
        if self.vector_rank.is_some() {
            result.add_source(StrategyKind::VectorSemantic);
        }
        result.metadata.keyword_score = self.keyword_score;
        result.metadata.vector_score = self.vector_score;
        result.metadata.keyword_rank = self.keyword_rank;
        result.metadata.vector_rank = self.vector_rank;
        result
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HybridStats {
    pub documents: usize,
    pub vocabulary: usize,
}

pub struct HybridRanker {
    vector: Arc<dyn VectorIndex>,
    config: HybridConfig,
    index: RwLock<Arc<Bm25Index>>,
}

impl HybridRanker {
    pub fn new(vector: Arc<dyn VectorIndex>, config: HybridConfig) -> Self {
        Self { vector, config, index: RwLock::new(Arc::new(Bm25Index::new())) }
    }

    /// Builds the keyword index from every document the vector index holds,
    /// fetched `page_size` ids at a time.
    pub async fn initialize(&self) -> Result<HybridStats> {
        let ids = self.vector.list_document_ids().await.map_err(|e| Error::vector(&e))?;
        let pages = ids.chunks(self.config.page_size.max(1)).map(|page| self.vector.get_documents(page));
        let fetched = try_join_all(pages).await.map_err(|e| Error::vector(&e))?;

        let mut index = Bm25Index::new();
        for doc in fetched.into_iter().flatten() {
            index.insert(doc.id, doc.content);
        }
        *self.index.write() = Arc::new(index);
        let stats = self.stats();
        info!(documents = stats.documents, vocabulary = stats.vocabulary, "hybrid keyword index built");
        Ok(stats)
    }

    /// Re-reads `ids` from the vector index. Ids it no longer returns are
    /// dropped from the keyword index.
    pub async fn update_index(&self, ids: &[DocumentId]) -> Result<HybridStats> {
        if ids.is_empty() {
            return Ok(self.stats());
        }
        let docs: Vec<VectorDocument> = self.vector.get_documents(ids).await.map_err(|e| Error::vector(&e))?;
        let mut index = Bm25Index::clone(&self.current());
        for id in ids {
            index.remove(id);
        }
        for doc in docs {
            index.insert(doc.id, doc.content);
        }
        *self.index.write() = Arc::new(index);
        Ok(self.stats())
    }

    pub fn clear_index(&self) {
        *self.index.write() = Arc::new(Bm25Index::new());
    }

    pub fn stats(&self) -> HybridStats {
        let index = self.current();
        HybridStats { documents: index.len(), vocabulary: index.vocabulary() }
    }

    /// Runs BM25 and vector similarity concurrently and fuses the two ranked
    /// lists. A vector failure leaves the keyword list on its own.
    pub async fn search(&self, query: &str, opts: &HybridSearchOptions) -> Vec<HybridResult> {
        let weight = opts.hybrid_weight.unwrap_or(self.config.hybrid_weight).clamp(0.0, 1.0);
        let depth = opts.top_k.saturating_mul(2).max(1);
        let index = self.current();
        let vector_opts = VectorSearchOptions { top_k: depth, ..VectorSearchOptions::default() };

        let keyword = async { index.search(query, depth, &self.config) };
        let vector = async {
            match self.vector.search_by_text(query, &vector_opts).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(error = %e, "vector search failed, using keyword results only");
                    Vec::new()
                }
            }
        };
        let (keyword_hits, vector_hits) = tokio::join!(keyword, vector);
        let fused = fuse_hits(&index, &keyword_hits, &vector_hits, weight, self.config.rrf_k, opts.top_k);
        debug!(query, keyword = keyword_hits.len(), vector = vector_hits.len(), fused = fused.len(), "hybrid search");
        fused
    }

    fn current(&self) -> Arc<Bm25Index> {
        Arc::clone(&self.index.read())
    }
}

fn fuse_hits(
    index: &Bm25Index,
    keyword: &[(DocumentId, f64)],
    vector: &[ScoredRef],
    weight: f64,
    k: f64,
    top_k: usize,
) -> Vec<HybridResult> {
    let keyword_ids: Vec<DocumentId> = keyword.iter().map(|(id, _)| id.clone()).collect();
    let keyword_pos: HashMap<&str, (usize, f64)> =
        keyword.iter().enumerate().map(|(rank, (id, score))| (id.as_str(), (rank, *score))).collect();
    // Repeated vector ids (several chunks of one document) keep their best rank.
    let mut vector_ids: Vec<DocumentId> = Vec::new();
    let mut vector_pos: HashMap<&str, (usize, &ScoredRef)> = HashMap::new();
    for hit in vector {
        if !vector_pos.contains_key(hit.id.as_str()) {
            vector_pos.insert(hit.id.as_str(), (vector_ids.len(), hit));
            vector_ids.push(hit.id.clone());
        }
    }

    let lists = [RankedList { ids: &keyword_ids, weight }, RankedList { ids: &vector_ids, weight: 1.0 - weight }];
    fuse(&lists, k)
        .into_iter()
        .take(top_k)
        .map(|(id, score)| {
            let kw = keyword_pos.get(id.as_str()).copied();
            let vec = vector_pos.get(id.as_str()).copied();
            let content = index
                .content(&id)
                .map(str::to_string)
                .or_else(|| vec.and_then(|(_, hit)| hit.content.clone()));
            HybridResult {
                keyword_score: kw.map(|(_, s)| s),
                keyword_rank: kw.map(|(r, _)| r),
                vector_score: vec.map(|(_, hit)| hit.score),
                vector_rank: vec.map(|(r, _)| r),
                content,
                score,
                id,
            }
        })
        .collect()
}
