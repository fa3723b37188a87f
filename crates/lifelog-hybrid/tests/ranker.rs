use async_trait::async_trait;
use lifelog_core::types::{
    Document, DocumentId, ScoredRef, StrategyKind, VectorDocument, VectorIndexStats, VectorSearchOptions,
};
use lifelog_core::traits::VectorIndex;
use lifelog_core::config::HybridConfig;
use lifelog_hybrid::{HybridRanker, HybridSearchOptions};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct FakeVectorIndex {
    docs: Mutex<Vec<VectorDocument>>,
    ranking: Vec<(String, f64)>,
    fail_search: bool,
    page_calls: AtomicUsize,
}

impl FakeVectorIndex {
    fn with_docs(docs: &[(&str, &str)]) -> Self {
        let docs = docs
            .iter()
            .map(|(id, content)| VectorDocument { id: (*id).into(), content: (*content).into(), metadata: Default::default() })
            .collect();
        Self { docs: Mutex::new(docs), ..Self::default() }
    }
}

#[async_trait]
impl VectorIndex for FakeVectorIndex {
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn search_by_text(&self, _query: &str, opts: &VectorSearchOptions) -> anyhow::Result<Vec<ScoredRef>> {
        if self.fail_search {
            anyhow::bail!("embedding service offline");
        }
        Ok(self
            .ranking
            .iter()
            .take(opts.top_k)
            .map(|(id, score)| ScoredRef { id: id.clone(), score: *score, content: None, metadata: Default::default() })
            .collect())
    }

    async fn add_documents(&self, _docs: &[Document]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_documents(&self, ids: &[DocumentId]) -> anyhow::Result<Vec<VectorDocument>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.docs.lock().iter().filter(|d| ids.contains(&d.id)).cloned().collect())
    }

    async fn list_document_ids(&self) -> anyhow::Result<Vec<DocumentId>> {
        Ok(self.docs.lock().iter().map(|d| d.id.clone()).collect())
    }

    async fn stats(&self) -> anyhow::Result<VectorIndexStats> {
        Ok(VectorIndexStats { document_count: self.docs.lock().len(), dimension: Some(3), backend: "fake".into() })
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn corpus() -> Vec<(&'static str, &'static str)> {
    vec![
        ("d1", "quarterly budget review with finance"),
        ("d2", "budget sync and hiring plan"),
        ("d3", "lunch at the taco place"),
        ("d4", "design critique for the mobile app"),
    ]
}

#[tokio::test]
async fn initialize_pages_through_vector_documents() {
    let vector = Arc::new(FakeVectorIndex::with_docs(&corpus()));
    let config = HybridConfig { page_size: 3, ..HybridConfig::default() };
    let ranker = HybridRanker::new(vector.clone(), config);
    let stats = ranker.initialize().await.expect("initialize");
    assert_eq!(stats.documents, 4);
    assert!(stats.vocabulary > 0);
    assert_eq!(vector.page_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn documents_in_both_lists_rank_first() {
    let mut vector = FakeVectorIndex::with_docs(&corpus());
    vector.ranking = vec![("d2".into(), 0.91), ("d4".into(), 0.80), ("d1".into(), 0.42)];
    let ranker = HybridRanker::new(Arc::new(vector), HybridConfig::default());
    ranker.initialize().await.expect("initialize");

    let results = ranker.search("budget", &HybridSearchOptions::default()).await;
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(&ids[..2], &["d2", "d1"]);
    assert_eq!(results[0].vector_rank, Some(0));
    assert!(results[0].keyword_rank.is_some());
    assert!(results.iter().any(|r| r.id == "d4" && r.keyword_rank.is_none()));
    assert!(results[0].content.as_deref().is_some_and(|c| c.contains("hiring")));

    let converted = results[0].clone().into_search_result();
    assert_eq!(converted.metadata.matching_sources, vec![StrategyKind::Lexical, StrategyKind::VectorSemantic]);
    assert_eq!(converted.metadata.vector_score, Some(0.91));
}

#[tokio::test]
async fn weight_one_ignores_vector_order() {
    let mut vector = FakeVectorIndex::with_docs(&corpus());
    vector.ranking = vec![("d4".into(), 0.99)];
    let ranker = HybridRanker::new(Arc::new(vector), HybridConfig::default());
    ranker.initialize().await.expect("initialize");

    let opts = HybridSearchOptions { top_k: 10, hybrid_weight: Some(1.0) };
    let results = ranker.search("budget", &opts).await;
    assert_eq!(results[0].keyword_rank, Some(0));
    assert!(results.iter().find(|r| r.id == "d4").is_some_and(|r| r.score.abs() < f64::EPSILON));
}

#[tokio::test]
async fn vector_failure_falls_back_to_keywords() {
    let vector = FakeVectorIndex { fail_search: true, ..FakeVectorIndex::with_docs(&corpus()) };
    let ranker = HybridRanker::new(Arc::new(vector), HybridConfig::default());
    ranker.initialize().await.expect("initialize");

    let results = ranker.search("lunch taco", &HybridSearchOptions::default()).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "d3");
    assert!(results[0].vector_rank.is_none());
}

#[tokio::test]
async fn update_and_clear_index() {
    let vector = Arc::new(FakeVectorIndex::with_docs(&corpus()));
    let ranker = HybridRanker::new(vector.clone(), HybridConfig::default());
    ranker.initialize().await.expect("initialize");

    vector.docs.lock().retain(|d| d.id != "d3");
    vector.docs.lock().push(VectorDocument { id: "d5".into(), content: "taco tuesday".into(), metadata: Default::default() });
    let stats = ranker.update_index(&["d3".to_string(), "d5".to_string()]).await.expect("update");
    assert_eq!(stats.documents, 4);
    let hits = ranker.search("taco", &HybridSearchOptions::default()).await;
    assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["d5"]);

    ranker.clear_index();
    assert_eq!(ranker.stats().documents, 0);
}
