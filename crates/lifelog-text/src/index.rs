use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

use lifelog_core::clock::{Clock, SystemClock};
use lifelog_core::config::LexicalConfig;
use lifelog_core::text::{fold_case, tokenize};
use lifelog_core::traits::DocumentStore;
use lifelog_core::types::Document;
use lifelog_core::{Error, Result};

/// A document prepared for matching. `folded_text` shares byte offsets with
/// `text`, and the title occupies `text[..title_len]`.
#[derive(Debug)]
pub(crate) struct IndexedDocument {
    pub(crate) document: Document,
    pub(crate) text: String,
    pub(crate) folded_text: String,
    pub(crate) title_len: usize,
    pub(crate) length: usize,
}

/// One immutable generation of the index. Rebuilds produce a new snapshot
/// and swap it in whole, so a reader never sees a half-built index.
#[derive(Debug, Default)]
pub(crate) struct IndexSnapshot {
    pub(crate) docs: Vec<IndexedDocument>,
    pub(crate) postings: HashMap<String, BTreeSet<usize>>,
    pub(crate) by_id: HashMap<String, usize>,
    pub(crate) by_date: BTreeMap<NaiveDate, Vec<usize>>,
    pub(crate) built_at: Option<DateTime<Utc>>,
}

impl IndexSnapshot {
    fn build(documents: Vec<Document>, built_at: DateTime<Utc>) -> Self {
        let mut snapshot = Self { built_at: Some(built_at), ..Self::default() };
        for document in documents {
            if snapshot.by_id.contains_key(&document.id) {
                continue;
            }
            let slot = snapshot.docs.len();
            let text = document.searchable_text();
            let folded_text = fold_case(&text);
            for token in tokenize(&folded_text) {
                snapshot.postings.entry(token).or_default().insert(slot);
            }
            snapshot.by_id.insert(document.id.clone(), slot);
            snapshot.by_date.entry(document.date()).or_default().push(slot);
            snapshot.docs.push(IndexedDocument {
                title_len: document.title.len(),
                length: text.chars().count(),
                document,
                text,
                folded_text,
            });
        }
        snapshot
    }

    /// Documents containing any of `terms`, in index order.
    pub(crate) fn candidates<'a>(&self, terms: impl IntoIterator<Item = &'a String>) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        for term in terms {
            if let Some(slots) = self.postings.get(term) {
                out.extend(slots.iter().copied());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub documents: usize,
    pub unique_tokens: usize,
    pub total_postings: usize,
    pub built_at: Option<DateTime<Utc>>,
}

/// In-memory inverted index over lifelog title, content and headings.
pub struct PatternIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    pub(crate) config: LexicalConfig,
    clock: Arc<dyn Clock>,
}

impl PatternIndex {
    pub fn new(config: LexicalConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Index whose build timestamps come from `clock`.
    pub fn with_clock(config: LexicalConfig, clock: Arc<dyn Clock>) -> Self {
        Self { snapshot: RwLock::new(Arc::new(IndexSnapshot::default())), config, clock }
    }

    /// Replaces the whole index with one built from `documents`.
    /// Duplicate ids keep their first occurrence.
    pub fn build_index(&self, documents: Vec<Document>) -> IndexStats {
        let snapshot = Arc::new(IndexSnapshot::build(documents, self.clock.now()));
        *self.snapshot.write() = snapshot;
        let stats = self.stats();
        info!(documents = stats.documents, tokens = stats.unique_tokens, "lexical index built");
        stats
    }

    /// Loads every document from `store` and rebuilds. A store failure is the
    /// one error this index propagates.
    pub async fn build_from_store(&self, store: &dyn DocumentStore) -> Result<IndexStats> {
        let documents = store.load_all().await.map_err(|e| Error::store(&e))?;
        Ok(self.build_index(documents))
    }

    pub fn clear(&self) {
        *self.snapshot.write() = Arc::new(IndexSnapshot::default());
    }

    pub fn stats(&self) -> IndexStats {
        let snapshot = self.snapshot();
        IndexStats {
            documents: snapshot.docs.len(),
            unique_tokens: snapshot.postings.len(),
            total_postings: snapshot.postings.values().map(BTreeSet::len).sum(),
            built_at: snapshot.built_at,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn document(&self, id: &str) -> Option<Document> {
        let snapshot = self.snapshot();
        snapshot.by_id.get(id).map(|&slot| snapshot.docs[slot].document.clone())
    }

    pub fn config(&self) -> &LexicalConfig {
        &self.config
    }

    pub(crate) fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.snapshot.read())
    }
}

impl Default for PatternIndex {
    fn default() -> Self {
        Self::new(LexicalConfig::default())
    }
}
