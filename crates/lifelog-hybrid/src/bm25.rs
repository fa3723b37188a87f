//! Okapi BM25 over an in-memory inverted index.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use lifelog_core::config::HybridConfig;
use lifelog_core::text::tokenize;
use lifelog_core::types::DocumentId;

#[derive(Debug, Clone)]
struct Entry {
    content: String,
    term_freqs: HashMap<String, u32>,
    /// Length in characters, normalized against `avg_doc_length`.
    length: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    docs: BTreeMap<DocumentId, Entry>,
    postings: HashMap<String, BTreeSet<DocumentId>>,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id`, replacing any previous content under the same id.
    pub fn insert(&mut self, id: DocumentId, content: String) {
        self.remove(&id);
        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for token in tokenize(&content) {
            *term_freqs.entry(token).or_default() += 1;
        }
        for term in term_freqs.keys() {
            self.postings.entry(term.clone()).or_default().insert(id.clone());
        }
        let length = content.chars().count();
        self.docs.insert(id, Entry { content, term_freqs, length });
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let Some(old) = self.docs.remove(id) else { return false };
        for term in old.term_freqs.keys() {
            if let Some(ids) = self.postings.get_mut(term) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn vocabulary(&self) -> usize {
        self.postings.len()
    }

    pub fn content(&self, id: &str) -> Option<&str> {
        self.docs.get(id).map(|e| e.content.as_str())
    }

    /// `ln((N - df + 0.5) / (df + 0.5))`, clamped to `config.idf_floor` so a
    /// term present in most documents still counts for a little.
    pub fn idf(&self, term: &str, config: &HybridConfig) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.postings.get(term).map_or(0, BTreeSet::len) as f64;
        ((n - df + 0.5) / (df + 0.5)).ln().max(config.idf_floor)
    }

    /// Scores every document containing a query term, best first. Ties keep
    /// id order.
    pub fn search(&self, query: &str, limit: usize, config: &HybridConfig) -> Vec<(DocumentId, f64)> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        let idfs: Vec<(String, f64)> = terms
            .into_iter()
            .filter(|t| self.postings.contains_key(t))
            .map(|t| {
                let idf = self.idf(&t, config);
                (t, idf)
            })
            .collect();
        if idfs.is_empty() {
            return Vec::new();
        }

        let mut scores: BTreeMap<&DocumentId, f64> = BTreeMap::new();
        for (term, idf) in &idfs {
            let Some(ids) = self.postings.get(term) else { continue };
            for id in ids {
                let Some(entry) = self.docs.get(id) else { continue };
                let tf = f64::from(entry.term_freqs.get(term).copied().unwrap_or(0));
                let norm = 1.0 - config.b + config.b * entry.length as f64 / config.avg_doc_length;
                *scores.entry(id).or_default() += idf * tf * (config.k1 + 1.0) / (tf + config.k1 * norm);
            }
        }

        let mut ranked: Vec<(DocumentId, f64)> = scores.into_iter().map(|(id, s)| (id.clone(), s)).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> Bm25Index {
        let mut index = Bm25Index::new();
        index.insert("a".into(), "budget review budget numbers".into());
        index.insert("b".into(), "weekly budget sync".into());
        index.insert("c".into(), "lunch with the design team".into());
        index
    }

    #[test]
    fn higher_term_frequency_ranks_first() {
        let hits = index().search("budget", 10, &HybridConfig::default());
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn common_terms_keep_a_positive_floor() {
        let mut index = Bm25Index::new();
        for id in ["a", "b", "c"] {
            index.insert(id.into(), "standup".into());
        }
        let idf = index.idf("standup", &HybridConfig::default());
        assert!(idf > 0.0);
        assert!(index.search("standup", 10, &HybridConfig::default()).iter().all(|(_, s)| *s > 0.0));
    }

    #[test]
    fn reinsert_replaces_postings() {
        let mut index = index();
        index.insert("c".into(), "budget planning".into());
        assert!(index.search("lunch", 10, &HybridConfig::default()).is_empty());
        assert_eq!(index.search("planning", 10, &HybridConfig::default())[0].0, "c");
        assert!(index.remove("c"));
        assert!(!index.remove("c"));
        assert_eq!(index.len(), 2);
    }
}
