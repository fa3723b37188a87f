//! Discovery state shared by the strategies of one parallel search.
//!
//! Writes only ever add: sets are unioned and a strategy's confidence entry
//! only moves up. Every field has its own lock, so concurrent writers never
//! lose updates and the final contents do not depend on completion order.

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use lifelog_core::types::{DocumentId, StrategyKind};

/// What a strategy contributes after it runs.
#[derive(Debug, Clone, Default)]
pub struct ContextUpdate {
    pub hot_documents: Vec<DocumentId>,
    pub dates: Vec<NaiveDate>,
    pub keywords: Vec<String>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Default)]
pub struct SearchContext {
    hot_document_ids: Mutex<BTreeSet<DocumentId>>,
    discovered_dates: Mutex<BTreeSet<NaiveDate>>,
    /// Keyword -> number of contributions.
    relevant_keywords: Mutex<BTreeMap<String, usize>>,
    strategy_confidence: Mutex<BTreeMap<StrategyKind, f64>>,
}

impl SearchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, strategy: StrategyKind, update: ContextUpdate) {
        if !update.hot_documents.is_empty() {
            self.hot_document_ids.lock().extend(update.hot_documents);
        }
        if !update.dates.is_empty() {
            self.discovered_dates.lock().extend(update.dates);
        }
        if !update.keywords.is_empty() {
            let mut keywords = self.relevant_keywords.lock();
            for keyword in update.keywords {
                *keywords.entry(keyword).or_insert(0) += 1;
            }
        }
        if let Some(confidence) = update.confidence {
            self.strategy_confidence
                .lock()
                .entry(strategy)
                .and_modify(|c| *c = c.max(confidence))
                .or_insert(confidence);
        }
    }

    pub fn is_hot(&self, id: &str) -> bool {
        self.hot_document_ids.lock().contains(id)
    }

    pub fn hot_documents(&self) -> Vec<DocumentId> {
        self.hot_document_ids.lock().iter().cloned().collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.discovered_dates.lock().iter().copied().collect()
    }

    /// Most contributed keywords first; ties alphabetical.
    pub fn top_keywords(&self, limit: usize) -> Vec<String> {
        let keywords = self.relevant_keywords.lock();
        let mut ranked: Vec<(&String, &usize)> = keywords.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().take(limit).map(|(k, _)| k.clone()).collect()
    }

    pub fn confidence(&self, strategy: StrategyKind) -> Option<f64> {
        self.strategy_confidence.lock().get(&strategy).copied()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            hot_document_ids: self.hot_documents(),
            discovered_dates: self.dates(),
            relevant_keywords: self.top_keywords(usize::MAX),
            strategy_confidence: self.strategy_confidence.lock().clone(),
        }
    }
}

/// Point-in-time copy of a [`SearchContext`], reported with parallel results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub hot_document_ids: Vec<DocumentId>,
    pub discovered_dates: Vec<NaiveDate>,
    pub relevant_keywords: Vec<String>,
    pub strategy_confidence: BTreeMap<StrategyKind, f64>,
}

impl ContextSnapshot {
    pub fn is_hot(&self, id: &str) -> bool {
        self.hot_document_ids.binary_search_by(|h| h.as_str().cmp(id)).is_ok()
    }

    /// Days from `date` to the closest discovered date.
    pub fn days_to_nearest_date(&self, date: NaiveDate) -> Option<i64> {
        self.discovered_dates.iter().map(|d| (*d - date).num_days().abs()).min()
    }
}
