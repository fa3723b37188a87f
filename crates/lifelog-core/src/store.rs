//! Document stores: an in-memory store and a directory of JSON lifelogs.
//!
//! Both satisfy the read-only [`DocumentStore`] contract; neither is part of
//! the ranking core, they exist so the engine can run without an external
//! storage service.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::traits::DocumentStore;
use crate::types::{Document, DocumentId};

/// Documents held in memory with a day-granular date index.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    docs: Vec<Document>,
    by_id: HashMap<DocumentId, usize>,
    by_date: BTreeMap<NaiveDate, Vec<usize>>,
}

impl MemoryStore {
    /// Later documents with an already-seen id replace the earlier one.
    pub fn new(documents: Vec<Document>) -> Self {
        let mut store = Self::default();
        for doc in documents {
            store.insert(doc);
        }
        store
    }

    fn insert(&mut self, doc: Document) {
        if let Some(&slot) = self.by_id.get(&doc.id) {
            let old_date = self.docs[slot].date();
            if let Some(ids) = self.by_date.get_mut(&old_date) {
                ids.retain(|&i| i != slot);
            }
            self.by_date.entry(doc.date()).or_default().push(slot);
            self.docs[slot] = doc;
            return;
        }
        let slot = self.docs.len();
        self.by_id.insert(doc.id.clone(), slot);
        self.by_date.entry(doc.date()).or_default().push(slot);
        self.docs.push(doc);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.docs
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.by_id.get(id).map(|&i| &self.docs[i])
    }

    fn range(&self, start: NaiveDate, end: NaiveDate) -> Vec<(DocumentId, NaiveDate)> {
        if start > end {
            return Vec::new();
        }
        self.by_date
            .range(start..=end)
            .flat_map(|(date, slots)| slots.iter().map(move |&i| (self.docs[i].id.clone(), *date)))
            .collect()
    }

    fn lookup(&self, id: &str, date: NaiveDate) -> Option<Document> {
        self.get(id).filter(|d| d.date() == date).cloned()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<Document>> {
        Ok(self.docs.clone())
    }

    async fn load_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<(DocumentId, NaiveDate)>> {
        Ok(self.range(start, end))
    }

    async fn load(&self, id: &str, date: NaiveDate) -> Result<Option<Document>> {
        Ok(self.lookup(id, date))
    }
}

/// A lifelog file holds either one document or an array of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum LifelogFile {
    Many(Vec<Document>),
    One(Box<Document>),
}

/// Reads `*.json` lifelogs from a directory tree.
///
/// `load_all` rescans the directory; date lookups use the most recent scan
/// (scanning once on first use).
pub struct JsonDirStore {
    root: PathBuf,
    snapshot: RwLock<Option<Arc<MemoryStore>>>,
}

impl JsonDirStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            anyhow::bail!("document directory {} does not exist", root.display());
        }
        Ok(Self { root, snapshot: RwLock::new(None) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan(&self) -> Result<Arc<MemoryStore>> {
        let files = list_json_files(&self.root);
        if files.is_empty() {
            info!(dir = %self.root.display(), "no .json lifelogs found");
        }
        let mut documents = Vec::new();
        for file_path in &files {
            match read_lifelog_file(file_path) {
                Ok(docs) => documents.extend(docs),
                Err(e) => warn!(file = %file_path.display(), error = %e, "skipping unreadable lifelog file"),
            }
        }
        debug!(files = files.len(), documents = documents.len(), "scanned lifelog directory");
        let store = Arc::new(MemoryStore::new(documents));
        *self.snapshot.write() = Some(Arc::clone(&store));
        Ok(store)
    }

    fn current(&self) -> Result<Arc<MemoryStore>> {
        if let Some(store) = self.snapshot.read().as_ref() {
            return Ok(Arc::clone(store));
        }
        self.scan()
    }
}

#[async_trait]
impl DocumentStore for JsonDirStore {
    async fn load_all(&self) -> Result<Vec<Document>> {
        Ok(self.scan()?.documents().to_vec())
    }

    async fn load_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<(DocumentId, NaiveDate)>> {
        Ok(self.current()?.range(start, end))
    }

    async fn load(&self, id: &str, date: NaiveDate) -> Result<Option<Document>> {
        Ok(self.current()?.lookup(id, date))
    }
}

fn read_lifelog_file(file_path: &Path) -> Result<Vec<Document>> {
    let raw = match fs::read_to_string(file_path) {
        Ok(content) => content,
        Err(_) => String::from_utf8_lossy(&fs::read(file_path)?).to_string(),
    };
    let parsed: LifelogFile =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", file_path.display()))?;
    Ok(match parsed {
        LifelogFile::Many(docs) => docs,
        LifelogFile::One(doc) => vec![*doc],
    })
}

fn list_json_files(root: &Path) -> Vec<PathBuf> {
    let mut json_files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .map(|e| e.path().to_path_buf())
        .collect();
    json_files.sort();
    json_files
}
