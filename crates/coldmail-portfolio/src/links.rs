//! Nearest-neighbour portfolio link lookup.
//!
//! [`LinkStore`] is the only contract the matcher relies on; the backing index
//! (vector database, inverted index, remote service) is up to the implementor.
//! [`InMemoryLinkStore`] is a brute-force term-overlap index for local use and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use coldmail_core::{LinkRecord, PortfolioEntry};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LinkStoreError {
    #[error("link store unavailable: {0}")]
    Unavailable(String),
}

pub trait LinkStore: Send + Sync {
    fn count(&self) -> Result<usize, LinkStoreError>;

    fn add(&self, document: &str, link: &str) -> Result<(), LinkStoreError>;

    fn clear(&self) -> Result<(), LinkStoreError>;

    /// The `k` stored links nearest to `text`, best first.
    fn query(&self, text: &str, k: usize) -> Result<Vec<LinkRecord>, LinkStoreError>;

    /// Index every entry, but only into an empty store. Returns how many were added.
    fn load_portfolio(&self, entries: &[PortfolioEntry]) -> Result<usize, LinkStoreError> {
        if self.count()? > 0 {
            debug!("link store already populated; skipping portfolio load");
            return Ok(0);
        }
        for entry in entries {
            self.add(&entry.tech_stack, &entry.link)?;
        }
        info!(documents = entries.len(), "indexed portfolio links");
        Ok(entries.len())
    }
}

struct IndexedDocument {
    link: String,
    terms: HashMap<String, f64>,
    norm: f64,
}

/// Brute-force cosine similarity over term-frequency vectors.
#[derive(Default)]
pub struct InMemoryLinkStore {
    documents: RwLock<Vec<IndexedDocument>>,
}

impl InMemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut terms = HashMap::new();
    for raw in text.split(|c: char| !(c.is_alphanumeric() || matches!(c, '+' | '#' | '.'))) {
        let term = raw.trim_matches('.').to_lowercase();
        if !term.is_empty() {
            *terms.entry(term).or_insert(0.0) += 1.0;
        }
    }
    terms
}

fn norm(terms: &HashMap<String, f64>) -> f64 {
    terms.values().map(|v| v * v).sum::<f64>().sqrt()
}

fn poisoned() -> LinkStoreError {
    LinkStoreError::Unavailable("index lock poisoned".to_string())
}

impl LinkStore for InMemoryLinkStore {
    fn count(&self) -> Result<usize, LinkStoreError> {
        Ok(self.documents.read().map_err(|_| poisoned())?.len())
    }

    fn add(&self, document: &str, link: &str) -> Result<(), LinkStoreError> {
        let terms = term_frequencies(document);
        let norm = norm(&terms);
        self.documents.write().map_err(|_| poisoned())?.push(IndexedDocument {
            link: link.to_string(),
            terms,
            norm,
        });
        Ok(())
    }

    fn clear(&self) -> Result<(), LinkStoreError> {
        self.documents.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }

    fn query(&self, text: &str, k: usize) -> Result<Vec<LinkRecord>, LinkStoreError> {
        let query = term_frequencies(text);
        let query_norm = norm(&query);
        let documents = self.documents.read().map_err(|_| poisoned())?;
        let mut scored = documents
            .iter()
            .map(|doc| {
                let dot = query
                    .iter()
                    .filter_map(|(term, weight)| doc.terms.get(term).map(|w| w * weight))
                    .sum::<f64>();
                let denom = query_norm * doc.norm;
                let score = if denom > 0.0 { dot / denom } else { 0.0 };
                LinkRecord {
                    link: doc.link.clone(),
                    score,
                }
            })
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}
