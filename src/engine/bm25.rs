// vaultchat Engine — BM25 Ranking
//
// Okapi BM25 over any `Scorable` corpus. Used twice per turn: memory recall
// and lorebook activation. The index borrows its documents and is rebuilt
// from scratch for every search; there is no incremental update.
//
//   idf(t)   = ln((N - df + 0.5) / (df + 0.5) + 1)        (never negative)
//   score    = Σ_q idf(q) · tf·(k1+1) / (tf + k1·(1 - b + b·len/avgLen))
//
// Search policy:
//   • always-active documents bypass scoring and are always returned
//   • scored documents below MIN_RELEVANCE are dropped
//   • the top `limit - always_active` scored documents fill the rest
//   • output is ordered by authoring `order`, not by score

use crate::atoms::constants::{BM25_B, BM25_K1, MIN_RELEVANCE};
use crate::atoms::traits::Scorable;
use crate::engine::tokenizer::tokenize;
use log::debug;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

struct IndexedDoc<'a, D> {
    doc: &'a D,
    tokens: Vec<String>,
    /// Position in the caller's slice; final tie-breaker.
    position: usize,
}

pub struct Bm25Index<'a, D: Scorable> {
    docs: Vec<IndexedDoc<'a, D>>,
    avg_doc_len: f64,
    doc_freq: HashMap<String, usize>,
}

impl<'a, D: Scorable> Bm25Index<'a, D> {
    /// Index every enabled document in `documents`.
    pub fn new(documents: &'a [D]) -> Self {
        let docs: Vec<IndexedDoc<'a, D>> = documents
            .iter()
            .enumerate()
            .filter(|(_, d)| d.enabled())
            .map(|(position, doc)| IndexedDoc { doc, tokens: doc.doc_tokens(), position })
            .collect();

        let total_len: usize = docs.iter().map(|d| d.tokens.len()).sum();
        let avg_doc_len = if docs.is_empty() { 0.0 } else { total_len as f64 / docs.len() as f64 };

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for d in &docs {
            let distinct: HashSet<&String> = d.tokens.iter().collect();
            for term in distinct {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }

        debug!(
            "[bm25] Indexed {} docs ({} skipped), avg_len={:.2}, vocab={}",
            docs.len(),
            documents.len() - docs.len(),
            avg_doc_len,
            doc_freq.len()
        );

        Bm25Index { docs, avg_doc_len, doc_freq }
    }

    /// Number of indexed (enabled) documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// BM25 score of `doc` against already-tokenized query terms.
    /// Repeated query terms contribute once per occurrence.
    pub fn score(&self, doc: &D, query_terms: &[String]) -> f64 {
        self.score_tokens(&doc.doc_tokens(), query_terms)
    }

    fn score_tokens(&self, tokens: &[String], query_terms: &[String]) -> f64 {
        if tokens.is_empty() || self.avg_doc_len == 0.0 {
            return 0.0;
        }
        let doc_len = tokens.len() as f64;
        let norm = 1.0 - BM25_B + BM25_B * doc_len / self.avg_doc_len;

        query_terms
            .iter()
            .map(|q| {
                let tf = tokens.iter().filter(|t| *t == q).count() as f64;
                if tf == 0.0 {
                    return 0.0;
                }
                self.idf(q) * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * norm)
            })
            .sum()
    }

    /// Ranked, size-limited subset in authoring order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<&'a D> {
        self.search_scored(query, limit).into_iter().map(|(d, _)| d).collect()
    }

    /// Like `search`, with each document's BM25 score (always-active
    /// documents carry their raw score, which may be zero).
    pub fn search_scored(&self, query: &str, limit: usize) -> Vec<(&'a D, f64)> {
        if self.docs.is_empty() || limit == 0 {
            return vec![];
        }
        let terms = tokenize(query);

        let (always, rest): (Vec<&IndexedDoc<'a, D>>, Vec<&IndexedDoc<'a, D>>) =
            self.docs.iter().partition(|d| d.doc.always_active());

        // Empty query: nothing to score, always-active entries still surface.
        let mut scored: Vec<(&IndexedDoc<'a, D>, f64)> = if terms.is_empty() {
            vec![]
        } else {
            rest.into_iter()
                .map(|d| (d, self.score_tokens(&d.tokens, &terms)))
                .filter(|(_, s)| *s >= MIN_RELEVANCE)
                .collect()
        };

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa)
                .then_with(|| a.doc.order().cmp(&b.doc.order()))
                .then_with(|| a.position.cmp(&b.position))
        });
        scored.truncate(limit.saturating_sub(always.len()));

        let mut combined: Vec<(&IndexedDoc<'a, D>, f64)> = always
            .into_iter()
            .map(|d| (d, self.score_tokens(&d.tokens, &terms)))
            .chain(scored)
            .collect();
        combined.sort_by(|(a, _), (b, _)| by_order(a, b));

        combined.into_iter().map(|(d, s)| (d.doc, s)).collect()
    }

    /// Cheap existence check: stops at the first qualifying document.
    pub fn has_matches(&self, query: &str) -> bool {
        if self.docs.iter().any(|d| d.doc.always_active()) {
            return true;
        }
        let terms = tokenize(query);
        if terms.is_empty() {
            return false;
        }
        self.docs.iter().any(|d| self.score_tokens(&d.tokens, &terms) >= MIN_RELEVANCE)
    }
}

fn by_order<D: Scorable>(a: &IndexedDoc<'_, D>, b: &IndexedDoc<'_, D>) -> Ordering {
    a.doc.order().cmp(&b.doc.order()).then_with(|| a.position.cmp(&b.position))
}
