//! Query-time ranking.
//!
//! A query is a list of terms, each possibly containing `*` (any run) or
//! `?` (one character). Every term must match for a document to qualify.
//! Survivors are scored by `Σ tfidf × pagerank` and, when a session history
//! is present, multiplied by `1 + cos(doc, history)` over the vocabulary of
//! all matched index terms.

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::associate::{associated_terms, PinyinTransliterator};
use crate::cache::ShardCache;
use crate::config::EngineConfig;
use crate::corpus::{is_preview_file, ContentScope, DocMeta, PlainTextExtractor, TextExtractor};
use crate::history::QueryLog;
use crate::index::DocId;
use crate::pagerank::PageRankTable;
use crate::persist::{load_docs, load_meta, load_pagerank, IndexPaths};
use crate::shard::ShardKey;
use crate::tfidf::WeightedPosting;
use crate::tokenizer::{normalize, Tokenizer};

/// Preview used when a document's text cannot be read.
pub const NO_CONTENT: &str = "[No Content]";

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Wildcard(Regex),
}

/// A normalized query term and how it matches index terms.
#[derive(Debug, Clone)]
pub struct TermPattern {
    raw: String,
    matcher: Matcher,
}

impl TermPattern {
    pub fn parse(term: &str) -> Result<Self> {
        let raw = normalize(term.trim());
        let matcher = if raw.contains(['*', '?']) {
            Matcher::Wildcard(Regex::new(&wildcard_regex(&raw))?)
        } else {
            Matcher::Exact(raw.clone())
        };
        Ok(Self { raw, matcher })
    }

    pub fn as_str(&self) -> &str { &self.raw }

    pub fn is_match(&self, candidate: &str) -> bool {
        match &self.matcher {
            Matcher::Exact(t) => t == candidate,
            Matcher::Wildcard(re) => re.is_match(candidate),
        }
    }

    /// The one shard that can hold matches, or `None` when the term starts
    /// with a wildcard and every shard has to be scanned.
    pub fn route(&self) -> Option<ShardKey> {
        match self.raw.chars().next() {
            Some('*') | Some('?') => None,
            _ => Some(ShardKey::classify(&self.raw)),
        }
    }
}

/// Anchored regex for a wildcard term: `*` → `.*`, `?` → `.`, rest literal.
pub fn wildcard_regex(term: &str) -> String {
    let mut rx = String::from("^");
    let mut buf = [0u8; 4];
    for ch in term.chars() {
        match ch {
            '*' => rx.push_str(".*"),
            '?' => rx.push('.'),
            c => rx.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    rx.push('$');
    rx
}

/// Index terms matched by one query term, each with its per-document weight.
#[derive(Debug, Clone, Default)]
pub struct TermMatch {
    pub pattern: String,
    pub terms: BTreeMap<String, BTreeMap<DocId, f64>>,
}

impl TermMatch {
    pub fn docs(&self) -> BTreeSet<DocId> {
        self.terms.values().flat_map(|docs| docs.keys().copied()).collect()
    }

    /// Summed over every index term the pattern expanded to.
    pub fn weight(&self, doc: DocId) -> f64 {
        self.terms.values().filter_map(|docs| docs.get(&doc)).sum()
    }
}

pub fn resolve(cache: &ShardCache, pattern: &TermPattern) -> TermMatch {
    let keys = match pattern.route() {
        Some(key) => vec![key],
        None => cache.keys(),
    };
    let mut out = TermMatch { pattern: pattern.as_str().to_string(), terms: BTreeMap::new() };
    for key in keys {
        let shard = cache.get(key);
        let mut take = |term: &str, postings: &[WeightedPosting]| {
            let docs = out.terms.entry(term.to_string()).or_default();
            for p in postings {
                docs.insert(p.doc_id, p.weight);
            }
        };
        match &pattern.matcher {
            Matcher::Exact(t) => {
                if let Some(postings) = shard.get(t) {
                    take(t.as_str(), postings.as_slice());
                }
            }
            Matcher::Wildcard(re) => {
                for (term, postings) in shard.iter().filter(|(term, _)| re.is_match(term.as_str())) {
                    take(term.as_str(), postings.as_slice());
                }
            }
        }
    }
    out
}

/// Documents matched by every term. No terms, no documents.
pub fn intersect(matches: &[TermMatch]) -> BTreeSet<DocId> {
    let mut iter = matches.iter();
    let Some(first) = iter.next() else { return BTreeSet::new() };
    let mut docs = first.docs();
    for m in iter {
        let other = m.docs();
        docs.retain(|d| other.contains(d));
    }
    docs
}

/// Summed history weights per index term, L2-normalized over the shared
/// vocabulary of query and history matches.
pub struct HistoryModel<'a> {
    vocab: Vec<&'a str>,
    lookup: HashMap<&'a str, &'a BTreeMap<DocId, f64>>,
    history: Option<Vec<f64>>,
}

impl<'a> HistoryModel<'a> {
    pub fn new(query: &'a [TermMatch], history: &'a [TermMatch]) -> Self {
        let mut lookup: HashMap<&str, &BTreeMap<DocId, f64>> = HashMap::new();
        for m in query.iter().chain(history) {
            for (term, docs) in &m.terms {
                lookup.entry(term.as_str()).or_insert(docs);
            }
        }
        let vocab: Vec<&str> = lookup.keys().copied().collect::<BTreeSet<_>>().into_iter().collect();

        let mut summed: HashMap<&str, f64> = HashMap::new();
        for m in history {
            for (term, docs) in &m.terms {
                *summed.entry(term.as_str()).or_insert(0.0) += docs.values().sum::<f64>();
            }
        }
        let raw: Vec<f64> = vocab.iter().map(|t| summed.get(t).copied().unwrap_or(0.0)).collect();
        Self { vocab, lookup, history: unit(raw) }
    }

    /// `1 + cos(doc, history)`; exactly 1 when either vector is zero.
    pub fn multiplier(&self, doc: DocId) -> f64 {
        let Some(history) = &self.history else { return 1.0 };
        let doc_vec: Vec<f64> = self
            .vocab
            .iter()
            .map(|t| self.lookup[t].get(&doc).copied().unwrap_or(0.0))
            .collect();
        match unit(doc_vec) {
            Some(d) => 1.0 + d.iter().zip(history).map(|(a, b)| a * b).sum::<f64>(),
            None => 1.0,
        }
    }
}

fn unit(mut v: Vec<f64>) -> Option<Vec<f64>> {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Some(v)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub base: f64,
    pub score: f64,
}

/// Conjunctive match, base score, optional history boost, stable descending
/// sort. Documents enter in ascending id order, which decides ties.
pub fn rank_documents<F>(query: &[TermMatch], history: &[TermMatch], pagerank: F) -> Vec<ScoredDoc>
where
    F: Fn(DocId) -> f64,
{
    let docs = intersect(query);
    let model = (!history.is_empty()).then(|| HistoryModel::new(query, history));
    let mut scored: Vec<ScoredDoc> = docs
        .into_iter()
        .map(|doc_id| {
            let pr = pagerank(doc_id);
            let base: f64 = query.iter().map(|m| m.weight(doc_id) * pr).sum();
            let score = match &model {
                Some(model) => base * model.multiplier(doc_id),
                None => base,
            };
            ScoredDoc { doc_id, base, score }
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub doc_id: DocId,
    pub url: String,
    pub score: f64,
    /// Only the top results carry a preview.
    pub preview: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_preview: usize,
    pub preview_lines: usize,
    pub history_len: usize,
    pub association_limit: usize,
    /// Keep loaded shards across queries instead of per call.
    pub shared_cache: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { top_preview: 5, preview_lines: 3, history_len: 5, association_limit: 10, shared_cache: false }
    }
}

impl From<&EngineConfig> for SearchOptions {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            top_preview: cfg.top_preview,
            preview_lines: cfg.preview_lines,
            history_len: cfg.history_len,
            association_limit: cfg.association_limit,
            shared_cache: false,
        }
    }
}

/// Read side of an index directory: document table, PageRank scores and
/// the TF-IDF shards of each scope.
pub struct Searcher {
    paths: IndexPaths,
    docs: HashMap<DocId, DocMeta>,
    pagerank: PageRankTable,
    extractor: Box<dyn TextExtractor>,
    tokenizer: Tokenizer,
    opts: SearchOptions,
    shared: HashMap<ContentScope, Arc<ShardCache>>,
}

impl Searcher {
    /// The document table is required; a missing PageRank table scores
    /// every document 0. Query terms are stemmed iff the index was.
    pub fn open(paths: IndexPaths, opts: SearchOptions) -> Result<Self> {
        let docs = load_docs(&paths)?;
        let stemming = match load_meta(&paths) {
            Ok(meta) => meta.stemming,
            Err(e) => {
                tracing::warn!(error = %e, "no index metadata, assuming unstemmed terms");
                false
            }
        };
        let pagerank = match load_pagerank(&paths) {
            Ok(rows) => PageRankTable::from_rows(rows),
            Err(e) => {
                tracing::warn!(error = %e, "no pagerank table, all scores default to 0");
                PageRankTable::default()
            }
        };
        tracing::info!(root = %paths.root.display(), docs = docs.len(), ranked = pagerank.len(), stemming, "opened index");
        Ok(Self::new(paths, docs, pagerank, opts).with_tokenizer(Tokenizer::new().with_stemming(stemming)))
    }

    pub fn new(paths: IndexPaths, docs: HashMap<DocId, DocMeta>, pagerank: PageRankTable, opts: SearchOptions) -> Self {
        let shared = if opts.shared_cache {
            ContentScope::ALL.iter().map(|s| (*s, Arc::new(ShardCache::new(paths.tfidf_dir(*s))))).collect()
        } else {
            HashMap::new()
        };
        Self { paths, docs, pagerank, extractor: Box::new(PlainTextExtractor), tokenizer: Tokenizer::new(), opts, shared }
    }

    /// Must match the tokenizer the index was built with.
    pub fn with_tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_extractor(mut self, extractor: Box<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn options(&self) -> &SearchOptions { &self.opts }
    pub fn docs(&self) -> &HashMap<DocId, DocMeta> { &self.docs }
    pub fn pagerank(&self) -> &PageRankTable { &self.pagerank }

    /// Shared cache when enabled, otherwise a fresh one for this call.
    pub fn cache(&self, scope: ContentScope) -> Arc<ShardCache> {
        match self.shared.get(&scope) {
            Some(cache) => Arc::clone(cache),
            None => Arc::new(ShardCache::new(self.paths.tfidf_dir(scope))),
        }
    }

    /// Rank documents for `terms`, boosted towards `history` terms. Pure:
    /// nothing is logged.
    pub fn query(&self, scope: ContentScope, terms: &[String], history: &[String]) -> Vec<SearchResult> {
        let cache = self.cache(scope);
        let query: Vec<TermMatch> = self.parse_terms(terms).iter().map(|p| resolve(&cache, p)).collect();
        if query.is_empty() {
            return Vec::new();
        }
        let history: Vec<TermMatch> = self.parse_terms(history).iter().map(|p| resolve(&cache, p)).collect();

        let ranked = rank_documents(&query, &history, |doc| {
            self.docs.get(&doc).map(|m| self.pagerank.get(&m.url)).unwrap_or(0.0)
        });
        tracing::debug!(terms = ?terms, hits = ranked.len(), history = history.len(), "ranked query");

        ranked
            .into_iter()
            .filter_map(|s| self.docs.get(&s.doc_id).map(|meta| (s, meta)))
            .enumerate()
            .map(|(rank, (s, meta))| SearchResult {
                doc_id: s.doc_id,
                url: meta.url.clone(),
                score: s.score,
                preview: (rank < self.opts.top_preview).then(|| self.preview(meta)),
            })
            .collect()
    }

    /// Query with the log's recent history, then log the top URLs.
    pub fn search(&self, scope: ContentScope, terms: &[String], log: &QueryLog) -> Result<Vec<SearchResult>> {
        let history = flatten_history(&log.recent(self.opts.history_len)?);
        let results = self.query(scope, terms, &history);
        let top: Vec<String> = results.iter().take(self.opts.top_preview).map(|r| r.url.clone()).collect();
        log.append(terms, &top)?;
        Ok(results)
    }

    pub fn associate(&self, scope: ContentScope, seed: &str) -> Vec<String> {
        associated_terms(&self.cache(scope), seed, &PinyinTransliterator, self.opts.association_limit)
    }

    /// User-typed words to index-term patterns. A word may yield several
    /// terms (segmented Han text) or none (stopwords, punctuation). Patterns
    /// that fail to compile are dropped with a warning.
    fn parse_terms(&self, words: &[String]) -> Vec<TermPattern> {
        words
            .iter()
            .flat_map(|w| self.tokenizer.query_terms(w))
            .filter_map(|t| match TermPattern::parse(&t) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(term = %t, error = %e, "ignoring unusable query term");
                    None
                }
            })
            .collect()
    }

    /// First lines of the document text, or [`NO_CONTENT`].
    pub fn preview(&self, meta: &DocMeta) -> String {
        let extracted = if is_preview_file(&meta.url) {
            meta.file_path.as_ref().and_then(|p| match self.extractor.extract(p) {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::debug!(url = %meta.url, error = %e, "no extracted text for preview");
                    None
                }
            })
        } else {
            None
        };
        let text = extracted.or_else(|| {
            meta.text_path.as_ref().and_then(|rel| fs::read_to_string(self.paths.root.join(rel)).ok())
        });
        match text {
            Some(t) => {
                let lines: Vec<&str> = t.lines().take(self.opts.preview_lines).collect();
                let joined = lines.join("\n");
                if joined.trim().is_empty() { NO_CONTENT.to_string() } else { joined }
            }
            None => NO_CONTENT.to_string(),
        }
    }
}

/// Distinct terms across term-sets, first occurrence order.
pub fn flatten_history(sets: &[Vec<String>]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for term in sets.iter().flatten() {
        if !out.contains(term) {
            out.push(term.clone());
        }
    }
    out
}

/// Plain-text result report, overwritten on every query.
pub fn write_report(path: &Path, results: &[SearchResult]) -> Result<()> {
    let mut f = fs::File::create(path)?;
    for (idx, r) in results.iter().enumerate() {
        writeln!(f, "Result {}:", idx + 1)?;
        writeln!(f, "URL: {}", r.url)?;
        if let Some(preview) = &r.preview {
            writeln!(f, "Preview: {preview}")?;
        }
        writeln!(f, "{}", "-".repeat(50))?;
    }
    Ok(())
}
