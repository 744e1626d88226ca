use anyhow::Result;
use rayon::prelude::*;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

use crate::cancel::CancelToken;
use crate::corpus::{ContentScope, Document, TextExtractor};
use crate::shard::ShardKey;
use crate::tokenizer::Tokenize;

pub type DocId = u32;

/// One occurrence of a term. Frequency is the number of postings sharing a
/// doc id; nothing here is pre-aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Posting {
    pub doc_id: DocId,
    pub position: u32,
}

// On disk a posting is `["<doc_id>", position]`.
impl Serialize for Posting {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        (self.doc_id.to_string(), self.position).serialize(s)
    }
}

impl<'de> Deserialize<'de> for Posting {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let (doc_id, position): (String, u32) = Deserialize::deserialize(d)?;
        let doc_id = doc_id.parse().map_err(D::Error::custom)?;
        Ok(Posting { doc_id, position })
    }
}

/// Token count of a document after stopword removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocLength {
    pub doc_id: DocId,
    pub url: String,
    pub token_count: u32,
}

/// Term → postings, plus the per-document token counts from the same pass.
/// A chunk's output and the merged corpus index share this type.
#[derive(Debug, Default, Clone)]
pub struct InvertedIndex {
    pub terms: HashMap<String, Vec<Posting>>,
    pub doc_lengths: Vec<DocLength>,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    pub fn add_document(&mut self, doc_id: DocId, url: &str, tokens: Vec<(String, usize)>) {
        self.doc_lengths.push(DocLength { doc_id, url: url.to_string(), token_count: tokens.len() as u32 });
        for (term, pos) in tokens {
            self.terms.entry(term).or_default().push(Posting { doc_id, position: pos as u32 });
        }
    }

    /// Concatenate per-term lists. Postings are only collected here, never
    /// aggregated, so the result is the same in any merge order once sorted.
    pub fn merge(mut self, mut other: InvertedIndex) -> InvertedIndex {
        if other.terms.len() > self.terms.len() {
            std::mem::swap(&mut self, &mut other);
        }
        for (term, mut postings) in other.terms {
            self.terms.entry(term).or_default().append(&mut postings);
        }
        self.doc_lengths.append(&mut other.doc_lengths);
        self
    }

    /// Canonical ordering for persistence.
    pub fn sort(&mut self) {
        for postings in self.terms.values_mut() {
            postings.sort_unstable();
        }
        self.doc_lengths.sort_by_key(|d| d.doc_id);
    }

    pub fn num_docs(&self) -> usize { self.doc_lengths.len() }
    pub fn num_terms(&self) -> usize { self.terms.len() }
    pub fn num_postings(&self) -> usize { self.terms.values().map(Vec::len).sum() }

    pub fn postings(&self, term: &str) -> &[Posting] {
        self.terms.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Split into shard-keyed maps; every term lands in exactly one shard.
    pub fn into_shards(self) -> BTreeMap<ShardKey, BTreeMap<String, Vec<Posting>>> {
        let mut shards: BTreeMap<ShardKey, BTreeMap<String, Vec<Posting>>> = BTreeMap::new();
        for (term, postings) in self.terms {
            shards.entry(ShardKey::classify(&term)).or_default().insert(term, postings);
        }
        shards
    }
}

/// Builds an [`InvertedIndex`] over fixed-size corpus chunks on a worker pool.
pub struct IndexBuilder<'a> {
    tokenizer: &'a dyn Tokenize,
    extractor: &'a dyn TextExtractor,
    scope: ContentScope,
    chunk_size: usize,
    workers: usize,
    cancel: CancelToken,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(tokenizer: &'a dyn Tokenize, extractor: &'a dyn TextExtractor) -> Self {
        Self { tokenizer, extractor, scope: ContentScope::Full, chunk_size: 10_000, workers: 1, cancel: CancelToken::new() }
    }

    pub fn scope(mut self, scope: ContentScope) -> Self { self.scope = scope; self }
    pub fn chunk_size(mut self, n: usize) -> Self { self.chunk_size = n.max(1); self }
    pub fn workers(mut self, n: usize) -> Self { self.workers = n.max(1); self }
    pub fn cancel_token(mut self, token: CancelToken) -> Self { self.cancel = token; self }

    pub fn content_scope(&self) -> ContentScope { self.scope }

    /// Index one chunk. Documents whose text cannot be obtained are skipped.
    pub fn build_chunk(&self, docs: &[Document]) -> InvertedIndex {
        let mut partial = InvertedIndex::new();
        for doc in docs {
            let text = match self.scope.compose(doc, self.extractor) {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(doc_id = doc.doc_id, url = %doc.url, error = %e, "skipping document");
                    continue;
                }
            };
            partial.add_document(doc.doc_id, &doc.url, self.tokenizer.tokenize(&text));
        }
        partial
    }

    /// Map chunks in parallel, then merge. Cancellation is observed before
    /// each chunk starts.
    pub fn build(&self, docs: &[Document]) -> Result<InvertedIndex> {
        let pool = worker_pool(self.workers)?;
        let partials = pool.install(|| {
            docs.par_chunks(self.chunk_size)
                .map(|chunk| {
                    self.cancel.check("index build")?;
                    Ok(self.build_chunk(chunk))
                })
                .collect::<Result<Vec<InvertedIndex>>>()
        })?;
        let chunks = partials.len();
        let mut merged = partials.into_iter().fold(InvertedIndex::new(), InvertedIndex::merge);
        merged.sort();
        tracing::info!(
            scope = %self.scope,
            chunks,
            num_docs = merged.num_docs(),
            num_terms = merged.num_terms(),
            "built inverted index"
        );
        Ok(merged)
    }
}

pub(crate) fn worker_pool(workers: usize) -> Result<rayon::ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new().num_threads(workers.max(1)).build()?)
}
