//! TF-IDF weighting over inverted-index shards.
//!
//! `weight = occurrences(term, doc) / doc_length(doc) * ln(total_docs / (df + 1))`
//! where `df` counts distinct documents, not postings. Shards are processed
//! one at a time so the whole index never has to be resident.

use anyhow::Result;
use rayon::prelude::*;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

use crate::index::{worker_pool, DocId, DocLength, Posting};
use crate::persist::{list_shards, load_doc_lengths, load_meta, load_shard, remove_stale_shards, save_shard, IndexPaths};
use crate::ContentScope;

pub type PostingsShard = BTreeMap<String, Vec<Posting>>;
pub type WeightedShard = BTreeMap<String, Vec<WeightedPosting>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedPosting {
    pub doc_id: DocId,
    pub weight: f64,
}

// On disk a weighted posting is `["<doc_id>", weight]`.
impl Serialize for WeightedPosting {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        (self.doc_id.to_string(), self.weight).serialize(s)
    }
}

impl<'de> Deserialize<'de> for WeightedPosting {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let (doc_id, weight): (String, f64) = Deserialize::deserialize(d)?;
        let doc_id = doc_id.parse().map_err(D::Error::custom)?;
        Ok(WeightedPosting { doc_id, weight })
    }
}

/// Number of distinct documents in a posting list.
pub fn document_frequency(postings: &[Posting]) -> u32 {
    let mut ids: Vec<DocId> = postings.iter().map(|p| p.doc_id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids.len() as u32
}

/// `ln(total / (df + 1))`, floored at zero. A term in (nearly) every
/// document would otherwise get a negative weight.
pub fn idf(total_docs: u32, df: u32) -> f64 {
    let v = (total_docs as f64 / (df as f64 + 1.0)).ln();
    if v.is_finite() { v.max(0.0) } else { 0.0 }
}

/// Weight every term of one shard. Documents with no recorded tokens are
/// left out of that term's list.
pub fn compute(shard: &PostingsShard, doc_lengths: &HashMap<DocId, u32>, total_docs: u32) -> WeightedShard {
    let mut out = WeightedShard::new();
    for (term, postings) in shard {
        let mut tf: BTreeMap<DocId, u32> = BTreeMap::new();
        for p in postings {
            *tf.entry(p.doc_id).or_insert(0) += 1;
        }
        let term_idf = idf(total_docs, tf.len() as u32);
        let weighted: Vec<WeightedPosting> = tf
            .into_iter()
            .filter_map(|(doc_id, occurrences)| {
                let len = doc_lengths.get(&doc_id).copied().unwrap_or(0);
                if len == 0 {
                    return None;
                }
                Some(WeightedPosting { doc_id, weight: occurrences as f64 / len as f64 * term_idf })
            })
            .collect();
        if !weighted.is_empty() {
            out.insert(term.clone(), weighted);
        }
    }
    out
}

pub fn length_table(lengths: &[DocLength]) -> HashMap<DocId, u32> {
    lengths.iter().map(|d| (d.doc_id, d.token_count)).collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TfIdfStats {
    pub shards: usize,
    pub skipped: usize,
    pub terms: usize,
}

/// Recompute every TF-IDF shard of `scope` from its inverted shards.
/// Corrupt inverted shards are skipped with a warning.
///
/// `total_docs` is the corpus size from `meta.json`, the same for every
/// scope; without a meta file it falls back to the documents indexed here.
pub fn compute_scope(paths: &IndexPaths, scope: ContentScope, workers: usize) -> Result<TfIdfStats> {
    let in_dir = paths.inverted_dir(scope);
    let out_dir = paths.tfidf_dir(scope);
    let lengths = load_doc_lengths(paths, scope)?;
    let total_docs = match load_meta(paths) {
        Ok(meta) => meta.num_docs.max(lengths.len() as u32),
        Err(e) => {
            tracing::warn!(error = %e, "no index metadata, using indexed document count");
            lengths.len() as u32
        }
    };
    let table = length_table(&lengths);
    let keys = list_shards(&in_dir)?;

    remove_stale_shards(&out_dir, &keys)?;

    let pool = worker_pool(workers)?;
    let results: Vec<Result<Option<usize>>> = pool.install(|| {
        keys.par_iter()
            .map(|key| {
                let shard: PostingsShard = match load_shard(&in_dir, *key) {
                    Ok(Some(s)) => s,
                    Ok(None) => PostingsShard::new(),
                    Err(e) => {
                        tracing::warn!(shard = %key, error = %e, "skipping corrupt inverted shard");
                        return Ok(None);
                    }
                };
                let weighted = compute(&shard, &table, total_docs);
                save_shard(&out_dir, *key, &weighted)?;
                Ok(Some(weighted.len()))
            })
            .collect()
    });

    let mut stats = TfIdfStats::default();
    for r in results {
        match r? {
            Some(terms) => { stats.shards += 1; stats.terms += terms; }
            None => stats.skipped += 1,
        }
    }
    tracing::info!(scope = %scope, total_docs, shards = stats.shards, skipped = stats.skipped, terms = stats.terms, "computed tf-idf");
    Ok(stats)
}
