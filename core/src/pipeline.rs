//! Offline build stages, each reading the previous stage's files:
//! documents → inverted shards → TF-IDF shards, and links → PageRank.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::cancel::CancelToken;
use crate::corpus::{ContentScope, DocMeta, Document};
use crate::index::{DocId, IndexBuilder};
use crate::pagerank::{rank, LinkGraph, PageRankOutcome, PageRankParams, PageRankTable};
use crate::persist::{save_doc_lengths, save_docs, save_meta, save_pagerank, write_shards, IndexPaths, MetaFile};

pub const INDEX_VERSION: u32 = 2;

/// Store the document table and per-document body text used for previews.
/// `stemming` is recorded so the query side tokenizes the way the build did.
pub fn write_documents(paths: &IndexPaths, docs: &[Document], created_at: String, stemming: bool) -> Result<()> {
    let texts = paths.texts_dir();
    fs::create_dir_all(&texts).with_context(|| format!("creating {}", texts.display()))?;

    let mut table: HashMap<DocId, DocMeta> = HashMap::with_capacity(docs.len());
    for doc in docs {
        let (text_path, file_path) = if doc.is_file_link() {
            (None, Some(PathBuf::from(&doc.body)))
        } else {
            let rel = format!("texts/{}.txt", doc.doc_id);
            fs::write(paths.root.join(&rel), &doc.body)?;
            (Some(rel), None)
        };
        table.insert(doc.doc_id, DocMeta { title: doc.title.clone(), url: doc.url.clone(), text_path, file_path });
    }
    save_docs(paths, &table)?;
    save_meta(paths, &MetaFile { num_docs: docs.len() as u32, created_at, version: INDEX_VERSION, stemming })?;
    tracing::info!(docs = docs.len(), root = %paths.root.display(), "wrote document table");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeReport {
    pub scope: ContentScope,
    pub docs: usize,
    pub terms: usize,
    pub shards: usize,
}

/// Build and persist the inverted index of the builder's scope, replacing
/// any earlier build of it.
pub fn build_scope(paths: &IndexPaths, docs: &[Document], builder: &IndexBuilder<'_>) -> Result<ScopeReport> {
    let scope = builder.content_scope();
    let index = builder.build(docs)?;
    let indexed = index.num_docs();
    let terms = index.num_terms();
    save_doc_lengths(paths, scope, &index.doc_lengths)?;
    let shards = index.into_shards();
    write_shards(&paths.inverted_dir(scope), &shards)?;
    Ok(ScopeReport { scope, docs: indexed, terms, shards: shards.len() })
}

/// Rank the corpus link graph and store one row per corpus document.
pub fn build_pagerank(
    paths: &IndexPaths,
    docs: &[Document],
    params: &PageRankParams,
    cancel: &CancelToken,
) -> Result<PageRankOutcome> {
    let graph = LinkGraph::from_documents(docs);
    let outcome = rank(&graph, params, cancel)?;
    let table = PageRankTable::from_outcome(&graph, &outcome);
    save_pagerank(paths, &table.rows_for(docs))?;
    tracing::info!(nodes = graph.len(), iterations = outcome.iterations, converged = outcome.converged, "wrote pagerank");
    Ok(outcome)
}
