//! Barrier-parallel PageRank over the crawled link graph.
//!
//! Each iteration splits the nodes into contiguous work units, lets every
//! unit compute its nodes' outgoing contributions against a read-only
//! snapshot, and merges the unit outputs in unit order on the calling
//! thread. Because units are contiguous and merged in order, every target
//! receives its contributions in node order whatever the unit count, so the
//! scores are bit-for-bit identical across worker counts.
//!
//! `damping` is the link-following probability; `1 - damping` is the
//! teleport mass spread evenly over all nodes.

use anyhow::Result;
use rayon::prelude::*;
use std::collections::HashMap;
use std::ops::Range;

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::corpus::Document;
use crate::index::worker_pool;
use crate::persist::PageRankRow;

/// Nodes are distinct corpus URLs; edges only point at nodes.
#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    urls: Vec<String>,
    out_edges: Vec<Vec<usize>>,
}

impl LinkGraph {
    /// Links to URLs outside the corpus are dropped. A URL that appears on
    /// several rows is one node carrying all of their links.
    pub fn from_documents(docs: &[Document]) -> Self {
        Self::from_adjacency(docs.iter().map(|d| (d.url.clone(), d.links.clone())))
    }

    pub fn from_adjacency<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let rows: Vec<(String, Vec<String>)> = rows.into_iter().collect();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut urls = Vec::new();
        for (url, _) in &rows {
            if !index.contains_key(url) {
                index.insert(url.clone(), urls.len());
                urls.push(url.clone());
            }
        }
        let mut out_edges = vec![Vec::new(); urls.len()];
        let mut dropped = 0usize;
        for (url, links) in rows {
            let from = index[&url];
            for link in links {
                match index.get(&link) {
                    Some(&to) => out_edges[from].push(to),
                    None => dropped += 1,
                }
            }
        }
        tracing::debug!(nodes = urls.len(), dropped, "built link graph");
        Self { urls, out_edges }
    }

    pub fn len(&self) -> usize { self.urls.len() }
    pub fn is_empty(&self) -> bool { self.urls.is_empty() }
    pub fn urls(&self) -> &[String] { &self.urls }
    pub fn out_degree(&self, node: usize) -> usize { self.out_edges[node].len() }
    pub fn is_sink(&self, node: usize) -> bool { self.out_edges[node].is_empty() }
}

#[derive(Debug, Clone, Copy)]
pub struct PageRankParams {
    pub damping: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub workers: usize,
}

impl Default for PageRankParams {
    fn default() -> Self {
        Self { damping: 0.85, max_iter: 100, tol: 1e-6, workers: 1 }
    }
}

impl From<&EngineConfig> for PageRankParams {
    fn from(cfg: &EngineConfig) -> Self {
        Self { damping: cfg.damping, max_iter: cfg.max_iter, tol: cfg.tol, workers: cfg.workers }
    }
}

#[derive(Debug, Clone)]
pub struct PageRankOutcome {
    /// Indexed like [`LinkGraph::urls`].
    pub scores: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    /// L1 distance of the last iteration.
    pub delta: f64,
}

struct UnitContribution {
    /// `damping * score / n` for every sink in the unit, in node order.
    sink_shares: Vec<f64>,
    /// `(target, damping * score / out_degree)` in node then edge order.
    pushes: Vec<(usize, f64)>,
}

/// Split `0..n` into `units` contiguous ranges whose sizes differ by at most one.
fn partition(n: usize, units: usize) -> Vec<Range<usize>> {
    let units = units.clamp(1, n.max(1));
    let base = n / units;
    let extra = n % units;
    let mut start = 0;
    (0..units)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let r = start..start + len;
            start += len;
            r
        })
        .collect()
}

fn unit_contribution(graph: &LinkGraph, scores: &[f64], damping: f64, nodes: Range<usize>) -> UnitContribution {
    let n = graph.len() as f64;
    let mut out = UnitContribution { sink_shares: Vec::new(), pushes: Vec::new() };
    for node in nodes {
        let edges = &graph.out_edges[node];
        if edges.is_empty() {
            out.sink_shares.push(damping * scores[node] / n);
        } else {
            let share = damping * scores[node] / edges.len() as f64;
            out.pushes.extend(edges.iter().map(|&to| (to, share)));
        }
    }
    out
}

/// Run the power method. Hitting `max_iter` is not an error: the last
/// vector is returned with `converged == false`.
pub fn rank(graph: &LinkGraph, params: &PageRankParams, cancel: &CancelToken) -> Result<PageRankOutcome> {
    let n = graph.len();
    if n == 0 {
        return Ok(PageRankOutcome { scores: Vec::new(), iterations: 0, converged: true, delta: 0.0 });
    }
    let units = partition(n, params.workers);
    let pool = worker_pool(units.len())?;
    let teleport = (1.0 - params.damping) / n as f64;

    let mut scores = vec![1.0 / n as f64; n];
    let mut delta = f64::INFINITY;
    for iteration in 1..=params.max_iter {
        cancel.check("pagerank")?;
        let snapshot = &scores;
        let contributions: Vec<UnitContribution> = pool.install(|| {
            units.par_iter()
                .map(|r| unit_contribution(graph, snapshot, params.damping, r.clone()))
                .collect()
        });

        let mut next = vec![teleport; n];
        let mut dangling = 0.0;
        for unit in &contributions {
            for share in &unit.sink_shares {
                dangling += share;
            }
            for &(to, share) in &unit.pushes {
                next[to] += share;
            }
        }
        for v in next.iter_mut() {
            *v += dangling;
        }

        delta = next.iter().zip(&scores).map(|(a, b)| (a - b).abs()).sum();
        tracing::debug!(iteration, delta, "pagerank iteration");
        scores = next;
        if delta < params.tol {
            tracing::info!(iterations = iteration, delta, "pagerank converged");
            return Ok(PageRankOutcome { scores, iterations: iteration, converged: true, delta });
        }
    }
    tracing::warn!(max_iter = params.max_iter, delta, "pagerank did not converge; using last scores");
    Ok(PageRankOutcome { scores, iterations: params.max_iter, converged: false, delta })
}

/// URL → score lookup. Unknown URLs score 0.
#[derive(Debug, Clone, Default)]
pub struct PageRankTable {
    scores: HashMap<String, f64>,
}

impl PageRankTable {
    pub fn from_outcome(graph: &LinkGraph, outcome: &PageRankOutcome) -> Self {
        let scores = graph.urls().iter().cloned().zip(outcome.scores.iter().copied()).collect();
        Self { scores }
    }

    pub fn from_rows(rows: Vec<PageRankRow>) -> Self {
        Self { scores: rows.into_iter().map(|r| (r.url, r.score)).collect() }
    }

    pub fn get(&self, url: &str) -> f64 { self.scores.get(url).copied().unwrap_or(0.0) }

    pub fn len(&self) -> usize { self.scores.len() }
    pub fn is_empty(&self) -> bool { self.scores.is_empty() }

    /// One row per corpus document, in corpus order, 0 for URLs without a score.
    pub fn rows_for(&self, docs: &[Document]) -> Vec<PageRankRow> {
        docs.iter().map(|d| PageRankRow { url: d.url.clone(), score: self.get(&d.url) }).collect()
    }
}
