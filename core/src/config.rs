use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Tunables shared by the indexer and the query service.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Documents per index-build task.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Worker threads for index build and PageRank.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_damping")]
    pub damping: f64,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_tol")]
    pub tol: f64,
    /// Number of distinct past queries used for re-ranking.
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    /// How many top results get a content preview.
    #[serde(default = "default_top_preview")]
    pub top_preview: usize,
    #[serde(default = "default_preview_lines")]
    pub preview_lines: usize,
    #[serde(default = "default_association_limit")]
    pub association_limit: usize,
    #[serde(default)]
    pub stemming: bool,
    /// Extra stopword lists, one word per line. Empty means the built-in list only.
    #[serde(default)]
    pub stopword_files: Vec<PathBuf>,
}

fn default_chunk_size() -> usize { 10_000 }
fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
fn default_damping() -> f64 { 0.85 }
fn default_max_iter() -> usize { 100 }
fn default_tol() -> f64 { 1e-6 }
fn default_history_len() -> usize { 5 }
fn default_top_preview() -> usize { 5 }
fn default_preview_lines() -> usize { 3 }
fn default_association_limit() -> usize { 10 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            workers: default_workers(),
            damping: default_damping(),
            max_iter: default_max_iter(),
            tol: default_tol(),
            history_len: default_history_len(),
            top_preview: default_top_preview(),
            preview_lines: default_preview_lines(),
            association_limit: default_association_limit(),
            stemming: false,
            stopword_files: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// Optional file, then `SIFT_*` environment overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        Ok(base.with_env())
    }

    pub fn with_env(mut self) -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|s| s.parse().ok())
        }
        if let Some(v) = var("SIFT_CHUNK_SIZE") { self.chunk_size = v; }
        if let Some(v) = var("SIFT_WORKERS") { self.workers = v; }
        if let Some(v) = var("SIFT_DAMPING") { self.damping = v; }
        if let Some(v) = var("SIFT_MAX_ITER") { self.max_iter = v; }
        if let Some(v) = var("SIFT_TOL") { self.tol = v; }
        if let Some(v) = var("SIFT_HISTORY_LEN") { self.history_len = v; }
        if let Some(v) = var("SIFT_STEMMING") { self.stemming = v; }
        if let Ok(v) = std::env::var("SIFT_STOPWORDS") {
            self.stopword_files = std::env::split_paths(&v).collect();
        }
        self
    }
}
