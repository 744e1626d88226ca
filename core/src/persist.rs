use crate::{ContentScope, DocId, DocLength, DocMeta, ShardKey};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub created_at: String,
    pub version: u32,
    /// Whether terms were stemmed; queries must be treated the same way.
    #[serde(default)]
    pub stemming: bool,
}

/// Index directory layout:
///
/// ```text
/// meta.json  docs.bin  texts/  pagerank.json
/// <scope>/doc_lengths.bin  <scope>/inverted/*.json  <scope>/tfidf/*.json
/// ```
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    fn docs(&self) -> PathBuf { self.root.join("docs.bin") }
    fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn texts_dir(&self) -> PathBuf { self.root.join("texts") }
    pub fn pagerank(&self) -> PathBuf { self.root.join("pagerank.json") }
    pub fn scope_dir(&self, scope: ContentScope) -> PathBuf { self.root.join(scope.as_str()) }
    pub fn inverted_dir(&self, scope: ContentScope) -> PathBuf { self.scope_dir(scope).join("inverted") }
    pub fn tfidf_dir(&self, scope: ContentScope) -> PathBuf { self.scope_dir(scope).join("tfidf") }
    fn doc_lengths(&self, scope: ContentScope) -> PathBuf { self.scope_dir(scope).join("doc_lengths.bin") }
}

pub fn save_docs(paths: &IndexPaths, docs: &HashMap<DocId, DocMeta>) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.docs())?;
    let bytes = bincode::serialize(docs)?;
    f.write_all(&bytes)?;
    Ok(())
}

pub fn load_docs(paths: &IndexPaths) -> Result<HashMap<DocId, DocMeta>> {
    let mut f = File::open(paths.docs()).with_context(|| format!("opening {}", paths.docs().display()))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let docs = bincode::deserialize(&buf)?;
    Ok(docs)
}

pub fn save_doc_lengths(paths: &IndexPaths, scope: ContentScope, lengths: &[DocLength]) -> Result<()> {
    create_dir_all(paths.scope_dir(scope))?;
    let mut f = File::create(paths.doc_lengths(scope))?;
    let bytes = bincode::serialize(lengths)?;
    f.write_all(&bytes)?;
    Ok(())
}

pub fn load_doc_lengths(paths: &IndexPaths, scope: ContentScope) -> Result<Vec<DocLength>> {
    let file = paths.doc_lengths(scope);
    let mut f = File::open(&file).with_context(|| format!("opening {}", file.display()))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let lengths = bincode::deserialize(&buf)?;
    Ok(lengths)
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}

/// Write one shard file. An existing file is truncated, never appended to,
/// so rebuilding is idempotent.
pub fn save_shard<T: Serialize>(dir: &Path, key: ShardKey, shard: &BTreeMap<String, T>) -> Result<()> {
    create_dir_all(dir)?;
    let file = dir.join(key.file_name());
    let mut f = File::create(&file).with_context(|| format!("creating {}", file.display()))?;
    let json = serde_json::to_vec(shard)?;
    f.write_all(&json)?;
    Ok(())
}

/// `Ok(None)` when the shard has no file; `Err` when it exists but does not parse.
pub fn load_shard<T: DeserializeOwned>(dir: &Path, key: ShardKey) -> Result<Option<BTreeMap<String, T>>> {
    let file = dir.join(key.file_name());
    let mut f = match File::open(&file) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("opening {}", file.display())),
    };
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let shard = serde_json::from_slice(&buf).with_context(|| format!("parsing {}", file.display()))?;
    Ok(Some(shard))
}

/// Shard keys that have a file in `dir`. A missing directory has none.
pub fn list_shards(dir: &Path) -> Result<Vec<ShardKey>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
    };
    let mut keys = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(key) = entry.file_name().to_str().and_then(ShardKey::from_file_name) {
            keys.push(key);
        }
    }
    keys.sort();
    Ok(keys)
}

/// Delete shard files in `dir` whose key is not in `keep`.
pub fn remove_stale_shards(dir: &Path, keep: &[ShardKey]) -> Result<()> {
    for stale in list_shards(dir)?.into_iter().filter(|k| !keep.contains(k)) {
        fs::remove_file(dir.join(stale.file_name()))?;
        tracing::debug!(shard = %stale, "removed stale shard");
    }
    Ok(())
}

/// Write every shard and delete shard files left over from an earlier build.
pub fn write_shards<T: Serialize>(dir: &Path, shards: &BTreeMap<ShardKey, BTreeMap<String, T>>) -> Result<()> {
    let keep: Vec<ShardKey> = shards.keys().copied().collect();
    remove_stale_shards(dir, &keep)?;
    for (key, shard) in shards {
        save_shard(dir, *key, shard)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRankRow {
    pub url: String,
    pub score: f64,
}

pub fn save_pagerank(paths: &IndexPaths, rows: &[PageRankRow]) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.pagerank())?;
    let json = serde_json::to_vec_pretty(rows)?;
    f.write_all(&json)?;
    Ok(())
}

pub fn load_pagerank(paths: &IndexPaths) -> Result<Vec<PageRankRow>> {
    let mut f = File::open(paths.pagerank()).with_context(|| format!("opening {}", paths.pagerank().display()))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let rows = serde_json::from_slice(&buf)?;
    Ok(rows)
}
