use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::persist::{list_shards, load_shard};
use crate::shard::ShardKey;
use crate::tfidf::WeightedShard;

/// Lazily loaded TF-IDF shards of one directory.
///
/// A fresh cache per query gives the single-call lifetime; the server keeps
/// one per scope for its whole lifetime. Missing and unreadable shards load
/// as empty.
#[derive(Debug)]
pub struct ShardCache {
    dir: PathBuf,
    shards: RwLock<HashMap<ShardKey, Arc<WeightedShard>>>,
}

impl ShardCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf(), shards: RwLock::new(HashMap::new()) }
    }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn get(&self, key: ShardKey) -> Arc<WeightedShard> {
        if let Some(shard) = self.shards.read().get(&key) {
            return Arc::clone(shard);
        }
        let loaded = Arc::new(match load_shard(&self.dir, key) {
            Ok(Some(shard)) => shard,
            Ok(None) => WeightedShard::new(),
            Err(e) => {
                tracing::warn!(shard = %key, error = %e, "unreadable tf-idf shard, treating as empty");
                WeightedShard::new()
            }
        });
        // Another reader may have raced us here; keep whichever landed first.
        Arc::clone(self.shards.write().entry(key).or_insert(loaded))
    }

    /// Every shard present on disk.
    pub fn keys(&self) -> Vec<ShardKey> {
        match list_shards(&self.dir) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "cannot list tf-idf shards");
                Vec::new()
            }
        }
    }

    pub fn loaded(&self) -> usize { self.shards.read().len() }

    pub fn clear(&self) { self.shards.write().clear(); }
}
