pub mod associate;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod corpus;
pub mod history;
pub mod index;
pub mod pagerank;
pub mod persist;
pub mod pipeline;
pub mod query;
pub mod shard;
pub mod tfidf;
pub mod tokenizer;

pub use cancel::{CancelToken, Cancelled};
pub use config::EngineConfig;
pub use corpus::{ContentScope, DocMeta, Document};
pub use index::{DocId, DocLength, InvertedIndex, Posting};
pub use shard::ShardKey;
pub use tfidf::{WeightedPosting, WeightedShard};
pub use query::{SearchOptions, SearchResult, Searcher};
