use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use sift_core::corpus::{load_corpus, PlainTextExtractor};
use sift_core::history::QueryLog;
use sift_core::index::IndexBuilder;
use sift_core::pagerank::PageRankParams;
use sift_core::persist::IndexPaths;
use sift_core::pipeline::{build_pagerank, build_scope, write_documents};
use sift_core::query::write_report;
use sift_core::tfidf;
use sift_core::tokenizer::Tokenizer;
use sift_core::{CancelToken, ContentScope, EngineConfig, SearchOptions, Searcher};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build, weight, rank and query a sharded search index", long_about = None)]
struct Cli {
    /// JSON config file; SIFT_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Index directory
    #[arg(long, global = true, default_value = "index")]
    index: PathBuf,
    /// Worker threads (overrides config)
    #[arg(long, global = true)]
    workers: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScopeArg {
    /// full, title or files; all scopes when omitted
    #[arg(long)]
    scope: Option<ContentScope>,
}

impl ScopeArg {
    fn scopes(&self) -> Vec<ContentScope> {
        match self.scope {
            Some(s) => vec![s],
            None => ContentScope::ALL.to_vec(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build the document table and inverted shards from JSONL crawl output
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        corpus: PathBuf,
        #[command(flatten)]
        scope: ScopeArg,
    },
    /// Recompute TF-IDF shards from the inverted shards
    Tfidf {
        #[command(flatten)]
        scope: ScopeArg,
    },
    /// Rank the corpus link graph
    Pagerank {
        #[arg(long)]
        corpus: PathBuf,
    },
    /// Run one query against the TF-IDF shards
    Search {
        /// Query terms, `*` and `?` allowed
        #[arg(required = true)]
        terms: Vec<String>,
        #[arg(long, default_value = "full")]
        scope: ContentScope,
        /// Query log used for history re-ranking
        #[arg(long, default_value = "query_log.txt")]
        log: PathBuf,
        /// Also write a plain-text report here
        #[arg(long)]
        report: Option<PathBuf>,
        /// Print JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Suggest index terms related to a seed
    Associate {
        seed: String,
        #[arg(long, default_value = "full")]
        scope: ContentScope,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let mut cfg = EngineConfig::resolve(cli.config.as_deref())?;
    if let Some(w) = cli.workers {
        cfg.workers = w.max(1);
    }
    let paths = IndexPaths::new(&cli.index);

    match cli.command {
        Commands::Build { corpus, scope } => build(&paths, &cfg, &corpus, &scope.scopes()),
        Commands::Tfidf { scope } => {
            for s in scope.scopes() {
                tfidf::compute_scope(&paths, s, cfg.workers)?;
            }
            Ok(())
        }
        Commands::Pagerank { corpus } => {
            let docs = load_corpus(&corpus_files(&corpus)?)?;
            let outcome = build_pagerank(&paths, &docs, &PageRankParams::from(&cfg), &CancelToken::new())?;
            println!("{} nodes, {} iterations, converged: {}", outcome.scores.len(), outcome.iterations, outcome.converged);
            Ok(())
        }
        Commands::Search { terms, scope, log, report, json } => {
            let searcher = Searcher::open(paths, SearchOptions::from(&cfg))?;
            let results = searcher.search(scope, &terms, &QueryLog::new(log))?;
            if let Some(path) = report {
                write_report(&path, &results)?;
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results found.");
            } else {
                for (idx, r) in results.iter().enumerate() {
                    println!("{:>3}. {:.6}  {}", idx + 1, r.score, r.url);
                    if let Some(preview) = &r.preview {
                        for line in preview.lines() {
                            println!("       {line}");
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Associate { seed, scope } => {
            let searcher = Searcher::open(paths, SearchOptions::from(&cfg))?;
            for term in searcher.associate(scope, &seed) {
                println!("{term}");
            }
            Ok(())
        }
    }
}

fn build(paths: &IndexPaths, cfg: &EngineConfig, corpus: &Path, scopes: &[ContentScope]) -> Result<()> {
    let docs = load_corpus(&corpus_files(corpus)?)?;
    tracing::info!(num_docs = docs.len(), "loaded corpus");

    let created_at = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "".into());
    write_documents(paths, &docs, created_at, cfg.stemming)?;

    let tokenizer = Tokenizer::from_config(cfg)?;
    let extractor = PlainTextExtractor;
    let cancel = CancelToken::new();
    for scope in scopes {
        let builder = IndexBuilder::new(&tokenizer, &extractor)
            .scope(*scope)
            .chunk_size(cfg.chunk_size)
            .workers(cfg.workers)
            .cancel_token(cancel.clone());
        let report = build_scope(paths, &docs, &builder)?;
        tracing::info!(scope = %report.scope, docs = report.docs, terms = report.terms, shards = report.shards, "scope indexed");
    }

    tracing::info!(output = %paths.root.display(), "index build complete");
    Ok(())
}

/// JSONL files under `input` in path order, which fixes the doc ids.
fn corpus_files(input: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                files.push(p.to_path_buf());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }
    if files.is_empty() {
        bail!("no corpus files found at {}", input.display());
    }
    Ok(files)
}
