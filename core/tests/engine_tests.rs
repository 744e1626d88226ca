use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use sift_core::corpus::{load_corpus, PlainTextExtractor};
use sift_core::history::QueryLog;
use sift_core::index::IndexBuilder;
use sift_core::pagerank::PageRankParams;
use sift_core::persist::{list_shards, load_shard, IndexPaths};
use sift_core::pipeline::{build_pagerank, build_scope, write_documents};
use sift_core::query::NO_CONTENT;
use sift_core::tfidf::{self, compute, document_frequency, PostingsShard};
use sift_core::tokenizer::Tokenizer;
use sift_core::{CancelToken, Cancelled, ContentScope, DocId, Posting, SearchOptions, Searcher, ShardKey, WeightedShard};

const CORPUS: &[&str] = &[
    r#"{"title":"Cats","url":"http://a","anchor_texts":"","body":"cat cat dog","links":"http://b"}"#,
    r#"{"title":"Dogs","url":"http://b","anchor_texts":"","body":"cat bird","links":"http://c"}"#,
    r#"{"title":"Birds","url":"http://c","anchor_texts":"","body":"bird","links":""}"#,
    r#"{"title":"Fish","url":"http://d","anchor_texts":"","body":"fish\nsecond line\nthird\nfourth","links":["http://c"]}"#,
];

struct Fixture {
    _dir: tempfile::TempDir,
    paths: IndexPaths,
    corpus: PathBuf,
}

fn write_corpus(dir: &Path) -> PathBuf {
    let path = dir.join("corpus.jsonl");
    let mut f = std::fs::File::create(&path).unwrap();
    for row in CORPUS {
        writeln!(f, "{row}").unwrap();
    }
    path
}

fn build(workers: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write_corpus(dir.path());
    let paths = IndexPaths::new(dir.path().join("index"));
    run_pipeline(&paths, &corpus, workers);
    Fixture { _dir: dir, paths, corpus }
}

fn run_pipeline(paths: &IndexPaths, corpus: &Path, workers: usize) {
    let docs = load_corpus(&[corpus.to_path_buf()]).unwrap();
    let tok = Tokenizer::new();
    let ex = PlainTextExtractor;
    let cancel = CancelToken::new();
    write_documents(paths, &docs, "2026-01-01T00:00:00Z".into(), false).unwrap();
    for scope in [ContentScope::Full, ContentScope::Title] {
        let builder = IndexBuilder::new(&tok, &ex).scope(scope).chunk_size(1).workers(workers).cancel_token(cancel.clone());
        build_scope(paths, &docs, &builder).unwrap();
        tfidf::compute_scope(paths, scope, workers).unwrap();
    }
    let params = PageRankParams { workers, ..PageRankParams::default() };
    build_pagerank(paths, &docs, &params, &cancel).unwrap();
}

fn searcher(paths: &IndexPaths) -> Searcher {
    Searcher::open(paths.clone(), SearchOptions::default()).unwrap()
}

fn terms(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn ids(results: &[sift_core::SearchResult]) -> BTreeSet<DocId> {
    results.iter().map(|r| r.doc_id).collect()
}

fn tfidf_shard(paths: &IndexPaths, key: ShardKey) -> WeightedShard {
    load_shard(&paths.tfidf_dir(ContentScope::Full), key).unwrap().unwrap()
}

#[test]
fn score_is_tfidf_times_pagerank() {
    let fx = build(2);
    let s = searcher(&fx.paths);
    let results = s.query(ContentScope::Full, &terms(&["cat"]), &[]);
    assert_eq!(ids(&results), BTreeSet::from([1, 2]));

    let cat = &tfidf_shard(&fx.paths, ShardKey::Alpha('c'))["cat"];
    for r in &results {
        let w = cat.iter().find(|p| p.doc_id == r.doc_id).unwrap().weight;
        let expected = w * s.pagerank().get(&r.url);
        assert!((r.score - expected).abs() < 1e-15);
    }
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn conjunction_is_intersection_of_single_term_results() {
    let fx = build(1);
    let s = searcher(&fx.paths);
    let cat = ids(&s.query(ContentScope::Full, &terms(&["cat"]), &[]));
    let bird = ids(&s.query(ContentScope::Full, &terms(&["bird"]), &[]));
    let both = ids(&s.query(ContentScope::Full, &terms(&["cat", "bird"]), &[]));
    assert_eq!(both, cat.intersection(&bird).copied().collect());
    assert_eq!(both, BTreeSet::from([2]));
    assert!(s.query(ContentScope::Full, &terms(&["cat", "unicorn"]), &[]).is_empty());
    assert!(s.query(ContentScope::Full, &[], &[]).is_empty());
}

#[test]
fn wildcards_expand_within_and_across_shards() {
    let fx = build(1);
    let s = searcher(&fx.paths);
    // "cats" only appears in doc 1's title.
    assert_eq!(ids(&s.query(ContentScope::Full, &terms(&["ca*"]), &[])), BTreeSet::from([1, 2]));
    assert_eq!(ids(&s.query(ContentScope::Full, &terms(&["?at"]), &[])), BTreeSet::from([1, 2]));
    assert_eq!(ids(&s.query(ContentScope::Full, &terms(&["*ish"]), &[])), BTreeSet::from([4]));
    assert!(s.query(ContentScope::Full, &terms(&["ca?"]), &[]).iter().all(|r| r.doc_id != 3));
}

#[test]
fn history_only_reorders_never_filters() {
    let fx = build(1);
    let s = searcher(&fx.paths);
    let plain = s.query(ContentScope::Full, &terms(&["cat"]), &[]);
    let boosted = s.query(ContentScope::Full, &terms(&["cat"]), &terms(&["dog"]));
    assert_eq!(ids(&plain), ids(&boosted));
    let d1_plain = plain.iter().find(|r| r.doc_id == 1).unwrap().score;
    let d1_boosted = boosted.iter().find(|r| r.doc_id == 1).unwrap().score;
    assert!(d1_boosted > d1_plain);
    // Doc 2 has no "dog": cosine 0, multiplier 1.
    let d2_plain = plain.iter().find(|r| r.doc_id == 2).unwrap().score;
    let d2_boosted = boosted.iter().find(|r| r.doc_id == 2).unwrap().score;
    assert_eq!(d2_plain, d2_boosted);
}

#[test]
fn df_survives_the_round_trip() {
    let fx = build(3);
    let in_dir = fx.paths.inverted_dir(ContentScope::Full);
    for key in list_shards(&in_dir).unwrap() {
        let inverted: PostingsShard = load_shard(&in_dir, key).unwrap().unwrap();
        let weighted = tfidf_shard(&fx.paths, key);
        for (term, postings) in &inverted {
            let df = document_frequency(postings);
            assert!(df as usize <= CORPUS.len());
            assert_eq!(weighted[term].len() as u32, df, "term {term}");
            assert!(weighted[term].iter().all(|p| p.weight >= 0.0));
        }
    }
}

#[test]
fn term_frequency_scales_weight() {
    let mut shard = PostingsShard::new();
    let p = |doc_id, position| Posting { doc_id, position };
    shard.insert("cat".into(), vec![p(1, 0), p(1, 2), p(2, 0)]);
    let lengths = [(1, 4), (2, 4)].into_iter().collect();
    let w = compute(&shard, &lengths, 10);
    let idf = (10f64 / 3.0).ln();
    assert!((w["cat"][0].weight - 0.5 * idf).abs() < 1e-12);
    assert!((w["cat"][1].weight - 0.25 * idf).abs() < 1e-12);
}

#[test]
fn rarer_terms_weigh_more() {
    let mut shard = PostingsShard::new();
    let p = |doc_id, position| Posting { doc_id, position };
    shard.insert("rare".into(), vec![p(1, 0)]);
    shard.insert("common".into(), vec![p(1, 1), p(2, 0), p(3, 0)]);
    let lengths = [(1, 2), (2, 2), (3, 2)].into_iter().collect();
    let w = compute(&shard, &lengths, 100);
    assert!(w["rare"][0].weight > w["common"][0].weight);
}

#[test]
fn rebuild_overwrites_instead_of_appending() {
    let fx = build(2);
    let first = tfidf_shard(&fx.paths, ShardKey::Alpha('c'));
    let inverted_before: BTreeMap<String, Vec<Posting>> =
        load_shard(&fx.paths.inverted_dir(ContentScope::Full), ShardKey::Alpha('c')).unwrap().unwrap();
    run_pipeline(&fx.paths, &fx.corpus, 2);
    let inverted_after: BTreeMap<String, Vec<Posting>> =
        load_shard(&fx.paths.inverted_dir(ContentScope::Full), ShardKey::Alpha('c')).unwrap().unwrap();
    assert_eq!(inverted_before, inverted_after);
    assert_eq!(first, tfidf_shard(&fx.paths, ShardKey::Alpha('c')));
}

#[test]
fn title_scope_ignores_bodies() {
    let fx = build(1);
    let s = searcher(&fx.paths);
    assert!(s.query(ContentScope::Title, &terms(&["bird"]), &[]).is_empty());
    assert_eq!(ids(&s.query(ContentScope::Title, &terms(&["birds"]), &[])), BTreeSet::from([3]));
}

#[test]
fn search_logs_and_feeds_history() {
    let fx = build(1);
    let s = searcher(&fx.paths);
    let log = QueryLog::new(fx.paths.root.join("query_log.txt"));
    let first = s.search(ContentScope::Full, &terms(&["cat"]), &log).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(log.recent(5).unwrap(), vec![terms(&["cat"])]);

    s.search(ContentScope::Full, &terms(&["unicorn"]), &log).unwrap();
    assert_eq!(log.recent(5).unwrap(), vec![terms(&["cat"])]);
}

#[test]
fn previews_cover_top_results_only() {
    let fx = build(1);
    let opts = SearchOptions { top_preview: 1, preview_lines: 3, ..SearchOptions::default() };
    let s = Searcher::open(fx.paths.clone(), opts).unwrap();
    let fish = s.query(ContentScope::Full, &terms(&["fish"]), &[]);
    assert_eq!(fish[0].preview.as_deref(), Some("fish\nsecond line\nthird"));

    let cats = s.query(ContentScope::Full, &terms(&["cat"]), &[]);
    assert!(cats[0].preview.is_some());
    assert!(cats[1].preview.is_none());

    std::fs::remove_file(fx.paths.root.join("texts/4.txt")).unwrap();
    let fish = s.query(ContentScope::Full, &terms(&["fish"]), &[]);
    assert_eq!(fish[0].preview.as_deref(), Some(NO_CONTENT));
}

#[test]
fn missing_pagerank_scores_zero() {
    let fx = build(1);
    std::fs::remove_file(fx.paths.pagerank()).unwrap();
    let s = searcher(&fx.paths);
    let results = s.query(ContentScope::Full, &terms(&["cat"]), &[]);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.score == 0.0));
}

#[test]
fn missing_document_table_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Searcher::open(IndexPaths::new(dir.path()), SearchOptions::default()).is_err());
}

#[test]
fn association_finds_containing_terms() {
    let fx = build(1);
    let s = searcher(&fx.paths);
    assert_eq!(s.associate(ContentScope::Full, "ca"), vec!["cat", "cats"]);
    assert!(s.associate(ContentScope::Full, "").is_empty());
}

#[test]
fn cancelled_build_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write_corpus(dir.path());
    let docs = load_corpus(&[corpus]).unwrap();
    let paths = IndexPaths::new(dir.path().join("index"));
    let tok = Tokenizer::new();
    let ex = PlainTextExtractor;
    let cancel = CancelToken::new();
    cancel.cancel();
    let builder = IndexBuilder::new(&tok, &ex).chunk_size(1).workers(2).cancel_token(cancel);
    let err = build_scope(&paths, &docs, &builder).unwrap_err();
    assert!(err.downcast_ref::<Cancelled>().is_some());
    assert!(list_shards(&paths.inverted_dir(ContentScope::Full)).unwrap().is_empty());
}

/// Index `rows` into a fresh directory with the given tokenizer settings.
fn build_rows(dir: &Path, rows: &[serde_json::Value], stemming: bool) -> IndexPaths {
    let corpus = dir.join("rows.jsonl");
    let mut f = std::fs::File::create(&corpus).unwrap();
    for row in rows {
        writeln!(f, "{row}").unwrap();
    }
    drop(f);

    let docs = load_corpus(&[corpus]).unwrap();
    let paths = IndexPaths::new(dir.join("index"));
    let tok = Tokenizer::new().with_stemming(stemming);
    let ex = PlainTextExtractor;
    write_documents(&paths, &docs, "2026-01-01T00:00:00Z".into(), stemming).unwrap();
    for scope in ContentScope::ALL {
        let builder = IndexBuilder::new(&tok, &ex).scope(scope).chunk_size(2).workers(2);
        build_scope(&paths, &docs, &builder).unwrap();
        tfidf::compute_scope(&paths, scope, 2).unwrap();
    }
    build_pagerank(&paths, &docs, &PageRankParams::default(), &CancelToken::new()).unwrap();
    paths
}

#[test]
fn stemmed_index_matches_inflected_queries() {
    let dir = tempfile::tempdir().unwrap();
    let rows = [
        serde_json::json!({"title": "Shoes", "url": "http://shoes", "body": "running shoes for trails"}),
        serde_json::json!({"title": "Boots", "url": "http://boots", "body": "hiking boots"}),
        serde_json::json!({"title": "Socks", "url": "http://socks", "body": "wool socks"}),
    ];
    let paths = build_rows(dir.path(), &rows, true);
    let s = searcher(&paths);
    for q in ["running", "runs", "Running,"] {
        assert_eq!(ids(&s.query(ContentScope::Full, &terms(&[q]), &[])), BTreeSet::from([1]), "query {q}");
    }
}

#[test]
fn punctuation_and_stopwords_in_queries_are_ignored() {
    let fx = build(1);
    let s = searcher(&fx.paths);
    let plain = ids(&s.query(ContentScope::Full, &terms(&["cat"]), &[]));
    assert_eq!(ids(&s.query(ContentScope::Full, &terms(&["cat,"]), &[])), plain);
    assert_eq!(ids(&s.query(ContentScope::Full, &terms(&["the", "'cat'"]), &[])), plain);
}

#[test]
fn words_inside_han_runs_are_searchable() {
    let dir = tempfile::tempdir().unwrap();
    let rows = [
        serde_json::json!({"title": "学院", "url": "http://cs", "body": "南开大学计算机学院"}),
        serde_json::json!({"title": "图书馆", "url": "http://lib", "body": "南开大学图书馆开放时间"}),
        serde_json::json!({"title": "other", "url": "http://x", "body": "plain english page"}),
    ];
    let paths = build_rows(dir.path(), &rows, false);
    let s = searcher(&paths);
    assert_eq!(ids(&s.query(ContentScope::Full, &terms(&["计算机"]), &[])), BTreeSet::from([1]));
    assert_eq!(ids(&s.query(ContentScope::Full, &terms(&["图书馆"]), &[])), BTreeSet::from([2]));
}

#[test]
fn file_links_use_extracted_text_and_missing_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("report.txt");
    std::fs::write(&report, "quarterly revenue").unwrap();
    let missing = dir.path().join("gone.txt");
    let rows = [
        serde_json::json!({"title": "Home", "url": "http://files", "body": "annual overview", "links": "http://files/report.pdf"}),
        serde_json::json!({"title": "Report", "url": "http://files/report.pdf", "body": report.to_str().unwrap()}),
        serde_json::json!({"title": "Sheet", "url": "http://files/missing.docx", "body": missing.to_str().unwrap()}),
        serde_json::json!({"title": "About", "url": "http://about", "body": "about revenue"}),
    ];
    let paths = build_rows(dir.path(), &rows, false);
    let s = searcher(&paths);

    assert_eq!(ids(&s.query(ContentScope::Files, &terms(&["quarterly"]), &[])), BTreeSet::from([2]));
    assert_eq!(ids(&s.query(ContentScope::Full, &terms(&["revenue"]), &[])), BTreeSet::from([2, 4]));
    assert!(s.query(ContentScope::Files, &terms(&["annual"]), &[]).is_empty());
    assert!(s.query(ContentScope::Full, &terms(&["missing"]), &[]).is_empty());
    assert_eq!(ids(&s.query(ContentScope::Full, &terms(&["annual"]), &[])), BTreeSet::from([1]));

    let hit = &s.query(ContentScope::Files, &terms(&["quarterly"]), &[])[0];
    assert_eq!(hit.preview.as_deref(), Some("quarterly revenue"));
}

#[test]
fn idf_uses_corpus_size_in_every_scope() {
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("report.txt");
    std::fs::write(&report, "quarterly revenue").unwrap();
    let rows = [
        serde_json::json!({"title": "A", "url": "http://a", "body": "alpha"}),
        serde_json::json!({"title": "B", "url": "http://b", "body": "beta"}),
        serde_json::json!({"title": "C", "url": "http://c", "body": "gamma"}),
        serde_json::json!({"title": "Report", "url": "http://files/report.pdf", "body": report.to_str().unwrap()}),
    ];
    let paths = build_rows(dir.path(), &rows, false);
    let shard: WeightedShard = load_shard(&paths.tfidf_dir(ContentScope::Files), ShardKey::Alpha('q')).unwrap().unwrap();
    // Tokens: http files report pdf quarterly revenue.
    let expected = 1.0 / 6.0 * (4f64 / 2.0).ln();
    assert!((shard["quarterly"][0].weight - expected).abs() < 1e-12);
}
