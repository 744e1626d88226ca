use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sift_core::corpus::{load_corpus, PlainTextExtractor};
use sift_core::index::IndexBuilder;
use sift_core::pagerank::PageRankParams;
use sift_core::persist::IndexPaths;
use sift_core::pipeline::{build_pagerank, build_scope, write_documents};
use sift_core::tfidf;
use sift_core::tokenizer::Tokenizer;
use sift_core::{CancelToken, ContentScope, SearchOptions};
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use tower::ServiceExt;

fn build_tiny_index(dir: &Path) -> IndexPaths {
    let corpus = dir.join("corpus.jsonl");
    fs::write(
        &corpus,
        [
            r#"{"title":"Rust","url":"http://rust","body":"rust is great. rust systems programming.","links":"http://learn"}"#,
            r#"{"title":"Learn","url":"http://learn","body":"learning rust","links":""}"#,
            r#"{"title":"Go","url":"http://go","body":"go programming","links":"http://rust"}"#,
        ]
        .join("\n"),
    )
    .unwrap();

    let paths = IndexPaths::new(dir.join("index"));
    let docs = load_corpus(&[corpus]).unwrap();
    let tok = Tokenizer::new();
    let ex = PlainTextExtractor;
    let cancel = CancelToken::new();
    write_documents(&paths, &docs, "2024-01-01T00:00:00Z".into(), false).unwrap();
    for scope in ContentScope::ALL {
        let builder = IndexBuilder::new(&tok, &ex).scope(scope).cancel_token(cancel.clone());
        build_scope(&paths, &docs, &builder).unwrap();
        tfidf::compute_scope(&paths, scope, 1).unwrap();
    }
    build_pagerank(&paths, &docs, &PageRankParams::default(), &cancel).unwrap();
    paths
}

fn app(dir: &Path) -> Router {
    let paths = build_tiny_index(dir);
    server::build_app(&paths.root, &dir.join("query_log.txt"), SearchOptions::default()).unwrap()
}

async fn call(app: Router, uri: &str) -> (StatusCode, Bytes) {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let dir = tempdir().unwrap();
    let app = app(dir.path());

    let (status, body) = call(app.clone(), "/search?q=rust").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    let arr = json["results"].as_array().unwrap();
    assert_eq!(json["total_hits"].as_u64(), Some(2));
    assert_eq!(arr.len(), 2);
    assert!(arr[0]["score"].as_f64().unwrap() >= arr[1]["score"].as_f64().unwrap());
    assert!(arr.iter().all(|r| r["preview"].is_string()));

    let (_, body) = call(app.clone(), "/search?q=rust+programming&k=1").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_hits"].as_u64(), Some(1));
    assert_eq!(json["results"][0]["url"], "http://rust");

    let (_, body) = call(app, "/history").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["queries"], serde_json::json!([["rust"], ["rust", "programming"]]));
}

#[tokio::test]
async fn bad_scope_is_rejected() {
    let dir = tempdir().unwrap();
    let (status, _) = call(app(dir.path()), "/search?q=rust&scope=images").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_query_returns_no_hits() {
    let dir = tempdir().unwrap();
    let (status, body) = call(app(dir.path()), "/search?q=").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_hits"].as_u64(), Some(0));
}

#[tokio::test]
async fn associate_and_doc_lookup() {
    let dir = tempdir().unwrap();
    let app = app(dir.path());

    let (status, body) = call(app.clone(), "/associate?q=prog").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["terms"], serde_json::json!(["programming"]));

    let (status, body) = call(app.clone(), "/doc/2").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["url"], "http://learn");
    assert_eq!(json["preview"], "learning rust");

    let (status, _) = call(app, "/doc/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn concurrent_searches_all_reach_the_log() {
    let dir = tempdir().unwrap();
    let app = app(dir.path());
    let queries = ["/search?q=rust", "/search?q=programming", "/search?q=go", "/search?q=learning"];

    let mut handles = Vec::new();
    for _ in 0..2 {
        for q in queries {
            handles.push(tokio::spawn(call(app.clone(), q)));
        }
    }
    for h in handles {
        let (status, _) = h.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    // rust: 2 hits, programming: 2, go: 1, learning: 1; each search ran twice.
    let log = fs::read_to_string(dir.path().join("query_log.txt")).unwrap();
    assert_eq!(log.lines().count(), 12);

    let (_, body) = call(app, "/history?n=10").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    let mut seen: Vec<String> = json["queries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q[0].as_str().unwrap().to_string())
        .collect();
    seen.sort();
    assert_eq!(seen, vec!["go", "learning", "programming", "rust"]);
}
