use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::StatusCode, routing::get, Json, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sift_core::history::QueryLog;
use sift_core::persist::IndexPaths;
use sift_core::query::flatten_history;
use sift_core::{ContentScope, DocId, SearchOptions, SearchResult, Searcher};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

type ApiError = (StatusCode, String);

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub scope: Option<String>,
    /// Cap on returned results; all matches when absent.
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: Vec<String>,
    pub scope: ContentScope,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchResult>,
}

#[derive(Deserialize)]
pub struct AssociateParams {
    pub q: String,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Serialize)]
pub struct AssociateResponse {
    pub seed: String,
    pub terms: Vec<String>,
}

#[derive(Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub n: Option<usize>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub queries: Vec<Vec<String>>,
}

#[derive(Clone)]
pub struct AppState {
    pub searcher: Arc<Searcher>,
    /// Held for a whole search, from reading history to appending results.
    pub log: Arc<Mutex<QueryLog>>,
}

/// Open the index once and keep its shards cached for the process lifetime.
pub fn build_app(index_dir: &std::path::Path, log_path: &std::path::Path, opts: SearchOptions) -> Result<Router> {
    let opts = SearchOptions { shared_cache: true, ..opts };
    let searcher = Searcher::open(IndexPaths::new(index_dir), opts)?;
    let state = AppState { searcher: Arc::new(searcher), log: Arc::new(Mutex::new(QueryLog::new(log_path))) };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/associate", get(associate_handler))
        .route("/history", get(history_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

fn parse_scope(raw: Option<&str>) -> Result<ContentScope, ApiError> {
    match raw {
        None | Some("") => Ok(ContentScope::default()),
        Some(s) => s.parse().map_err(|e: anyhow::Error| (StatusCode::BAD_REQUEST, e.to_string())),
    }
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let scope = parse_scope(params.scope.as_deref())?;
    let terms: Vec<String> = params.q.split_whitespace().map(str::to_string).collect();
    if terms.is_empty() {
        return Ok(Json(SearchResponse { query: terms, scope, took_s: start.elapsed().as_secs_f64(), total_hits: 0, results: vec![] }));
    }

    let worker_terms = terms.clone();
    let results = tokio::task::spawn_blocking(move || -> Result<Vec<SearchResult>> {
        let opts = state.searcher.options();
        // Held from reading history until the results are appended.
        let log = state.log.lock();
        let history = flatten_history(&log.recent(opts.history_len)?);
        let results = state.searcher.query(scope, &worker_terms, &history);
        let top: Vec<String> = results.iter().take(opts.top_preview).map(|r| r.url.clone()).collect();
        log.append(&worker_terms, &top)?;
        Ok(results)
    })
    .await
    .map_err(internal)?
    .map_err(internal)?;

    let total_hits = results.len();
    let results = match params.k {
        Some(k) => results.into_iter().take(k).collect(),
        None => results,
    };
    let took_s = start.elapsed().as_secs_f64();
    tracing::info!(query = ?terms, %scope, total_hits, took_s, "search");
    Ok(Json(SearchResponse { query: terms, scope, took_s, total_hits, results }))
}

pub async fn associate_handler(State(state): State<AppState>, Query(params): Query<AssociateParams>) -> Result<Json<AssociateResponse>, ApiError> {
    let scope = parse_scope(params.scope.as_deref())?;
    let seed = params.q;
    let terms = tokio::task::spawn_blocking({
        let seed = seed.clone();
        move || state.searcher.associate(scope, &seed)
    })
    .await
    .map_err(internal)?;
    Ok(Json(AssociateResponse { seed, terms }))
}

pub async fn history_handler(State(state): State<AppState>, Query(params): Query<HistoryParams>) -> Result<Json<HistoryResponse>, ApiError> {
    let n = params.n.unwrap_or(state.searcher.options().history_len);
    let queries = state.log.lock().recent(n).map_err(internal)?;
    Ok(Json(HistoryResponse { queries }))
}

pub async fn doc_handler(State(state): State<AppState>, Path(doc_id): Path<DocId>) -> Result<Json<serde_json::Value>, ApiError> {
    tokio::task::spawn_blocking(move || -> Result<Json<serde_json::Value>, ApiError> {
        let meta = state.searcher.docs().get(&doc_id).ok_or((StatusCode::NOT_FOUND, "not found".to_string()))?;
        Ok(Json(serde_json::json!({
            "doc_id": doc_id,
            "title": meta.title,
            "url": meta.url,
            "pagerank": state.searcher.pagerank().get(&meta.url),
            "preview": state.searcher.preview(meta),
        })))
    })
    .await
    .map_err(internal)?
}
