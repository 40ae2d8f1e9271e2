use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use crawler::{Fetcher, HttpFetcher, IndexingError, IndexingService};
use search_core::stats::{statistics, Statistics};
use search_core::{AppConfig, IndexStore, LemmaExtractor, SearchEngine, SearchError, SearchHit, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub indexing: Arc<IndexingService>,
    pub search: Arc<SearchEngine>,
    pub store: Arc<IndexStore>,
    pub default_limit: usize,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<IndexStore>, fetcher: Arc<dyn Fetcher>, extractor: LemmaExtractor) -> Self {
        let search = SearchEngine::new(store.clone(), extractor.clone(), config.search.clone());
        let default_limit = config.search.default_limit;
        let indexing = IndexingService::new(config, store.clone(), fetcher, extractor);
        Self { indexing: Arc::new(indexing), search: Arc::new(search), store, default_limit }
    }
}

/// Opens the configured store and wires the HTTP fetcher into the services.
pub fn build_state(config: &AppConfig) -> Result<AppState> {
    let store = Arc::new(IndexStore::open(&config.storage.path)?);
    let fetcher = Arc::new(HttpFetcher::new(&config.crawl)?);
    Ok(AppState::new(config.clone(), store, fetcher, LemmaExtractor::default()))
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/statistics", get(statistics_handler))
        .route("/api/startIndexing", get(start_indexing_handler))
        .route("/api/stopIndexing", get(stop_indexing_handler))
        .route("/api/indexPage", post(index_page_handler))
        .route("/api/search", get(search_handler))
        .with_state(state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

// CORS_ALLOW_ORIGIN is a comma-separated list; unset or unparsable means Any.
fn cors_layer() -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let origins: Vec<_> = std::env::var("CORS_ALLOW_ORIGIN")
        .map(|val| val.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    if origins.is_empty() {
        base.allow_origin(Any)
    } else {
        base.allow_origin(AllowOrigin::list(origins))
    }
}

#[derive(Serialize)]
pub struct Ack {
    pub result: bool,
}

const OK: Ack = Ack { result: true };

#[derive(Serialize)]
pub struct StatisticsResponse {
    pub result: bool,
    pub statistics: Statistics,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub result: bool,
    pub count: usize,
    pub data: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    result: bool,
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error = %self.message, "request failed");
        }
        (self.status, Json(ErrorBody { result: false, error: self.message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<IndexingError> for ApiError {
    fn from(e: IndexingError) -> Self {
        match e {
            IndexingError::Store(inner) => inner.into(),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::Store(inner) => inner.into(),
            other => Self::bad_request(other.to_string()),
        }
    }
}

pub async fn statistics_handler(State(state): State<AppState>) -> Result<Json<StatisticsResponse>, ApiError> {
    let statistics = statistics(&state.store)?;
    Ok(Json(StatisticsResponse { result: true, statistics }))
}

/// Launches a full crawl and answers immediately; the run finalizes in the
/// background.
pub async fn start_indexing_handler(State(state): State<AppState>) -> Result<Json<Ack>, ApiError> {
    let run = state.indexing.begin_indexing()?;
    tokio::spawn(async move {
        if let Err(e) = run.wait().await {
            tracing::error!(error = %e, "indexing run failed");
        }
    });
    Ok(Json(OK))
}

pub async fn stop_indexing_handler(State(state): State<AppState>) -> Result<Json<Ack>, ApiError> {
    state.indexing.stop_indexing()?;
    Ok(Json(OK))
}

#[derive(Deserialize)]
pub struct IndexPageParams {
    pub url: Option<String>,
}

pub async fn index_page_handler(
    State(state): State<AppState>,
    Query(params): Query<IndexPageParams>,
) -> Result<Json<Ack>, ApiError> {
    let url = params
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("url parameter is required"))?;
    state.indexing.index_page(url.trim()).await?;
    Ok(Json(OK))
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    pub site: Option<String>,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let limit = params.limit.unwrap_or(state.default_limit);
    let results = state.search.search(&params.query, params.site.as_deref(), params.offset, limit)?;
    Ok(Json(SearchResponse { result: true, count: results.count, data: results.data }))
}
