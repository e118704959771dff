//! REST API handlers
//!
//! Route groups:
//!
//! - `/public_catalogs/...`: registry, harvesting, search and ingestion dispatch
//! - `/status_reporting/loading_public_stac_records/...`: ingestion status and
//!   the completion callback used by the ingestion microservice
//! - `/stac/...`: proxy onto the target STAC API (reads and collection writes)
//!
//! Errors are rendered as `{"message": "..."}` with a status derived from
//! [`ErrorCategory`].

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, ErrorCategory};
use crate::ingestion::{JobSelector, SearchParameters, TransitionOutcome};
use crate::models::{IngestionCounters, NewCatalog};
use crate::stac::ProxyResponse;

use super::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

/// Error wrapper rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.category() {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Conflict => StatusCode::CONFLICT,
            ErrorCategory::Network => StatusCode::BAD_GATEWAY,
            ErrorCategory::Storage | ErrorCategory::Config | ErrorCategory::Other => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, category = self.0.category().as_str(), "Request failed");
        }
        let body = ErrorResponse {
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Body of `POST /public_catalogs/{id}/items/get`
#[derive(Debug, Default, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub update: bool,
    pub bbox: Option<Vec<f64>>,
    pub datetime: Option<String>,
    pub collections: Option<Vec<String>>,
}

impl From<IngestRequest> for SearchParameters {
    fn from(request: IngestRequest) -> Self {
        SearchParameters {
            update: request.update,
            bbox: request.bbox,
            datetime: request.datetime,
            collections: request.collections,
            ..Default::default()
        }
    }
}

/// Body of `POST /public_catalogs/{id}/items/update`
#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    #[serde(default)]
    pub collections: Vec<String>,
}

/// Body of `POST /public_catalogs/collections/search`
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub bbox: Vec<f64>,
    pub time_interval_timestamp: String,
    pub public_catalog_id: Option<i64>,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/metrics", get(metrics))
        // Catalog registry and harvesting
        .route(
            "/public_catalogs",
            get(list_catalogs).post(register_catalog).delete(remove_all_catalogs),
        )
        .route("/public_catalogs/sync", get(sync_public_catalogs))
        .route("/public_catalogs/collections/search", post(search_collections))
        .route("/public_catalogs/items/update", get(replay_all))
        .route("/public_catalogs/{id}", get(get_catalog).delete(remove_catalog))
        .route("/public_catalogs/{id}/harvest", post(harvest_catalog))
        .route("/public_catalogs/{id}/items/get", post(dispatch_ingestion))
        .route(
            "/public_catalogs/{id}/items/update",
            get(replay_catalog).post(replay_collections),
        )
        // Ingestion status and completion callback
        .route("/status_reporting/loading_public_stac_records", get(list_statuses))
        .route(
            "/status_reporting/loading_public_stac_records/{id}",
            get(get_status).post(complete_status).delete(remove_status),
        )
        // Target STAC API proxy
        .route(
            "/stac/collections",
            get(proxy_collections)
                .post(proxy_create_collection)
                .put(proxy_update_collection),
        )
        .route(
            "/stac/collections/{collection_id}",
            get(proxy_collection).delete(proxy_delete_collection),
        )
        .route("/stac/collections/{collection_id}/items", get(proxy_items))
        .route("/stac/collections/{collection_id}/items/{item_id}", get(proxy_item))
        .with_state(state)
}

// ============================================================================
// Health Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Prometheus exposition
async fn metrics() -> Response {
    match crate::metrics::encode_metrics().map_err(|e| e.to_string()) {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => ApiError(Error::other(format!("Failed to encode metrics: {e}"))).into_response(),
    }
}

// ============================================================================
// Catalog Handlers
// ============================================================================

async fn list_catalogs(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.registry.list()?))
}

async fn register_catalog(
    State(state): State<AppState>,
    Json(request): Json<NewCatalog>,
) -> ApiResult<impl IntoResponse> {
    let catalog = state.registry.register(&request)?;
    Ok((StatusCode::CREATED, Json(catalog)))
}

async fn remove_all_catalogs(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let deleted = state.registry.remove_all()?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn get_catalog(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.registry.get(id)?))
}

async fn remove_catalog(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.registry.remove(id)?))
}

/// Discover public catalogs and harvest them in the background
async fn sync_public_catalogs(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let candidates = state.harvester.discover().await?;
    let count = candidates.len();

    let harvester = state.harvester.clone();
    tokio::spawn(async move {
        harvester.sync_candidates(candidates).await;
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "candidates": count }))))
}

/// Re-harvest one registered catalog in the background
async fn harvest_catalog(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let catalog = state.registry.get(id)?;

    let harvester = state.harvester.clone();
    tokio::spawn(async move {
        match harvester.harvest(&catalog).await {
            Ok(report) => tracing::debug!(catalog_id = id, indexed = report.indexed, "Manual harvest finished"),
            Err(e) => tracing::debug!(catalog_id = id, error = %e, "Manual harvest failed"),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "catalog_id": id }))))
}

async fn search_collections(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<impl IntoResponse> {
    let groups = state.search.search(
        &request.bbox,
        &request.time_interval_timestamp,
        request.public_catalog_id,
    )?;
    Ok(Json(groups))
}

// ============================================================================
// Ingestion Handlers
// ============================================================================

async fn dispatch_ingestion(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<impl IntoResponse> {
    let handle = state.dispatcher.dispatch(id, request.into())?;
    Ok(Json(handle))
}

async fn replay_all(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.dispatcher.replay(&JobSelector::All)?))
}

async fn replay_catalog(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let selector = JobSelector::Catalog {
        catalog_id: id,
        collections: None,
    };
    Ok(Json(state.dispatcher.replay(&selector)?))
}

async fn replay_collections(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ReplayRequest>,
) -> ApiResult<impl IntoResponse> {
    let selector = JobSelector::Catalog {
        catalog_id: id,
        collections: Some(request.collections),
    };
    Ok(Json(state.dispatcher.replay(&selector)?))
}

// ============================================================================
// Status Handlers
// ============================================================================

async fn list_statuses(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.tracker.list()?))
}

async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.tracker.get(id)?))
}

/// Completion callback; answers 201 when applied, 409 with the unchanged row otherwise
async fn complete_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(counters): Json<IngestionCounters>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.tracker.complete(id, &counters)?;
    let status = match outcome {
        TransitionOutcome::Applied(_) => StatusCode::CREATED,
        TransitionOutcome::AlreadyTerminal(_) => StatusCode::CONFLICT,
    };
    Ok((status, Json(outcome.into_status())))
}

async fn remove_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.tracker.remove(id)?))
}

// ============================================================================
// Proxy Handlers
// ============================================================================

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        match self {
            ProxyResponse::Json { status, body } | ProxyResponse::Envelope { status, body } => {
                (status, Json(body)).into_response()
            }
            ProxyResponse::Raw {
                status,
                mut headers,
                body,
            } => {
                // Framing headers are recomputed for the new body
                headers.remove(header::CONTENT_LENGTH);
                headers.remove(header::TRANSFER_ENCODING);
                headers.remove(header::CONNECTION);

                let mut response = Response::new(Body::from(body));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
        }
    }
}

async fn proxy_collections(State(state): State<AppState>) -> ApiResult<ProxyResponse> {
    Ok(state.proxy.collections().await?)
}

async fn proxy_collection(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
) -> ApiResult<ProxyResponse> {
    Ok(state.proxy.collection(&collection_id).await?)
}

async fn proxy_items(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
) -> ApiResult<ProxyResponse> {
    Ok(state.proxy.items(&collection_id).await?)
}

async fn proxy_item(
    State(state): State<AppState>,
    Path((collection_id, item_id)): Path<(String, String)>,
) -> ApiResult<ProxyResponse> {
    Ok(state.proxy.item(&collection_id, &item_id).await?)
}

async fn proxy_create_collection(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> ApiResult<ProxyResponse> {
    Ok(state.proxy.create_collection(&document).await?)
}

async fn proxy_update_collection(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> ApiResult<ProxyResponse> {
    Ok(state.proxy.update_collection(&document).await?)
}

/// Delete on the target, then drop stored requests for the collection
async fn proxy_delete_collection(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
) -> ApiResult<Response> {
    let response = state.proxy.delete_collection(&collection_id).await?;
    if !response.status().is_success() {
        return Ok(response.into_response());
    }

    let removed = state.parameters.remove_for_collection(&collection_id)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "deleted": collection_id,
            "stored_search_parameters_removed": removed,
        })),
    )
        .into_response())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::InvalidBbox("x".into()), StatusCode::BAD_REQUEST),
            (Error::ConvertingTimestamp("x".into()), StatusCode::BAD_REQUEST),
            (Error::CatalogDoesNotExist("1".into()), StatusCode::NOT_FOUND),
            (Error::StatusNotFound(1), StatusCode::NOT_FOUND),
            (
                Error::CatalogAlreadyExists { url: "u".into() },
                StatusCode::CONFLICT,
            ),
            (
                Error::CollectionAlreadyExists("c".into()),
                StatusCode::CONFLICT,
            ),
            (
                Error::InvalidPayload {
                    status: 422,
                    message: "m".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::MicroserviceUnavailable("down".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (Error::other("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }

    #[test]
    fn test_ingest_request_into_parameters() {
        let request: IngestRequest =
            serde_json::from_value(json!({"collections": ["s2"], "bbox": [0, 0, 1, 1]})).unwrap();
        let params: SearchParameters = request.into();
        assert!(!params.update);
        assert_eq!(params.collections, Some(vec!["s2".to_string()]));
        assert_eq!(params.bbox, Some(vec![0.0, 0.0, 1.0, 1.0]));
        assert!(params.source_stac_catalog_url.is_none());
    }
}
