//! Sync HTTP surface: `/api/v2/edge/*` (§4.H, §6.1).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use hermes_core::error::CoreError;

use crate::sync::queue::SyncQueue;
use crate::sync::registry::{RegisterOutcome, RegistryPatch, RegistryPayload, RegistryRow, SearchFilter, SyncRegistry};
use crate::token::TokenStore;

#[derive(Clone)]
pub struct EdgeApiState {
    pub registry: Arc<SyncRegistry>,
    pub queue: Arc<SyncQueue>,
    pub token_store: Arc<TokenStore>,
}

/// JSON error body: `{error: {code, message}}` (§7 "no stack traces").
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct ApiError {
    pub status: StatusCode,
    pub core: CoreError,
}

impl ApiError {
    pub fn from_core(core: CoreError) -> Self {
        ApiError { status: Self::status_for(&core), core }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.core)
    }
}

pub fn error_response(err: ApiError) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: err.core.kind().to_string(),
            message: err.core.to_string(),
        },
    };
    (err.status, Json(body)).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(self)
    }
}

/// Build the `/api/v2/edge` router. Auth is applied by the caller via
/// [`crate::http::auth::require_edge_or_api_token`] as a layer, keeping
/// this module free of auth concerns beyond reading the attached
/// [`crate::token::AuthContext`] extension where a stricter type check is
/// needed.
pub fn router(state: EdgeApiState) -> Router {
    Router::new()
        .route("/documents/register", post(register))
        .route("/documents/:uuid/sync", put(patch_sync))
        .route("/documents/sync-status", get(sync_status))
        .route("/documents/search", get(search))
        .route("/documents/:uuid", get(get_document).delete(delete_document))
        .route("/stats", get(stats))
        .with_state(state)
}

#[derive(Deserialize)]
struct RegisterRequest {
    uuid: String,
    title: String,
    document_type: String,
    status: String,
    #[serde(default)]
    owners: Vec<String>,
    #[serde(default)]
    contributors: Vec<String>,
    edge_instance: String,
    provider_id: String,
    product: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    parent_folders: Vec<String>,
    #[serde(default)]
    metadata: serde_json::Value,
    content_hash: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
struct RegisterResponse {
    uuid: String,
    created: bool,
    updated: bool,
    updated_fields: Vec<String>,
}

impl From<RegisterOutcome> for RegisterResponse {
    fn from(o: RegisterOutcome) -> Self {
        RegisterResponse {
            uuid: o.uuid,
            created: o.created,
            updated: o.updated,
            updated_fields: o.updated_fields,
        }
    }
}

async fn register(
    State(state): State<EdgeApiState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let payload = RegistryPayload {
        uuid: req.uuid,
        title: req.title,
        document_type: req.document_type,
        status: req.status,
        owners: req.owners,
        contributors: req.contributors,
        edge_instance: req.edge_instance,
        provider_id: req.provider_id,
        product: req.product,
        tags: req.tags,
        parent_folders: req.parent_folders,
        metadata: req.metadata,
        content_hash: req.content_hash,
        created_at: req.created_at,
        updated_at: req.updated_at,
    };

    let outcome = state.registry.register(payload).await.map_err(ApiError::from_core)?;
    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(outcome.into())))
}

#[derive(Deserialize)]
struct PatchRequest {
    title: Option<String>,
    status: Option<String>,
    owners: Option<Vec<String>>,
    contributors: Option<Vec<String>>,
    product: Option<String>,
    tags: Option<Vec<String>>,
    parent_folders: Option<Vec<String>>,
    metadata: Option<serde_json::Value>,
    content_hash: Option<String>,
}

async fn patch_sync(
    State(state): State<EdgeApiState>,
    Path(uuid): Path<String>,
    Json(req): Json<PatchRequest>,
) -> Result<Json<RegistryRow>, ApiError> {
    let patch = RegistryPatch {
        title: req.title,
        status: req.status,
        owners: req.owners,
        contributors: req.contributors,
        product: req.product,
        tags: req.tags,
        parent_folders: req.parent_folders,
        metadata: req.metadata,
        content_hash: req.content_hash,
        updated_at: None,
    };
    let row = state.registry.patch(&uuid, patch).await.map_err(ApiError::from_core)?;
    Ok(Json(row))
}

async fn get_document(
    State(state): State<EdgeApiState>,
    Path(uuid): Path<String>,
) -> Result<Json<RegistryRow>, ApiError> {
    let row = state.registry.get(&uuid).await.map_err(ApiError::from_core)?;
    Ok(Json(row))
}

async fn delete_document(
    State(state): State<EdgeApiState>,
    Path(uuid): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete(&uuid).await.map_err(ApiError::from_core)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SyncStatusQuery {
    edge_instance: String,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Serialize)]
struct SyncStatusResponse {
    edge_instance: String,
    documents: Vec<RegistryRow>,
}

async fn sync_status(
    State(state): State<EdgeApiState>,
    Query(query): Query<SyncStatusQuery>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let filter = SearchFilter {
        edge_instance: Some(query.edge_instance.clone()),
        limit: query.limit.unwrap_or(50),
        ..Default::default()
    };
    let documents = state.registry.search(filter).await.map_err(ApiError::from_core)?;
    Ok(Json(SyncStatusResponse { edge_instance: query.edge_instance, documents }))
}

#[derive(Deserialize, Default)]
struct SearchQuery {
    q: Option<String>,
    document_type: Option<String>,
    status: Option<String>,
    product: Option<String>,
    edge_instance: Option<String>,
    limit: Option<i64>,
}

async fn search(
    State(state): State<EdgeApiState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<RegistryRow>>, ApiError> {
    let filter = SearchFilter {
        text: query.q,
        doc_type: query.document_type,
        status: query.status,
        product: query.product,
        edge_instance: query.edge_instance,
        limit: query.limit.unwrap_or(50),
    };
    let results = state.registry.search(filter).await.map_err(ApiError::from_core)?;
    Ok(Json(results))
}

#[derive(Deserialize, Default)]
struct StatsQuery {
    edge_instance: Option<String>,
}

async fn stats(
    State(state): State<EdgeApiState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<crate::sync::registry::RegistryStats>, ApiError> {
    let stats = state.registry.stats(query.edge_instance.as_deref()).await.map_err(ApiError::from_core)?;
    Ok(Json(stats))
}
