//! Edge-sync auth middleware (§4.I): bearer-token extraction and
//! validation, attached to every request under `/api/v2/edge`.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use hermes_core::error::CoreError;

use crate::http::edge_api::{error_response, ApiError};
use crate::token::{AuthContext, TokenStore, TokenType};

/// Middleware applied to the `/api/v2/edge` router: extracts
/// `Authorization: Bearer <t>`, validates it against any of `edge`/`api`,
/// and attaches the resulting [`AuthContext`] as a request extension.
/// Individual handlers narrow further (e.g. registration-only endpoints).
pub async fn require_edge_or_api_token(
    State(token_store): State<Arc<TokenStore>>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&token_store, &request, &[TokenType::Edge, TokenType::Api]).await {
        Ok(ctx) => {
            tracing::info!(token_id = %ctx.token_id, path = %request.uri(), method = %request.method(), "auth accepted");
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %request.uri(), method = %request.method(), reason = %err, "auth rejected");
            error_response(err)
        }
    }
}

async fn authenticate(
    token_store: &TokenStore,
    request: &Request,
    allowed: &[TokenType],
) -> Result<AuthContext, ApiError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::from_core(CoreError::Unauthorized("missing Authorization header".to_string())))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::from_core(CoreError::Unauthorized("malformed Authorization header".to_string())))?;

    token_store
        .validate(token, allowed)
        .await
        .map_err(ApiError::from_core)
}

impl ApiError {
    pub fn status_for(core: &CoreError) -> StatusCode {
        match core {
            CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::CapabilityUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Cancelled => StatusCode::from_u16(499).unwrap(),
            CoreError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> TokenStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        TokenStore::new(pool)
    }

    #[tokio::test]
    async fn s3_missing_header_is_unauthorized() {
        let token_store = store().await;
        let request = Request::builder().uri("/api/v2/edge/stats").body(Body::empty()).unwrap();
        let err = authenticate(&token_store, &request, &[TokenType::Edge]).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn s3_garbage_bearer_is_unauthorized() {
        let token_store = store().await;
        let request = Request::builder()
            .uri("/api/v2/edge/stats")
            .header("Authorization", "Bearer garbage")
            .body(Body::empty())
            .unwrap();
        let err = authenticate(&token_store, &request, &[TokenType::Edge]).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn s3_valid_edge_token_succeeds() {
        let token_store = store().await;
        let created = token_store.create(TokenType::Edge, None).await.unwrap();
        let request = Request::builder()
            .uri("/api/v2/edge/stats")
            .header("Authorization", format!("Bearer {}", created.plaintext))
            .body(Body::empty())
            .unwrap();
        assert!(authenticate(&token_store, &request, &[TokenType::Edge]).await.is_ok());
    }

    #[tokio::test]
    async fn s3_registration_token_is_forbidden_for_edge_endpoint() {
        let token_store = store().await;
        let created = token_store.create(TokenType::Registration, None).await.unwrap();
        let request = Request::builder()
            .uri("/api/v2/edge/stats")
            .header("Authorization", format!("Bearer {}", created.plaintext))
            .body(Body::empty())
            .unwrap();
        let err = authenticate(&token_store, &request, &[TokenType::Edge, TokenType::Api]).await.unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }
}
