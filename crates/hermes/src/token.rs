//! Service-token store (§3.5, §4.I): hashed bearer tokens with type,
//! expiry, revocation, and rotation.

use chrono::{DateTime, Utc};
use hermes_core::error::{CoreError, CoreResult};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid as RawUuid;

/// Closed set of token types (§3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum TokenType {
    Edge,
    Api,
    Registration,
}

impl TokenType {
    fn as_str(&self) -> &'static str {
        match self {
            TokenType::Edge => "edge",
            TokenType::Api => "api",
            TokenType::Registration => "registration",
        }
    }

    fn parse(s: &str) -> Option<TokenType> {
        match s {
            "edge" => Some(TokenType::Edge),
            "api" => Some(TokenType::Api),
            "registration" => Some(TokenType::Registration),
            _ => None,
        }
    }
}

/// The plaintext token, visible exactly once at creation.
pub struct CreatedToken {
    pub id: String,
    pub plaintext: String,
}

/// A non-secret row for the `list()` operation (never exposes the hash).
pub struct TokenSummary {
    pub id: String,
    pub token_type: TokenType,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub hash_suffix: String,
}

/// Lightweight context attached to a request after successful validation
/// (§4.I).
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub token_id: String,
    pub token_type: TokenType,
}

fn hash_token(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

fn random_hex_16() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        TokenStore { pool }
    }

    /// Generate `hermes-<type>-token-<uuid>-<16-hex>`, persist its hash,
    /// and return the plaintext. The plaintext is never stored or logged.
    pub async fn create(
        &self,
        token_type: TokenType,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<CreatedToken> {
        let id = RawUuid::new_v4().to_string();
        let plaintext = format!(
            "hermes-{}-token-{}-{}",
            token_type.as_str(),
            id,
            random_hex_16()
        );
        let hash = hash_token(&plaintext);
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO service_tokens (id, token_hash, token_type, created_at, expires_at, revoked) VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(&id)
        .bind(&hash)
        .bind(token_type.as_str())
        .bind(now.to_rfc3339())
        .bind(expires_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;

        Ok(CreatedToken { id, plaintext })
    }

    /// Validate a presented plaintext against one of the allowed types
    /// (§4.I). Returns the matched [`AuthContext`], or a typed error for
    /// each rejection reason.
    pub async fn validate(&self, plaintext: &str, allowed: &[TokenType]) -> CoreResult<AuthContext> {
        let hash = hash_token(plaintext);
        let row: Option<(String, String, bool, Option<String>)> = sqlx::query_as(
            "SELECT id, token_type, revoked, expires_at FROM service_tokens WHERE token_hash = ?",
        )
        .bind(&hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;

        let (id, type_str, revoked, expires_at) =
            row.ok_or_else(|| CoreError::Unauthorized("unknown token".to_string()))?;

        if revoked {
            return Err(CoreError::Unauthorized("token revoked".to_string()));
        }
        if let Some(expires_at) = expires_at {
            let expires_at: DateTime<Utc> = expires_at
                .parse()
                .map_err(|_| CoreError::StorageError("malformed expires_at".to_string()))?;
            if expires_at < Utc::now() {
                return Err(CoreError::Unauthorized("token expired".to_string()));
            }
        }

        let token_type = TokenType::parse(&type_str)
            .ok_or_else(|| CoreError::StorageError(format!("unknown token_type '{type_str}'")))?;
        if !allowed.contains(&token_type) {
            return Err(CoreError::Forbidden(format!(
                "token type '{}' not permitted for this endpoint",
                type_str
            )));
        }

        Ok(AuthContext { token_id: id, token_type })
    }

    pub async fn revoke(&self, id: &str, reason: &str) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE service_tokens SET revoked = 1, revoked_at = ?, revoked_reason = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("token '{id}'")));
        }
        Ok(())
    }

    /// Bulk revoke by type, atomic with respect to validation (§4.I): any
    /// `validate` call that starts after this returns sees every
    /// previously-valid token of that type as revoked.
    pub async fn revoke_all_of_type(&self, token_type: TokenType, reason: &str) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE service_tokens SET revoked = 1, revoked_at = ?, revoked_reason = ? WHERE token_type = ? AND revoked = 0",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(reason)
        .bind(token_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// List non-secret token rows: only the last 4 hex chars of the hash
    /// are exposed, for operator identification (SPEC_FULL §C).
    pub async fn list(&self) -> CoreResult<Vec<TokenSummary>> {
        let rows: Vec<(String, String, String, Option<String>, bool, String)> = sqlx::query_as(
            "SELECT id, token_type, created_at, expires_at, revoked, token_hash FROM service_tokens ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;

        rows.into_iter()
            .map(|(id, type_str, created_at, expires_at, revoked, hash)| {
                Ok(TokenSummary {
                    id,
                    token_type: TokenType::parse(&type_str)
                        .ok_or_else(|| CoreError::StorageError(format!("unknown token_type '{type_str}'")))?,
                    created_at: created_at
                        .parse()
                        .map_err(|_| CoreError::StorageError("malformed created_at".to_string()))?,
                    expires_at: expires_at
                        .map(|s| s.parse())
                        .transpose()
                        .map_err(|_| CoreError::StorageError("malformed expires_at".to_string()))?,
                    revoked,
                    hash_suffix: hash[hash.len().saturating_sub(4)..].to_string(),
                })
            })
            .collect()
    }
}
