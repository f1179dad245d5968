//! Central sync registry (§3.4, §4.G): the per-document record of
//! edge-origin metadata, keyed on UUID with last-writer-wins on
//! `updated_at` but always-apply on content-hash change.

use chrono::{DateTime, Utc};
use hermes_core::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// The register/update payload (§6.1's register schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryPayload {
    pub uuid: String,
    pub title: String,
    pub document_type: String,
    pub status: String,
    pub owners: Vec<String>,
    pub contributors: Vec<String>,
    pub edge_instance: String,
    pub provider_id: String,
    pub product: Option<String>,
    pub tags: Vec<String>,
    pub parent_folders: Vec<String>,
    pub metadata: serde_json::Value,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A subset-of-fields PATCH (§4.G "Update metadata"): absent fields are
/// not touched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryPatch {
    pub title: Option<String>,
    pub status: Option<String>,
    pub owners: Option<Vec<String>>,
    pub contributors: Option<Vec<String>>,
    pub product: Option<String>,
    pub tags: Option<Vec<String>>,
    pub parent_folders: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub content_hash: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryRow {
    pub uuid: String,
    pub edge_instance: String,
    pub edge_provider_id: String,
    pub title: String,
    pub document_type: String,
    pub status: String,
    pub owners: Vec<String>,
    pub contributors: Vec<String>,
    pub product: Option<String>,
    pub tags: Vec<String>,
    pub parent_folders: Vec<String>,
    pub metadata: serde_json::Value,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
    pub last_sync_status: String,
    pub sync_error: Option<String>,
}

/// Outcome of a `register` call (§6.1, §8.7 idempotency).
#[derive(Debug, Clone, Serialize)]
pub struct RegisterOutcome {
    pub uuid: String,
    pub created: bool,
    pub updated: bool,
    pub updated_fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub total: i64,
    pub by_doc_type: Vec<(String, i64)>,
    pub by_status: Vec<(String, i64)>,
    pub by_sync_status: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub text: Option<String>,
    pub doc_type: Option<String>,
    pub status: Option<String>,
    pub product: Option<String>,
    pub edge_instance: Option<String>,
    pub limit: i64,
}

fn row_to_registry_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<RegistryRow> {
    let parse_json_array = |s: String| -> Vec<String> { serde_json::from_str(&s).unwrap_or_default() };
    let parse_dt = |s: String| -> CoreResult<DateTime<Utc>> {
        s.parse().map_err(|_| CoreError::StorageError("malformed timestamp".to_string()))
    };

    Ok(RegistryRow {
        uuid: row.try_get("uuid").map_err(|e| CoreError::StorageError(e.to_string()))?,
        edge_instance: row.try_get("edge_instance").map_err(|e| CoreError::StorageError(e.to_string()))?,
        edge_provider_id: row.try_get("edge_provider_id").map_err(|e| CoreError::StorageError(e.to_string()))?,
        title: row.try_get("title").map_err(|e| CoreError::StorageError(e.to_string()))?,
        document_type: row.try_get("doc_type").map_err(|e| CoreError::StorageError(e.to_string()))?,
        status: row.try_get("status").map_err(|e| CoreError::StorageError(e.to_string()))?,
        owners: parse_json_array(row.try_get("owners").map_err(|e| CoreError::StorageError(e.to_string()))?),
        contributors: parse_json_array(row.try_get("contributors").map_err(|e| CoreError::StorageError(e.to_string()))?),
        product: row.try_get("product").map_err(|e| CoreError::StorageError(e.to_string()))?,
        tags: parse_json_array(row.try_get("tags").map_err(|e| CoreError::StorageError(e.to_string()))?),
        parent_folders: parse_json_array(row.try_get("parent_folders").map_err(|e| CoreError::StorageError(e.to_string()))?),
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata").map_err(|e| CoreError::StorageError(e.to_string()))?)
            .unwrap_or(serde_json::Value::Null),
        content_hash: row.try_get("content_hash").map_err(|e| CoreError::StorageError(e.to_string()))?,
        created_at: parse_dt(row.try_get("created_at").map_err(|e| CoreError::StorageError(e.to_string()))?)?,
        updated_at: parse_dt(row.try_get("updated_at").map_err(|e| CoreError::StorageError(e.to_string()))?)?,
        synced_at: parse_dt(row.try_get("synced_at").map_err(|e| CoreError::StorageError(e.to_string()))?)?,
        last_sync_status: row.try_get("last_sync_status").map_err(|e| CoreError::StorageError(e.to_string()))?,
        sync_error: row.try_get("sync_error").map_err(|e| CoreError::StorageError(e.to_string()))?,
    })
}

pub struct SyncRegistry {
    pool: SqlitePool,
}

impl SyncRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        SyncRegistry { pool }
    }

    /// Insert or update a registry row (§4.G "Register (upsert)").
    ///
    /// An older `updated_at` never overwrites mutable fields, but a
    /// changed `content_hash` always applies regardless (§9's open
    /// question is resolved exactly as specified: no version vector).
    pub async fn register(&self, payload: RegistryPayload) -> CoreResult<RegisterOutcome> {
        let existing: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT updated_at, content_hash FROM edge_document_registry WHERE uuid = ? AND deleted_at IS NULL")
                .bind(&payload.uuid)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CoreError::StorageError(e.to_string()))?;

        let now = Utc::now();

        match existing {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO edge_document_registry
                        (uuid, edge_instance, edge_provider_id, title, doc_type, status,
                         owners, contributors, product, tags, parent_folders, metadata,
                         content_hash, created_at, updated_at, synced_at, last_sync_status)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'synced')
                    "#,
                )
                .bind(&payload.uuid)
                .bind(&payload.edge_instance)
                .bind(&payload.provider_id)
                .bind(&payload.title)
                .bind(&payload.document_type)
                .bind(&payload.status)
                .bind(serde_json::to_string(&payload.owners).unwrap())
                .bind(serde_json::to_string(&payload.contributors).unwrap())
                .bind(&payload.product)
                .bind(serde_json::to_string(&payload.tags).unwrap())
                .bind(serde_json::to_string(&payload.parent_folders).unwrap())
                .bind(payload.metadata.to_string())
                .bind(&payload.content_hash)
                .bind(payload.created_at.to_rfc3339())
                .bind(payload.updated_at.to_rfc3339())
                .bind(now.to_rfc3339())
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::StorageError(e.to_string()))?;

                Ok(RegisterOutcome {
                    uuid: payload.uuid,
                    created: true,
                    updated: false,
                    updated_fields: vec![],
                })
            }
            Some((stored_updated_at, stored_content_hash)) => {
                let stored_updated_at: DateTime<Utc> = stored_updated_at
                    .parse()
                    .map_err(|_| CoreError::StorageError("malformed stored updated_at".to_string()))?;
                let content_hash_changed = stored_content_hash != payload.content_hash;
                let is_newer = payload.updated_at > stored_updated_at;

                if !is_newer && !content_hash_changed {
                    return Ok(RegisterOutcome {
                        uuid: payload.uuid,
                        created: false,
                        updated: false,
                        updated_fields: vec![],
                    });
                }

                sqlx::query(
                    r#"
                    UPDATE edge_document_registry SET
                        title = ?, status = ?, owners = ?, contributors = ?, product = ?,
                        tags = ?, parent_folders = ?, metadata = ?, content_hash = ?,
                        updated_at = ?, synced_at = ?, last_sync_status = 'synced', sync_error = NULL
                    WHERE uuid = ?
                    "#,
                )
                .bind(&payload.title)
                .bind(&payload.status)
                .bind(serde_json::to_string(&payload.owners).unwrap())
                .bind(serde_json::to_string(&payload.contributors).unwrap())
                .bind(&payload.product)
                .bind(serde_json::to_string(&payload.tags).unwrap())
                .bind(serde_json::to_string(&payload.parent_folders).unwrap())
                .bind(payload.metadata.to_string())
                .bind(&payload.content_hash)
                .bind(payload.updated_at.max(stored_updated_at).to_rfc3339())
                .bind(now.to_rfc3339())
                .bind(&payload.uuid)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::StorageError(e.to_string()))?;

                Ok(RegisterOutcome {
                    uuid: payload.uuid,
                    created: false,
                    updated: true,
                    updated_fields: vec![
                        "title".into(),
                        "status".into(),
                        "owners".into(),
                        "contributors".into(),
                        "product".into(),
                        "tags".into(),
                        "parent_folders".into(),
                        "metadata".into(),
                        "content_hash".into(),
                    ],
                })
            }
        }
    }

    /// Partial metadata update (§4.G "Update metadata", §6.1 PUT sync).
    pub async fn patch(&self, uuid: &str, patch: RegistryPatch) -> CoreResult<RegistryRow> {
        let row = self.get(uuid).await?;

        let title = patch.title.unwrap_or(row.title);
        let status = patch.status.unwrap_or(row.status);
        let owners = patch.owners.unwrap_or(row.owners);
        let contributors = patch.contributors.unwrap_or(row.contributors);
        let product = patch.product.or(row.product);
        let tags = patch.tags.unwrap_or(row.tags);
        let parent_folders = patch.parent_folders.unwrap_or(row.parent_folders);
        let metadata = patch.metadata.unwrap_or(row.metadata);
        let content_hash = patch.content_hash.or(row.content_hash);
        let updated_at = patch.updated_at.unwrap_or_else(Utc::now);

        sqlx::query(
            r#"
            UPDATE edge_document_registry SET
                title = ?, status = ?, owners = ?, contributors = ?, product = ?,
                tags = ?, parent_folders = ?, metadata = ?, content_hash = ?, updated_at = ?
            WHERE uuid = ?
            "#,
        )
        .bind(&title)
        .bind(&status)
        .bind(serde_json::to_string(&owners).unwrap())
        .bind(serde_json::to_string(&contributors).unwrap())
        .bind(&product)
        .bind(serde_json::to_string(&tags).unwrap())
        .bind(serde_json::to_string(&parent_folders).unwrap())
        .bind(metadata.to_string())
        .bind(&content_hash)
        .bind(updated_at.to_rfc3339())
        .bind(uuid)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;

        self.get(uuid).await
    }

    pub async fn get(&self, uuid: &str) -> CoreResult<RegistryRow> {
        let row = sqlx::query("SELECT * FROM edge_document_registry WHERE uuid = ? AND deleted_at IS NULL")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?
            .ok_or_else(|| CoreError::NotFound(format!("registry row '{uuid}'")))?;
        row_to_registry_row(&row)
    }

    /// Soft-delete; cancels `pending`/`processing` queue entries for the
    /// UUID (§4.G "Delete").
    pub async fn delete(&self, uuid: &str) -> CoreResult<()> {
        self.get(uuid).await?;
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE edge_document_registry SET deleted_at = ? WHERE uuid = ?")
            .bind(&now)
            .bind(uuid)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;

        sqlx::query(
            "UPDATE edge_sync_queue SET status = 'failed', last_error = 'document deleted', updated_at = ? WHERE uuid = ? AND status IN ('pending', 'processing')",
        )
        .bind(&now)
        .bind(uuid)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;

        Ok(())
    }

    /// Free-text + filter search, ordered by `updated_at` desc (§4.G).
    pub async fn search(&self, filter: SearchFilter) -> CoreResult<Vec<RegistryRow>> {
        let mut sql = "SELECT * FROM edge_document_registry WHERE deleted_at IS NULL".to_string();
        let mut binds: Vec<String> = Vec::new();

        if let Some(ref text) = filter.text {
            sql.push_str(" AND title LIKE ?");
            binds.push(format!("%{text}%"));
        }
        if let Some(ref doc_type) = filter.doc_type {
            sql.push_str(" AND doc_type = ?");
            binds.push(doc_type.clone());
        }
        if let Some(ref status) = filter.status {
            sql.push_str(" AND status = ?");
            binds.push(status.clone());
        }
        if let Some(ref product) = filter.product {
            sql.push_str(" AND product = ?");
            binds.push(product.clone());
        }
        if let Some(ref edge_instance) = filter.edge_instance {
            sql.push_str(" AND edge_instance = ?");
            binds.push(edge_instance.clone());
        }
        sql.push_str(" ORDER BY updated_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        query = query.bind(limit);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;

        rows.iter().map(row_to_registry_row).collect()
    }

    pub async fn stats(&self, edge_instance: Option<&str>) -> CoreResult<RegistryStats> {
        let base_clause = "WHERE deleted_at IS NULL".to_string();
        let (clause, bind) = match edge_instance {
            Some(instance) => (format!("{base_clause} AND edge_instance = ?"), Some(instance.to_string())),
            None => (base_clause, None),
        };

        let total: i64 = {
            let sql = format!("SELECT COUNT(*) FROM edge_document_registry {clause}");
            let mut q = sqlx::query_scalar::<_, i64>(&sql);
            if let Some(ref b) = bind {
                q = q.bind(b);
            }
            q.fetch_one(&self.pool).await.map_err(|e| CoreError::StorageError(e.to_string()))?
        };

        let fetch_group = |column: &str| {
            let sql = format!(
                "SELECT {column}, COUNT(*) FROM edge_document_registry {clause} GROUP BY {column}"
            );
            sql
        };

        let by_doc_type: Vec<(String, i64)> = {
            let sql = fetch_group("doc_type");
            let mut q = sqlx::query_as::<_, (String, i64)>(&sql);
            if let Some(ref b) = bind {
                q = q.bind(b);
            }
            q.fetch_all(&self.pool).await.map_err(|e| CoreError::StorageError(e.to_string()))?
        };
        let by_status: Vec<(String, i64)> = {
            let sql = fetch_group("status");
            let mut q = sqlx::query_as::<_, (String, i64)>(&sql);
            if let Some(ref b) = bind {
                q = q.bind(b);
            }
            q.fetch_all(&self.pool).await.map_err(|e| CoreError::StorageError(e.to_string()))?
        };
        let by_sync_status: Vec<(String, i64)> = {
            let sql = fetch_group("last_sync_status");
            let mut q = sqlx::query_as::<_, (String, i64)>(&sql);
            if let Some(ref b) = bind {
                q = q.bind(b);
            }
            q.fetch_all(&self.pool).await.map_err(|e| CoreError::StorageError(e.to_string()))?
        };

        Ok(RegistryStats { total, by_doc_type, by_status, by_sync_status })
    }
}
