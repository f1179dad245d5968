//! Local backend adapter (§4.D): a filesystem/Git-backed implementation
//! of Documents, Content, and Revisions.
//!
//! Document ids are workspace-relative paths, normalized to forward
//! slashes (mirroring [`hermes_core::identity::ProviderId`]'s `local`
//! semantics). Revisions are content-addressed by SHA-256; a duplicate
//! hash under the same document is an idempotent append. When a Git
//! branch is configured, `git log` on the workspace provides the
//! external revision reference; otherwise revisions carry none.

use std::path::PathBuf;
use std::process::Command;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hermes_core::capability::{Content, Deadline, Documents, ListFilter, Revisions};
use hermes_core::document::{Document, DocumentRevision};
use hermes_core::error::{CoreError, CoreResult};
use hermes_core::identity::Uuid;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

fn storage_err<E: std::fmt::Display>(e: E) -> CoreError {
    CoreError::StorageError(e.to_string())
}

fn canonicalize_content(bytes: &[u8]) -> Vec<u8> {
    String::from_utf8(bytes.to_vec())
        .map(|s| s.replace("\r\n", "\n").into_bytes())
        .unwrap_or_else(|_| bytes.to_vec())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

pub struct LocalBackend {
    workspace_path: PathBuf,
    git_branch: Option<String>,
    pool: SqlitePool,
}

impl LocalBackend {
    pub fn new(workspace_path: PathBuf, git_branch: Option<String>, pool: SqlitePool) -> Self {
        LocalBackend { workspace_path, git_branch, pool }
    }

    fn absolute_path(&self, relative: &str) -> PathBuf {
        self.workspace_path.join(relative)
    }

    /// `git log -1 --format=%H` for the file, if a branch is configured
    /// and the workspace is a Git checkout. Absence of Git yields `None`
    /// (§4.D).
    fn git_external_ref(&self, relative: &str) -> Option<String> {
        let _branch = self.git_branch.as_ref()?;
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.workspace_path)
            .args(["log", "-1", "--format=%H", "--", relative])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if sha.is_empty() {
            None
        } else {
            Some(sha)
        }
    }

    async fn row_to_document(&self, row: &sqlx::sqlite::SqliteRow) -> CoreResult<Document> {
        let parse_array = |s: String| -> Vec<String> { serde_json::from_str(&s).unwrap_or_default() };
        let uuid_str: String = row.try_get("uuid").map_err(storage_err)?;
        Ok(Document {
            uuid: Uuid::parse(&uuid_str).map_err(|e| CoreError::StorageError(e.to_string()))?,
            provider_document_id: row.try_get("provider_document_id").map_err(storage_err)?,
            title: row.try_get("title").map_err(storage_err)?,
            doc_type: row.try_get("doc_type").map_err(storage_err)?,
            status: row.try_get("status").map_err(storage_err)?,
            owners: parse_array(row.try_get("owners").map_err(storage_err)?),
            contributors: parse_array(row.try_get("contributors").map_err(storage_err)?),
            approvers: parse_array(row.try_get("approvers").map_err(storage_err)?),
            product: row.try_get("product").map_err(storage_err)?,
            tags: parse_array(row.try_get("tags").map_err(storage_err)?),
            parent_folders: parse_array(row.try_get("parent_folders").map_err(storage_err)?),
            metadata: serde_json::from_str(&row.try_get::<String, _>("metadata").map_err(storage_err)?)
                .unwrap_or_default(),
            content_hash: row.try_get("content_hash").map_err(storage_err)?,
            created_at: parse_dt(row.try_get("created_at").map_err(storage_err)?)?,
            updated_at: parse_dt(row.try_get("updated_at").map_err(storage_err)?)?,
            last_indexed_at: row
                .try_get::<Option<String>, _>("last_indexed_at")
                .map_err(storage_err)?
                .map(parse_dt)
                .transpose()?,
        })
    }
}

fn parse_dt(s: String) -> CoreResult<DateTime<Utc>> {
    s.parse().map_err(|_| CoreError::StorageError(format!("malformed timestamp '{s}'")))
}

#[async_trait]
impl Documents for LocalBackend {
    async fn create(&self, doc: Document, deadline: Deadline) -> CoreResult<Document> {
        deadline.check(Utc::now())?;
        if let Some(ref relative) = doc.provider_document_id {
            let path = self.absolute_path(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(storage_err)?;
            }
            if !path.exists() {
                std::fs::write(&path, b"").map_err(storage_err)?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO documents (uuid, provider_document_id, title, doc_type, status,
                owners, contributors, approvers, product, tags, parent_folders, metadata,
                content_hash, created_at, updated_at, last_indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(doc.uuid.as_str())
        .bind(&doc.provider_document_id)
        .bind(&doc.title)
        .bind(&doc.doc_type)
        .bind(&doc.status)
        .bind(serde_json::to_string(&doc.owners).unwrap())
        .bind(serde_json::to_string(&doc.contributors).unwrap())
        .bind(serde_json::to_string(&doc.approvers).unwrap())
        .bind(&doc.product)
        .bind(serde_json::to_string(&doc.tags).unwrap())
        .bind(serde_json::to_string(&doc.parent_folders).unwrap())
        .bind(serde_json::to_string(&doc.metadata).unwrap())
        .bind(&doc.content_hash)
        .bind(doc.created_at.to_rfc3339())
        .bind(doc.updated_at.to_rfc3339())
        .bind(doc.last_indexed_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(doc)
    }

    async fn get(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<Document> {
        deadline.check(Utc::now())?;
        let row = sqlx::query("SELECT * FROM documents WHERE uuid = ?")
            .bind(uuid.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| CoreError::NotFound(format!("document '{uuid}'")))?;
        self.row_to_document(&row).await
    }

    async fn update(&self, doc: Document, deadline: Deadline) -> CoreResult<Document> {
        deadline.check(Utc::now())?;
        self.get(doc.uuid, Deadline::none()).await?;

        sqlx::query(
            r#"
            UPDATE documents SET
                provider_document_id = ?, title = ?, doc_type = ?, status = ?, owners = ?,
                contributors = ?, approvers = ?, product = ?, tags = ?, parent_folders = ?,
                metadata = ?, content_hash = ?, updated_at = ?
            WHERE uuid = ?
            "#,
        )
        .bind(&doc.provider_document_id)
        .bind(&doc.title)
        .bind(&doc.doc_type)
        .bind(&doc.status)
        .bind(serde_json::to_string(&doc.owners).unwrap())
        .bind(serde_json::to_string(&doc.contributors).unwrap())
        .bind(serde_json::to_string(&doc.approvers).unwrap())
        .bind(&doc.product)
        .bind(serde_json::to_string(&doc.tags).unwrap())
        .bind(serde_json::to_string(&doc.parent_folders).unwrap())
        .bind(serde_json::to_string(&doc.metadata).unwrap())
        .bind(&doc.content_hash)
        .bind(doc.updated_at.to_rfc3339())
        .bind(doc.uuid.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        self.get(doc.uuid, Deadline::none()).await
    }

    async fn delete(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<()> {
        deadline.check(Utc::now())?;
        let doc = self.get(uuid, Deadline::none()).await?;
        if let Some(ref relative) = doc.provider_document_id {
            let path = self.absolute_path(relative);
            if path.exists() {
                std::fs::remove_file(&path).map_err(storage_err)?;
            }
        }
        sqlx::query("DELETE FROM documents WHERE uuid = ?")
            .bind(uuid.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list(&self, filter: ListFilter, deadline: Deadline) -> CoreResult<Vec<Document>> {
        deadline.check(Utc::now())?;
        let rows = sqlx::query("SELECT * FROM documents ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut docs = Vec::new();
        for row in &rows {
            let doc = self.row_to_document(row).await?;

            if let Some(ref folder) = filter.folder {
                let in_folder = doc
                    .provider_document_id
                    .as_ref()
                    .map(|p| p.starts_with(folder.as_str()))
                    .unwrap_or(false);
                if !in_folder {
                    continue;
                }
            }

            if let Some(modified_after) = filter.modified_after {
                let Some(ref relative) = doc.provider_document_id else {
                    continue;
                };
                let path = self.absolute_path(relative);
                let mtime = std::fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or(doc.updated_at);
                if mtime <= modified_after {
                    continue;
                }
            }

            docs.push(doc);
        }
        Ok(docs)
    }
}

#[async_trait]
impl Content for LocalBackend {
    async fn get_content(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<Vec<u8>> {
        deadline.check(Utc::now())?;
        let doc = self.get(uuid, Deadline::none()).await?;
        let relative = doc
            .provider_document_id
            .ok_or_else(|| CoreError::NotFound(format!("document '{uuid}' has no backing file")))?;
        std::fs::read(self.absolute_path(&relative)).map_err(storage_err)
    }

    async fn set_content(&self, uuid: Uuid, bytes: Vec<u8>, deadline: Deadline) -> CoreResult<String> {
        deadline.check(Utc::now())?;
        let doc = self.get(uuid, Deadline::none()).await?;
        let relative = doc
            .provider_document_id
            .ok_or_else(|| CoreError::NotFound(format!("document '{uuid}' has no backing file")))?;
        let canonical = canonicalize_content(&bytes);
        let hash = sha256_hex(&canonical);

        let path = self.absolute_path(&relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(storage_err)?;
        }
        std::fs::write(&path, &canonical).map_err(storage_err)?;

        sqlx::query("UPDATE documents SET content_hash = ?, updated_at = ? WHERE uuid = ?")
            .bind(&hash)
            .bind(Utc::now().to_rfc3339())
            .bind(uuid.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(hash)
    }

    async fn get_size(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<u64> {
        deadline.check(Utc::now())?;
        let doc = self.get(uuid, Deadline::none()).await?;
        let relative = doc
            .provider_document_id
            .ok_or_else(|| CoreError::NotFound(format!("document '{uuid}' has no backing file")))?;
        std::fs::metadata(self.absolute_path(&relative))
            .map(|m| m.len())
            .map_err(storage_err)
    }

    async fn content_hash(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<String> {
        deadline.check(Utc::now())?;
        let doc = self.get(uuid, Deadline::none()).await?;
        doc.content_hash.ok_or_else(|| CoreError::NotFound(format!("document '{uuid}' has no content yet")))
    }
}

fn row_to_revision(row: &sqlx::sqlite::SqliteRow) -> CoreResult<DocumentRevision> {
    let uuid_str: String = row.try_get("document_uuid").map_err(storage_err)?;
    Ok(DocumentRevision {
        document_uuid: Uuid::parse(&uuid_str).map_err(|e| CoreError::StorageError(e.to_string()))?,
        content_hash: row.try_get("content_hash").map_err(storage_err)?,
        external_revision_ref: row.try_get("external_revision_ref").map_err(storage_err)?,
        content_length: row.try_get::<i64, _>("content_length").map_err(storage_err)? as u64,
        content_type: row.try_get("content_type").map_err(storage_err)?,
        ai_summary: row.try_get("ai_summary").map_err(storage_err)?,
        modified_by: row.try_get("modified_by").map_err(storage_err)?,
        modified_at: parse_dt(row.try_get("modified_at").map_err(storage_err)?)?,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata").map_err(storage_err)?)
            .unwrap_or_default(),
    })
}

#[async_trait]
impl Revisions for LocalBackend {
    async fn list(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<Vec<DocumentRevision>> {
        deadline.check(Utc::now())?;
        let rows = sqlx::query("SELECT * FROM document_revisions WHERE document_uuid = ? ORDER BY modified_at ASC")
            .bind(uuid.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(row_to_revision).collect()
    }

    async fn get_by_hash(&self, uuid: Uuid, hash: &str, deadline: Deadline) -> CoreResult<DocumentRevision> {
        deadline.check(Utc::now())?;
        let row = sqlx::query("SELECT * FROM document_revisions WHERE document_uuid = ? AND content_hash = ?")
            .bind(uuid.as_str())
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| CoreError::NotFound(format!("revision '{hash}' of document '{uuid}'")))?;
        row_to_revision(&row)
    }

    /// Inserting a revision whose `(document, content_hash)` already
    /// exists is an idempotent no-op that returns the existing row
    /// (§3.3).
    async fn append(&self, revision: DocumentRevision, deadline: Deadline) -> CoreResult<DocumentRevision> {
        deadline.check(Utc::now())?;
        if let Ok(existing) = self.get_by_hash(revision.document_uuid, &revision.content_hash, Deadline::none()).await {
            return Ok(existing);
        }

        let doc = self.get(revision.document_uuid, Deadline::none()).await?;
        let external_ref = revision.external_revision_ref.clone().or_else(|| {
            doc.provider_document_id.as_deref().and_then(|p| self.git_external_ref(p))
        });

        sqlx::query(
            r#"
            INSERT INTO document_revisions
                (document_uuid, content_hash, external_revision_ref, content_length,
                 content_type, ai_summary, modified_by, modified_at, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(revision.document_uuid.as_str())
        .bind(&revision.content_hash)
        .bind(&external_ref)
        .bind(revision.content_length as i64)
        .bind(&revision.content_type)
        .bind(&revision.ai_summary)
        .bind(&revision.modified_by)
        .bind(revision.modified_at.to_rfc3339())
        .bind(serde_json::to_string(&revision.metadata).unwrap())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        self.get_by_hash(revision.document_uuid, &revision.content_hash, Deadline::none()).await
    }

    async fn latest(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<DocumentRevision> {
        deadline.check(Utc::now())?;
        let row = sqlx::query("SELECT * FROM document_revisions WHERE document_uuid = ? ORDER BY modified_at DESC LIMIT 1")
            .bind(uuid.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| CoreError::NotFound(format!("no revisions for document '{uuid}'")))?;
        row_to_revision(&row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashMap;

    async fn fresh_backend() -> (LocalBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let backend = LocalBackend::new(dir.path().to_path_buf(), None, pool);
        (backend, dir)
    }

    fn sample_document(uuid: Uuid, path: &str) -> Document {
        let now = Utc::now();
        Document {
            uuid,
            provider_document_id: Some(path.to_string()),
            title: "RFC-001".to_string(),
            doc_type: "RFC".to_string(),
            status: "Draft".to_string(),
            owners: vec!["a@x".to_string()],
            contributors: vec![],
            approvers: vec![],
            product: None,
            tags: vec![],
            parent_folders: vec![],
            metadata: HashMap::new(),
            content_hash: None,
            created_at: now,
            updated_at: now,
            last_indexed_at: None,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (backend, _dir) = fresh_backend().await;
        let uuid = Uuid::new();
        let doc = sample_document(uuid, "docs/rfc-001.md");
        backend.create(doc.clone(), Deadline::none()).await.unwrap();
        let fetched = backend.get(uuid, Deadline::none()).await.unwrap();
        assert_eq!(fetched.title, "RFC-001");
    }

    #[tokio::test]
    async fn set_content_then_get_content_round_trips() {
        let (backend, _dir) = fresh_backend().await;
        let uuid = Uuid::new();
        backend.create(sample_document(uuid, "docs/rfc-001.md"), Deadline::none()).await.unwrap();

        let hash = backend.set_content(uuid, b"hello world".to_vec(), Deadline::none()).await.unwrap();
        assert!(hash.starts_with("sha256:"));

        let content = backend.get_content(uuid, Deadline::none()).await.unwrap();
        assert_eq!(content, b"hello world");
        assert_eq!(backend.content_hash(uuid, Deadline::none()).await.unwrap(), hash);
    }

    #[tokio::test]
    async fn delete_removes_row_and_file() {
        let (backend, dir) = fresh_backend().await;
        let uuid = Uuid::new();
        backend.create(sample_document(uuid, "docs/rfc-001.md"), Deadline::none()).await.unwrap();
        backend.delete(uuid, Deadline::none()).await.unwrap();
        assert!(backend.get(uuid, Deadline::none()).await.is_err());
        assert!(!dir.path().join("docs/rfc-001.md").exists());
    }

    #[tokio::test]
    async fn revision_append_is_idempotent_on_same_hash() {
        let (backend, _dir) = fresh_backend().await;
        let uuid = Uuid::new();
        backend.create(sample_document(uuid, "docs/rfc-001.md"), Deadline::none()).await.unwrap();

        let revision = DocumentRevision {
            document_uuid: uuid,
            content_hash: "sha256:aaa".to_string(),
            external_revision_ref: None,
            content_length: 11,
            content_type: "text/markdown".to_string(),
            ai_summary: None,
            modified_by: "a@x".to_string(),
            modified_at: Utc::now(),
            metadata: HashMap::new(),
        };

        backend.append(revision.clone(), Deadline::none()).await.unwrap();
        backend.append(revision, Deadline::none()).await.unwrap();

        let all = backend.list(uuid, Deadline::none()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn list_with_folder_filter() {
        let (backend, _dir) = fresh_backend().await;
        let uuid_a = Uuid::new();
        let uuid_b = Uuid::new();
        backend.create(sample_document(uuid_a, "rfcs/a.md"), Deadline::none()).await.unwrap();
        backend.create(sample_document(uuid_b, "prds/b.md"), Deadline::none()).await.unwrap();

        let results = backend
            .list(ListFilter { folder: Some("rfcs".to_string()), modified_after: None }, Deadline::none())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].uuid, uuid_a);
    }
}
