//! Idempotent schema creation for the persisted state in §6.4.
//!
//! Schema evolution in production is driven by an external migration
//! runner (out of scope per §1); this is the bootstrap path used by
//! `hermes init` and by tests, following the teacher's `CREATE TABLE IF
//! NOT EXISTS` idempotency pattern.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            uuid TEXT PRIMARY KEY,
            provider_document_id TEXT,
            title TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            status TEXT NOT NULL,
            owners TEXT NOT NULL DEFAULT '[]',
            contributors TEXT NOT NULL DEFAULT '[]',
            approvers TEXT NOT NULL DEFAULT '[]',
            product TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            parent_folders TEXT NOT NULL DEFAULT '[]',
            metadata TEXT NOT NULL DEFAULT '{}',
            content_hash TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_indexed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_revisions (
            document_uuid TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            external_revision_ref TEXT,
            content_length INTEGER NOT NULL,
            content_type TEXT NOT NULL,
            ai_summary TEXT,
            modified_by TEXT NOT NULL,
            modified_at TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (document_uuid, content_hash),
            FOREIGN KEY (document_uuid) REFERENCES documents(uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_embeddings (
            document_uuid TEXT NOT NULL,
            revision_content_hash TEXT,
            chunk_id TEXT,
            model TEXT NOT NULL,
            model_version TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            vector BLOB NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (document_uuid, model, chunk_id),
            FOREIGN KEY (document_uuid) REFERENCES documents(uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS edge_document_registry (
            uuid TEXT PRIMARY KEY,
            edge_instance TEXT NOT NULL,
            edge_provider_id TEXT NOT NULL,
            title TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            status TEXT NOT NULL,
            owners TEXT NOT NULL DEFAULT '[]',
            contributors TEXT NOT NULL DEFAULT '[]',
            product TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            parent_folders TEXT NOT NULL DEFAULT '[]',
            metadata TEXT NOT NULL DEFAULT '{}',
            content_hash TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            synced_at TEXT NOT NULL,
            last_sync_status TEXT NOT NULL DEFAULT 'synced',
            sync_error TEXT,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_uuid_mappings (
            edge_uuid TEXT NOT NULL,
            edge_instance TEXT NOT NULL,
            central_uuid TEXT NOT NULL,
            merged_at TEXT NOT NULL,
            PRIMARY KEY (edge_uuid, edge_instance)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS edge_sync_queue (
            sequence_id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL,
            op TEXT NOT NULL,
            edge_instance TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            next_attempt_at TEXT,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS service_tokens (
            id TEXT PRIMARY KEY,
            token_hash TEXT NOT NULL UNIQUE,
            token_type TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT,
            revoked INTEGER NOT NULL DEFAULT 0,
            revoked_at TEXT,
            revoked_reason TEXT,
            metadata TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_registry_edge_instance ON edge_document_registry(edge_instance)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_registry_doc_type ON edge_document_registry(doc_type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_registry_status ON edge_document_registry(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_registry_product ON edge_document_registry(product)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_registry_sync_status ON edge_document_registry(last_sync_status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_uuid_sequence ON edge_sync_queue(uuid, sequence_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_status ON edge_sync_queue(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tokens_type ON service_tokens(token_type)")
        .execute(pool)
        .await?;

    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='edge_document_registry_fts'",
    )
    .fetch_one(pool)
    .await?;
    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE edge_document_registry_fts USING fts5(
                uuid UNINDEXED,
                title,
                content='edge_document_registry',
                content_rowid='rowid'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert!(tables.contains(&"edge_document_registry".to_string()));
        assert!(tables.contains(&"edge_sync_queue".to_string()));
        assert!(tables.contains(&"service_tokens".to_string()));
    }
}
