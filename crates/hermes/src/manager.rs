//! Multi-provider manager (§4.F): routes each operation class to a primary
//! or secondary backend, and drives metadata sync to Central under one of
//! three policies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hermes_core::capability::{
    Content, Deadline, Documents, EmailMessage, ListFilter, Notifications, People, Permission,
    Permissions, Person, Revisions, Team, Teams,
};
use hermes_core::document::{Document, DocumentRevision};
use hermes_core::error::{CoreError, CoreResult};
use hermes_core::identity::Uuid;
use reqwest::Client;

use crate::sync::queue::{flush, DequeuedItem, QueuedOp, SyncOpKind, SyncQueue};

/// When metadata sync to Central is attempted (§4.F "Policy behavior").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    Immediate,
    Batch,
    Manual,
}

/// Delivers a dequeued sync op to Central. Split out from [`Manager`] so
/// tests can substitute a mock without standing up an HTTP server.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn deliver(&self, item: &DequeuedItem) -> CoreResult<()>;
}

/// Delivers over HTTP to the Central sync surface (§4.H), the real
/// transport used outside tests.
pub struct HttpSyncTransport {
    base_url: String,
    token: String,
    client: Client,
}

impl HttpSyncTransport {
    pub fn new(base_url: String, token: String) -> Self {
        HttpSyncTransport { base_url: base_url.trim_end_matches('/').to_string(), token, client: Client::new() }
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn deliver(&self, item: &DequeuedItem) -> CoreResult<()> {
        let request = match item.kind {
            SyncOpKind::Register | SyncOpKind::Update => self
                .client
                .post(format!("{}/api/v2/edge/documents/register", self.base_url))
                .bearer_auth(&self.token)
                .json(&item.payload),
            SyncOpKind::Delete => self
                .client
                .delete(format!("{}/api/v2/edge/documents/{}", self.base_url, item.uuid))
                .bearer_auth(&self.token),
        };

        let response = request.send().await.map_err(|e| CoreError::UpstreamUnavailable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else if response.status().is_server_error() {
            Err(CoreError::UpstreamUnavailable(format!("central returned {}", response.status())))
        } else {
            Err(CoreError::InvalidInput(format!("central rejected sync op: {}", response.status())))
        }
    }
}

fn document_sync_payload(doc: &Document, edge_instance: &str) -> serde_json::Value {
    serde_json::json!({
        "uuid": doc.uuid.to_string(),
        "title": doc.title,
        "document_type": doc.doc_type,
        "status": doc.status,
        "owners": doc.owners,
        "contributors": doc.contributors,
        "edge_instance": edge_instance,
        "provider_id": doc.provider_document_id.clone().unwrap_or_default(),
        "product": doc.product,
        "tags": doc.tags,
        "parent_folders": doc.parent_folders,
        "metadata": doc.metadata,
        "content_hash": doc.content_hash,
        "created_at": doc.created_at,
        "updated_at": doc.updated_at,
    })
}

/// Holds a primary (Documents/Content/Revisions) and a secondary
/// (People/Teams/Permissions/Notifications) backend, and drives the sync
/// queue according to `policy` (§4.F).
pub struct Manager<P, S, T>
where
    P: Documents + Content + Revisions,
    S: People + Teams + Permissions + Notifications,
    T: SyncTransport,
{
    primary: P,
    secondary: S,
    queue: Arc<SyncQueue>,
    transport: Arc<T>,
    policy: SyncPolicy,
    edge_instance: String,
    secondary_degraded: AtomicBool,
}

impl<P, S, T> Manager<P, S, T>
where
    P: Documents + Content + Revisions,
    S: People + Teams + Permissions + Notifications,
    T: SyncTransport,
{
    pub fn new(primary: P, secondary: S, queue: Arc<SyncQueue>, transport: Arc<T>, policy: SyncPolicy, edge_instance: String) -> Self {
        Manager {
            primary,
            secondary,
            queue,
            transport,
            policy,
            edge_instance,
            secondary_degraded: AtomicBool::new(false),
        }
    }

    pub fn is_secondary_degraded(&self) -> bool {
        self.secondary_degraded.load(Ordering::Relaxed)
    }

    fn mark_secondary_degraded(&self, degraded: bool) {
        self.secondary_degraded.store(degraded, Ordering::Relaxed);
    }

    /// Fail fast if the secondary is known down, otherwise run `call` and
    /// update the degraded flag from its outcome (§4.F "Health and
    /// fallback" — every secondary-routed method shares this, not just
    /// people search).
    async fn via_secondary<R>(&self, call: impl std::future::Future<Output = CoreResult<R>>) -> CoreResult<R> {
        if self.is_secondary_degraded() {
            return Err(CoreError::UpstreamUnavailable("secondary backend is degraded".to_string()));
        }
        match call.await {
            Err(CoreError::UpstreamUnavailable(msg)) => {
                self.mark_secondary_degraded(true);
                Err(CoreError::UpstreamUnavailable(msg))
            }
            other => {
                self.mark_secondary_degraded(false);
                other
            }
        }
    }

    /// Enqueue a metadata sync op and, under [`SyncPolicy::Immediate`],
    /// attempt delivery synchronously — a failure still enqueues, so the
    /// caller's already-successful local write is never blocked on sync
    /// (§4.F "Policy behavior").
    async fn sync_after_write(&self, kind: SyncOpKind, doc: &Document) -> CoreResult<()> {
        let op = QueuedOp {
            uuid: doc.uuid.to_string(),
            kind,
            edge_instance: self.edge_instance.clone(),
            payload: document_sync_payload(doc, &self.edge_instance),
        };
        let sequence_id = self.queue.enqueue(op).await?;

        if self.policy == SyncPolicy::Immediate {
            let item = DequeuedItem {
                sequence_id,
                uuid: doc.uuid.to_string(),
                kind,
                edge_instance: self.edge_instance.clone(),
                payload: document_sync_payload(doc, &self.edge_instance),
                attempts: 0,
            };
            if self.transport.deliver(&item).await.is_ok() {
                self.queue.mark_completed(sequence_id).await?;
            }
            // On failure the item stays `pending`, picked up by a later flush.
        }
        Ok(())
    }

    /// Drain whatever is pending right now, delivering via the configured
    /// transport. Used by `Manual`'s explicit `flush-sync()` and by a
    /// `Batch` policy's interval-driven flusher (§4.F).
    pub async fn flush_sync(&self) -> CoreResult<usize> {
        flush(&self.queue, |item| {
            let transport = Arc::clone(&self.transport);
            async move { transport.deliver(&item).await }
        })
        .await
    }

    pub async fn create_document(&self, doc: Document, deadline: Deadline) -> CoreResult<Document> {
        let created = self.primary.create(doc, deadline).await?;
        self.sync_after_write(SyncOpKind::Register, &created).await?;
        Ok(created)
    }

    pub async fn get_document(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<Document> {
        self.primary.get(uuid, deadline).await
    }

    pub async fn update_document(&self, doc: Document, deadline: Deadline) -> CoreResult<Document> {
        let updated = self.primary.update(doc, deadline).await?;
        self.sync_after_write(SyncOpKind::Update, &updated).await?;
        Ok(updated)
    }

    pub async fn delete_document(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<()> {
        let doc = self.primary.get(uuid, deadline).await?;
        self.primary.delete(uuid, deadline).await?;
        self.sync_after_write(SyncOpKind::Delete, &doc).await
    }

    pub async fn list_documents(&self, filter: ListFilter, deadline: Deadline) -> CoreResult<Vec<Document>> {
        hermes_core::capability::Documents::list(&self.primary, filter, deadline).await
    }

    pub async fn get_content(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<Vec<u8>> {
        self.primary.get_content(uuid, deadline).await
    }

    pub async fn set_content(&self, uuid: Uuid, bytes: Vec<u8>, deadline: Deadline) -> CoreResult<String> {
        self.primary.set_content(uuid, bytes, deadline).await
    }

    pub async fn list_revisions(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<Vec<DocumentRevision>> {
        Revisions::list(&self.primary, uuid, deadline).await
    }

    pub async fn append_revision(&self, revision: DocumentRevision, deadline: Deadline) -> CoreResult<DocumentRevision> {
        self.primary.append(revision, deadline).await
    }

    /// Routes to the secondary backend; when the secondary is known
    /// unreachable, fails fast with `UpstreamUnavailable` rather than
    /// attempting the call (§4.F "Health and fallback").
    pub async fn search_people(&self, prefix: &str, deadline: Deadline) -> CoreResult<Vec<Person>> {
        self.via_secondary(self.secondary.search(prefix, deadline)).await
    }

    pub async fn get_team(&self, id: &str, deadline: Deadline) -> CoreResult<Team> {
        self.via_secondary(self.secondary.get_team(id, deadline)).await
    }

    pub async fn check_permission(&self, subject: &str, action: &str, resource: &str, deadline: Deadline) -> CoreResult<bool> {
        self.via_secondary(self.secondary.check(subject, action, resource, deadline)).await
    }

    pub async fn list_permissions(&self, subject: &str, deadline: Deadline) -> CoreResult<Vec<Permission>> {
        self.via_secondary(self.secondary.list_for_subject(subject, deadline)).await
    }

    pub async fn send_email(&self, message: EmailMessage, deadline: Deadline) -> CoreResult<()> {
        self.via_secondary(self.secondary.send_email(message, deadline)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct RecordingTransport {
        delivered: Mutex<Vec<String>>,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl SyncTransport for RecordingTransport {
        async fn deliver(&self, item: &DequeuedItem) -> CoreResult<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(CoreError::UpstreamUnavailable("simulated outage".to_string()));
            }
            self.delivered.lock().unwrap().push(item.uuid.clone());
            Ok(())
        }
    }

    struct NullSecondary;

    #[async_trait]
    impl People for NullSecondary {
        async fn search(&self, _prefix: &str, _deadline: Deadline) -> CoreResult<Vec<Person>> {
            Ok(vec![])
        }
        async fn get_by_email(&self, email: &str, _deadline: Deadline) -> CoreResult<Person> {
            Err(CoreError::NotFound(email.to_string()))
        }
    }

    #[async_trait]
    impl Teams for NullSecondary {
        async fn get_team(&self, id: &str, _deadline: Deadline) -> CoreResult<Team> {
            Err(CoreError::NotFound(id.to_string()))
        }
        async fn list_members(&self, _id: &str, _deadline: Deadline) -> CoreResult<Vec<String>> {
            Ok(vec![])
        }
    }

    #[async_trait]
    impl Permissions for NullSecondary {
        async fn list_for_subject(&self, _subject: &str, _deadline: Deadline) -> CoreResult<Vec<Permission>> {
            Ok(vec![])
        }
        async fn check(&self, _subject: &str, _action: &str, _resource: &str, _deadline: Deadline) -> CoreResult<bool> {
            Ok(false)
        }
    }

    #[async_trait]
    impl Notifications for NullSecondary {
        async fn send_email(&self, _message: EmailMessage, _deadline: Deadline) -> CoreResult<()> {
            Ok(())
        }
    }

    async fn fresh_manager(
        policy: SyncPolicy,
    ) -> (Manager<LocalBackend, NullSecondary, RecordingTransport>, tempfile::TempDir, Arc<RecordingTransport>) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let primary = LocalBackend::new(dir.path().to_path_buf(), None, pool.clone());
        let queue = Arc::new(SyncQueue::new(pool));
        let transport = Arc::new(RecordingTransport { delivered: Mutex::new(vec![]), fail_next: AtomicBool::new(false) });
        let manager = Manager::new(primary, NullSecondary, Arc::clone(&queue), Arc::clone(&transport), policy, "edge-1".to_string());
        (manager, dir, transport)
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
    async fn immediate_policy_delivers_synchronously_on_create() {
        let (manager, _dir, transport) = fresh_manager(SyncPolicy::Immediate).await;
        let uuid = Uuid::new();
        manager.create_document(sample_document(uuid, "rfcs/a.md"), Deadline::none()).await.unwrap();
        assert_eq!(transport.delivered.lock().unwrap().len(), 1);
        assert_eq!(manager.queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn immediate_policy_failure_leaves_item_queued_for_later_flush() {
        let (manager, _dir, transport) = fresh_manager(SyncPolicy::Immediate).await;
        transport.fail_next.store(true, Ordering::SeqCst);
        let uuid = Uuid::new();
        let doc = manager.create_document(sample_document(uuid, "rfcs/a.md"), Deadline::none()).await.unwrap();
        assert_eq!(doc.title, "RFC-001");
        assert_eq!(manager.queue.pending_count().await.unwrap(), 1);

        let drained = manager.flush_sync().await.unwrap();
        assert_eq!(drained, 1);
        assert_eq!(manager.queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn manual_policy_only_enqueues_until_flush_sync_is_called() {
        let (manager, _dir, transport) = fresh_manager(SyncPolicy::Manual).await;
        let uuid = Uuid::new();
        manager.create_document(sample_document(uuid, "rfcs/a.md"), Deadline::none()).await.unwrap();
        assert!(transport.delivered.lock().unwrap().is_empty());
        assert_eq!(manager.queue.pending_count().await.unwrap(), 1);

        manager.flush_sync().await.unwrap();
        assert_eq!(transport.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn degraded_secondary_fails_fast_without_calling_through() {
        let (manager, _dir, _transport) = fresh_manager(SyncPolicy::Manual).await;
        manager.mark_secondary_degraded(true);
        let result = manager.search_people("a", Deadline::none()).await;
        assert!(matches!(result, Err(CoreError::UpstreamUnavailable(_))));
    }
}
