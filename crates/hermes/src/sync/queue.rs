//! Durable per-UUID FIFO sync queue with coalescing (§4.F "Ordering",
//! §4.G "Queue worker", §9).

use chrono::{Duration as ChronoDuration, Utc};
use hermes_core::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// The kind of mutation queued for delivery to Central.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOpKind {
    Register,
    Update,
    Delete,
}

impl SyncOpKind {
    fn as_str(&self) -> &'static str {
        match self {
            SyncOpKind::Register => "register",
            SyncOpKind::Update => "update",
            SyncOpKind::Delete => "delete",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "register" => Some(SyncOpKind::Register),
            "update" => Some(SyncOpKind::Update),
            "delete" => Some(SyncOpKind::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedOp {
    pub uuid: String,
    pub kind: SyncOpKind,
    pub edge_instance: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct DequeuedItem {
    pub sequence_id: i64,
    pub uuid: String,
    pub kind: SyncOpKind,
    pub edge_instance: String,
    pub payload: serde_json::Value,
    pub attempts: i64,
}

const MAX_ATTEMPTS: i64 = 8;
const PROCESSING_GRACE: i64 = 300;

pub struct SyncQueue {
    pool: SqlitePool,
}

impl SyncQueue {
    pub fn new(pool: SqlitePool) -> Self {
        SyncQueue { pool }
    }

    /// Enqueue an op, coalescing against existing pending ops for the same
    /// UUID: a later `update` folds into an earlier pending `update`
    /// (replacing its payload in place, preserving FIFO position); a
    /// `delete` discards all earlier pending ops for the UUID and is
    /// inserted fresh (§4.F "Ordering").
    pub async fn enqueue(&self, op: QueuedOp) -> CoreResult<i64> {
        let now = Utc::now().to_rfc3339();

        if op.kind == SyncOpKind::Delete {
            sqlx::query(
                "UPDATE edge_sync_queue SET status = 'failed', last_error = 'superseded by delete', updated_at = ? WHERE uuid = ? AND status = 'pending'",
            )
            .bind(&now)
            .bind(&op.uuid)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        } else if op.kind == SyncOpKind::Update {
            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT sequence_id FROM edge_sync_queue WHERE uuid = ? AND op = 'update' AND status = 'pending' ORDER BY sequence_id DESC LIMIT 1",
            )
            .bind(&op.uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;

            if let Some(sequence_id) = existing {
                sqlx::query("UPDATE edge_sync_queue SET payload = ?, updated_at = ? WHERE sequence_id = ?")
                    .bind(op.payload.to_string())
                    .bind(&now)
                    .bind(sequence_id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| CoreError::StorageError(e.to_string()))?;
                return Ok(sequence_id);
            }
        }

        let result = sqlx::query(
            "INSERT INTO edge_sync_queue (uuid, op, edge_instance, payload, status, created_at, updated_at) VALUES (?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(&op.uuid)
        .bind(op.kind.as_str())
        .bind(&op.edge_instance)
        .bind(op.payload.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    /// Dequeue the oldest `pending` item and mark it `processing`.
    pub async fn dequeue_next(&self) -> CoreResult<Option<DequeuedItem>> {
        let mut tx = self.pool.begin().await.map_err(|e| CoreError::StorageError(e.to_string()))?;

        let row: Option<(i64, String, String, String, String, i64)> = sqlx::query_as(
            "SELECT sequence_id, uuid, op, edge_instance, payload, attempts FROM edge_sync_queue WHERE status = 'pending' ORDER BY sequence_id ASC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;

        let Some((sequence_id, uuid, op, edge_instance, payload, attempts)) = row else {
            return Ok(None);
        };

        sqlx::query("UPDATE edge_sync_queue SET status = 'processing', updated_at = ? WHERE sequence_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(sequence_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;

        tx.commit().await.map_err(|e| CoreError::StorageError(e.to_string()))?;

        Ok(Some(DequeuedItem {
            sequence_id,
            uuid,
            kind: SyncOpKind::parse(&op).ok_or_else(|| CoreError::StorageError(format!("unknown op '{op}'")))?,
            edge_instance,
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            attempts,
        }))
    }

    pub async fn mark_completed(&self, sequence_id: i64) -> CoreResult<()> {
        sqlx::query("UPDATE edge_sync_queue SET status = 'completed', updated_at = ? WHERE sequence_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(sequence_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// Record a failed delivery attempt. Retriable errors are re-armed as
    /// `pending` with an exponential-backoff-with-jitter next-attempt
    /// time, up to [`MAX_ATTEMPTS`]; terminal errors and attempt
    /// exhaustion mark the item `failed` (§4.F "Retry policy", §7).
    pub async fn mark_failed(&self, sequence_id: i64, attempts: i64, error: &CoreError) -> CoreResult<()> {
        let now = Utc::now();
        if error.is_retriable() && attempts + 1 < MAX_ATTEMPTS {
            let backoff_secs = 2i64.pow((attempts as u32).min(6)) + jitter_secs();
            let next_attempt = now + ChronoDuration::seconds(backoff_secs);
            sqlx::query(
                "UPDATE edge_sync_queue SET status = 'pending', attempts = ?, next_attempt_at = ?, last_error = ?, updated_at = ? WHERE sequence_id = ?",
            )
            .bind(attempts + 1)
            .bind(next_attempt.to_rfc3339())
            .bind(error.to_string())
            .bind(now.to_rfc3339())
            .bind(sequence_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        } else {
            sqlx::query(
                "UPDATE edge_sync_queue SET status = 'failed', attempts = ?, last_error = ?, updated_at = ? WHERE sequence_id = ?",
            )
            .bind(attempts + 1)
            .bind(error.to_string())
            .bind(now.to_rfc3339())
            .bind(sequence_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        }
        Ok(())
    }

    /// Re-arm all `failed` items back to `pending` with a reset attempt
    /// count, for a manual sweep.
    pub async fn rearm_failed(&self) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE edge_sync_queue SET status = 'pending', attempts = 0, next_attempt_at = NULL WHERE status = 'failed'",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// Crash-safety sweep: any `processing` row older than the grace
    /// period is reverted to `pending` (§4.G "Queue worker").
    pub async fn revert_stale_processing(&self) -> CoreResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::seconds(PROCESSING_GRACE);
        let result = sqlx::query(
            "UPDATE edge_sync_queue SET status = 'pending' WHERE status = 'processing' AND updated_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;
        Ok(result.rows_affected())
    }

    pub async fn pending_count(&self) -> CoreResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM edge_sync_queue WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))
    }
}

fn jitter_secs() -> i64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0..5)
}

/// Drain every currently-pending item by applying `deliver` to each and
/// recording the outcome. Used by the immediate/batch/manual policies in
/// [`crate::manager`] (§4.F).
pub async fn flush<F, Fut>(queue: &SyncQueue, mut deliver: F) -> CoreResult<usize>
where
    F: FnMut(DequeuedItem) -> Fut,
    Fut: std::future::Future<Output = CoreResult<()>>,
{
    let mut drained = 0;
    loop {
        let Some(item) = queue.dequeue_next().await? else {
            break;
        };
        let sequence_id = item.sequence_id;
        let attempts = item.attempts;
        match deliver(item).await {
            Ok(()) => queue.mark_completed(sequence_id).await?,
            Err(e) => queue.mark_failed(sequence_id, attempts, &e).await?,
        }
        drained += 1;
    }
    Ok(drained)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStatus {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

pub async fn queue_status(pool: &SqlitePool) -> CoreResult<QueueStatus> {
    let rows: Vec<(String, i64)> = sqlx::query_as("SELECT status, COUNT(*) FROM edge_sync_queue GROUP BY status")
        .fetch_all(pool)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;

    let mut status = QueueStatus::default();
    for (s, count) in rows {
        match s.as_str() {
            "pending" => status.pending = count,
            "processing" => status.processing = count,
            "completed" => status.completed = count,
            "failed" => status.failed = count,
            _ => {}
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn fresh() -> SyncQueue {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        SyncQueue::new(pool)
    }

    fn op(uuid: &str, kind: SyncOpKind) -> QueuedOp {
        QueuedOp {
            uuid: uuid.to_string(),
            kind,
            edge_instance: "edge-1".to_string(),
            payload: serde_json::json!({"v": 1}),
        }
    }

    #[tokio::test]
    async fn fifo_order_per_uuid_is_preserved() {
        let queue = fresh().await;
        queue.enqueue(op("u1", SyncOpKind::Register)).await.unwrap();
        queue.enqueue(op("u2", SyncOpKind::Register)).await.unwrap();

        let first = queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(first.uuid, "u1");
        queue.mark_completed(first.sequence_id).await.unwrap();

        let second = queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(second.uuid, "u2");
    }

    #[tokio::test]
    async fn later_update_coalesces_into_earlier_pending_update() {
        let queue = fresh().await;
        let mut first_update = op("u1", SyncOpKind::Update);
        first_update.payload = serde_json::json!({"v": 1});
        queue.enqueue(first_update).await.unwrap();

        let mut second_update = op("u1", SyncOpKind::Update);
        second_update.payload = serde_json::json!({"v": 2});
        queue.enqueue(second_update).await.unwrap();

        assert_eq!(queue.pending_count().await.unwrap(), 1);
        let item = queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(item.payload, serde_json::json!({"v": 2}));
    }

    #[tokio::test]
    async fn delete_discards_earlier_pending_ops() {
        let queue = fresh().await;
        queue.enqueue(op("u1", SyncOpKind::Register)).await.unwrap();
        queue.enqueue(op("u1", SyncOpKind::Update)).await.unwrap();
        queue.enqueue(op("u1", SyncOpKind::Delete)).await.unwrap();

        assert_eq!(queue.pending_count().await.unwrap(), 1);
        let item = queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(item.kind, SyncOpKind::Delete);
    }

    #[tokio::test]
    async fn retriable_failure_is_rearmed_pending() {
        let queue = fresh().await;
        queue.enqueue(op("u1", SyncOpKind::Register)).await.unwrap();
        let item = queue.dequeue_next().await.unwrap().unwrap();
        queue
            .mark_failed(item.sequence_id, item.attempts, &CoreError::UpstreamUnavailable("down".into()))
            .await
            .unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn terminal_failure_does_not_rearm() {
        let queue = fresh().await;
        queue.enqueue(op("u1", SyncOpKind::Register)).await.unwrap();
        let item = queue.dequeue_next().await.unwrap().unwrap();
        queue
            .mark_failed(item.sequence_id, item.attempts, &CoreError::InvalidInput("bad payload".into()))
            .await
            .unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_processing_reverts_to_pending() {
        let queue = fresh().await;
        queue.enqueue(op("u1", SyncOpKind::Register)).await.unwrap();
        let item = queue.dequeue_next().await.unwrap().unwrap();

        sqlx::query("UPDATE edge_sync_queue SET updated_at = ? WHERE sequence_id = ?")
            .bind((Utc::now() - ChronoDuration::seconds(600)).to_rfc3339())
            .bind(item.sequence_id)
            .execute(&queue.pool)
            .await
            .unwrap();

        let reverted = queue.revert_stale_processing().await.unwrap();
        assert_eq!(reverted, 1);
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn flush_drains_all_pending_and_marks_completed() {
        let queue = fresh().await;
        queue.enqueue(op("u1", SyncOpKind::Register)).await.unwrap();
        queue.enqueue(op("u2", SyncOpKind::Register)).await.unwrap();

        let drained = flush(&queue, |_item| async { Ok(()) }).await.unwrap();
        assert_eq!(drained, 2);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }
}
