//! Hybrid search orchestration (§4.J steps 1–2): the concurrent I/O fan-out
//! to a keyword index and a vector store. The merge/scoring math (steps
//! 3–5) lives in [`hermes_core::search::fuse`]; this module only gets the
//! two hit lists onto the table.

use async_trait::async_trait;
use hermes_core::error::CoreError;
use hermes_core::search::{fuse, BothFailedError, FusedResult, Hit, SideResult, Weights};
use sqlx::{Row, SqlitePool};

/// The external keyword index (§4.J step 1). The core does not constrain
/// the implementation; here it is backed by SQLite, matching the
/// `documents` table the Local backend writes.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Hit>, String>;
}

/// Produces a query embedding and ranks stored vectors by cosine
/// similarity (§4.J step 1, "Vector representation").
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Hit>, String>;
}

/// BM25-flavored keyword search would need FTS5 wired to document writes;
/// this implementation does substring matching over `documents.title`,
/// scored by match position (earlier match = higher score), which is
/// enough to exercise the fan-out and fusion without committing to an
/// indexing strategy the spec explicitly leaves open.
pub struct SqliteKeywordIndex {
    pool: SqlitePool,
}

impl SqliteKeywordIndex {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteKeywordIndex { pool }
    }
}

#[async_trait]
impl KeywordIndex for SqliteKeywordIndex {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Hit>, String> {
        let rows = sqlx::query("SELECT uuid, title FROM documents WHERE title LIKE ?")
            .bind(format!("%{query}%"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.to_string())?;

        let mut hits: Vec<Hit> = rows
            .iter()
            .filter_map(|row| {
                let uuid: String = row.try_get("uuid").ok()?;
                let title: String = row.try_get("title").ok()?;
                let position = title.to_lowercase().find(&query.to_lowercase())?;
                let score = 1.0 - (position as f32 / (title.len().max(1) as f32));
                Some(Hit { document_id: uuid, score: score.clamp(0.0, 1.0) })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Embeds the query with a caller-supplied embedding function, then ranks
/// `document_embeddings` rows by cosine similarity (§4.J "Vector
/// representation").
pub struct SqliteVectorStore<E> {
    pool: SqlitePool,
    embed: E,
}

impl<E> SqliteVectorStore<E>
where
    E: Fn(&str) -> Vec<f32> + Send + Sync,
{
    pub fn new(pool: SqlitePool, embed: E) -> Self {
        SqliteVectorStore { pool, embed }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

#[async_trait]
impl<E> VectorStore for SqliteVectorStore<E>
where
    E: Fn(&str) -> Vec<f32> + Send + Sync,
{
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Hit>, String> {
        let query_vector = (self.embed)(query);

        let rows = sqlx::query("SELECT document_uuid, vector FROM document_embeddings")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.to_string())?;

        let mut hits: Vec<Hit> = rows
            .iter()
            .filter_map(|row| {
                let uuid: String = row.try_get("document_uuid").ok()?;
                let blob: Vec<u8> = row.try_get("vector").ok()?;
                let vector = decode_vector(&blob);
                let score = cosine_similarity(&query_vector, &vector);
                // cosine is in [-1, 1]; rescale to the [0, 1] hit contract.
                Some(Hit { document_id: uuid, score: ((score + 1.0) / 2.0).clamp(0.0, 1.0) })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Run the full hybrid search (§4.J steps 1–5): fan out to both sides
/// concurrently, then fuse. `n` is the caller's requested result count;
/// each side is asked for `2n` candidates per §4.J step 1.
pub async fn hybrid_search(
    keyword: &dyn KeywordIndex,
    vector: &dyn VectorStore,
    query: &str,
    weights: Weights,
    n: usize,
) -> Result<Vec<FusedResult>, BothFailedError> {
    let candidate_k = n.saturating_mul(2).max(1);
    let (keyword_result, vector_result) =
        tokio::join!(keyword.search(query, candidate_k), vector.search(query, candidate_k));

    let keyword_side = match keyword_result {
        Ok(hits) => SideResult::Ok(hits),
        Err(e) => SideResult::Err(e),
    };
    let vector_side = match vector_result {
        Ok(hits) => SideResult::Ok(hits),
        Err(e) => SideResult::Err(e),
    };

    fuse(keyword_side, vector_side, weights, n)
}

pub fn core_error_from_both_failed(err: BothFailedError) -> CoreError {
    CoreError::UpstreamUnavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn fresh_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn keyword_index_matches_title_substring() {
        let pool = fresh_pool().await;
        sqlx::query(
            "INSERT INTO documents (uuid, title, doc_type, status, created_at, updated_at) VALUES ('d1', 'Deployment Runbook', 'RFC', 'Draft', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let index = SqliteKeywordIndex::new(pool);
        let hits = index.search("deployment", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "d1");
    }

    #[tokio::test]
    async fn vector_store_ranks_by_cosine_similarity() {
        let pool = fresh_pool().await;
        sqlx::query(
            "INSERT INTO document_embeddings (document_uuid, model, model_version, dimensions, vector, created_at) VALUES (?, 'test', '1', 2, ?, '2025-01-01T00:00:00Z')",
        )
        .bind("close")
        .bind(encode_vector(&[1.0, 0.0]))
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO document_embeddings (document_uuid, model, model_version, dimensions, vector, created_at) VALUES (?, 'test', '1', 2, ?, '2025-01-01T00:00:00Z')",
        )
        .bind("far")
        .bind(encode_vector(&[0.0, 1.0]))
        .execute(&pool)
        .await
        .unwrap();

        let store = SqliteVectorStore::new(pool, |_q| vec![1.0, 0.0]);
        let hits = store.search("anything", 10).await.unwrap();
        assert_eq!(hits[0].document_id, "close");
    }

    #[tokio::test]
    async fn s5_hybrid_search_survives_one_side_failing() {
        struct FailingKeyword;
        #[async_trait]
        impl KeywordIndex for FailingKeyword {
            async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Hit>, String> {
                Err("index unavailable".to_string())
            }
        }
        struct WorkingVector;
        #[async_trait]
        impl VectorStore for WorkingVector {
            async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Hit>, String> {
                Ok(vec![Hit { document_id: "d1".to_string(), score: 0.8 }])
            }
        }

        let results = hybrid_search(&FailingKeyword, &WorkingVector, "q", Weights::BALANCED, 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].keyword_score, 0.0);
        assert!(!results[0].matched_in_both);
    }

    #[tokio::test]
    async fn both_sides_failing_is_a_composite_error() {
        struct FailingKeyword;
        #[async_trait]
        impl KeywordIndex for FailingKeyword {
            async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Hit>, String> {
                Err("kw down".to_string())
            }
        }
        struct FailingVector;
        #[async_trait]
        impl VectorStore for FailingVector {
            async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Hit>, String> {
                Err("sem down".to_string())
            }
        }

        let err = hybrid_search(&FailingKeyword, &FailingVector, "q", Weights::BALANCED, 5).await.unwrap_err();
        assert_eq!(err.keyword_error, "kw down");
        assert_eq!(err.semantic_error, "sem down");
    }
}
