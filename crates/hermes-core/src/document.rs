//! Document, revision, and embedding value types (§3.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identity::Uuid;

/// A document's canonical record, project-scoped unique on `uuid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub uuid: Uuid,
    pub provider_document_id: Option<String>,
    pub title: String,
    pub doc_type: String,
    pub status: String,
    pub owners: Vec<String>,
    pub contributors: Vec<String>,
    pub approvers: Vec<String>,
    pub product: Option<String>,
    pub tags: Vec<String>,
    pub parent_folders: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

/// An immutable content version of a [`Document`].
///
/// Uniqueness: `(document, content_hash)` is unique per project — the same
/// hash under the same document is an idempotent append, not a new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRevision {
    pub document_uuid: Uuid,
    pub content_hash: String,
    pub external_revision_ref: Option<String>,
    pub content_length: u64,
    pub content_type: String,
    pub ai_summary: Option<String>,
    pub modified_by: String,
    pub modified_at: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A vector embedding attached to a document, and optionally to a specific
/// revision or chunk. Distinct `(document, model)` pairs coexist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEmbedding {
    pub document_uuid: Uuid,
    pub revision_content_hash: Option<String>,
    pub chunk_id: Option<String>,
    pub model: String,
    pub model_version: String,
    pub dimensions: u32,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl DocumentRevision {
    /// Whether `other` would be an idempotent append given this is the
    /// latest revision of the same document.
    pub fn is_duplicate_of(&self, other: &DocumentRevision) -> bool {
        self.document_uuid == other.document_uuid && self.content_hash == other.content_hash
    }
}
