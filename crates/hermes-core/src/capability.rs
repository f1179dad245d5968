//! The seven workspace capability interfaces a backend may implement
//! (§4.C), and the tagged-variant dispatch the multi-provider manager
//! routes through (§9: tagged capability variants, not inheritance).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::CoreResult;
use crate::identity::Uuid;

/// A cancellation/deadline handle propagated from the originating request
/// (§5). Every capability operation takes one.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<DateTime<Utc>>,
    cancelled: bool,
}

impl Deadline {
    pub fn none() -> Self {
        Deadline {
            at: None,
            cancelled: false,
        }
    }

    pub fn at(at: DateTime<Utc>) -> Self {
        Deadline {
            at: Some(at),
            cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        Deadline {
            at: None,
            cancelled: true,
        }
    }

    /// Check this deadline, returning an error if it has already expired
    /// or been cancelled.
    pub fn check(&self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.cancelled {
            return Err(crate::error::CoreError::Cancelled);
        }
        if let Some(at) = self.at {
            if now > at {
                return Err(crate::error::CoreError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

/// The tag identifying a capability class, used for routing rather than
/// trait-object inheritance (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityTag {
    Documents,
    Content,
    Revisions,
    People,
    Teams,
    Permissions,
    Notifications,
}

/// A filter for listing documents by folder.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub folder: Option<String>,
    pub modified_after: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Documents: Send + Sync {
    async fn create(&self, doc: Document, deadline: Deadline) -> CoreResult<Document>;
    async fn get(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<Document>;
    async fn update(&self, doc: Document, deadline: Deadline) -> CoreResult<Document>;
    async fn delete(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<()>;
    async fn list(&self, filter: ListFilter, deadline: Deadline) -> CoreResult<Vec<Document>>;
}

#[async_trait]
pub trait Content: Send + Sync {
    async fn get_content(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<Vec<u8>>;
    async fn set_content(&self, uuid: Uuid, bytes: Vec<u8>, deadline: Deadline) -> CoreResult<String>;
    async fn get_size(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<u64>;
    async fn content_hash(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<String>;
}

#[async_trait]
pub trait Revisions: Send + Sync {
    async fn list(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<Vec<crate::document::DocumentRevision>>;
    async fn get_by_hash(
        &self,
        uuid: Uuid,
        hash: &str,
        deadline: Deadline,
    ) -> CoreResult<crate::document::DocumentRevision>;
    /// Append a revision; a duplicate `(document, content_hash)` is an
    /// idempotent no-op that returns the existing row (§3.3).
    async fn append(
        &self,
        revision: crate::document::DocumentRevision,
        deadline: Deadline,
    ) -> CoreResult<crate::document::DocumentRevision>;
    async fn latest(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<crate::document::DocumentRevision>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub email: String,
    pub name: String,
}

#[async_trait]
pub trait People: Send + Sync {
    async fn search(&self, prefix: &str, deadline: Deadline) -> CoreResult<Vec<Person>>;
    async fn get_by_email(&self, email: &str, deadline: Deadline) -> CoreResult<Person>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
}

#[async_trait]
pub trait Teams: Send + Sync {
    async fn get_team(&self, id: &str, deadline: Deadline) -> CoreResult<Team>;
    async fn list_members(&self, id: &str, deadline: Deadline) -> CoreResult<Vec<String>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub subject: String,
    pub action: String,
    pub resource: String,
}

#[async_trait]
pub trait Permissions: Send + Sync {
    async fn list_for_subject(&self, subject: &str, deadline: Deadline) -> CoreResult<Vec<Permission>>;
    async fn check(&self, subject: &str, action: &str, resource: &str, deadline: Deadline) -> CoreResult<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

#[async_trait]
pub trait Notifications: Send + Sync {
    /// At-least-once delivery; callers must tolerate duplicate sends.
    async fn send_email(&self, message: EmailMessage, deadline: Deadline) -> CoreResult<()>;
}
