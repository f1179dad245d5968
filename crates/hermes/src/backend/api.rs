//! API backend adapter (§4.E): People, Teams, Permissions, Notifications,
//! and the Document read path against a remote Central over HTTP.
//!
//! Every call attaches `Authorization: Bearer <token>`. GETs (People search,
//! Team lookups, Document reads) are retried with exponential backoff up to
//! a bounded attempt count; POST/PUT/DELETE-shaped calls (sending email,
//! checking permissions against a mutating endpoint) are retried only when
//! the response maps to a "retriable" error class (§7).

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hermes_core::capability::{
    Content, Deadline, Documents, EmailMessage, ListFilter, Notifications, People, Permission,
    Permissions, Person, Revisions, Team, Teams,
};
use hermes_core::document::{Document, DocumentRevision};
use hermes_core::error::{CoreError, CoreResult};
use hermes_core::identity::Uuid;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

const MAX_GET_ATTEMPTS: u32 = 4;

pub struct ApiBackend {
    base_url: String,
    token: String,
    client: Client,
}

impl ApiBackend {
    pub fn new(base_url: String, token: String) -> Self {
        ApiBackend {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_status(status: StatusCode, body: &str) -> CoreError {
        match status {
            StatusCode::BAD_REQUEST => CoreError::InvalidInput(body.to_string()),
            StatusCode::NOT_FOUND => CoreError::NotFound(body.to_string()),
            StatusCode::UNAUTHORIZED => CoreError::Unauthorized(body.to_string()),
            StatusCode::FORBIDDEN => CoreError::Forbidden(body.to_string()),
            StatusCode::CONFLICT => CoreError::Conflict(body.to_string()),
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                CoreError::UpstreamUnavailable(body.to_string())
            }
            other if other.is_server_error() => CoreError::UpstreamUnavailable(body.to_string()),
            other => CoreError::InvalidInput(format!("unexpected status {other}: {body}")),
        }
    }

    /// Idempotent GET with bounded exponential-backoff retry (§4.E).
    async fn get_json<T: DeserializeOwned>(&self, path: &str, deadline: Deadline) -> CoreResult<T> {
        let mut attempt = 0;
        loop {
            deadline.check(Utc::now())?;
            let response = self
                .client
                .get(self.url(path))
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| CoreError::UpstreamUnavailable(e.to_string()));

            match response {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json::<T>().await.map_err(|e| CoreError::UpstreamUnavailable(e.to_string()));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    let err = Self::map_status(status, &body);
                    if !err.is_retriable() || attempt + 1 >= MAX_GET_ATTEMPTS {
                        return Err(err);
                    }
                }
                Err(err) => {
                    if attempt + 1 >= MAX_GET_ATTEMPTS {
                        return Err(err);
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
            attempt += 1;
        }
    }

    /// Non-idempotent call: one attempt, then one retry only if the error
    /// class is retriable (§4.E, §7).
    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
        deadline: Deadline,
    ) -> CoreResult<T> {
        let mut attempt = 0;
        loop {
            deadline.check(Utc::now())?;
            let response = self
                .client
                .request(method.clone(), self.url(path))
                .bearer_auth(&self.token)
                .json(body)
                .send()
                .await
                .map_err(|e| CoreError::UpstreamUnavailable(e.to_string()));

            match response {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json::<T>().await.map_err(|e| CoreError::UpstreamUnavailable(e.to_string()));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    let err = Self::map_status(status, &text);
                    if !err.is_retriable() || attempt >= 1 {
                        return Err(err);
                    }
                }
                Err(err) => {
                    if attempt >= 1 {
                        return Err(err);
                    }
                }
            }
            attempt += 1;
        }
    }
}

#[async_trait]
impl Documents for ApiBackend {
    async fn create(&self, _doc: Document, _deadline: Deadline) -> CoreResult<Document> {
        Err(CoreError::CapabilityUnavailable(
            "document writes go through the primary backend, not the API adapter".to_string(),
        ))
    }

    async fn get(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<Document> {
        self.get_json(&format!("/api/v2/edge/documents/{uuid}"), deadline).await
    }

    async fn update(&self, _doc: Document, _deadline: Deadline) -> CoreResult<Document> {
        Err(CoreError::CapabilityUnavailable(
            "document writes go through the primary backend, not the API adapter".to_string(),
        ))
    }

    async fn delete(&self, _uuid: Uuid, _deadline: Deadline) -> CoreResult<()> {
        Err(CoreError::CapabilityUnavailable(
            "document writes go through the primary backend, not the API adapter".to_string(),
        ))
    }

    async fn list(&self, filter: ListFilter, deadline: Deadline) -> CoreResult<Vec<Document>> {
        let mut path = "/api/v2/edge/documents/search".to_string();
        if let Some(folder) = filter.folder {
            path = format!("{path}?folder={folder}");
        }
        self.get_json(&path, deadline).await
    }
}

#[async_trait]
impl Content for ApiBackend {
    async fn get_content(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<Vec<u8>> {
        self.get_json::<String>(&format!("/api/v2/edge/documents/{uuid}/content"), deadline)
            .await
            .map(String::into_bytes)
    }

    async fn set_content(&self, _uuid: Uuid, _bytes: Vec<u8>, _deadline: Deadline) -> CoreResult<String> {
        Err(CoreError::CapabilityUnavailable(
            "content writes go through the primary backend, not the API adapter".to_string(),
        ))
    }

    async fn get_size(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<u64> {
        let doc = Documents::get(self, uuid, deadline).await?;
        doc.content_hash
            .map(|_| 0)
            .ok_or_else(|| CoreError::NotFound(format!("document '{uuid}' has no content yet")))
    }

    async fn content_hash(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<String> {
        let doc = Documents::get(self, uuid, deadline).await?;
        doc.content_hash.ok_or_else(|| CoreError::NotFound(format!("document '{uuid}' has no content yet")))
    }
}

#[async_trait]
impl Revisions for ApiBackend {
    async fn list(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<Vec<DocumentRevision>> {
        self.get_json(&format!("/api/v2/edge/documents/{uuid}/revisions"), deadline).await
    }

    async fn get_by_hash(&self, uuid: Uuid, hash: &str, deadline: Deadline) -> CoreResult<DocumentRevision> {
        self.get_json(&format!("/api/v2/edge/documents/{uuid}/revisions/{hash}"), deadline).await
    }

    async fn append(&self, _revision: DocumentRevision, _deadline: Deadline) -> CoreResult<DocumentRevision> {
        Err(CoreError::CapabilityUnavailable(
            "revisions are appended through the primary backend, not the API adapter".to_string(),
        ))
    }

    async fn latest(&self, uuid: Uuid, deadline: Deadline) -> CoreResult<DocumentRevision> {
        self.get_json(&format!("/api/v2/edge/documents/{uuid}/revisions/latest"), deadline).await
    }
}

#[async_trait]
impl People for ApiBackend {
    async fn search(&self, prefix: &str, deadline: Deadline) -> CoreResult<Vec<Person>> {
        self.get_json(&format!("/api/v2/edge/people?prefix={prefix}"), deadline).await
    }

    async fn get_by_email(&self, email: &str, deadline: Deadline) -> CoreResult<Person> {
        self.get_json(&format!("/api/v2/edge/people/{email}"), deadline).await
    }
}

#[async_trait]
impl Teams for ApiBackend {
    async fn get_team(&self, id: &str, deadline: Deadline) -> CoreResult<Team> {
        self.get_json(&format!("/api/v2/edge/teams/{id}"), deadline).await
    }

    async fn list_members(&self, id: &str, deadline: Deadline) -> CoreResult<Vec<String>> {
        let team: Team = self.get_json(&format!("/api/v2/edge/teams/{id}"), deadline).await?;
        Ok(team.members)
    }
}

#[async_trait]
impl Permissions for ApiBackend {
    async fn list_for_subject(&self, subject: &str, deadline: Deadline) -> CoreResult<Vec<Permission>> {
        self.get_json(&format!("/api/v2/edge/permissions?subject={subject}"), deadline).await
    }

    async fn check(&self, subject: &str, action: &str, resource: &str, deadline: Deadline) -> CoreResult<bool> {
        #[derive(serde::Deserialize)]
        struct CheckResponse {
            allowed: bool,
        }
        let path = format!("/api/v2/edge/permissions/check?subject={subject}&action={action}&resource={resource}");
        let resp: CheckResponse = self.get_json(&path, deadline).await?;
        Ok(resp.allowed)
    }
}

#[async_trait]
impl Notifications for ApiBackend {
    async fn send_email(&self, message: EmailMessage, deadline: Deadline) -> CoreResult<()> {
        #[derive(serde::Deserialize)]
        struct Ack {}
        let _: Ack = self
            .send_json(reqwest::Method::POST, "/api/v2/edge/notifications/email", &message, deadline)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_service_unavailable_to_retriable_upstream() {
        let err = ApiBackend::map_status(StatusCode::SERVICE_UNAVAILABLE, "down");
        assert!(err.is_retriable());
        assert!(matches!(err, CoreError::UpstreamUnavailable(_)));
    }

    #[test]
    fn maps_not_found_to_non_retriable() {
        let err = ApiBackend::map_status(StatusCode::NOT_FOUND, "missing");
        assert!(!err.is_retriable());
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn maps_conflict() {
        let err = ApiBackend::map_status(StatusCode::CONFLICT, "dup");
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn document_writes_are_capability_unavailable_on_api_backend() {
        let backend = ApiBackend::new("http://localhost:1".to_string(), "tok".to_string());
        let uuid = Uuid::new();
        let doc = Document {
            uuid,
            provider_document_id: None,
            title: "x".to_string(),
            doc_type: "RFC".to_string(),
            status: "Draft".to_string(),
            owners: vec![],
            contributors: vec![],
            approvers: vec![],
            product: None,
            tags: vec![],
            parent_folders: vec![],
            metadata: Default::default(),
            content_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_indexed_at: None,
        };
        let result = Documents::create(&backend, doc, Deadline::none()).await;
        assert!(matches!(result, Err(CoreError::CapabilityUnavailable(_))));
    }
}
