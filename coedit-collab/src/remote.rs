//! HTTP clients for the version service and the identity service.
//!
//! Every request carries the configured timeout. A timeout surfaces as
//! [`StoreError::Timeout`]; a refused connection, non-success status or
//! unreadable body as [`StoreError::Unavailable`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;

use crate::model::{DocumentId, NewSnapshot, Snapshot, SnapshotId};
use crate::storage::{AccountDirectory, StoreError, VersionStore};

const VERSION_SERVICE: &str = "version store";
const IDENTITY_SERVICE: &str = "identity service";
const INTERNAL_SECRET_HEADER: &str = "X-Internal-Secret";

/// Remote client configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL, e.g. `http://versionservice:8083`
    pub base_url: String,
    /// Per-request bound (default: 3s)
    pub timeout: Duration,
    /// Shared secret for internal endpoints
    pub internal_secret: Option<String>,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    fn parse_base(&self) -> Result<Url, StoreError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| StoreError::Database(format!("invalid base URL {:?}: {e}", self.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Database(format!("invalid base URL {:?}", self.base_url)));
        }
        Ok(base)
    }
}

/// `base` with `segments` appended, each percent-encoded as exactly one
/// path segment.
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    // Err only for cannot-be-a-base URLs, rejected by `parse_base`.
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(3),
            internal_secret: None,
        }
    }
}

fn build_client(config: &RemoteConfig) -> Result<Client, StoreError> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| StoreError::Database(format!("failed to build HTTP client: {e}")))
}

fn transport_error(service: &'static str, e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout { service }
    } else {
        StoreError::Unavailable {
            service,
            reason: e.to_string(),
        }
    }
}

async fn send(service: &'static str, request: RequestBuilder) -> Result<Response, StoreError> {
    request.send().await.map_err(|e| transport_error(service, e))
}

fn require_success(service: &'static str, response: &Response) -> Result<(), StoreError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(StoreError::Unavailable {
            service,
            reason: format!("unexpected status {status}"),
        })
    }
}

/// Version record as the version service serializes it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteSnapshot {
    id: SnapshotId,
    document_id: DocumentId,
    author_username: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

impl RemoteSnapshot {
    fn into_snapshot(self) -> Result<Snapshot, StoreError> {
        let created_at = match self.created_at.as_deref() {
            Some(raw) => parse_timestamp(raw)?,
            None => Utc::now(),
        };
        Ok(Snapshot {
            id: self.id,
            document_id: self.document_id,
            author: self.author_username,
            content: self.content.unwrap_or_default(),
            created_at,
        })
    }
}

/// RFC 3339, or a zone-less local timestamp taken as UTC.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::Deserialization(format!("bad timestamp {raw:?}: {e}")))
}

/// Version store reached over the version service's REST API.
pub struct HttpVersionStore {
    client: Client,
    base: Url,
}

impl HttpVersionStore {
    pub fn new(config: RemoteConfig) -> Result<Self, StoreError> {
        Ok(Self {
            client: build_client(&config)?,
            base: config.parse_base()?,
        })
    }

    async fn read_snapshot(response: Response) -> Result<Snapshot, StoreError> {
        response
            .json::<RemoteSnapshot>()
            .await
            .map_err(|e| transport_error(VERSION_SERVICE, e))?
            .into_snapshot()
    }
}

#[async_trait]
impl VersionStore for HttpVersionStore {
    async fn create(&self, snapshot: NewSnapshot) -> Result<Snapshot, StoreError> {
        let url = endpoint(&self.base, &["api", "versions"]);
        let response = send(VERSION_SERVICE, self.client.post(url).json(&snapshot)).await?;
        require_success(VERSION_SERVICE, &response)?;
        Self::read_snapshot(response).await
    }

    async fn list_by_document(&self, document_id: DocumentId) -> Result<Vec<Snapshot>, StoreError> {
        let doc = document_id.to_string();
        let url = endpoint(&self.base, &["api", "versions", "doc", &doc]);
        let response = send(VERSION_SERVICE, self.client.get(url)).await?;
        require_success(VERSION_SERVICE, &response)?;
        response
            .json::<Vec<RemoteSnapshot>>()
            .await
            .map_err(|e| transport_error(VERSION_SERVICE, e))?
            .into_iter()
            .map(RemoteSnapshot::into_snapshot)
            .collect()
    }

    async fn get(&self, id: SnapshotId) -> Result<Option<Snapshot>, StoreError> {
        let id = id.to_string();
        let url = endpoint(&self.base, &["api", "versions", &id]);
        let response = send(VERSION_SERVICE, self.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        require_success(VERSION_SERVICE, &response)?;
        Self::read_snapshot(response).await.map(Some)
    }

    async fn delete_all_for_document(&self, document_id: DocumentId) -> Result<(), StoreError> {
        let doc = document_id.to_string();
        let url = endpoint(&self.base, &["api", "versions", "doc", &doc]);
        let response = send(VERSION_SERVICE, self.client.delete(url)).await?;
        require_success(VERSION_SERVICE, &response)
    }
}

/// Identity service client.
pub struct HttpAccountDirectory {
    client: Client,
    base: Url,
    internal_secret: Option<String>,
}

impl HttpAccountDirectory {
    pub fn new(config: RemoteConfig) -> Result<Self, StoreError> {
        Ok(Self {
            client: build_client(&config)?,
            base: config.parse_base()?,
            internal_secret: config.internal_secret,
        })
    }
}

#[async_trait]
impl AccountDirectory for HttpAccountDirectory {
    async fn exists(&self, username: &str) -> Result<bool, StoreError> {
        let url = endpoint(&self.base, &["users", "exists", username]);
        let response = send(IDENTITY_SERVICE, self.client.get(url)).await?;
        require_success(IDENTITY_SERVICE, &response)?;
        // A null body counts as "no such user".
        let exists: Option<bool> = response
            .json()
            .await
            .map_err(|e| transport_error(IDENTITY_SERVICE, e))?;
        Ok(exists.unwrap_or(false))
    }

    async fn delete_account(&self, username: &str) -> Result<(), StoreError> {
        let url = endpoint(&self.base, &["users", "internal", username]);
        let mut request = self.client.delete(url);
        if let Some(secret) = &self.internal_secret {
            request = request.header(INTERNAL_SECRET_HEADER, secret);
        }
        let response = send(IDENTITY_SERVICE, request).await?;
        require_success(IDENTITY_SERVICE, &response)
    }
}
