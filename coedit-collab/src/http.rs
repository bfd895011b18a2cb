//! HTTP API over the document service.
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET    | `/docs/ping` | liveness |
//! | POST   | `/docs` | create |
//! | GET    | `/docs` | list owned and shared |
//! | GET    | `/docs/{id}` | read |
//! | PUT    | `/docs/{id}` | update title and content |
//! | DELETE | `/docs/{id}` | delete (owner) |
//! | POST   | `/docs/{id}/share` | add collaborator (owner) |
//! | DELETE | `/docs/{id}/share/{collaborator}` | revoke (owner) |
//! | POST   | `/docs/{id}/snapshot` | explicit snapshot |
//! | GET    | `/docs/{id}/versions` | version history |
//! | GET    | `/docs/{id}/versions/{versionId}` | one version |
//! | DELETE | `/docs/internal/owner/{username}` | purge owned docs (internal) |
//! | DELETE | `/accounts/me` | account deletion cascade |
//!
//! The caller identity is the gateway-injected `X-User` header. Errors
//! render as `{"error": ..., "kind": ..., "status": ...}`.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{CollabError, ErrorKind};
use crate::model::{Actor, Document, DocumentId, Snapshot, SnapshotId};
use crate::service::{CreateDocument, DocService, UpdateDocument};

pub const USER_HEADER: &str = "x-user";
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<DocService>,
    /// Required on internal endpoints; `None` disables them.
    pub internal_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub collaborator_username: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountDeleted {
    purged_documents: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: ErrorKind,
    status: u16,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for CollabError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        if kind == ErrorKind::Internal {
            log::error!("request failed: {self}");
        }
        let body = ErrorBody {
            error: self.to_string(),
            kind,
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = CollabError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(USER_HEADER).and_then(|v| v.to_str().ok());
        Actor::from_header(header)
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/docs/ping", get(ping))
        .route("/docs", post(create).get(list))
        .route("/docs/{id}", get(read).put(update).delete(remove))
        .route("/docs/{id}/share", post(share))
        .route("/docs/{id}/share/{collaborator}", delete(revoke))
        .route("/docs/{id}/snapshot", post(snapshot))
        .route("/docs/{id}/versions", get(versions))
        .route("/docs/{id}/versions/{version_id}", get(version))
        .route("/docs/internal/owner/{username}", delete(purge_owned))
        .route("/accounts/me", delete(delete_account))
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn create(
    State(state): State<ApiState>,
    actor: Actor,
    Json(req): Json<CreateDocument>,
) -> Result<(StatusCode, Json<Document>), CollabError> {
    let doc = state.service.create(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

async fn list(State(state): State<ApiState>, actor: Actor) -> Result<Json<Vec<Document>>, CollabError> {
    Ok(Json(state.service.list_visible(&actor).await?))
}

async fn read(
    State(state): State<ApiState>,
    actor: Actor,
    Path(id): Path<DocumentId>,
) -> Result<Json<Document>, CollabError> {
    Ok(Json(state.service.get(id, &actor).await?))
}

async fn update(
    State(state): State<ApiState>,
    actor: Actor,
    Path(id): Path<DocumentId>,
    Json(req): Json<UpdateDocument>,
) -> Result<Json<Document>, CollabError> {
    Ok(Json(state.service.update(id, &actor, req).await?))
}

async fn remove(
    State(state): State<ApiState>,
    actor: Actor,
    Path(id): Path<DocumentId>,
) -> Result<StatusCode, CollabError> {
    state.service.delete(id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn share(
    State(state): State<ApiState>,
    actor: Actor,
    Path(id): Path<DocumentId>,
    Json(req): Json<ShareRequest>,
) -> Result<StatusCode, CollabError> {
    state.service.share(id, &actor, &req.collaborator_username).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke(
    State(state): State<ApiState>,
    actor: Actor,
    Path((id, collaborator)): Path<(DocumentId, String)>,
) -> Result<StatusCode, CollabError> {
    state.service.revoke(id, &actor, &collaborator).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn snapshot(
    State(state): State<ApiState>,
    actor: Actor,
    Path(id): Path<DocumentId>,
) -> Result<StatusCode, CollabError> {
    state.service.save_snapshot(id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn versions(
    State(state): State<ApiState>,
    actor: Actor,
    Path(id): Path<DocumentId>,
) -> Result<Json<Vec<Snapshot>>, CollabError> {
    Ok(Json(state.service.list_versions(id, &actor).await?))
}

async fn version(
    State(state): State<ApiState>,
    actor: Actor,
    Path((id, version_id)): Path<(DocumentId, SnapshotId)>,
) -> Result<Json<Snapshot>, CollabError> {
    Ok(Json(state.service.get_version(id, version_id, &actor).await?))
}

async fn purge_owned(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> Result<StatusCode, CollabError> {
    let presented = headers
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    match (state.internal_secret.as_deref(), presented) {
        (Some(expected), Some(given)) if expected == given => {}
        _ => return Err(CollabError::forbidden("internal endpoint")),
    }
    state.service.purge_owned(&username).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_account(
    State(state): State<ApiState>,
    actor: Actor,
) -> Result<Json<AccountDeleted>, CollabError> {
    let purged_documents = state.service.delete_account(&actor).await?;
    Ok(Json(AccountDeleted { purged_documents }))
}
