use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use missive_shared::constants::MAX_FILE_BYTES;
use missive_shared::protocol::{DeletionNotice, MessageView, TaggedEntryView};
use missive_shared::tags::TagFilter;
use missive_shared::types::{MessageId, UserId};
use missive_store::{Friendship, FriendshipStatus, StoreError, User};

use crate::auth::{Authenticator, SessionTokens};
use crate::blob_store::BlobStore;
use crate::delivery::{AttachmentPayload, DeliveryCoordinator, SendRequest, SharedDb};
use crate::error::ServerError;
use crate::presence::PresenceRegistry;
use crate::socket;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DeliveryCoordinator>,
    pub db: SharedDb,
    pub presence: PresenceRegistry,
    pub auth: Arc<SessionTokens>,
    pub blobs: Arc<BlobStore>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/session", post(create_session).delete(end_session))
        .route("/api/users", get(list_users))
        .route("/api/users/me", put(update_profile))
        .route("/api/friends", get(list_friends))
        .route("/api/friends/requests", get(list_friend_requests))
        .route("/api/friends/requests/:id", post(send_friend_request))
        .route("/api/friends/requests/:id/accept", post(accept_friend_request))
        .route("/api/friends/requests/:id/reject", post(reject_friend_request))
        .route("/api/messages/send/:id", post(send_message))
        .route("/api/messages/:id/tagged", get(get_tagged_messages))
        .route("/api/messages/:id/read", post(mark_read))
        .route("/api/messages/:id", get(get_messages).delete(delete_message))
        .route("/api/files/upload/:id", post(upload_file))
        .route("/api/files/:key", get(download_file))
        .route("/ws", get(socket::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_FILE_BYTES + 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the calling user from the `Authorization: Bearer` header.
fn require_user(headers: &HeaderMap, state: &AppState) -> Result<UserId, ServerError> {
    state
        .auth
        .authenticate(bearer_token(headers))
        .ok_or_else(|| ServerError::Unauthorized("Missing or invalid session token".to_string()))
}

fn bearer_token(headers: &HeaderMap) -> &str {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    auth.strip_prefix("Bearer ").unwrap_or(auth)
}

// ─── Health ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Sessions ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    /// Pin the identity; omitted for first-time users.
    user_id: Option<UserId>,
    full_name: String,
    avatar_url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    token: String,
    user: User,
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ServerError> {
    let full_name = req.full_name.trim();
    if full_name.is_empty() {
        return Err(ServerError::Validation("full name is required".to_string()));
    }

    let id = req.user_id.unwrap_or_default();
    let user = {
        let db = state.db.lock().await;
        db.upsert_user(&User {
            id,
            full_name: full_name.to_string(),
            avatar_url: req.avatar_url,
            created_at: Utc::now(),
        })?;
        db.get_user(id)?
    };

    let token = state.auth.issue(id);
    info!(user = %id, "session issued");

    Ok(Json(CreateSessionResponse { token, user }))
}

async fn end_session(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let revoked = state.auth.revoke(bearer_token(&headers));
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

// ─── User directory ───

async fn list_users(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, ServerError> {
    let me = require_user(&headers, &state)?;
    let users = state.db.lock().await.list_users_except(me)?;
    Ok(Json(users))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    full_name: String,
    avatar_url: Option<String>,
}

async fn update_profile(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<User>, ServerError> {
    let me = require_user(&headers, &state)?;

    let full_name = req.full_name.trim();
    if full_name.is_empty() {
        return Err(ServerError::Validation("full name is required".to_string()));
    }

    let db = state.db.lock().await;
    let created_at = match db.get_user(me) {
        Ok(user) => user.created_at,
        Err(StoreError::NotFound) => Utc::now(),
        Err(e) => return Err(e.into()),
    };

    let user = User {
        id: me,
        full_name: full_name.to_string(),
        avatar_url: req.avatar_url,
        created_at,
    };
    db.upsert_user(&user)?;

    Ok(Json(user))
}

// ─── Friends ───

async fn list_friends(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, ServerError> {
    let me = require_user(&headers, &state)?;
    let friends = state.db.lock().await.list_friends(me)?;
    Ok(Json(friends))
}

async fn list_friend_requests(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<Friendship>>, ServerError> {
    let me = require_user(&headers, &state)?;
    let requests = state.db.lock().await.list_incoming_requests(me)?;
    Ok(Json(requests))
}

async fn send_friend_request(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(other): Path<UserId>,
) -> Result<Json<Friendship>, ServerError> {
    let me = require_user(&headers, &state)?;
    if other == me {
        return Err(ServerError::Validation(
            "cannot befriend yourself".to_string(),
        ));
    }

    let db = state.db.lock().await;
    match db.get_user(other) {
        Ok(_) => {}
        Err(StoreError::NotFound) => {
            return Err(ServerError::NotFound(format!("User {other} not found")))
        }
        Err(e) => return Err(e.into()),
    }

    match db.get_friendship(me, other)? {
        Some(existing) => match existing.status {
            FriendshipStatus::Accepted => Err(ServerError::BadRequest(
                "Already friends with this user".to_string(),
            )),
            FriendshipStatus::Pending => Err(ServerError::BadRequest(
                "A friend request is already pending".to_string(),
            )),
            // A rejected pair can ask again; the old row is reopened.
            FriendshipStatus::Rejected => {
                db.respond_friend_request(existing.id, FriendshipStatus::Pending, Utc::now())?;
                Ok(Json(Friendship {
                    status: FriendshipStatus::Pending,
                    ..existing
                }))
            }
        },
        None => {
            let friendship = db.create_friend_request(me, other)?;
            Ok(Json(friendship))
        }
    }
}

async fn accept_friend_request(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(other): Path<UserId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    respond_to_friend_request(headers, state, other, FriendshipStatus::Accepted).await
}

async fn reject_friend_request(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(other): Path<UserId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    respond_to_friend_request(headers, state, other, FriendshipStatus::Rejected).await
}

async fn respond_to_friend_request(
    headers: HeaderMap,
    state: AppState,
    other: UserId,
    outcome: FriendshipStatus,
) -> Result<Json<serde_json::Value>, ServerError> {
    let me = require_user(&headers, &state)?;

    let db = state.db.lock().await;
    let Some(friendship) = db.get_friendship(me, other)? else {
        return Err(ServerError::NotFound(
            "No friend request from this user".to_string(),
        ));
    };
    if friendship.recipient_id != me || friendship.status != FriendshipStatus::Pending {
        return Err(ServerError::BadRequest(
            "No pending friend request from this user".to_string(),
        ));
    }

    db.respond_friend_request(friendship.id, outcome, Utc::now())?;
    Ok(Json(
        serde_json::json!({ "status": outcome.as_str() }),
    ))
}

// ─── Messages ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    text: Option<String>,
    /// Base64 image payload, raw or as a `data:` URL.
    image: Option<String>,
    reply_to: Option<MessageId>,
}

async fn send_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(receiver): Path<UserId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageView>), ServerError> {
    let me = require_user(&headers, &state)?;

    let attachment = match &req.image {
        Some(image) => Some(decode_image_payload(image)?),
        None => None,
    };

    let view = state
        .coordinator
        .send_message(
            me,
            receiver,
            SendRequest {
                text: req.text,
                attachment,
                reply_to: req.reply_to,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

/// Accept both a raw base64 string and a `data:<mime>;base64,<data>` URL.
fn decode_image_payload(image: &str) -> Result<AttachmentPayload, ServerError> {
    let (mime_type, payload) = match image.strip_prefix("data:") {
        Some(rest) => {
            let (mime, payload) = rest
                .split_once(";base64,")
                .ok_or_else(|| ServerError::BadRequest("Unsupported image encoding".to_string()))?;
            let mime = if mime.is_empty() {
                "application/octet-stream"
            } else {
                mime
            };
            (mime.to_string(), payload)
        }
        None => ("application/octet-stream".to_string(), image),
    };

    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| ServerError::BadRequest(format!("Invalid image payload: {e}")))?;

    Ok(AttachmentPayload::Image {
        data: Bytes::from(bytes),
        mime_type,
    })
}

async fn get_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(other): Path<UserId>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let me = require_user(&headers, &state)?;
    let messages = state.coordinator.list_conversation(me, other).await?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
struct TaggedQuery {
    tag: Option<String>,
}

async fn get_tagged_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(other): Path<UserId>,
    Query(query): Query<TaggedQuery>,
) -> Result<Json<Vec<TaggedEntryView>>, ServerError> {
    let me = require_user(&headers, &state)?;

    let filter = match query.tag.as_deref() {
        None => TagFilter::All,
        Some(raw) => raw
            .parse::<TagFilter>()
            .map_err(|e| ServerError::Validation(e.to_string()))?,
    };

    let entries = state.coordinator.list_tagged(me, other, filter).await?;
    Ok(Json(entries))
}

async fn mark_read(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let me = require_user(&headers, &state)?;
    state.coordinator.mark_read(me, id).await?;
    Ok(Json(serde_json::json!({ "read": true })))
}

async fn delete_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
) -> Result<Json<DeletionNotice>, ServerError> {
    let me = require_user(&headers, &state)?;
    let notice = state.coordinator.delete_message(me, id).await?;
    Ok(Json(notice))
}

// ─── Files ───

async fn upload_file(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(receiver): Path<UserId>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<MessageView>), ServerError> {
    let me = require_user(&headers, &state)?;

    let mut attachment = None;
    let mut text = None;
    let mut reply_to = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let original_name = field.file_name().unwrap_or("file").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(|e| {
                    ServerError::BadRequest(format!("Failed to read field: {}", e))
                })?;
                attachment = Some(AttachmentPayload::File {
                    data,
                    original_name,
                    mime_type,
                });
            }
            "text" => {
                let value = field.text().await.map_err(|e| {
                    ServerError::BadRequest(format!("Failed to read field: {}", e))
                })?;
                text = Some(value);
            }
            "replyTo" => {
                let raw = field.text().await.map_err(|e| {
                    ServerError::BadRequest(format!("Failed to read field: {}", e))
                })?;
                if !raw.is_empty() && raw != "no reply" {
                    reply_to = Some(MessageId::parse(&raw).map_err(|e| {
                        ServerError::BadRequest(format!("Invalid replyTo id: {e}"))
                    })?);
                }
            }
            _ => {}
        }
    }

    if attachment.is_none() {
        return Err(ServerError::BadRequest(
            "Missing 'file' field in multipart form".to_string(),
        ));
    }

    let view = state
        .coordinator
        .send_message(
            me,
            receiver,
            SendRequest {
                text,
                attachment,
                reply_to,
            },
        )
        .await?;

    info!(id = %view.id, receiver = %receiver, "file message uploaded");
    Ok((StatusCode::CREATED, Json(view)))
}

async fn download_file(
    State(state): State<AppState>,
    Path(key): Path<Uuid>,
) -> Result<Response, ServerError> {
    let (file, meta) = state.blobs.open_stream(key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let headers = [
        (header::CONTENT_TYPE, meta.mime_type.clone()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", meta.original_name),
        ),
    ];

    Ok((headers, body).into_response())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_raw_base64_image() {
        let encoded = BASE64.encode(b"image-bytes");
        let AttachmentPayload::Image { data, mime_type } =
            decode_image_payload(&encoded).unwrap()
        else {
            panic!("expected image payload");
        };
        assert_eq!(data.as_ref(), b"image-bytes");
        assert_eq!(mime_type, "application/octet-stream");
    }

    #[test]
    fn decodes_data_url_image() {
        let encoded = format!("data:image/png;base64,{}", BASE64.encode(b"png-bytes"));
        let AttachmentPayload::Image { data, mime_type } =
            decode_image_payload(&encoded).unwrap()
        else {
            panic!("expected image payload");
        };
        assert_eq!(data.as_ref(), b"png-bytes");
        assert_eq!(mime_type, "image/png");
    }

    #[test]
    fn rejects_malformed_image_payload() {
        assert!(matches!(
            decode_image_payload("data:image/png;notbase64"),
            Err(ServerError::BadRequest(_))
        ));
        assert!(matches!(
            decode_image_payload("not-base64!!!"),
            Err(ServerError::BadRequest(_))
        ));
    }
}
