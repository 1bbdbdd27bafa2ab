//! HTTP surface: the `/socket` websocket upgrade and the REST API.
//!
//! REST carries the durable half of the system — the friend-request
//! mutation whose success path triggers the live fan-out, the notification
//! trail, and the point-in-time presence snapshots clients fall back to
//! when live updates are unavailable.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use reel_sdk::event::ServerEvent;

use crate::auth::Identity;
use crate::connection;
use crate::db::NewNotification;
use crate::error::AuthError;
use crate::fanout;
use crate::server::SharedState;

/// Most notifications returned by one list request.
const MAX_NOTIFICATION_PAGE: usize = 100;

/// Build the axum router with the websocket and REST endpoints.
pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/socket", get(ws_upgrade))
        .route("/api/v1/health", get(api_health))
        .route("/api/v1/presence/online", get(api_online_users))
        .route("/api/v1/users/{id}/online", get(api_user_online))
        .route("/api/v1/friend-requests", post(api_send_friend_request))
        .route("/api/v1/friend-requests/accept", post(api_accept_friend_request))
        .route("/api/v1/notify", post(api_notify))
        .route("/api/v1/notifications", get(api_list_notifications))
        .route("/api/v1/notifications/unread-count", get(api_unread_count))
        .route("/api/v1/notifications/{id}/read", post(api_mark_read))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .with_state(state)
}

/// Pull the bearer token out of the `Authorization` header or, for
/// websocket clients that cannot set headers, the `token` query parameter.
fn bearer_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
        .or_else(|| query.get("token").cloned())
}

fn auth_rejection(error: &AuthError) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": { "code": error.code(), "message": error.to_string() }
        })),
    )
        .into_response()
}

/// Authenticate a REST request; the rejection body matches the socket
/// handshake's.
async fn require_identity(
    state: &SharedState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<Identity, Response> {
    let token = bearer_token(headers, query);
    state
        .gate
        .admit(token.as_deref())
        .await
        .map_err(|e| auth_rejection(&e))
}

// ── WebSocket handshake ────────────────────────────────────────────────

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let token = bearer_token(&headers, &query);
    match state.gate.admit(token.as_deref()).await {
        Ok(identity) => ws
            .on_upgrade(move |socket| connection::handle_socket(socket, state, identity))
            .into_response(),
        Err(e) => {
            tracing::info!(code = e.code(), "socket connection refused: {e}");
            auth_rejection(&e)
        }
    }
}

// ── Presence snapshots ─────────────────────────────────────────────────

async fn api_health(State(state): State<Arc<SharedState>>) -> Response {
    let connections = state.connections.lock().len();
    let online_users = state.registry.list_online_users().await.len();
    Json(json!({
        "status": "ok",
        "connections": connections,
        "online_users": online_users,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}

async fn api_online_users(State(state): State<Arc<SharedState>>) -> Response {
    let mut users = state.registry.list_online_users().await;
    users.sort();
    Json(json!({ "users": users })).into_response()
}

async fn api_user_online(
    State(state): State<Arc<SharedState>>,
    Path(user_id): Path<String>,
) -> Response {
    let is_online = state.registry.is_online(&user_id).await;
    let last_seen = state.registry.last_seen(&user_id).await;
    Json(json!({
        "user_id": user_id,
        "is_online": is_online,
        "last_seen": last_seen,
    }))
    .into_response()
}

// ── Friend-request mutations ───────────────────────────────────────────
//
// The mutation is the single source of truth: its success path triggers
// the live push directly, so clients never emit a separate matching event.

#[derive(Deserialize)]
struct FriendRequestBody {
    target_user_id: String,
    message: Option<String>,
}

async fn api_send_friend_request(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<FriendRequestBody>,
) -> Response {
    let identity = match require_identity(&state, &headers, &query).await {
        Ok(identity) => identity,
        Err(rejection) => return rejection,
    };
    let message = body
        .message
        .unwrap_or_else(|| format!("{} sent you a friend request", identity.username));
    let event = ServerEvent::FriendRequestReceived {
        from_user_id: identity.user_id.clone(),
        message: message.clone(),
    };
    friend_mutation(&state, &identity, &body.target_user_id, "friend_request", &message, event).await
}

async fn api_accept_friend_request(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<FriendRequestBody>,
) -> Response {
    let identity = match require_identity(&state, &headers, &query).await {
        Ok(identity) => identity,
        Err(rejection) => return rejection,
    };
    let message = body
        .message
        .unwrap_or_else(|| format!("{} accepted your friend request", identity.username));
    let event = ServerEvent::FriendRequestAccepted {
        from_user_id: identity.user_id.clone(),
        message: message.clone(),
    };
    friend_mutation(&state, &identity, &body.target_user_id, "friend_accepted", &message, event)
        .await
}

/// Shared push-then-persist path for the two friend mutations.
async fn friend_mutation(
    state: &Arc<SharedState>,
    identity: &Identity,
    target_user_id: &str,
    kind: &str,
    message: &str,
    event: ServerEvent,
) -> Response {
    let delivered = fanout::push_to_user(state, target_user_id, &event).await;
    match state.create_notification(&NewNotification {
        user_id: target_user_id,
        from_user_id: Some(&identity.user_id),
        kind,
        message,
        metadata: &serde_json::Value::Null,
    }) {
        Ok(record) => (
            StatusCode::CREATED,
            Json(json!({ "delivered": delivered, "notification": record })),
        )
            .into_response(),
        Err(e) => {
            // The pushes already happened; only the caller hears about this.
            tracing::error!(target = %target_user_id, "friend mutation persistence failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "delivered": delivered,
                    "error": { "code": "PERSISTENCE_FAILED", "message": e.to_string() }
                })),
            )
                .into_response()
        }
    }
}

// ── Generic notify (used by the CRUD service) ──────────────────────────

#[derive(Deserialize)]
struct NotifyBody {
    target_user_id: String,
    kind: String,
    message: String,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default = "default_persist")]
    persist: bool,
}

fn default_persist() -> bool {
    true
}

async fn api_notify(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<NotifyBody>,
) -> Response {
    let identity = match require_identity(&state, &headers, &query).await {
        Ok(identity) => identity,
        Err(rejection) => return rejection,
    };
    match fanout::notify(
        &state,
        &body.target_user_id,
        &body.kind,
        &body.message,
        &identity.user_id,
        body.metadata,
        body.persist,
    )
    .await
    {
        Ok(outcome) => Json(json!({
            "delivered": outcome.delivered,
            "notification": outcome.record,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": { "code": "PERSISTENCE_FAILED", "message": e.to_string() }
            })),
        )
            .into_response(),
    }
}

// ── Durable notification trail ─────────────────────────────────────────

async fn api_list_notifications(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let identity = match require_identity(&state, &headers, &query).await {
        Ok(identity) => identity,
        Err(rejection) => return rejection,
    };
    let limit = query
        .get("limit")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(50)
        .min(MAX_NOTIFICATION_PAGE);
    let notifications = state
        .with_db(|db| db.list_notifications(&identity.user_id, limit))
        .unwrap_or_default();
    Json(json!({ "notifications": notifications })).into_response()
}

async fn api_unread_count(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let identity = match require_identity(&state, &headers, &query).await {
        Ok(identity) => identity,
        Err(rejection) => return rejection,
    };
    let unread = state
        .with_db(|db| db.unread_count(&identity.user_id))
        .unwrap_or(0);
    Json(json!({ "unread": unread })).into_response()
}

async fn api_mark_read(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let identity = match require_identity(&state, &headers, &query).await {
        Ok(identity) => identity,
        Err(rejection) => return rejection,
    };
    let updated = state
        .with_db(|db| db.mark_notification_read(&identity.user_id, id))
        .unwrap_or(false);
    if updated {
        Json(json!({ "ok": true })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": { "code": "NOT_FOUND", "message": "no such notification" }
            })),
        )
            .into_response()
    }
}
