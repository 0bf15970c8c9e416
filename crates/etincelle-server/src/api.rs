use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, Method},
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use etincelle_shared::{Message, NotificationKind, PeerProfile, ServerEvent, UserId};
use etincelle_store::SharedDb;

use crate::config::ServerConfig;
use crate::cooldown::{self, CooldownMap};
use crate::error::ServerError;
use crate::notify::Notifier;
use crate::oracle::Directory;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::registry::Registry;
use crate::session;
use crate::signaling::CallBroker;
use crate::threads::{BulkAction, ThreadService};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDb,
    pub registry: Registry,
    pub threads: ThreadService,
    pub calls: CallBroker,
    pub directory: Arc<dyn Directory>,
    pub notifier: Arc<dyn Notifier>,
    pub cooldowns: CooldownMap,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .route("/api/messages", post(send_message))
        .route("/api/messages/bulk", post(bulk_messages))
        .route("/api/messages/{peer_id}", get(thread_history))
        .route("/api/messages/{peer_id}", delete(clear_thread))
        .route("/api/messages/{peer_id}/read", post(mark_thread_read))
        .route("/api/messages/{peer_id}/clear", post(clear_thread))
        .route("/api/threads/{peer_id}", get(load_thread))
        .route("/api/unread/messages", get(unread_total))
        .route("/api/unread/threads", get(unread_by_thread))
        .route("/api/call/request/{peer_id}", post(request_call))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response payloads
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    to: String,
    content: String,
}

#[derive(Serialize)]
struct SendMessageResponse {
    ok: bool,
    message: Message,
}

#[derive(Deserialize)]
struct PageQuery {
    /// RFC 3339 upper bound, exclusive.
    before: Option<DateTime<Utc>>,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct HistoryResponse {
    ok: bool,
    items: Vec<Message>,
}

#[derive(Serialize)]
struct ThreadResponse {
    ok: bool,
    peer: PeerProfile,
    items: Vec<Message>,
}

#[derive(Serialize)]
struct MarkReadResponse {
    ok: bool,
    unread: u64,
    until: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct ClearResponse {
    ok: bool,
    cleared: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkRequest {
    action: String,
    #[serde(default)]
    thread_user_ids: Vec<String>,
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Serialize)]
struct BulkResponse {
    ok: bool,
    modified: usize,
}

#[derive(Serialize)]
struct UnreadTotalResponse {
    ok: bool,
    count: u64,
}

#[derive(Serialize)]
struct UnreadThreadsResponse {
    ok: bool,
    by: HashMap<UserId, u64>,
    total: u64,
}

#[derive(Serialize)]
struct CallRequestResponse {
    ok: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ServerError> {
    let me = session::authed_user(&headers, &state.config)?;
    let to = UserId::parse(&req.to).map_err(|_| ServerError::BadRecipient)?;

    let message = state.threads.send_message(&me, &to, &req.content).await?;
    Ok(Json(SendMessageResponse { ok: true, message }))
}

async fn thread_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(peer_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<HistoryResponse>, ServerError> {
    let me = session::authed_user(&headers, &state.config)?;
    let peer = parse_peer(&peer_id)?;

    let items = state
        .threads
        .history_page(&me, &peer, query.before, query.limit)
        .await?;
    Ok(Json(HistoryResponse { ok: true, items }))
}

async fn load_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(peer_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ThreadResponse>, ServerError> {
    let me = session::authed_user(&headers, &state.config)?;
    let peer = parse_peer(&peer_id)?;

    let view = state
        .threads
        .load_thread(&me, &peer, query.before, query.limit)
        .await?;
    Ok(Json(ThreadResponse {
        ok: true,
        peer: view.peer,
        items: view.items,
    }))
}

async fn mark_thread_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(peer_id): Path<String>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let me = session::authed_user(&headers, &state.config)?;
    let peer = parse_peer(&peer_id)?;

    let summary = state.threads.mark_thread_read(&me, &peer).await?;
    Ok(Json(MarkReadResponse {
        ok: true,
        unread: summary.unread,
        until: summary.until,
    }))
}

async fn clear_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(peer_id): Path<String>,
) -> Result<Json<ClearResponse>, ServerError> {
    let me = session::authed_user(&headers, &state.config)?;
    let peer = parse_peer(&peer_id)?;

    let cleared = state.threads.clear_thread(&me, &peer).await?;
    Ok(Json(ClearResponse { ok: true, cleared }))
}

async fn bulk_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BulkRequest>,
) -> Result<Json<BulkResponse>, ServerError> {
    let me = session::authed_user(&headers, &state.config)?;

    // Unparseable ids are skipped, matching the bulk semantics of the
    // store layer.
    let action = match req.action.as_str() {
        "deleteThreads" => BulkAction::DeleteThreads(
            req.thread_user_ids
                .iter()
                .filter_map(|raw| UserId::parse(raw).ok())
                .collect(),
        ),
        "deleteMessages" => BulkAction::DeleteMessages(
            req.message_ids
                .iter()
                .filter_map(|raw| Uuid::parse_str(raw).ok())
                .collect(),
        ),
        _ => return Err(ServerError::BadAction),
    };

    let modified = state.threads.bulk_clear(&me, action).await?;
    Ok(Json(BulkResponse { ok: true, modified }))
}

async fn unread_total(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UnreadTotalResponse>, ServerError> {
    let me = session::authed_user(&headers, &state.config)?;

    let count = state.threads.unread_total(&me).await?;
    Ok(Json(UnreadTotalResponse { ok: true, count }))
}

async fn unread_by_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UnreadThreadsResponse>, ServerError> {
    let me = session::authed_user(&headers, &state.config)?;

    let breakdown = state.threads.unread_by_thread(&me).await?;
    Ok(Json(UnreadThreadsResponse {
        ok: true,
        by: breakdown.by,
        total: breakdown.total,
    }))
}

/// Out-of-band call request: eligibility checks, pair cooldown, then a
/// notification plus `rtc:ring` towards the peer. The actual signaling
/// still runs over the socket.
async fn request_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(peer_id): Path<String>,
) -> Result<Json<CallRequestResponse>, ServerError> {
    let me = session::authed_user(&headers, &state.config)?;
    let peer_id = parse_peer(&peer_id)?;

    let caller = state
        .directory
        .user_by_id(&me)
        .await?
        .ok_or(ServerError::Unauthenticated)?;
    let peer = state
        .directory
        .user_by_id(&peer_id)
        .await?
        .filter(|p| p.active)
        .ok_or(ServerError::PeerNotFound)?;

    if !caller.plan.is_elite() {
        return Err(ServerError::UpgradeRequired);
    }

    let account_age = Utc::now() - caller.created_at;
    let eligible = account_age >= Duration::hours(48)
        && caller.verified_at.is_some()
        && peer.verified_at.is_some()
        && peer.video_chat;
    if !eligible {
        return Err(ServerError::NotAllowed);
    }

    let key = cooldown::pair_key(&me, &peer_id);
    if !state.cooldowns.try_acquire(&key).await {
        return Err(ServerError::Cooldown);
    }

    state
        .notifier
        .notify(
            &peer_id,
            Some(&me),
            NotificationKind::System,
            "wants to start a video chat 📹",
            Some(&format!("/messages?with={me}")),
        )
        .await;
    state
        .registry
        .broadcast_to_user(
            &peer_id,
            &ServerEvent::RtcRing {
                from: me.clone(),
                meta: json!({ "username": caller.username }),
            },
        )
        .await;

    info!(caller = %me, peer = %peer_id, "Call requested");
    Ok(Json(CallRequestResponse { ok: true }))
}

fn parse_peer(raw: &str) -> Result<UserId, ServerError> {
    UserId::parse(raw).map_err(|_| ServerError::PeerNotFound)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
