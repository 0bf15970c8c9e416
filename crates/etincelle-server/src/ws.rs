//! WebSocket endpoint: one connection per device, authenticated up front.
//!
//! Session identity and the video entitlement are resolved once at upgrade
//! time and ride the connection until it closes. Plan changes therefore
//! apply on the next connect.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use etincelle_shared::constants::{
    END_REASON_DECLINED, END_REASON_HANGUP, EVENT_QUEUE_DEPTH, WS_PING_INTERVAL_SECS,
};
use etincelle_shared::{ClientEvent, ServerEvent, UserId};

use crate::api::AppState;
use crate::error::ServerError;
use crate::rate_limit::SendWindow;
use crate::registry::ConnectionId;
use crate::session;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Fallback for clients that cannot set headers on the upgrade request.
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let token = session::bearer_token(&headers)
        .map(str::to_string)
        .or(query.token);
    let Some(token) = token else {
        return ServerError::Unauthenticated.into_response();
    };
    let Some(user) = session::resolve_session(&token, &state.config.session_pubkey) else {
        return ServerError::Unauthenticated.into_response();
    };

    let record = match state.directory.user_by_id(&user).await {
        Ok(Some(record)) if record.active => record,
        Ok(_) => return ServerError::Unauthenticated.into_response(),
        Err(e) => return ServerError::from(e).into_response(),
    };
    let can_video_chat = record.can_video_chat();

    ws.on_upgrade(move |socket| handle_socket(socket, state, user, can_video_chat, addr))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    user: UserId,
    can_video_chat: bool,
    addr: SocketAddr,
) {
    let conn_id: ConnectionId = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(EVENT_QUEUE_DEPTH);

    state.registry.join(&user, conn_id, tx.clone()).await;
    info!(user = %user, conn = %conn_id, addr = %addr, "Socket connected");

    // Outbound pump: queued events plus periodic pings.
    let forward_user = user.clone();
    let forward_task = tokio::spawn(async move {
        let mut ping_ticker = tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping_ticker.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            debug!(user = %forward_user, error = %e, "Skipping unencodable event");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_ticker.tick() => {
                    if ws_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut send_window = SendWindow::for_socket();

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => {
                    dispatch(
                        &state,
                        &user,
                        conn_id,
                        can_video_chat,
                        &mut send_window,
                        &tx,
                        event,
                    )
                    .await;
                }
                Err(e) => {
                    debug!(user = %user, error = %e, "Dropping malformed client event");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                debug!(user = %user, "Ignoring binary frame");
            }
            Ok(_) => {} // ping/pong handled by the protocol layer
            Err(e) => {
                debug!(user = %user, conn = %conn_id, error = %e, "Socket error");
                break;
            }
        }
    }

    forward_task.abort();
    state.registry.leave(&user, conn_id).await;

    // Calls survive as long as the user has another device connected.
    if state.registry.connection_count(&user).await == 0 {
        state.calls.end_for_user(&user).await;
    }

    info!(user = %user, conn = %conn_id, "Socket disconnected");
}

async fn dispatch(
    state: &AppState,
    user: &UserId,
    conn: ConnectionId,
    can_video_chat: bool,
    send_window: &mut SendWindow,
    tx: &mpsc::Sender<ServerEvent>,
    event: ClientEvent,
) {
    match event {
        ClientEvent::RegisterForNotifications(claimed) => {
            state
                .registry
                .register_for_notifications(user, &claimed, conn, tx.clone())
                .await;
        }
        ClientEvent::Typing { to } => {
            state
                .registry
                .broadcast_to_user(&to, &ServerEvent::Typing { from: user.clone() })
                .await;
        }
        ClientEvent::ChatMessage { to, content } => {
            socket_send(state, user, send_window, tx, &to, &content).await;
        }
        ClientEvent::RtcCall { to, meta } => {
            state.calls.call(user, conn, can_video_chat, &to, meta).await;
        }
        ClientEvent::RtcOffer { to, sdp } => {
            state.calls.offer(user, conn, can_video_chat, &to, sdp).await;
        }
        ClientEvent::RtcAnswer { to, sdp } => {
            state
                .calls
                .answer(user, conn, can_video_chat, &to, sdp)
                .await;
        }
        ClientEvent::RtcCandidate { to, candidate } => {
            state
                .calls
                .candidate(user, conn, can_video_chat, &to, candidate)
                .await;
        }
        ClientEvent::RtcEnd { to, reason } => {
            state
                .calls
                .end(user, conn, can_video_chat, &to, reason)
                .await;
        }
        ClientEvent::RtcHangup { to } => {
            state
                .calls
                .end(
                    user,
                    conn,
                    can_video_chat,
                    &to,
                    Some(END_REASON_HANGUP.to_string()),
                )
                .await;
        }
        ClientEvent::RtcDecline { to } => {
            state
                .calls
                .end(
                    user,
                    conn,
                    can_video_chat,
                    &to,
                    Some(END_REASON_DECLINED.to_string()),
                )
                .await;
        }
    }
}

/// Realtime chat send. Runs the same pipeline as the HTTP endpoint, then
/// emits the legacy `new_message` event to both rooms. Failures come back
/// on this connection only.
async fn socket_send(
    state: &AppState,
    user: &UserId,
    send_window: &mut SendWindow,
    tx: &mpsc::Sender<ServerEvent>,
    to: &UserId,
    content: &str,
) {
    if !state.config.socket_send_enabled {
        debug!(user = %user, "Socket send channel is disabled");
        return;
    }

    if !send_window.try_hit() {
        let err = ServerError::RateLimited;
        let _ = tx.try_send(ServerEvent::ChatError {
            code: err.code().to_string(),
            message: err.public_message(),
        });
        return;
    }

    match state.threads.send_message(user, to, content).await {
        Ok(message) => {
            state
                .registry
                .broadcast_to_user(to, &ServerEvent::NewMessage(message.clone()))
                .await;
            state
                .registry
                .broadcast_to_user(user, &ServerEvent::NewMessage(message))
                .await;
        }
        Err(err) => {
            let _ = tx.try_send(ServerEvent::ChatError {
                code: err.code().to_string(),
                message: err.public_message(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;

    use crate::config::ServerConfig;
    use crate::cooldown::CooldownMap;
    use crate::notify::{Notifier, NoopNotifier};
    use crate::oracle::{Directory, StoreDirectory, StoreMatchOracle};
    use crate::rate_limit::RateLimiter;
    use crate::registry::Registry;
    use crate::signaling::CallBroker;
    use crate::threads::ThreadService;
    use etincelle_shared::Plan;
    use etincelle_store::{Database, UserRecord};

    fn sample_user(username: &str) -> UserRecord {
        UserRecord {
            id: UserId::new(),
            username: username.to_string(),
            plan: Plan::Free,
            video_chat: false,
            active: true,
            verified_at: None,
            photo: None,
            age: Some(30),
            city: None,
            country: None,
            created_at: Utc::now(),
        }
    }

    async fn test_state(socket_send_enabled: bool) -> (AppState, UserRecord, UserRecord) {
        let mut config = ServerConfig::default();
        config.socket_send_enabled = socket_send_enabled;

        let db = Database::open_in_memory().unwrap().into_shared();
        let registry = Registry::new();

        let alice = sample_user("alice");
        let bob = sample_user("bob");
        {
            let conn = db.lock().await;
            conn.upsert_user(&alice).unwrap();
            conn.upsert_user(&bob).unwrap();
            conn.add_like(&alice.id, &bob.id).unwrap();
            conn.add_like(&bob.id, &alice.id).unwrap();
        }

        let directory: Arc<dyn Directory> = Arc::new(StoreDirectory::new(db.clone()));
        let notifier: Arc<dyn Notifier> = Arc::new(NoopNotifier);
        let threads = ThreadService::new(
            db.clone(),
            registry.clone(),
            Arc::new(StoreMatchOracle::new(db.clone())),
            directory.clone(),
            notifier.clone(),
        );
        let calls = CallBroker::new(registry.clone(), Duration::from_secs(45));

        let state = AppState {
            db,
            registry,
            threads,
            calls,
            directory,
            notifier,
            cooldowns: CooldownMap::new(Duration::from_millis(config.call_cooldown_ms)),
            rate_limiter: RateLimiter::from_config(&config),
            config: Arc::new(config),
        };
        (state, alice, bob)
    }

    async fn attach(
        state: &AppState,
        user: &UserId,
    ) -> (
        ConnectionId,
        mpsc::Sender<ServerEvent>,
        mpsc::Receiver<ServerEvent>,
    ) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        state.registry.join(user, conn, tx.clone()).await;
        (conn, tx, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_typing_relays_to_peer_room() {
        let (state, alice, bob) = test_state(false).await;
        let (conn, tx, _alice_rx) = attach(&state, &alice.id).await;
        let (_bob_conn, _bob_tx, mut bob_rx) = attach(&state, &bob.id).await;

        let mut window = SendWindow::for_socket();
        dispatch(
            &state,
            &alice.id,
            conn,
            true,
            &mut window,
            &tx,
            ClientEvent::Typing {
                to: bob.id.clone(),
            },
        )
        .await;

        let events = drain(&mut bob_rx);
        assert!(matches!(
            &events[0],
            ServerEvent::Typing { from } if *from == alice.id
        ));
    }

    #[tokio::test]
    async fn test_chat_message_ignored_when_channel_disabled() {
        let (state, alice, bob) = test_state(false).await;
        let (conn, tx, mut alice_rx) = attach(&state, &alice.id).await;
        let (_bob_conn, _bob_tx, mut bob_rx) = attach(&state, &bob.id).await;

        let mut window = SendWindow::for_socket();
        dispatch(
            &state,
            &alice.id,
            conn,
            true,
            &mut window,
            &tx,
            ClientEvent::ChatMessage {
                to: bob.id.clone(),
                content: "hi".to_string(),
            },
        )
        .await;

        assert!(drain(&mut bob_rx).is_empty());
        assert!(drain(&mut alice_rx).is_empty());
        {
            let conn = state.db.lock().await;
            assert_eq!(conn.count_unread(&bob.id).unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_chat_message_runs_pipeline_and_legacy_event() {
        let (state, alice, bob) = test_state(true).await;
        let (conn, tx, mut alice_rx) = attach(&state, &alice.id).await;
        let (_bob_conn, _bob_tx, mut bob_rx) = attach(&state, &bob.id).await;

        let mut window = SendWindow::for_socket();
        dispatch(
            &state,
            &alice.id,
            conn,
            true,
            &mut window,
            &tx,
            ClientEvent::ChatMessage {
                to: bob.id.clone(),
                content: "salut".to_string(),
            },
        )
        .await;

        let bob_events = drain(&mut bob_rx);
        assert!(matches!(&bob_events[0], ServerEvent::ChatIncoming(_)));
        assert!(matches!(
            &bob_events[1],
            ServerEvent::UnreadUpdate { unread: 1 }
        ));
        assert!(matches!(&bob_events[2], ServerEvent::NewMessage(_)));

        let alice_events = drain(&mut alice_rx);
        assert!(matches!(&alice_events[0], ServerEvent::ChatSent(_)));
        assert!(matches!(&alice_events[1], ServerEvent::NewMessage(_)));
    }

    #[tokio::test]
    async fn test_chat_message_window_rejection_is_directed() {
        let (state, alice, bob) = test_state(true).await;
        let (conn, tx, mut alice_rx) = attach(&state, &alice.id).await;
        let (_bob_conn, _bob_tx, mut bob_rx) = attach(&state, &bob.id).await;

        // A window of one: the second send must bounce.
        let mut window = SendWindow::new(Duration::from_secs(15), 1);
        for content in ["one", "two"] {
            dispatch(
                &state,
                &alice.id,
                conn,
                true,
                &mut window,
                &tx,
                ClientEvent::ChatMessage {
                    to: bob.id.clone(),
                    content: content.to_string(),
                },
            )
            .await;
        }

        let alice_events = drain(&mut alice_rx);
        assert!(matches!(
            alice_events.last().unwrap(),
            ServerEvent::ChatError { code, .. } if code == "rate_limited"
        ));

        // Only the first message went through.
        let delivered = drain(&mut bob_rx)
            .into_iter()
            .filter(|event| matches!(event, ServerEvent::ChatIncoming(_)))
            .count();
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_register_claim_must_match_session() {
        let (state, alice, bob) = test_state(false).await;
        let conn = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(16);

        let mut window = SendWindow::for_socket();
        dispatch(
            &state,
            &alice.id,
            conn,
            true,
            &mut window,
            &tx,
            ClientEvent::RegisterForNotifications(bob.id.clone()),
        )
        .await;
        assert!(!state.registry.is_online(&alice.id).await);
        assert!(!state.registry.is_online(&bob.id).await);

        dispatch(
            &state,
            &alice.id,
            conn,
            true,
            &mut window,
            &tx,
            ClientEvent::RegisterForNotifications(alice.id.clone()),
        )
        .await;
        assert!(state.registry.is_online(&alice.id).await);
    }

    #[tokio::test]
    async fn test_rtc_frames_reach_broker_gate() {
        let (state, alice, bob) = test_state(false).await;
        let (conn, tx, mut alice_rx) = attach(&state, &alice.id).await;
        let (_bob_conn, _bob_tx, mut bob_rx) = attach(&state, &bob.id).await;

        let mut window = SendWindow::for_socket();
        dispatch(
            &state,
            &alice.id,
            conn,
            false,
            &mut window,
            &tx,
            ClientEvent::RtcCall {
                to: bob.id.clone(),
                meta: serde_json::Value::Null,
            },
        )
        .await;

        let events = drain(&mut alice_rx);
        assert!(matches!(
            &events[0],
            ServerEvent::RtcError { code, .. } if code == "upgrade-required"
        ));
        assert!(drain(&mut bob_rx).is_empty());
    }
}
