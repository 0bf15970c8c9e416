//! WebRTC call signaling between user rooms.
//!
//! The broker relays SDP and ICE payloads verbatim; it never inspects or
//! validates them. Tracked call state exists for timeout sweeps and
//! disconnect cleanup, so stale or out-of-order frames from entitled users
//! are still relayed and a renegotiation never wedges on the server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use etincelle_shared::constants::{END_REASON_DISCONNECT, END_REASON_HANGUP, END_REASON_TIMEOUT};
use etincelle_shared::{ServerEvent, UserId};

use crate::registry::{ConnectionId, Registry};

/// Unordered user pair identifying one call slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey(UserId, UserId);

impl PairKey {
    pub fn new(a: &UserId, b: &UserId) -> Self {
        if a <= b {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }

    fn involves(&self, user: &UserId) -> bool {
        self.0 == *user || self.1 == *user
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Ringing,
    Negotiating,
    Active,
}

#[derive(Debug)]
struct CallSession {
    caller: UserId,
    callee: UserId,
    state: CallState,
    started_at: Instant,
    last_activity: Instant,
}

impl CallSession {
    fn other(&self, user: &UserId) -> UserId {
        if self.caller == *user {
            self.callee.clone()
        } else {
            self.caller.clone()
        }
    }
}

/// Relays signaling frames and tracks one call slot per user pair.
///
/// Entitlement is decided per frame from the flag the connection resolved
/// at upgrade time; a refused frame is reported to that one connection and
/// never forwarded.
#[derive(Clone)]
pub struct CallBroker {
    registry: Registry,
    sessions: Arc<RwLock<HashMap<PairKey, CallSession>>>,
    ring_timeout: Duration,
}

impl CallBroker {
    pub fn new(registry: Registry, ring_timeout: Duration) -> Self {
        Self {
            registry,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ring_timeout,
        }
    }

    /// Start (or restart) a call towards `to`. A null meta payload is
    /// normalized to an empty object.
    pub async fn call(
        &self,
        from: &UserId,
        conn: ConnectionId,
        entitled: bool,
        to: &UserId,
        meta: Value,
    ) {
        if !self.gate(from, conn, entitled).await {
            return;
        }
        if from == to {
            debug!(user = %from, "Dropping self-addressed call");
            return;
        }

        let meta = if meta.is_null() { json!({}) } else { meta };
        {
            let now = Instant::now();
            let mut sessions = self.sessions.write().await;
            sessions.insert(
                PairKey::new(from, to),
                CallSession {
                    caller: from.clone(),
                    callee: to.clone(),
                    state: CallState::Ringing,
                    started_at: now,
                    last_activity: now,
                },
            );
        }

        info!(caller = %from, callee = %to, "Call ringing");
        self.registry
            .broadcast_to_user(
                to,
                &ServerEvent::RtcRing {
                    from: from.clone(),
                    meta,
                },
            )
            .await;
    }

    pub async fn offer(
        &self,
        from: &UserId,
        conn: ConnectionId,
        entitled: bool,
        to: &UserId,
        sdp: Value,
    ) {
        if !self.gate(from, conn, entitled).await {
            return;
        }
        if sdp.is_null() {
            return;
        }

        self.touch(from, to, Some((CallState::Ringing, CallState::Negotiating)))
            .await;
        self.registry
            .broadcast_to_user(
                to,
                &ServerEvent::RtcOffer {
                    from: from.clone(),
                    sdp,
                },
            )
            .await;
    }

    pub async fn answer(
        &self,
        from: &UserId,
        conn: ConnectionId,
        entitled: bool,
        to: &UserId,
        sdp: Value,
    ) {
        if !self.gate(from, conn, entitled).await {
            return;
        }
        if sdp.is_null() {
            return;
        }

        self.touch(from, to, Some((CallState::Negotiating, CallState::Active)))
            .await;
        self.registry
            .broadcast_to_user(
                to,
                &ServerEvent::RtcAnswer {
                    from: from.clone(),
                    sdp,
                },
            )
            .await;
    }

    pub async fn candidate(
        &self,
        from: &UserId,
        conn: ConnectionId,
        entitled: bool,
        to: &UserId,
        candidate: Value,
    ) {
        if !self.gate(from, conn, entitled).await {
            return;
        }
        if candidate.is_null() {
            return;
        }

        self.touch(from, to, None).await;
        self.registry
            .broadcast_to_user(
                to,
                &ServerEvent::RtcCandidate {
                    from: from.clone(),
                    candidate,
                },
            )
            .await;
    }

    /// End the pair's call. A missing reason defaults to a plain hangup;
    /// unknown reasons are relayed verbatim.
    pub async fn end(
        &self,
        from: &UserId,
        conn: ConnectionId,
        entitled: bool,
        to: &UserId,
        reason: Option<String>,
    ) {
        if !self.gate(from, conn, entitled).await {
            return;
        }

        let reason = reason.unwrap_or_else(|| END_REASON_HANGUP.to_string());
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&PairKey::new(from, to))
        };
        if let Some(session) = removed {
            info!(
                user = %from,
                reason = %reason,
                duration_secs = session.started_at.elapsed().as_secs(),
                "Call ended"
            );
        }

        self.registry
            .broadcast_to_user(
                to,
                &ServerEvent::RtcEnd {
                    from: from.clone(),
                    reason,
                },
            )
            .await;
    }

    /// Close every call the user is part of. Called when their last
    /// connection drops.
    pub async fn end_for_user(&self, user: &UserId) {
        let others: Vec<UserId> = {
            let mut sessions = self.sessions.write().await;
            let affected: Vec<PairKey> = sessions
                .keys()
                .filter(|key| key.involves(user))
                .cloned()
                .collect();
            affected
                .into_iter()
                .filter_map(|key| sessions.remove(&key).map(|s| s.other(user)))
                .collect()
        };

        for other in others {
            info!(user = %user, peer = %other, "Call ended by disconnect");
            self.registry
                .broadcast_to_user(
                    &other,
                    &ServerEvent::RtcEnd {
                        from: user.clone(),
                        reason: END_REASON_DISCONNECT.to_string(),
                    },
                )
                .await;
        }
    }

    /// Expire calls that never became active within the ring timeout.
    pub async fn expire_stale(&self) {
        self.expire_older_than(self.ring_timeout).await;
    }

    /// Expire non-active calls idle for at least `max_idle`, informing
    /// both parties.
    pub async fn expire_older_than(&self, max_idle: Duration) {
        let expired: Vec<(UserId, UserId)> = {
            let mut sessions = self.sessions.write().await;
            let stale: Vec<PairKey> = sessions
                .iter()
                .filter(|(_, session)| {
                    session.state != CallState::Active
                        && session.last_activity.elapsed() >= max_idle
                })
                .map(|(key, _)| key.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|key| sessions.remove(&key).map(|s| (s.caller, s.callee)))
                .collect()
        };

        for (caller, callee) in expired {
            info!(caller = %caller, callee = %callee, "Expiring unanswered call");
            self.registry
                .broadcast_to_user(
                    &caller,
                    &ServerEvent::RtcEnd {
                        from: callee.clone(),
                        reason: END_REASON_TIMEOUT.to_string(),
                    },
                )
                .await;
            self.registry
                .broadcast_to_user(
                    &callee,
                    &ServerEvent::RtcEnd {
                        from: caller.clone(),
                        reason: END_REASON_TIMEOUT.to_string(),
                    },
                )
                .await;
        }
    }

    /// Tracked state for a pair's call slot, if one exists.
    pub async fn session_state(&self, a: &UserId, b: &UserId) -> Option<CallState> {
        let sessions = self.sessions.read().await;
        sessions.get(&PairKey::new(a, b)).map(|s| s.state)
    }

    async fn gate(&self, from: &UserId, conn: ConnectionId, entitled: bool) -> bool {
        if entitled {
            return true;
        }

        debug!(user = %from, "Refusing signaling frame without video entitlement");
        self.registry
            .send_to_connection(
                from,
                conn,
                &ServerEvent::RtcError {
                    code: "upgrade-required".to_string(),
                    message: "Upgrade required for video chat.".to_string(),
                },
            )
            .await;
        false
    }

    async fn touch(&self, a: &UserId, b: &UserId, advance: Option<(CallState, CallState)>) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&PairKey::new(a, b)) {
            session.last_activity = Instant::now();
            if let Some((expect, next)) = advance {
                if session.state == expect {
                    session.state = next;
                    debug!(caller = %session.caller, state = ?next, "Call advanced");
                }
            }
        }
    }
}
