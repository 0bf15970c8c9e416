//! # etincelle-server
//!
//! Realtime messaging backend for the Étincelle dating platform.
//!
//! This binary provides:
//! - **WebSocket gateway** for presence, chat events, and call signaling
//! - **Direct-message threads** with read receipts and per-viewer deletion
//! - **Call signaling relay** (ring/offer/answer/ICE) gated on entitlements
//! - **REST API** (axum) for sending, thread history, unread badges, and
//!   out-of-band call requests
//! - **Per-IP rate limiting** to protect against abuse

mod api;
mod config;
mod cooldown;
mod error;
mod notify;
mod oracle;
mod rate_limit;
mod registry;
mod retention;
mod session;
mod signaling;
mod threads;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use etincelle_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::cooldown::CooldownMap;
use crate::notify::StoreNotifier;
use crate::oracle::{StoreDirectory, StoreMatchOracle};
use crate::rate_limit::RateLimiter;
use crate::registry::Registry;
use crate::signaling::CallBroker;
use crate::threads::ThreadService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,etincelle_server=debug")),
        )
        .init();

    info!(
        "Starting Étincelle realtime server v{}",
        env!("CARGO_PKG_VERSION")
    );

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        socket_send = config.socket_send_enabled,
        retention_days = config.hard_delete_days,
        ring_timeout_secs = config.ring_timeout_secs,
        "Messaging settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // SQLite store (runs migrations on open)
    let db = Database::open_at(&config.database_path)?.into_shared();

    // Presence registry and the call signaling broker on top of it
    let registry = Registry::new();
    let calls = CallBroker::new(
        registry.clone(),
        Duration::from_secs(config.ring_timeout_secs),
    );

    // Store-backed views of the account data
    let oracle = Arc::new(StoreMatchOracle::new(db.clone()));
    let directory = Arc::new(StoreDirectory::new(db.clone()));
    let notifier = Arc::new(StoreNotifier::new(db.clone(), registry.clone()));

    let threads = ThreadService::new(
        db.clone(),
        registry.clone(),
        oracle,
        directory.clone(),
        notifier.clone(),
    );

    // Per-pair call cooldowns and per-IP rate limiting
    let cooldowns = CooldownMap::new(Duration::from_millis(config.call_cooldown_ms));
    let rate_limiter = RateLimiter::from_config(&config);

    // Application state for the HTTP API and socket handlers
    let http_addr = config.http_addr;
    let state = AppState {
        db,
        registry,
        threads,
        calls,
        directory,
        notifier,
        cooldowns,
        rate_limiter,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // Periodic call cooldown cleanup (every 5 minutes)
    let cd = state.cooldowns.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            cd.purge_stale().await;
        }
    });

    // Ring timeout enforcement (every 10 seconds)
    let broker = state.calls.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            broker.expire_stale().await;
        }
    });

    // Retention sweep for mutually deleted messages and read notifications
    if state.config.retention_enabled() {
        let db = state.db.clone();
        let days = state.config.hard_delete_days;
        let every = Duration::from_millis(state.config.hard_delete_interval_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match retention::run_sweep(&db, days).await {
                    Ok((0, 0)) => {}
                    Ok((messages, notifications)) => {
                        info!(messages, notifications, "Retention sweep removed rows");
                    }
                    Err(e) => warn!(error = %e, "Retention sweep failed"),
                }
            }
        });
    } else {
        info!("Retention sweep disabled (HARD_DELETE_DAYS <= 0)");
    }

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
