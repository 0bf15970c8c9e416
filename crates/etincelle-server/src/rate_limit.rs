//! Abuse throttles in front of the messaging surface.
//!
//! Two independent limits: a per-IP token bucket ahead of every HTTP route,
//! and a per-connection sliding window on the realtime send channel. The
//! bucket shields the API as a whole; the window caps how fast a single
//! socket may push chat messages no matter how it reaches the server.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

use etincelle_shared::constants::{SOCKET_SEND_MAX, SOCKET_SEND_WINDOW_SECS};

use crate::config::ServerConfig;

// ---------------------------------------------------------------------------
// Per-IP token bucket for the HTTP API
// ---------------------------------------------------------------------------

/// Continuously refilling request budget for one client IP.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Keyed bucket set shared by the HTTP middleware. Each client IP gets its
/// own budget; one user hammering the send endpoint cannot starve others.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    /// Limiter sized from `RATE_LIMIT_PER_SEC` / `RATE_LIMIT_BURST`.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.rate_limit_per_sec, config.rate_limit_burst)
    }

    pub async fn check(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::full(self.capacity));
        bucket.try_consume(self.rate, self.capacity)
    }

    /// Evict buckets with no traffic for `max_idle_secs`; they would refill
    /// to capacity anyway, so dropping them loses nothing.
    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(ip) = client_ip(&req) {
        if !limiter.check(ip).await {
            warn!(ip = %ip, "Throttling HTTP client");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// Peer address of the connection, or the usual proxy headers when the
/// server sits behind one.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(addr.ip());
    }

    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok());
    if forwarded.is_some() {
        return forwarded;
    }

    req.headers()
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

// ---------------------------------------------------------------------------
// Per-connection sliding window for the realtime send channel
// ---------------------------------------------------------------------------

/// Sliding-window counter capping chat sends on a single socket connection.
/// Owned by the connection task, so no locking is involved.
#[derive(Debug)]
pub struct SendWindow {
    window: Duration,
    max: u32,
    hits: VecDeque<Instant>,
}

impl SendWindow {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            hits: VecDeque::new(),
        }
    }

    /// Window sized for the realtime chat send channel.
    pub fn for_socket() -> Self {
        Self::new(
            Duration::from_secs(SOCKET_SEND_WINDOW_SECS),
            SOCKET_SEND_MAX,
        )
    }

    /// Record one send attempt. Returns false when the window is full.
    pub fn try_hit(&mut self) -> bool {
        self.try_hit_at(Instant::now())
    }

    fn try_hit_at(&mut self, now: Instant) -> bool {
        while let Some(&front) = self.hits.front() {
            if now.duration_since(front) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }

        if self.hits.len() >= self.max as usize {
            false
        } else {
            self.hits.push_back(now);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_limiter_caps_burst_at_configured_capacity() {
        let config = ServerConfig::default();
        let limiter = RateLimiter::from_config(&config);
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        for _ in 0..config.rate_limit_burst as usize {
            assert!(limiter.check(ip).await);
        }
        assert!(!limiter.check(ip).await);
    }

    #[tokio::test]
    async fn test_http_limiter_isolates_clients() {
        let limiter = RateLimiter::new(5.0, 1.0);
        let phone: IpAddr = "198.51.100.2".parse().unwrap();
        let laptop: IpAddr = "2001:db8::beef".parse().unwrap();

        assert!(limiter.check(phone).await);
        assert!(!limiter.check(phone).await);

        // An exhausted neighbor never spills over.
        assert!(limiter.check(laptop).await);
    }

    #[tokio::test]
    async fn test_idle_buckets_are_purged() {
        let limiter = RateLimiter::new(10.0, 3.0);
        limiter.check("198.51.100.9".parse().unwrap()).await;
        limiter.check("198.51.100.10".parse().unwrap()).await;

        limiter.purge_stale(0.0).await;

        assert!(limiter.buckets.lock().await.is_empty());
    }

    #[test]
    fn test_send_window_caps_burst() {
        let mut window = SendWindow::for_socket();
        let start = Instant::now();

        for _ in 0..SOCKET_SEND_MAX {
            assert!(window.try_hit_at(start));
        }

        assert!(!window.try_hit_at(start));
    }

    #[test]
    fn test_send_window_slides() {
        let mut window = SendWindow::new(Duration::from_secs(15), 2);
        let start = Instant::now();

        assert!(window.try_hit_at(start));
        assert!(window.try_hit_at(start + Duration::from_secs(10)));
        assert!(!window.try_hit_at(start + Duration::from_secs(14)));

        // First hit has aged out, one slot free again.
        assert!(window.try_hit_at(start + Duration::from_secs(16)));
        assert!(!window.try_hit_at(start + Duration::from_secs(16)));
    }
}
