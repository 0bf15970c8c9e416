//! Pair-keyed cooldown tracking for video-call requests.
//!
//! The clock is injectable so tests can move time forward without
//! sleeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use etincelle_shared::UserId;

type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Cooldown key for an unordered user pair.
pub fn pair_key(a: &UserId, b: &UserId) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

#[derive(Clone)]
pub struct CooldownMap {
    window: Duration,
    entries: Arc<Mutex<HashMap<String, Instant>>>,
    clock: Clock,
}

impl CooldownMap {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(Instant::now))
    }

    pub fn with_clock(window: Duration, clock: Clock) -> Self {
        Self {
            window,
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Try to start a cooldown for `key`. Returns false while a previous
    /// acquisition is still inside the window.
    pub async fn try_acquire(&self, key: &str) -> bool {
        let now = (self.clock)();
        let mut entries = self.entries.lock().await;

        if let Some(last) = entries.get(key) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }

        entries.insert(key.to_string(), now);
        true
    }

    /// Drop entries whose window has fully elapsed.
    pub async fn purge_stale(&self) {
        let now = (self.clock)();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, last| now.duration_since(*last) < self.window);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Purged elapsed call cooldowns");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn manual_clock() -> (Arc<StdMutex<Instant>>, Clock) {
        let now = Arc::new(StdMutex::new(Instant::now()));
        let handle = now.clone();
        let clock: Clock = Arc::new(move || *handle.lock().unwrap());
        (now, clock)
    }

    #[tokio::test]
    async fn test_cooldown_blocks_until_window_elapses() {
        let (now, clock) = manual_clock();
        let cooldowns = CooldownMap::with_clock(Duration::from_secs(20), clock);

        assert!(cooldowns.try_acquire("a:b").await);
        assert!(!cooldowns.try_acquire("a:b").await);

        *now.lock().unwrap() += Duration::from_secs(19);
        assert!(!cooldowns.try_acquire("a:b").await);

        *now.lock().unwrap() += Duration::from_secs(2);
        assert!(cooldowns.try_acquire("a:b").await);
    }

    #[tokio::test]
    async fn test_cooldown_keys_are_independent() {
        let (_, clock) = manual_clock();
        let cooldowns = CooldownMap::with_clock(Duration::from_secs(20), clock);

        assert!(cooldowns.try_acquire("a:b").await);
        assert!(cooldowns.try_acquire("a:c").await);
        assert!(!cooldowns.try_acquire("a:b").await);
    }

    #[tokio::test]
    async fn test_purge_drops_elapsed_entries() {
        let (now, clock) = manual_clock();
        let cooldowns = CooldownMap::with_clock(Duration::from_secs(20), clock);

        assert!(cooldowns.try_acquire("a:b").await);
        *now.lock().unwrap() += Duration::from_secs(30);
        cooldowns.purge_stale().await;

        let entries = cooldowns.entries.lock().await;
        assert!(entries.is_empty());
    }

    #[test]
    fn test_pair_key_is_order_insensitive() {
        let a = UserId::new();
        let b = UserId::new();
        assert_eq!(pair_key(&a, &b), pair_key(&b, &a));
    }
}
