//! Periodic hard-delete sweep.
//!
//! Soft deletion only hides a message from one viewer. Once both participants
//! have tombstoned a message and it has aged past the retention window, the
//! row is removed for good, along with read notification entries of the same
//! age. `main` runs this on an interval.

use chrono::{Duration, Utc};
use tracing::debug;

use etincelle_store::{SharedDb, StoreError};

/// One sweep pass. Returns how many `(messages, notifications)` were removed.
pub async fn run_sweep(db: &SharedDb, days: i64) -> Result<(usize, usize), StoreError> {
    let cutoff = Utc::now() - Duration::days(days);

    let guard = db.lock().await;
    let messages = guard.purge_expired_messages(cutoff)?;
    let notifications = guard.purge_read_notifications(cutoff)?;
    drop(guard);

    if messages > 0 || notifications > 0 {
        debug!(messages, notifications, "Retention sweep removed rows");
    }
    Ok((messages, notifications))
}
