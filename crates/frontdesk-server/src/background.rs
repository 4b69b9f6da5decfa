//! Background tasks for the frontdesk server.

use frontdesk_session::SessionStore;
use tokio::time::{sleep, Duration};

/// Starts the session expiry sweep.
///
/// Runs indefinitely, evicting sessions idle longer than the TTL. Sessions
/// with an in-flight dispatch hold their own lock and are skipped until the
/// next pass.
pub async fn start_session_sweep(sessions: SessionStore, ttl_secs: u64) {
    if ttl_secs == 0 {
        tracing::warn!("session sweep disabled (ttl_secs=0)");
        return;
    }

    // Sweep at half the TTL, clamped to a sensible range.
    let interval_seconds = (ttl_secs / 2).clamp(1, 60);
    let interval = Duration::from_secs(interval_seconds);
    let ttl = Duration::from_secs(ttl_secs);

    tracing::info!(ttl_secs, interval_seconds, "starting session expiry sweep");

    loop {
        sleep(interval).await;

        let evicted = sessions.evict_idle(ttl).await;
        for call_sid in &evicted {
            tracing::info!(call_sid = %call_sid, "session expired");
        }
    }
}
