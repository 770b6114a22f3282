// ── Cache freshness policy ──

use chrono::{DateTime, Duration, Utc};

/// Whether a cached collection is due for a refetch.
///
/// Pure: no clock access, no I/O. A collection that has never been
/// fetched is always stale.
pub fn is_stale(last_fetched_at: Option<DateTime<Utc>>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match last_fetched_at {
        None => true,
        Some(fetched_at) => now - fetched_at > ttl,
    }
}
