// ── Store configuration ──

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Freshness window after which a cached collection is considered stale
/// and eligible for a background refetch.
pub const DEFAULT_STALE_AFTER_SECS: u64 = 15 * 60;

/// Collections larger than this are kept in memory but no longer
/// persisted, trading a stale persisted copy for storage-quota safety in
/// very large communities.
pub const DEFAULT_PERSIST_CAP: usize = 100;

/// Tunables for a [`ChatStore`](crate::ChatStore).
///
/// Plain data — embedders can deserialize it straight from their own
/// configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Seconds before a cached users/channels collection goes stale.
    pub stale_after_secs: u64,
    /// Maximum collection size still written to persistence.
    pub persist_cap: usize,
    /// Version recorded in persistence; drives the one-time migration.
    pub app_version: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            persist_cap: DEFAULT_PERSIST_CAP,
            app_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

impl StoreConfig {
    /// The staleness window as a [`chrono::Duration`].
    pub fn stale_after(&self) -> Duration {
        Duration::seconds(i64::try_from(self.stale_after_secs).unwrap_or(i64::MAX))
    }
}
