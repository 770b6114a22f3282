// ── Durable key-value persistence seam ──
//
// The store consumes persistence only through get/set by key. The
// backing mechanism (editor globalState, a file, a test map) is the
// embedder's concern.

use async_trait::async_trait;
use confab_api::{CurrentUser, ProviderKind};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

// ── Known keys ──────────────────────────────────────────────────────

pub const KEY_VERSION: &str = "confab.version";
pub const KEY_INSTALLATION_ID: &str = "confab.installation-id";
pub const KEY_LAST_CHANNEL_ID: &str = "confab.last-channel-id";
pub const KEY_CHANNELS: &str = "confab.channels";
pub const KEY_CURRENT_USER: &str = "confab.current-user";
pub const KEY_USERS: &str = "confab.users";

/// Records written before this version lack the `provider` field on the
/// stored current-user record.
const PROVIDER_BACKFILL_VERSION: &str = "0.9.0";

// ── Error ───────────────────────────────────────────────────────────

/// A persistence operation failed.
#[derive(Debug, Error)]
#[error("persistence error: {0}")]
pub struct PersistError(pub String);

// ── Trait ───────────────────────────────────────────────────────────

/// Durable key-value persistence as the store sees it.
///
/// Size-unbounded from this side; the store self-limits what it writes
/// (see the persistence cap in [`StoreConfig`](crate::StoreConfig)).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, PersistError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), PersistError>;
}

// ── Migration ───────────────────────────────────────────────────────

/// Dotted-numeric version comparison. Missing segments compare as 0.
fn version_lt(a: &str, b: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|seg| seg.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let (x, y) = (a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0));
        if x != y {
            return x < y;
        }
    }
    false
}

/// One-time forward migration, run on first use after an upgrade.
///
/// If the recorded version predates [`PROVIDER_BACKFILL_VERSION`], the
/// stored current-user record gets a default provider back-filled (the
/// workspace backend was the only one that existed then). Idempotent if
/// repeated; finishes by recording the running version.
pub async fn run_migrations(
    kv: &dyn KeyValueStore,
    app_version: &str,
) -> Result<(), PersistError> {
    let recorded = kv
        .get(KEY_VERSION)
        .await?
        .and_then(|v| v.as_str().map(ToOwned::to_owned));

    let needs_backfill = recorded
        .as_deref()
        .is_none_or(|v| version_lt(v, PROVIDER_BACKFILL_VERSION));

    if needs_backfill {
        if let Some(raw) = kv.get(KEY_CURRENT_USER).await? {
            match serde_json::from_value::<CurrentUser>(raw) {
                Ok(mut user) => {
                    if user.provider.is_none() {
                        user.provider = Some(ProviderKind::Workspace);
                        let value = serde_json::to_value(&user)
                            .map_err(|e| PersistError(e.to_string()))?;
                        kv.set(KEY_CURRENT_USER, value).await?;
                        debug!("back-filled provider on stored current-user record");
                    }
                }
                Err(e) => {
                    // Undecodable record: leave it alone rather than
                    // destroy it; authenticate() will overwrite it.
                    warn!(error = %e, "stored current-user record is undecodable");
                }
            }
        }
    }

    if recorded.as_deref() != Some(app_version) {
        kv.set(KEY_VERSION, json!(app_version)).await?;
    }

    Ok(())
}

/// Ensure a stable installation id exists, generating one on first run.
pub async fn ensure_installation_id(kv: &dyn KeyValueStore) -> Result<String, PersistError> {
    if let Some(existing) = kv
        .get(KEY_INSTALLATION_ID)
        .await?
        .and_then(|v| v.as_str().map(ToOwned::to_owned))
    {
        return Ok(existing);
    }
    let id = uuid::Uuid::new_v4().to_string();
    kv.set(KEY_INSTALLATION_ID, json!(id)).await?;
    Ok(id)
}
