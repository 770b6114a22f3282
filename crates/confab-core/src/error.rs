// ── Core error type ──

use confab_api::{ProviderError, UserId};
use thiserror::Error;

use crate::persist::PersistError;

/// Errors surfaced by the store.
///
/// Nothing here is fatal: fetch failures are expected to be awaited at a
/// layer that can show a user-facing error, and everything else is
/// recovered locally before it reaches a caller.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No provider adapter is bound to the store.
    #[error("no provider selected")]
    UnboundProvider,

    /// A provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A persistence read failed. Writes never produce this — they are
    /// fire-and-forget.
    #[error(transparent)]
    Persistence(#[from] PersistError),

    /// A user referenced by id is not in the user cache.
    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    /// A persisted record could not be decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
