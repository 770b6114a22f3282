// ── Provider error taxonomy ──

use thiserror::Error;

/// Errors a backend adapter can surface through the capability interface.
///
/// Every variant is transient from the store's point of view: the store
/// either propagates it to a layer that can show a user-facing error, or
/// (for history loads and background refetches) logs and continues.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Authentication failed or the session is no longer valid.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The underlying transport failed (connection refused, timeout,
    /// malformed response envelope).
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend returned a payload the adapter could not interpret.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The capability is not offered by this backend.
    #[error("operation not supported by this provider: {0}")]
    NotSupported(&'static str),

    /// The requested entity does not exist on the backend.
    #[error("not found: {0}")]
    NotFound(String),
}
