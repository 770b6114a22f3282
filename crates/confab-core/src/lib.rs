//! Synchronization and reconciliation store for confab.
//!
//! This crate owns the in-memory model of channels, users, and messages
//! that unifies the workspace-style and guild-style backends behind one
//! surface:
//!
//! - **[`ChatStore`]** — Central coordinator and the sole entry point
//!   the rest of the system calls. Sequences every fetch/cache/merge/
//!   notify path, binds exactly one [`ChatProvider`](confab_api::ChatProvider)
//!   at a time, and owns all model state behind one lock.
//!
//! - **Reconciliation** — Incoming partial payloads (channel lists, user
//!   directories, message patches, reactions, thread replies, presence)
//!   are merged without discarding unrelated state; deleted-message
//!   sentinels prune entries; merges into missing parents are silent
//!   no-ops.
//!
//! - **Derived views** — Per-channel unread counts, muted/online labels,
//!   the unread total, and the active-channel view-model are recomputed
//!   after every merge and pushed through `tokio::sync::watch` channels.
//!
//! - **Freshness** — Cached collections are served immediately and
//!   refetched in the background once the 15-minute window lapses.
//!
//! - **Persistence** ([`persist`]) — A get/set-by-key seam with a size
//!   cap for large communities and a one-time versioned migration.
//!
//! The store performs no network I/O and renders nothing; providers and
//! persistence are consumed through traits, and UI layers subscribe to
//! the watch channels.

pub mod config;
pub mod error;
pub(crate) mod model;
pub mod persist;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::StoreConfig;
pub use error::CoreError;
pub use persist::{KeyValueStore, PersistError};
pub use store::freshness::is_stale;
pub use store::{BindingState, ChannelLabel, ChannelView, ChatStore};
