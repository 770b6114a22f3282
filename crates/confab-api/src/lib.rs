//! Provider capability interface for confab.
//!
//! This crate defines the fixed boundary between the synchronization store
//! (`confab-core`) and the two concrete chat backends:
//!
//! - **[`ChatProvider`]** — the capability trait every backend adapter
//!   implements: connect/authenticate, bulk fetches, history loading,
//!   read markers, preferences. Adapters own their wire protocols; the
//!   store only ever sees the types in this crate.
//!
//! - **[`ProviderKind`]** — the closed set of supported backends
//!   (workspace-oriented and guild-oriented), each carrying its own
//!   naming-convention configuration so call sites never branch on a
//!   provider name.
//!
//! - **Domain types** ([`types`]) — canonical `Channel`, `User`,
//!   `Message`, `Reaction`, and `CurrentUser` shapes shared by both
//!   backends, with [`Ts`] as the string-encoded numeric timestamp that
//!   doubles as message identity and sort key.

pub mod error;
pub mod provider;
pub mod types;

pub use error::ProviderError;
pub use provider::{ChatProvider, ProviderKind};
pub use types::{
    Channel,
    ChannelId,
    ChannelKind,
    CurrentUser,
    Message,
    MessagePatch,
    Reaction,
    Reply,
    Team,
    Ts,
    User,
    UserId,
    UserPreferences,
    Users,
};
