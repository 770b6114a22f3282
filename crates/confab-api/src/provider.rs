// ── Provider capability interface ──
//
// One trait, two concrete backends. The store binds exactly one adapter
// at a time and consumes it only through this surface; wire protocols,
// pagination, and auth flows live entirely inside the adapters.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::types::{
    Channel, ChannelId, CurrentUser, Message, MessagePatch, Ts, User, UserId, UserPreferences,
    Users,
};

// ── ProviderKind ────────────────────────────────────────────────────

/// The closed set of supported chat backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Workspace-oriented backend: one team per token, flat channel list.
    Workspace,
    /// Guild-oriented backend: the identity spans guilds, one of which is
    /// selected as the current team.
    Guild,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Guild => "guild",
        }
    }

    /// Whether this backend names direct-message channels with a leading
    /// `@`. Drives the DM online-status lookup: the channel display name
    /// is matched against a user's name with or without the prefix.
    pub fn dm_names_prefixed(self) -> bool {
        match self {
            Self::Workspace => false,
            Self::Guild => true,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workspace" => Ok(Self::Workspace),
            "guild" => Ok(Self::Guild),
            other => Err(ProviderError::InvalidPayload(format!(
                "unknown provider: {other}"
            ))),
        }
    }
}

// ── ChatProvider ────────────────────────────────────────────────────

/// Capability interface implemented by each backend adapter.
///
/// Adapters are expected to be cheap to share (`Arc<dyn ChatProvider>`)
/// and to perform all of their own I/O; the store never opens a
/// connection itself.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Which backend this adapter speaks to.
    fn kind(&self) -> ProviderKind;

    /// Run the backend's connect/authenticate flow and return the
    /// authenticated identity.
    async fn connect(&self) -> Result<CurrentUser, ProviderError>;

    /// Whether a live connection is currently established.
    fn is_connected(&self) -> bool;

    /// Tear down the live connection. Idempotent.
    async fn destroy(&self);

    /// Fetch the full user directory.
    async fn fetch_users(&self) -> Result<Users, ProviderError>;

    /// Fetch the channel list. Receives the current user directory so
    /// adapters can synthesize direct-message channel names.
    async fn fetch_channels(&self, users: &Users) -> Result<Vec<Channel>, ProviderError>;

    /// Fetch detailed info for one channel. List endpoints omit
    /// historical unread counts; this call supplies them.
    async fn fetch_channel_info(&self, channel: &Channel) -> Result<Channel, ProviderError>;

    /// Fetch one user by id. Needed for bot identities the bulk user
    /// listing does not include.
    async fn fetch_user_info(&self, id: &UserId) -> Result<User, ProviderError>;

    /// Load message history for a channel as an incremental patch.
    async fn load_channel_history(
        &self,
        channel_id: &ChannelId,
    ) -> Result<MessagePatch, ProviderError>;

    /// Fetch a parent message together with its thread replies.
    async fn fetch_thread_replies(
        &self,
        channel_id: &ChannelId,
        parent_ts: &Ts,
    ) -> Result<Message, ProviderError>;

    /// Mark the channel read at the given timestamp and return the
    /// backend's updated view of the channel.
    async fn mark_channel(&self, channel: &Channel, ts: &Ts) -> Result<Channel, ProviderError>;

    /// Create (or look up) a direct-message channel with the given user.
    async fn create_im_channel(&self, user: &User) -> Result<Channel, ProviderError>;

    /// Fetch the authenticated user's preferences (muted channels).
    async fn get_user_prefs(&self) -> Result<UserPreferences, ProviderError>;

    /// Run the backend's auth probe and return the workspace/guild URL.
    async fn get_auth_test(&self) -> Result<String, ProviderError>;

    /// The raw token for this adapter, if one is loaded.
    fn get_token(&self) -> Option<String>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [ProviderKind::Workspace, ProviderKind::Guild] {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!("irc".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn dm_prefix_is_per_variant() {
        assert!(!ProviderKind::Workspace.dm_names_prefixed());
        assert!(ProviderKind::Guild.dm_names_prefixed());
    }
}
