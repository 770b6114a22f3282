// ── In-memory model ──
//
// The store owns all of this exclusively. Every other component either
// receives a read-only snapshot or submits a merge request; nothing else
// mutates these collections.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use confab_api::{Channel, ChannelId, CurrentUser, Message, Ts, UserId, UserPreferences, Users};
use indexmap::IndexMap;

#[derive(Debug, Default)]
pub(crate) struct Model {
    /// Channels in insertion order, unique by id. Upserts keep position.
    pub(crate) channels: IndexMap<ChannelId, Channel>,
    /// User directory, unique by id.
    pub(crate) users: Users,
    /// Per-channel message maps. Ts orders numerically, so iteration is
    /// chronological and `last()` is the newest message.
    pub(crate) messages: HashMap<ChannelId, BTreeMap<Ts, Message>>,
    /// Authenticated identity. Cleared only on explicit sign-out.
    pub(crate) current_user: Option<CurrentUser>,
    pub(crate) prefs: UserPreferences,
    /// Currently selected channel.
    pub(crate) last_channel_id: Option<ChannelId>,
    pub(crate) users_fetched_at: Option<DateTime<Utc>>,
    pub(crate) channels_fetched_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Reset everything tied to the active workspace, preserving the
    /// authenticated identity.
    pub(crate) fn clear_workspace(&mut self) {
        self.channels.clear();
        self.users.clear();
        self.messages.clear();
        self.last_channel_id = None;
        self.users_fetched_at = None;
        self.channels_fetched_at = None;
    }

    /// Newest message timestamp in a channel, if any messages exist.
    pub(crate) fn max_message_ts(&self, channel_id: &ChannelId) -> Option<Ts> {
        self.messages
            .get(channel_id)?
            .keys()
            .next_back()
            .cloned()
    }

    /// All user ids referenced by a channel's messages and replies.
    pub(crate) fn referenced_user_ids(&self, channel_id: &ChannelId) -> HashSet<UserId> {
        let mut ids = HashSet::new();
        if let Some(messages) = self.messages.get(channel_id) {
            for message in messages.values() {
                ids.insert(message.user_id.clone());
                for reply in message.replies.values() {
                    ids.insert(reply.user_id.clone());
                }
            }
        }
        ids
    }
}
