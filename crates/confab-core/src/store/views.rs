// ── Derived-view calculator ──
//
// Pure reads over the model: unread counts, labels, DM presence. The
// coordinator calls these after every merge and pushes the results to
// the notification channels.

use confab_api::{Channel, ChannelId, ChannelKind, CurrentUser, Message, Users};
use serde::Serialize;

use crate::model::Model;

/// UI-facing summary of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelLabel {
    pub channel_id: ChannelId,
    pub kind: ChannelKind,
    /// Synthesized display label (`"general (2 new)"`, `"design (muted)"`).
    pub label: String,
    pub unread: u32,
    /// Presence of the counterpart for direct-message channels; `None`
    /// for other kinds or when presence is unknown.
    pub is_online: Option<bool>,
}

/// View-model for the active channel: the channel, its messages in
/// chronological order, the user directory, and the current user.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelView {
    pub channel: Channel,
    pub messages: Vec<Message>,
    pub users: Users,
    pub current_user: Option<CurrentUser>,
}

/// Unread messages in a channel.
///
/// Muted channels always report zero. A provider-reported count wins
/// over the derived one. The fallback counts messages authored by
/// someone else and not yet covered by the read marker.
pub(crate) fn unread_count(model: &Model, channel: &Channel) -> u32 {
    if model.prefs.muted_channels.contains(&channel.id) {
        return 0;
    }
    if let Some(reported) = channel.unread_count {
        return reported;
    }
    let current_user_id = model.current_user.as_ref().map(|u| &u.id);
    let Some(messages) = model.messages.get(&channel.id) else {
        return 0;
    };
    let count = messages
        .iter()
        .filter(|(ts, message)| {
            let from_other = Some(&message.user_id) != current_user_id;
            let past_marker = match &channel.read_timestamp {
                Some(read) => *ts > read,
                None => true,
            };
            from_other && past_marker
        })
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Presence of a DM counterpart, resolved by display name.
///
/// Guild-style backends prefix DM channel names with `@`; workspace
/// backends do not. The provider variant tells us which convention to
/// strip before matching against user names.
fn dm_online(model: &Model, channel: &Channel, dm_prefixed: bool) -> Option<bool> {
    if channel.kind != ChannelKind::DirectMessage {
        return None;
    }
    let target = if dm_prefixed {
        channel.name.strip_prefix('@').unwrap_or(&channel.name)
    } else {
        &channel.name
    };
    model
        .users
        .values()
        .find(|user| user.name == target)
        .and_then(|user| user.is_online)
}

/// One label per channel, in model order.
pub(crate) fn channel_labels(model: &Model, dm_prefixed: bool) -> Vec<ChannelLabel> {
    model
        .channels
        .values()
        .map(|channel| {
            let unread = unread_count(model, channel);
            let muted = model.prefs.muted_channels.contains(&channel.id);
            let label = if unread > 0 {
                format!("{} ({unread} new)", channel.name)
            } else if muted {
                format!("{} (muted)", channel.name)
            } else {
                channel.name.clone()
            };
            ChannelLabel {
                channel_id: channel.id.clone(),
                kind: channel.kind,
                label,
                unread,
                is_online: dm_online(model, channel, dm_prefixed),
            }
        })
        .collect()
}

/// Sum of unread counts over all channels.
pub(crate) fn total_unread(model: &Model) -> u32 {
    model
        .channels
        .values()
        .map(|c| unread_count(model, c))
        .sum()
}

/// Build the active-channel view-model, if a channel is selected and
/// tracked.
pub(crate) fn active_view(model: &Model) -> Option<ChannelView> {
    let channel_id = model.last_channel_id.as_ref()?;
    let channel = model.channels.get(channel_id)?.clone();
    let messages = model
        .messages
        .get(channel_id)
        .map(|m| m.values().cloned().collect())
        .unwrap_or_default();
    Some(ChannelView {
        channel,
        messages,
        users: model.users.clone(),
        current_user: model.current_user.clone(),
    })
}
