// ── Reconciliation engine ──
//
// Merges incoming partial payloads into the model without losing
// unrelated entries. Absence of a merge target (untracked channel,
// untracked parent message) is "nothing to do", never an error.

use std::collections::HashSet;

use confab_api::{Channel, ChannelId, MessagePatch, Reaction, Reply, Ts, UserId, Users};

use crate::model::Model;

/// Upsert a channel by id.
///
/// An existing channel keeps its position in the collection and has the
/// incoming fields merged over it; a new channel is appended.
pub(crate) fn upsert_channel(model: &mut Model, incoming: Channel) {
    match model.channels.get_mut(&incoming.id) {
        Some(existing) => existing.merge_from(incoming),
        None => {
            model.channels.insert(incoming.id.clone(), incoming);
        }
    }
}

/// Merge an incoming user directory over the cached one.
///
/// Last write wins per id, except presence: an incoming `None` inherits
/// the previously known value rather than resetting it.
pub(crate) fn merge_users(model: &mut Model, incoming: Users) {
    for (id, user) in incoming {
        merge_user(model, id, user);
    }
}

pub(crate) fn merge_user(model: &mut Model, id: UserId, mut user: confab_api::User) {
    if user.is_online.is_none() {
        if let Some(existing) = model.users.get(&id) {
            user.is_online = existing.is_online;
        }
    }
    model.users.insert(id, user);
}

/// Shallow-merge a per-timestamp message patch into a channel.
///
/// `None` values are deleted sentinels and remove the entry. Returns the
/// set of referenced user ids missing from the user cache, so the
/// coordinator can fetch exactly that subset.
pub(crate) fn apply_message_patch(
    model: &mut Model,
    channel_id: &ChannelId,
    patch: MessagePatch,
) -> HashSet<UserId> {
    let messages = model.messages.entry(channel_id.clone()).or_default();
    for (ts, entry) in patch {
        match entry {
            Some(message) => {
                messages.insert(ts, message);
            }
            None => {
                messages.remove(&ts);
            }
        }
    }

    model
        .referenced_user_ids(channel_id)
        .into_iter()
        .filter(|id| !model.users.contains_key(id))
        .collect()
}

/// Upsert a thread reply into its parent message.
///
/// A reply whose parent is untracked is dropped — replies never create
/// parent stubs out of order. Returns whether anything changed.
pub(crate) fn upsert_reply(
    model: &mut Model,
    channel_id: &ChannelId,
    parent_ts: &Ts,
    reply: Reply,
) -> bool {
    let Some(parent) = model
        .messages
        .get_mut(channel_id)
        .and_then(|m| m.get_mut(parent_ts))
    else {
        return false;
    };
    parent.replies.insert(reply.ts.clone(), reply);
    true
}

/// Add one user's reaction to a message. No-op if the channel or message
/// is untracked. Returns whether anything changed.
pub(crate) fn add_reaction(
    model: &mut Model,
    channel_id: &ChannelId,
    ts: &Ts,
    user_id: UserId,
    name: &str,
) -> bool {
    let Some(message) = model
        .messages
        .get_mut(channel_id)
        .and_then(|m| m.get_mut(ts))
    else {
        return false;
    };
    match message.reactions.iter_mut().find(|r| r.name == name) {
        Some(reaction) => {
            reaction.count += 1;
            // Membership is not checked; a duplicate add event for the
            // same user double-counts.
            reaction.user_ids.push(user_id);
        }
        None => message.reactions.push(Reaction {
            name: name.to_owned(),
            count: 1,
            user_ids: vec![user_id],
        }),
    }
    true
}

/// Remove one user's reaction from a message. A reaction whose count
/// reaches zero is dropped from the sequence entirely.
pub(crate) fn remove_reaction(
    model: &mut Model,
    channel_id: &ChannelId,
    ts: &Ts,
    user_id: &UserId,
    name: &str,
) -> bool {
    let Some(message) = model
        .messages
        .get_mut(channel_id)
        .and_then(|m| m.get_mut(ts))
    else {
        return false;
    };
    if let Some(reaction) = message.reactions.iter_mut().find(|r| r.name == name) {
        reaction.count = reaction.count.saturating_sub(1);
        reaction.user_ids.retain(|u| u != user_id);
    }
    message.reactions.retain(|r| r.count > 0);
    true
}
