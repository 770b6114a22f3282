// ── Canonical domain types ──
//
// ChannelId, UserId, and Ts form the foundation of every domain type.
// They unify the workspace-style and guild-style backends behind a
// single set of string-based identities. Ts is special: it is both the
// identity of a message within a channel and its sort key.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

// ── Identity newtypes ───────────────────────────────────────────────

/// Stable per-provider channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

/// Stable per-provider user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(ChannelId);
string_id!(UserId);

// ── Ts ──────────────────────────────────────────────────────────────

/// String-encoded numeric timestamp.
///
/// Both backends key messages by a stringified number (seconds with an
/// optional fractional part). The string is the identity — two distinct
/// encodings of the same instant are distinct keys — but ordering is
/// numeric wherever both sides parse, so `"99"` sorts before `"100"`.
/// Numeric ties and unparseable values fall back to lexical order, which
/// keeps `Ord` consistent with `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ts(String);

string_id!(Ts);

impl Ts {
    /// The timestamp one whole unit later.
    ///
    /// Mark-read on the workspace backend is exclusive of the given
    /// timestamp, so the store marks at `max + 1`. Unparseable values
    /// are returned unchanged.
    pub fn successor(&self) -> Self {
        match self.0.parse::<f64>() {
            Ok(v) => Self(format!("{}", v + 1.0)),
            Err(_) => self.clone(),
        }
    }
}

impl Ord for Ts {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<f64>(), other.0.parse::<f64>()) {
            (Ok(a), Ok(b)) => match a.partial_cmp(&b) {
                Some(Ordering::Equal) | None => self.0.cmp(&other.0),
                Some(ord) => ord,
            },
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Ts {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ── Channel ─────────────────────────────────────────────────────────

/// Conversation surface kind, normalized from both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    Channel,
    Group,
    DirectMessage,
}

/// The canonical channel type. Unique by `id` within a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,
    /// Highest timestamp the current user has read, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timestamp: Option<Ts>,
    /// Provider-reported unread count. Overrides the derived count when
    /// present; list-style endpoints omit it, info endpoints supply it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
}

impl Channel {
    /// Merge an incoming partial payload over this channel.
    ///
    /// Incoming fields win; absent optionals preserve the prior value.
    pub fn merge_from(&mut self, incoming: Channel) {
        self.name = incoming.name;
        self.kind = incoming.kind;
        if incoming.read_timestamp.is_some() {
            self.read_timestamp = incoming.read_timestamp;
        }
        if incoming.unread_count.is_some() {
            self.unread_count = incoming.unread_count;
        }
    }
}

// ── User ────────────────────────────────────────────────────────────

/// A member of the workspace or guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// `None` means the backend has no presence for this user; merges
    /// inherit the previously known value instead of resetting it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
}

/// User collection keyed by id, in provider order.
pub type Users = IndexMap<UserId, User>;

// ── Message ─────────────────────────────────────────────────────────

/// Emoji-style acknowledgment attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub name: String,
    pub count: u32,
    pub user_ids: Vec<UserId>,
}

/// A message attached as a child of a parent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub ts: Ts,
    pub user_id: UserId,
    pub text: String,
}

/// A message within a channel, keyed by its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub ts: Ts,
    pub user_id: UserId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub replies: BTreeMap<Ts, Reply>,
}

/// Incremental per-channel message payload.
///
/// `None` at a timestamp is the deleted sentinel: the merge removes that
/// entry from the channel's message map instead of storing it.
pub type MessagePatch = BTreeMap<Ts, Option<Message>>;

// ── CurrentUser ─────────────────────────────────────────────────────

/// A team/guild the authenticated user belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
}

/// The authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub teams: Vec<Team>,
    /// Selected team/guild. Only meaningful for guild-style backends.
    /// Once recorded it survives partial identity updates that omit it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_team_id: Option<String>,
    /// Which backend issued this identity. Absent in records written by
    /// old versions; back-filled by the persistence migration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
}

// ── UserPreferences ─────────────────────────────────────────────────

/// Backend-side user preferences the store consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub muted_channels: HashSet<ChannelId>,
}
