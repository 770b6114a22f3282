// End-to-end store scenarios against an in-memory provider and
// persistence backend.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use confab_api::{
    Channel, ChannelId, ChannelKind, ChatProvider, CurrentUser, Message, MessagePatch,
    ProviderError, ProviderKind, Team, Ts, User, UserId, UserPreferences, Users,
};
use confab_core::persist::{KEY_CURRENT_USER, KEY_USERS, KEY_VERSION, KEY_CHANNELS};
use confab_core::{BindingState, ChatStore, CoreError, KeyValueStore, PersistError, StoreConfig};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

// ── In-memory persistence ───────────────────────────────────────────

#[derive(Default)]
struct MemoryKv {
    entries: StdMutex<HashMap<String, Value>>,
    set_counts: StdMutex<HashMap<String, usize>>,
}

impl MemoryKv {
    fn set_count(&self, key: &str) -> usize {
        self.set_counts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    fn get_sync(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn seed(&self, key: &str, value: Value) {
        self.entries.lock().unwrap().insert(key.to_owned(), value);
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Value>, PersistError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), PersistError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_owned(), value);
        *self
            .set_counts
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .or_insert(0) += 1;
        Ok(())
    }
}

// ── In-memory provider ──────────────────────────────────────────────

struct MockProvider {
    kind: ProviderKind,
    connected: AtomicBool,
    identity: StdMutex<CurrentUser>,
    users: StdMutex<Users>,
    channels: StdMutex<Vec<Channel>>,
    /// Per-channel payloads returned by `fetch_channel_info`. Channels
    /// not listed here are echoed back unchanged.
    channel_info: StdMutex<HashMap<ChannelId, Channel>>,
    failing_info: StdMutex<HashSet<ChannelId>>,
    history: StdMutex<HashMap<ChannelId, MessagePatch>>,
    fail_history: AtomicBool,
    /// Users served by `fetch_user_info` (bot identities missing from
    /// the bulk listing).
    extra_users: StdMutex<HashMap<UserId, User>>,
    prefs: StdMutex<UserPreferences>,
    marked: StdMutex<Vec<(ChannelId, Ts)>>,
    connect_calls: AtomicUsize,
    fetch_users_calls: AtomicUsize,
    fetch_channels_calls: AtomicUsize,
}

impl MockProvider {
    fn new(kind: ProviderKind, identity: CurrentUser) -> Self {
        Self {
            kind,
            connected: AtomicBool::new(false),
            identity: StdMutex::new(identity),
            users: StdMutex::new(Users::new()),
            channels: StdMutex::new(Vec::new()),
            channel_info: StdMutex::new(HashMap::new()),
            failing_info: StdMutex::new(HashSet::new()),
            history: StdMutex::new(HashMap::new()),
            fail_history: AtomicBool::new(false),
            extra_users: StdMutex::new(HashMap::new()),
            prefs: StdMutex::new(UserPreferences::default()),
            marked: StdMutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            fetch_users_calls: AtomicUsize::new(0),
            fetch_channels_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn connect(&self) -> Result<CurrentUser, ProviderError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(self.identity.lock().unwrap().clone())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn destroy(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn fetch_users(&self) -> Result<Users, ProviderError> {
        self.fetch_users_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.lock().unwrap().clone())
    }

    async fn fetch_channels(&self, _users: &Users) -> Result<Vec<Channel>, ProviderError> {
        self.fetch_channels_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn fetch_channel_info(&self, channel: &Channel) -> Result<Channel, ProviderError> {
        if self.failing_info.lock().unwrap().contains(&channel.id) {
            return Err(ProviderError::Transport("info endpoint down".into()));
        }
        Ok(self
            .channel_info
            .lock()
            .unwrap()
            .get(&channel.id)
            .cloned()
            .unwrap_or_else(|| channel.clone()))
    }

    async fn fetch_user_info(&self, id: &UserId) -> Result<User, ProviderError> {
        self.extra_users
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn load_channel_history(
        &self,
        channel_id: &ChannelId,
    ) -> Result<MessagePatch, ProviderError> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("history endpoint down".into()));
        }
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_thread_replies(
        &self,
        _channel_id: &ChannelId,
        _parent_ts: &Ts,
    ) -> Result<Message, ProviderError> {
        Err(ProviderError::NotSupported("thread replies"))
    }

    async fn mark_channel(&self, channel: &Channel, ts: &Ts) -> Result<Channel, ProviderError> {
        self.marked
            .lock()
            .unwrap()
            .push((channel.id.clone(), ts.clone()));
        let mut updated = channel.clone();
        updated.read_timestamp = Some(ts.clone());
        Ok(updated)
    }

    async fn create_im_channel(&self, user: &User) -> Result<Channel, ProviderError> {
        Ok(Channel {
            id: ChannelId::from(format!("D-{}", user.id).as_str()),
            name: user.name.clone(),
            kind: ChannelKind::DirectMessage,
            read_timestamp: None,
            unread_count: None,
        })
    }

    async fn get_user_prefs(&self) -> Result<UserPreferences, ProviderError> {
        Ok(self.prefs.lock().unwrap().clone())
    }

    async fn get_auth_test(&self) -> Result<String, ProviderError> {
        Ok("https://example-workspace.test".into())
    }

    fn get_token(&self) -> Option<String> {
        Some("token-test".into())
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

fn identity(id: &str, team: Option<&str>) -> CurrentUser {
    CurrentUser {
        id: UserId::from(id),
        name: "me".into(),
        teams: team
            .iter()
            .map(|t| Team {
                id: (*t).to_owned(),
                name: (*t).to_owned(),
            })
            .collect(),
        current_team_id: team.map(ToOwned::to_owned),
        provider: None,
    }
}

fn user(id: &str, name: &str, online: Option<bool>) -> User {
    User {
        id: UserId::from(id),
        name: name.into(),
        is_online: online,
    }
}

fn channel(id: &str, name: &str) -> Channel {
    Channel {
        id: ChannelId::from(id),
        name: name.into(),
        kind: ChannelKind::Channel,
        read_timestamp: None,
        unread_count: None,
    }
}

fn message(ts: &str, from: &str) -> Message {
    Message {
        ts: Ts::from(ts),
        user_id: UserId::from(from),
        text: "hello".into(),
        reactions: Vec::new(),
        replies: std::collections::BTreeMap::new(),
    }
}

fn patch(entries: Vec<(&str, Option<Message>)>) -> MessagePatch {
    entries
        .into_iter()
        .map(|(ts, m)| (Ts::from(ts), m))
        .collect()
}

async fn bound_store(
    provider: Arc<MockProvider>,
    kv: Arc<MemoryKv>,
    config: StoreConfig,
) -> ChatStore {
    let store = ChatStore::new(config, kv);
    store.select_provider(provider).await;
    store
}

/// Poll an async condition until it holds or a short deadline passes.
async fn eventually<F, Fut>(mut condition: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for: {what}");
}

// ── Cached reads & freshness ────────────────────────────────────────

#[tokio::test]
async fn cold_get_users_blocks_then_serves_cache() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    provider
        .users
        .lock()
        .unwrap()
        .insert(UserId::from("U2"), user("U2", "grace", Some(true)));
    let store = bound_store(
        Arc::clone(&provider),
        Arc::new(MemoryKv::default()),
        StoreConfig::default(),
    )
    .await;

    let first = store.get_users().await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(provider.fetch_users_calls.load(Ordering::SeqCst), 1);

    // Fresh cache: no second round trip.
    let second = store.get_users().await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(provider.fetch_users_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_cache_returns_immediately_and_refetches_in_background() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    provider
        .users
        .lock()
        .unwrap()
        .insert(UserId::from("U2"), user("U2", "grace", None));
    let config = StoreConfig {
        stale_after_secs: 0,
        ..StoreConfig::default()
    };
    let store = bound_store(Arc::clone(&provider), Arc::new(MemoryKv::default()), config).await;

    store.get_users().await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Cache is populated but past its window: the call returns the
    // cached copy without waiting for the refetch.
    let cached = store.get_users().await.unwrap();
    assert_eq!(cached.len(), 1);

    let p = Arc::clone(&provider);
    eventually(
        move || {
            let p = Arc::clone(&p);
            async move { p.fetch_users_calls.load(Ordering::SeqCst) >= 2 }
        },
        "background user refetch",
    )
    .await;
}

// ── Persistence cap ─────────────────────────────────────────────────

#[tokio::test]
async fn oversized_user_directory_is_not_persisted() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    {
        let mut users = provider.users.lock().unwrap();
        for i in 0..150 {
            let id = format!("U{i}");
            users.insert(UserId::from(id.as_str()), user(&id, &id, None));
        }
    }
    let kv = Arc::new(MemoryKv::default());
    let store = bound_store(Arc::clone(&provider), Arc::clone(&kv), StoreConfig::default()).await;

    let fetched = store.fetch_users().await.unwrap();
    assert_eq!(fetched.len(), 150);
    assert_eq!(store.users_snapshot().await.len(), 150);

    // Give any stray write task a chance to run before asserting.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(kv.set_count(KEY_USERS), 0);
}

#[tokio::test]
async fn small_user_directory_is_persisted() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    provider
        .users
        .lock()
        .unwrap()
        .insert(UserId::from("U2"), user("U2", "grace", None));
    let kv = Arc::new(MemoryKv::default());
    let store = bound_store(Arc::clone(&provider), Arc::clone(&kv), StoreConfig::default()).await;

    store.fetch_users().await.unwrap();

    let kv2 = Arc::clone(&kv);
    eventually(
        move || {
            let kv = Arc::clone(&kv2);
            async move { kv.set_count(KEY_USERS) == 1 }
        },
        "user directory persisted",
    )
    .await;
}

// ── fill_up_users ───────────────────────────────────────────────────

#[tokio::test]
async fn message_merge_fills_missing_users_without_directory_refresh() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    provider
        .extra_users
        .lock()
        .unwrap()
        .insert(UserId::from("U9"), user("U9", "bot", None));
    let store = bound_store(
        Arc::clone(&provider),
        Arc::new(MemoryKv::default()),
        StoreConfig::default(),
    )
    .await;

    let cid = ChannelId::from("C1");
    store
        .update_messages(&cid, patch(vec![("100", Some(message("100", "U9")))]))
        .await;

    let s = store.clone();
    eventually(
        move || {
            let s = s.clone();
            async move { s.users_snapshot().await.contains_key(&UserId::from("U9")) }
        },
        "missing user filled",
    )
    .await;

    // The fill is never an authoritative directory refresh.
    assert_eq!(provider.fetch_users_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        store.user_directory().borrow().get(&UserId::from("U9")).map(|u| u.name.clone()),
        Some("bot".into())
    );
}

// ── Channels & read markers ─────────────────────────────────────────

#[tokio::test]
async fn channel_info_failures_are_isolated() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    *provider.channels.lock().unwrap() = vec![channel("C1", "general"), channel("C2", "random")];
    let mut info = channel("C1", "general");
    info.unread_count = Some(5);
    provider
        .channel_info
        .lock()
        .unwrap()
        .insert(ChannelId::from("C1"), info);
    provider
        .failing_info
        .lock()
        .unwrap()
        .insert(ChannelId::from("C2"));
    let store = bound_store(
        Arc::clone(&provider),
        Arc::new(MemoryKv::default()),
        StoreConfig::default(),
    )
    .await;

    let channels = store.fetch_channels().await.unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].unread_count, Some(5));
    assert_eq!(channels[1].unread_count, None);
    assert_eq!(*store.unread_total().borrow(), 5);
}

#[tokio::test]
async fn read_marker_is_sent_one_past_newest_message() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    *provider.channels.lock().unwrap() = vec![channel("C1", "general")];
    provider
        .extra_users
        .lock()
        .unwrap()
        .insert(UserId::from("U2"), user("U2", "grace", None));
    provider.history.lock().unwrap().insert(
        ChannelId::from("C1"),
        patch(vec![("100", Some(message("100", "U2")))]),
    );
    let store = bound_store(
        Arc::clone(&provider),
        Arc::new(MemoryKv::default()),
        StoreConfig::default(),
    )
    .await;

    store.authenticate().await.unwrap();
    store.fetch_channels().await.unwrap();
    store.set_current_channel(ChannelId::from("C1")).await;
    assert_eq!(*store.unread_total().borrow(), 1);

    store.update_read_marker().await.unwrap();

    let marked = provider.marked.lock().unwrap().clone();
    assert_eq!(marked, vec![(ChannelId::from("C1"), Ts::from("101"))]);
    assert_eq!(*store.unread_total().borrow(), 0);
}

#[tokio::test]
async fn read_marker_is_skipped_when_marker_already_covers_history() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    let mut chan = channel("C1", "general");
    chan.read_timestamp = Some(Ts::from("150"));
    *provider.channels.lock().unwrap() = vec![chan];
    provider
        .extra_users
        .lock()
        .unwrap()
        .insert(UserId::from("U2"), user("U2", "grace", None));
    provider.history.lock().unwrap().insert(
        ChannelId::from("C1"),
        patch(vec![("100", Some(message("100", "U2")))]),
    );
    let store = bound_store(
        Arc::clone(&provider),
        Arc::new(MemoryKv::default()),
        StoreConfig::default(),
    )
    .await;

    store.authenticate().await.unwrap();
    store.fetch_channels().await.unwrap();
    store.set_current_channel(ChannelId::from("C1")).await;
    store.update_read_marker().await.unwrap();

    assert!(provider.marked.lock().unwrap().is_empty());
}

#[tokio::test]
async fn history_failure_is_swallowed() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    provider.fail_history.store(true, Ordering::SeqCst);
    let store = bound_store(
        Arc::clone(&provider),
        Arc::new(MemoryKv::default()),
        StoreConfig::default(),
    )
    .await;

    // Must not propagate or panic.
    store.load_channel_history(&ChannelId::from("C1")).await;
    assert!(store.channel_messages(&ChannelId::from("C1")).await.is_empty());
}

// ── Authentication & lifecycle ──────────────────────────────────────

#[tokio::test]
async fn authenticate_serves_cached_identity_while_connected() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Guild,
        identity("U1", Some("T1")),
    ));
    let store = bound_store(
        Arc::clone(&provider),
        Arc::new(MemoryKv::default()),
        StoreConfig::default(),
    )
    .await;

    assert_eq!(*store.binding_state().borrow(), BindingState::Unauthenticated);
    let first = store.authenticate().await.unwrap();
    assert_eq!(first.provider, Some(ProviderKind::Guild));
    assert_eq!(*store.binding_state().borrow(), BindingState::Authenticated);

    store.authenticate().await.unwrap();
    assert_eq!(provider.connect_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reauthentication_preserves_recorded_team() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Guild,
        identity("U1", Some("T1")),
    ));
    let store = bound_store(
        Arc::clone(&provider),
        Arc::new(MemoryKv::default()),
        StoreConfig::default(),
    )
    .await;

    store.authenticate().await.unwrap();

    // Connection drops; the next identity omits the team selection.
    provider.connected.store(false, Ordering::SeqCst);
    *provider.identity.lock().unwrap() = identity("U1", None);

    let refreshed = store.authenticate().await.unwrap();
    assert_eq!(refreshed.current_team_id, Some("T1".into()));
}

#[tokio::test]
async fn workspace_clear_preserves_identity_and_sign_out_drops_it() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    *provider.channels.lock().unwrap() = vec![channel("C1", "general")];
    let store = bound_store(
        Arc::clone(&provider),
        Arc::new(MemoryKv::default()),
        StoreConfig::default(),
    )
    .await;

    store.authenticate().await.unwrap();
    store.fetch_channels().await.unwrap();
    assert_eq!(store.channels_snapshot().await.len(), 1);

    store.clear_old_workspace().await;
    assert!(store.channels_snapshot().await.is_empty());
    assert!(store.current_user().await.is_some());
    assert!(!provider.is_connected());
    assert!(store.channel_labels().borrow().is_empty());

    store.clear_all().await;
    assert!(store.current_user().await.is_none());
    assert_eq!(*store.binding_state().borrow(), BindingState::Unauthenticated);
}

// ── Preferences, DMs, labels ────────────────────────────────────────

#[tokio::test]
async fn muted_channels_zero_out_labels_and_total() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    let mut chan = channel("C1", "general");
    chan.unread_count = Some(4);
    *provider.channels.lock().unwrap() = vec![chan];
    provider
        .prefs
        .lock()
        .unwrap()
        .muted_channels
        .insert(ChannelId::from("C1"));
    let store = bound_store(
        Arc::clone(&provider),
        Arc::new(MemoryKv::default()),
        StoreConfig::default(),
    )
    .await;

    store.fetch_channels().await.unwrap();
    assert_eq!(*store.unread_total().borrow(), 4);

    store.load_user_preferences().await.unwrap();
    assert_eq!(*store.unread_total().borrow(), 0);
    assert_eq!(store.channel_labels().borrow()[0].label, "general (muted)");
}

#[tokio::test]
async fn im_channel_is_created_for_cached_users_only() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    provider
        .users
        .lock()
        .unwrap()
        .insert(UserId::from("U2"), user("U2", "grace", Some(true)));
    let store = bound_store(
        Arc::clone(&provider),
        Arc::new(MemoryKv::default()),
        StoreConfig::default(),
    )
    .await;

    store.fetch_users().await.unwrap();
    let dm = store.create_im_channel(&UserId::from("U2")).await.unwrap();
    assert_eq!(dm.kind, ChannelKind::DirectMessage);
    assert_eq!(store.channels_snapshot().await.len(), 1);

    let missing = store.create_im_channel(&UserId::from("U404")).await;
    assert!(matches!(missing, Err(CoreError::UnknownUser(_))));
}

// ── Bootstrap & migration ───────────────────────────────────────────

#[tokio::test]
async fn bootstrap_restores_persisted_state_and_migrates_identity() {
    let kv = Arc::new(MemoryKv::default());
    kv.seed(KEY_VERSION, json!("0.8.0"));
    kv.seed(
        KEY_CHANNELS,
        serde_json::to_value(vec![channel("C1", "general")]).unwrap(),
    );
    kv.seed(
        KEY_USERS,
        serde_json::to_value(Users::from_iter([(
            UserId::from("U2"),
            user("U2", "grace", None),
        )]))
        .unwrap(),
    );
    kv.seed(KEY_CURRENT_USER, serde_json::to_value(identity("U1", None)).unwrap());

    let store = ChatStore::new(StoreConfig::default(), Arc::clone(&kv) as Arc<dyn KeyValueStore>);
    store.bootstrap().await.unwrap();

    assert_eq!(store.channels_snapshot().await.len(), 1);
    assert_eq!(store.users_snapshot().await.len(), 1);

    // The pre-provider identity record was back-filled on disk and the
    // restored copy carries the default.
    let migrated: CurrentUser =
        serde_json::from_value(kv.get_sync(KEY_CURRENT_USER).unwrap()).unwrap();
    assert_eq!(migrated.provider, Some(ProviderKind::Workspace));
    assert_eq!(
        store.current_user().await.unwrap().provider,
        Some(ProviderKind::Workspace)
    );

    // Restored collections carry no fetch timestamp: the next read is a
    // cache hit that schedules a background refresh.
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Workspace,
        identity("U1", None),
    ));
    store.select_provider(Arc::clone(&provider) as Arc<dyn ChatProvider>).await;
    let cached = store.get_channels().await.unwrap();
    assert_eq!(cached.len(), 1);
    let p = Arc::clone(&provider);
    eventually(
        move || {
            let p = Arc::clone(&p);
            async move { p.fetch_channels_calls.load(Ordering::SeqCst) >= 1 }
        },
        "background channel refetch after restore",
    )
    .await;
}
