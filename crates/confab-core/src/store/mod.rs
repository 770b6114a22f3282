// ── Synchronization coordinator ──
//
// Single authoritative owner of in-memory state. Every read/write path
// in the system goes through the ChatStore: provider round trips,
// reconciliation merges, derived-view recomputes, persistence writes,
// and UI notifications are all sequenced here.

pub mod freshness;
pub(crate) mod reconcile;
pub mod views;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use confab_api::{
    Channel, ChannelId, ChatProvider, CurrentUser, Message, MessagePatch, ProviderKind, Reply, Ts,
    UserId, UserPreferences, Users,
};
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::CoreError;
use crate::model::Model;
use crate::persist::{
    self, KEY_CHANNELS, KEY_CURRENT_USER, KEY_LAST_CHANNEL_ID, KEY_USERS, KeyValueStore,
};

pub use views::{ChannelLabel, ChannelView};

// ── BindingState ────────────────────────────────────────────────────

/// Provider binding lifecycle, observable by consumers.
///
/// `Unbound → Unauthenticated → Authenticated`; sign-out returns to
/// `Unauthenticated`, binding a different provider starts the machine
/// over. There are no other states — a dropped connection re-enters
/// `Unauthenticated` until [`ChatStore::authenticate`] succeeds again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Unauthenticated,
    Authenticated,
}

// ── ChatStore ───────────────────────────────────────────────────────

/// The synchronization and reconciliation store.
///
/// Cheaply cloneable via `Arc`. Exactly one provider adapter is bound at
/// a time; all model state lives behind one mutex, so merges between
/// await points are atomic with respect to each other. Consumers observe
/// derived state through `watch` channels and never mutate the model
/// directly.
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: StoreConfig,
    kv: Arc<dyn KeyValueStore>,
    provider: Mutex<Option<Arc<dyn ChatProvider>>>,
    model: Mutex<Model>,
    binding: watch::Sender<BindingState>,
    active_provider: watch::Sender<Option<ProviderKind>>,
    channel_labels: watch::Sender<Arc<Vec<ChannelLabel>>>,
    user_directory: watch::Sender<Arc<Users>>,
    unread_total: watch::Sender<u32>,
    active_view: watch::Sender<Option<Arc<ChannelView>>>,
}

impl ChatStore {
    /// Create a store over the given persistence backend. Does not touch
    /// persistence — call [`bootstrap()`](Self::bootstrap) to run
    /// migrations and restore cached state.
    pub fn new(config: StoreConfig, kv: Arc<dyn KeyValueStore>) -> Self {
        let (binding, _) = watch::channel(BindingState::Unbound);
        let (active_provider, _) = watch::channel(None);
        let (channel_labels, _) = watch::channel(Arc::new(Vec::new()));
        let (user_directory, _) = watch::channel(Arc::new(Users::new()));
        let (unread_total, _) = watch::channel(0);
        let (active_view, _) = watch::channel(None);

        Self {
            inner: Arc::new(StoreInner {
                config,
                kv,
                provider: Mutex::new(None),
                model: Mutex::new(Model::default()),
                binding,
                active_provider,
                channel_labels,
                user_directory,
                unread_total,
                active_view,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Run the one-time migration, ensure an installation id, and
    /// restore persisted channels/users/identity into the model.
    ///
    /// Restored collections carry no fetch timestamp, so the first
    /// `get_users`/`get_channels` returns them immediately and refetches
    /// in the background.
    pub async fn bootstrap(&self) -> Result<(), CoreError> {
        persist::run_migrations(&*self.inner.kv, &self.inner.config.app_version).await?;
        persist::ensure_installation_id(&*self.inner.kv).await?;

        let channels: Option<Vec<Channel>> = self.restore(KEY_CHANNELS).await;
        let users: Option<Users> = self.restore(KEY_USERS).await;
        let current_user: Option<CurrentUser> = self.restore(KEY_CURRENT_USER).await;
        let last_channel: Option<String> = self.restore(KEY_LAST_CHANNEL_ID).await;

        let mut model = self.inner.model.lock().await;
        for channel in channels.unwrap_or_default() {
            reconcile::upsert_channel(&mut model, channel);
        }
        reconcile::merge_users(&mut model, users.unwrap_or_default());
        model.current_user = current_user;
        model.last_channel_id = last_channel.map(ChannelId::from);
        self.push_notifications(&model);

        debug!(
            channels = model.channels.len(),
            users = model.users.len(),
            "persisted state restored"
        );
        Ok(())
    }

    /// Bind a provider adapter, resetting per-provider UI state.
    ///
    /// Callers switching between different backends run
    /// [`clear_old_workspace()`](Self::clear_old_workspace) first so no
    /// data bleeds across providers.
    pub async fn select_provider(&self, provider: Arc<dyn ChatProvider>) {
        let kind = provider.kind();
        *self.inner.provider.lock().await = Some(provider);
        let _ = self.inner.active_view.send(None);
        let _ = self.inner.active_provider.send(Some(kind));
        let _ = self.inner.binding.send(BindingState::Unauthenticated);
        debug!(provider = %kind, "provider bound");
    }

    /// Authenticate against the bound provider.
    ///
    /// Returns the cached identity when the provider is already
    /// connected and an identity is recorded; otherwise runs the connect
    /// flow. A previously known `current_team_id` survives identities
    /// that do not supply one.
    pub async fn authenticate(&self) -> Result<CurrentUser, CoreError> {
        let provider = self.provider().await?;

        if provider.is_connected() {
            if let Some(cached) = self.inner.model.lock().await.current_user.clone() {
                return Ok(cached);
            }
        }

        let mut identity = provider.connect().await?;
        if identity.provider.is_none() {
            identity.provider = Some(provider.kind());
        }
        {
            let mut model = self.inner.model.lock().await;
            if identity.current_team_id.is_none() {
                identity.current_team_id = model
                    .current_user
                    .as_ref()
                    .and_then(|u| u.current_team_id.clone());
            }
            model.current_user = Some(identity.clone());
        }
        self.persist_value(KEY_CURRENT_USER, serde_json::to_value(&identity)?);
        let _ = self.inner.binding.send(BindingState::Authenticated);
        info!(user = %identity.id, provider = %provider.kind(), "authenticated");
        Ok(identity)
    }

    /// Reset everything tied to the active workspace — channels, users,
    /// messages, fetch timestamps, channel selection — and tear down the
    /// provider's live connection. The authenticated identity survives;
    /// used when switching teams/guilds within one provider.
    pub async fn clear_old_workspace(&self) {
        let provider = self.inner.provider.lock().await.clone();
        if let Some(provider) = provider {
            provider.destroy().await;
        }
        let mut model = self.inner.model.lock().await;
        model.clear_workspace();
        self.push_notifications(&model);
        debug!("workspace state cleared");
    }

    /// Full sign-out: drop the authenticated identity, then clear the
    /// workspace.
    pub async fn clear_all(&self) {
        self.inner.model.lock().await.current_user = None;
        self.persist_value(KEY_CURRENT_USER, Value::Null);
        let _ = self.inner.binding.send(BindingState::Unauthenticated);
        self.clear_old_workspace().await;
    }

    // ── Cached reads ─────────────────────────────────────────────

    /// Current user directory.
    ///
    /// A non-empty cache is returned immediately; if it is stale, a
    /// refetch runs in the background and lands via notification. An
    /// empty cache blocks on a fresh fetch.
    pub async fn get_users(&self) -> Result<Users, CoreError> {
        let (cached, stale) = {
            let model = self.inner.model.lock().await;
            let stale = freshness::is_stale(
                model.users_fetched_at,
                Utc::now(),
                self.inner.config.stale_after(),
            );
            (model.users.clone(), stale)
        };
        if !cached.is_empty() {
            if stale {
                let store = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = store.fetch_users().await {
                        warn!(error = %e, "background user refresh failed");
                    }
                });
            }
            return Ok(cached);
        }
        self.fetch_users().await
    }

    /// Current channel collection, with the same cache semantics as
    /// [`get_users()`](Self::get_users).
    pub async fn get_channels(&self) -> Result<Vec<Channel>, CoreError> {
        let (cached, stale) = {
            let model = self.inner.model.lock().await;
            let stale = freshness::is_stale(
                model.channels_fetched_at,
                Utc::now(),
                self.inner.config.stale_after(),
            );
            (
                model.channels.values().cloned().collect::<Vec<_>>(),
                stale,
            )
        };
        if !cached.is_empty() {
            if stale {
                let store = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = store.fetch_channels().await {
                        warn!(error = %e, "background channel refresh failed");
                    }
                });
            }
            return Ok(cached);
        }
        self.fetch_channels().await
    }

    // ── Fetches ──────────────────────────────────────────────────

    /// Round-trip the user directory, merge it, and record the fetch.
    pub async fn fetch_users(&self) -> Result<Users, CoreError> {
        let provider = self.provider().await?;
        let incoming = provider.fetch_users().await?;

        let snapshot = {
            let mut model = self.inner.model.lock().await;
            reconcile::merge_users(&mut model, incoming);
            model.users_fetched_at = Some(Utc::now());
            self.push_notifications(&model);
            model.users.clone()
        };

        if snapshot.len() <= self.inner.config.persist_cap {
            self.persist_value(KEY_USERS, serde_json::to_value(&snapshot)?);
        } else {
            debug!(
                count = snapshot.len(),
                cap = self.inner.config.persist_cap,
                "user directory over persistence cap, skipping write"
            );
        }
        debug!(user_count = snapshot.len(), "user directory refreshed");
        Ok(snapshot)
    }

    /// Round-trip the channel list, then one concurrent info fetch per
    /// channel (list endpoints omit historical unread counts), joined
    /// before the unread recount. A failing info fetch keeps that
    /// channel's list entry.
    pub async fn fetch_channels(&self) -> Result<Vec<Channel>, CoreError> {
        let provider = self.provider().await?;
        let users = self.inner.model.lock().await.users.clone();
        let incoming = provider.fetch_channels(&users).await?;

        let listed: Vec<Channel> = {
            let mut model = self.inner.model.lock().await;
            for channel in incoming {
                reconcile::upsert_channel(&mut model, channel);
            }
            model.channels.values().cloned().collect()
        };

        let infos = join_all(listed.iter().map(|channel| {
            let provider = Arc::clone(&provider);
            async move {
                match provider.fetch_channel_info(channel).await {
                    Ok(info) => Some(info),
                    Err(e) => {
                        warn!(channel = %channel.id, error = %e, "channel info fetch failed");
                        None
                    }
                }
            }
        }))
        .await;

        let snapshot = {
            let mut model = self.inner.model.lock().await;
            for info in infos.into_iter().flatten() {
                reconcile::upsert_channel(&mut model, info);
            }
            model.channels_fetched_at = Some(Utc::now());
            self.push_notifications(&model);
            model.channels.values().cloned().collect::<Vec<_>>()
        };

        if snapshot.len() <= self.inner.config.persist_cap {
            self.persist_value(KEY_CHANNELS, serde_json::to_value(&snapshot)?);
        } else {
            debug!(
                count = snapshot.len(),
                cap = self.inner.config.persist_cap,
                "channel list over persistence cap, skipping write"
            );
        }
        debug!(channel_count = snapshot.len(), "channel list refreshed");
        Ok(snapshot)
    }

    /// Load and merge a channel's message history.
    ///
    /// Failures are caught and logged here — one channel's history never
    /// blocks the rest of the UI.
    pub async fn load_channel_history(&self, channel_id: &ChannelId) {
        let provider = match self.provider().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "history load skipped");
                return;
            }
        };
        match provider.load_channel_history(channel_id).await {
            Ok(patch) => self.update_messages(channel_id, patch).await,
            Err(e) => warn!(channel = %channel_id, error = %e, "history load failed"),
        }
    }

    /// Fetch a parent message with its thread replies and merge it.
    pub async fn load_thread_replies(
        &self,
        channel_id: &ChannelId,
        parent_ts: &Ts,
    ) -> Result<(), CoreError> {
        let provider = self.provider().await?;
        let parent = provider.fetch_thread_replies(channel_id, parent_ts).await?;
        let mut patch = MessagePatch::new();
        patch.insert(parent.ts.clone(), Some(parent));
        self.update_messages(channel_id, patch).await;
        Ok(())
    }

    /// Fetch each missing user individually and concurrently — there is
    /// no bulk listing for bot identities on the workspace backend.
    ///
    /// Never recorded as an authoritative directory refresh: the fetch
    /// timestamp is untouched and nothing is persisted.
    pub async fn fill_up_users(&self, missing: HashSet<UserId>) -> Result<(), CoreError> {
        if missing.is_empty() {
            return Ok(());
        }
        let provider = self.provider().await?;
        let fetched = join_all(missing.iter().map(|id| {
            let provider = Arc::clone(&provider);
            async move { provider.fetch_user_info(id).await }
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

        let mut model = self.inner.model.lock().await;
        for user in fetched {
            reconcile::merge_user(&mut model, user.id.clone(), user);
        }
        self.push_notifications(&model);
        Ok(())
    }

    /// Fetch the muted-channel set and recompute labels.
    pub async fn load_user_preferences(&self) -> Result<UserPreferences, CoreError> {
        let provider = self.provider().await?;
        let prefs = provider.get_user_prefs().await?;
        let mut model = self.inner.model.lock().await;
        model.prefs = prefs.clone();
        self.push_notifications(&model);
        Ok(prefs)
    }

    /// Create (or look up) a direct-message channel with a cached user.
    pub async fn create_im_channel(&self, user_id: &UserId) -> Result<Channel, CoreError> {
        let provider = self.provider().await?;
        let user = self
            .inner
            .model
            .lock()
            .await
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownUser(user_id.clone()))?;
        let channel = provider.create_im_channel(&user).await?;
        let mut model = self.inner.model.lock().await;
        reconcile::upsert_channel(&mut model, channel.clone());
        self.push_notifications(&model);
        Ok(channel)
    }

    // ── Read marker ──────────────────────────────────────────────

    /// Mark the selected channel read past its newest message.
    ///
    /// No-op when nothing is selected, the channel has no messages, or
    /// the stored marker already covers the newest timestamp. The mark
    /// goes out at `max + 1`: the workspace backend's mark-read is
    /// exclusive of the given timestamp.
    pub async fn update_read_marker(&self) -> Result<(), CoreError> {
        let (channel, max_ts) = {
            let model = self.inner.model.lock().await;
            let Some(channel_id) = model.last_channel_id.clone() else {
                return Ok(());
            };
            let Some(channel) = model.channels.get(&channel_id).cloned() else {
                return Ok(());
            };
            let Some(max_ts) = model.max_message_ts(&channel_id) else {
                return Ok(());
            };
            (channel, max_ts)
        };

        if channel
            .read_timestamp
            .as_ref()
            .is_some_and(|read| *read >= max_ts)
        {
            return Ok(());
        }

        let provider = self.provider().await?;
        let updated = provider.mark_channel(&channel, &max_ts.successor()).await?;

        let mut model = self.inner.model.lock().await;
        reconcile::upsert_channel(&mut model, updated);
        self.push_notifications(&model);
        Ok(())
    }

    // ── Real-time merges ─────────────────────────────────────────

    /// Merge an incremental message payload into a channel, then fetch
    /// any referenced users missing from the cache (exactly the missing
    /// subset, in the background).
    pub async fn update_messages(&self, channel_id: &ChannelId, patch: MessagePatch) {
        let missing = {
            let mut model = self.inner.model.lock().await;
            let missing = reconcile::apply_message_patch(&mut model, channel_id, patch);
            self.push_notifications(&model);
            missing
        };
        if !missing.is_empty() {
            let store = self.clone();
            tokio::spawn(async move {
                if let Err(e) = store.fill_up_users(missing).await {
                    warn!(error = %e, "referenced-user fill failed");
                }
            });
        }
    }

    /// Merge a thread reply. Dropped silently when the parent message is
    /// untracked.
    pub async fn update_message_reply(
        &self,
        channel_id: &ChannelId,
        parent_ts: &Ts,
        reply: Reply,
    ) {
        let mut model = self.inner.model.lock().await;
        if reconcile::upsert_reply(&mut model, channel_id, parent_ts, reply) {
            self.push_notifications(&model);
        }
    }

    /// Upsert a single channel.
    pub async fn update_channel(&self, channel: Channel) {
        let mut model = self.inner.model.lock().await;
        reconcile::upsert_channel(&mut model, channel);
        self.push_notifications(&model);
    }

    /// Record one user's reaction. Silent no-op when the channel or
    /// message is untracked.
    pub async fn add_reaction(
        &self,
        channel_id: &ChannelId,
        ts: &Ts,
        user_id: UserId,
        name: &str,
    ) {
        let mut model = self.inner.model.lock().await;
        if reconcile::add_reaction(&mut model, channel_id, ts, user_id, name) {
            self.push_notifications(&model);
        }
    }

    /// Remove one user's reaction; a reaction at count zero disappears.
    pub async fn remove_reaction(
        &self,
        channel_id: &ChannelId,
        ts: &Ts,
        user_id: &UserId,
        name: &str,
    ) {
        let mut model = self.inner.model.lock().await;
        if reconcile::remove_reaction(&mut model, channel_id, ts, user_id, name) {
            self.push_notifications(&model);
        }
    }

    /// Apply a real-time presence change for a cached user.
    pub async fn update_user_presence(&self, user_id: &UserId, is_online: bool) {
        let mut model = self.inner.model.lock().await;
        if let Some(user) = model.users.get_mut(user_id) {
            user.is_online = Some(is_online);
            self.push_notifications(&model);
        }
    }

    /// Select a channel: persist the selection, push the view-model, and
    /// load that channel's history.
    pub async fn set_current_channel(&self, channel_id: ChannelId) {
        {
            let mut model = self.inner.model.lock().await;
            model.last_channel_id = Some(channel_id.clone());
            self.push_notifications(&model);
        }
        self.persist_value(KEY_LAST_CHANNEL_ID, json!(channel_id.as_str()));
        self.load_channel_history(&channel_id).await;
    }

    // ── Snapshots ────────────────────────────────────────────────

    pub async fn channels_snapshot(&self) -> Vec<Channel> {
        self.inner
            .model
            .lock()
            .await
            .channels
            .values()
            .cloned()
            .collect()
    }

    pub async fn users_snapshot(&self) -> Users {
        self.inner.model.lock().await.users.clone()
    }

    pub async fn channel_messages(&self, channel_id: &ChannelId) -> Vec<Message> {
        self.inner
            .model
            .lock()
            .await
            .messages
            .get(channel_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn current_user(&self) -> Option<CurrentUser> {
        self.inner.model.lock().await.current_user.clone()
    }

    pub async fn current_channel(&self) -> Option<ChannelId> {
        self.inner.model.lock().await.last_channel_id.clone()
    }

    // ── Notifications ────────────────────────────────────────────

    pub fn binding_state(&self) -> watch::Receiver<BindingState> {
        self.inner.binding.subscribe()
    }

    pub fn active_provider(&self) -> watch::Receiver<Option<ProviderKind>> {
        self.inner.active_provider.subscribe()
    }

    /// "Channel labels updated."
    pub fn channel_labels(&self) -> watch::Receiver<Arc<Vec<ChannelLabel>>> {
        self.inner.channel_labels.subscribe()
    }

    /// "User/presence snapshot updated."
    pub fn user_directory(&self) -> watch::Receiver<Arc<Users>> {
        self.inner.user_directory.subscribe()
    }

    /// "Unread total updated."
    pub fn unread_total(&self) -> watch::Receiver<u32> {
        self.inner.unread_total.subscribe()
    }

    /// "Active channel view-model updated."
    pub fn active_view(&self) -> watch::Receiver<Option<Arc<ChannelView>>> {
        self.inner.active_view.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────

    async fn provider(&self) -> Result<Arc<dyn ChatProvider>, CoreError> {
        self.inner
            .provider
            .lock()
            .await
            .clone()
            .ok_or(CoreError::UnboundProvider)
    }

    /// Recompute every derived view and broadcast. Intentionally
    /// coarse-grained: every merge that touches the model ends here.
    fn push_notifications(&self, model: &Model) {
        let kind = *self.inner.active_provider.borrow();
        let dm_prefixed = kind.is_some_and(ProviderKind::dm_names_prefixed);

        let labels = views::channel_labels(model, dm_prefixed);
        let total = views::total_unread(model);
        let view = views::active_view(model).map(Arc::new);

        // `send_modify` updates unconditionally, even with zero receivers.
        self.inner
            .channel_labels
            .send_modify(|l| *l = Arc::new(labels));
        self.inner.unread_total.send_modify(|t| *t = total);
        self.inner
            .user_directory
            .send_modify(|u| *u = Arc::new(model.users.clone()));
        self.inner.active_view.send_modify(|v| *v = view);
    }

    /// Best-effort persistence write. Callers never wait on it.
    fn persist_value(&self, key: &'static str, value: Value) {
        let kv = Arc::clone(&self.inner.kv);
        tokio::spawn(async move {
            if let Err(e) = kv.set(key, value).await {
                warn!(key, error = %e, "persist failed");
            }
        });
    }

    async fn restore<T: DeserializeOwned>(&self, key: &'static str) -> Option<T> {
        match self.inner.kv.get(key).await {
            Ok(Some(value)) if !value.is_null() => match serde_json::from_value(value) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!(key, error = %e, "persisted record undecodable, ignoring");
                    None
                }
            },
            Ok(_) => None,
            Err(e) => {
                warn!(key, error = %e, "persistence read failed");
                None
            }
        }
    }
}
