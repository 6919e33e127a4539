use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chatswap_core::patch::diff;
use chatswap_core::{
    apply_channel_patch, apply_settings_patch, ChannelId, ChannelPreference,
    ChannelPreferencePatch, ReduceError, SettingsChange, SettingsDocument, SettingsPatch,
    StorageKind, BACKEND_KEY, SETTINGS_KEY,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::signal::{Signal, SubscriptionId};
use crate::storage::{AreaName, StorageArea, StorageChange, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Invalid(#[from] ReduceError),
    #[error("failed to encode settings document: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
struct StoreState {
    authority: Option<StorageKind>,
    last_seen: Option<SettingsDocument>,
}

/// Settings document persisted in exactly one of two storage areas.
///
/// Reads share the gate; init, updates and migration take it exclusively so
/// no reader ever observes a half-migrated document. Change notifications are
/// driven by the areas' watch callbacks, which also cover writes made by
/// other contexts.
pub struct PreferenceStore {
    local: Arc<dyn StorageArea>,
    sync: Arc<dyn StorageArea>,
    clock: Arc<dyn Clock>,
    gate: RwLock<()>,
    state: Mutex<StoreState>,
    changes: Signal<SettingsChange>,
    watches: Vec<(StorageKind, SubscriptionId)>,
}

impl PreferenceStore {
    pub fn new(
        local: Arc<dyn StorageArea>,
        sync: Arc<dyn StorageArea>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let watches = [StorageKind::Local, StorageKind::Sync]
                .into_iter()
                .map(|kind| {
                    let area = match kind {
                        StorageKind::Local => &local,
                        StorageKind::Sync => &sync,
                    };
                    let store = weak.clone();
                    let id = area.watch(Box::new(move |change| {
                        if let Some(store) = store.upgrade() {
                            store.observe_change(change);
                        }
                    }));
                    (kind, id)
                })
                .collect();

            Self {
                local,
                sync,
                clock,
                gate: RwLock::new(()),
                state: Mutex::new(StoreState::default()),
                changes: Signal::new(),
                watches,
            }
        })
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&SettingsChange) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.changes.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.changes.unsubscribe(id)
    }

    /// Backend currently holding the authoritative document, once known.
    pub fn authority(&self) -> Option<StorageKind> {
        self.lock_state().authority
    }

    pub async fn get_settings(&self) -> Option<SettingsDocument> {
        match self.load_or_init().await {
            Ok(document) => Some(document),
            Err(error) => {
                warn!(error = %error, "settings read failed");
                match error {
                    StoreError::Invalid(_) => self.lock_state().last_seen.clone(),
                    _ => None,
                }
            }
        }
    }

    pub async fn get_channel_preference(&self, channel_id: &ChannelId) -> Option<ChannelPreference> {
        self.get_settings()
            .await?
            .channel(channel_id)
            .cloned()
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> bool {
        match self.try_update_settings(patch).await {
            Ok(()) => true,
            Err(error) => {
                warn!(error = %error, "settings update rejected");
                false
            }
        }
    }

    pub async fn update_channel_preference(
        &self,
        channel_id: &ChannelId,
        patch: ChannelPreferencePatch,
    ) -> bool {
        match self.try_update_channel(channel_id, patch).await {
            Ok(()) => true,
            Err(error) => {
                warn!(channel = %channel_id, error = %error, "channel preference update rejected");
                false
            }
        }
    }

    /// Moves the document to `target` and makes it authoritative there.
    pub async fn migrate(&self, target: StorageKind) -> bool {
        self.update_settings(SettingsPatch {
            use_sync: Some(target == StorageKind::Sync),
            ..SettingsPatch::default()
        })
        .await
    }

    async fn load_or_init(&self) -> Result<SettingsDocument, StoreError> {
        {
            let _read = self.gate.read().await;
            if let Some((_, document)) = self.resolve().await? {
                return Ok(document);
            }
        }
        let _write = self.gate.write().await;
        let (_, document) = self.current_locked().await?;
        Ok(document)
    }

    async fn try_update_settings(&self, patch: SettingsPatch) -> Result<(), StoreError> {
        let _write = self.gate.write().await;
        let (source, document) = self.current_locked().await?;

        let mut next = document.clone();
        let changes = apply_settings_patch(&mut next, patch, self.clock.now_millis())?;
        if changes.is_empty() {
            return Ok(());
        }

        if next.use_sync != document.use_sync || next.backend() != source {
            self.migrate_locked(source, &next).await
        } else {
            self.write_document(source, &next).await
        }
    }

    async fn try_update_channel(
        &self,
        channel_id: &ChannelId,
        patch: ChannelPreferencePatch,
    ) -> Result<(), StoreError> {
        let _write = self.gate.write().await;
        let (source, mut document) = self.current_locked().await?;
        let before = document.last_updated;

        apply_channel_patch(&mut document, channel_id, patch, self.clock.now_millis())?;
        if document.last_updated == before {
            return Ok(());
        }
        self.write_document(source, &document).await
    }

    /// Caller must hold the write gate.
    async fn current_locked(&self) -> Result<(StorageKind, SettingsDocument), StoreError> {
        if let Some(found) = self.resolve().await? {
            return Ok(found);
        }

        let document = SettingsDocument::with_defaults(self.clock.now_millis());
        self.write_document(StorageKind::Local, &document).await?;
        self.write_marker(StorageKind::Local).await;
        self.remember(StorageKind::Local, &document);
        info!("initialized default settings in local storage");
        Ok((StorageKind::Local, document))
    }

    async fn migrate_locked(
        &self,
        source: StorageKind,
        document: &SettingsDocument,
    ) -> Result<(), StoreError> {
        let target = document.backend();
        self.write_document(target, document).await?;
        self.write_marker(target).await;

        if source != target {
            if let Err(error) = self.area(source).remove(SETTINGS_KEY).await {
                warn!(
                    from = %source,
                    to = %target,
                    error = %error,
                    "migration left a stale document behind"
                );
            }
        }

        self.remember(target, document);
        info!(from = %source, to = %target, "settings migrated");
        Ok(())
    }

    async fn resolve(&self) -> Result<Option<(StorageKind, SettingsDocument)>, StoreError> {
        let local = self.read_document(StorageKind::Local).await?;
        let sync = match self.read_document(StorageKind::Sync).await {
            Ok(document) => document,
            Err(error) if local.is_some() => {
                warn!(error = %error, "sync settings unreadable, using local copy");
                None
            }
            Err(error) => return Err(error),
        };

        let (kind, document) = match (local, sync) {
            (None, None) => return Ok(None),
            (Some(document), None) => (StorageKind::Local, document),
            (None, Some(document)) => (StorageKind::Sync, document),
            (Some(local), Some(sync)) => {
                let winner = if local.use_sync == sync.use_sync {
                    StorageKind::from_use_sync(local.use_sync)
                } else {
                    self.recorded_authority().await
                };
                let loser = winner.other();
                debug!(winner = %winner, "settings present in both backends");
                if let Err(error) = self.area(loser).remove(SETTINGS_KEY).await {
                    warn!(area = %loser, error = %error, "failed to clear stale settings copy");
                }
                match winner {
                    StorageKind::Local => (winner, local),
                    StorageKind::Sync => (winner, sync),
                }
            }
        };

        self.remember(kind, &document);
        Ok(Some((kind, document)))
    }

    async fn recorded_authority(&self) -> StorageKind {
        if let Some(kind) = self.lock_state().authority {
            return kind;
        }
        match self.local.get(BACKEND_KEY).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or(StorageKind::Local),
            Ok(None) => StorageKind::Local,
            Err(error) => {
                warn!(error = %error, "backend marker unreadable");
                StorageKind::Local
            }
        }
    }

    async fn read_document(&self, kind: StorageKind) -> Result<Option<SettingsDocument>, StoreError> {
        match self.area(kind).get(SETTINGS_KEY).await? {
            Some(value) => Ok(Some(SettingsDocument::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn write_document(
        &self,
        kind: StorageKind,
        document: &SettingsDocument,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(document)?;
        self.area(kind).set(SETTINGS_KEY, value).await?;
        Ok(())
    }

    async fn write_marker(&self, kind: StorageKind) {
        for area in [&self.local, &self.sync] {
            if let Err(error) = area.set(BACKEND_KEY, serde_json::json!(kind)).await {
                warn!(area = %area.name(), error = %error, "failed to record settings backend");
            }
        }
    }

    fn remember(&self, kind: StorageKind, document: &SettingsDocument) {
        let mut state = self.lock_state();
        state.authority = Some(kind);
        state.last_seen = Some(document.clone());
    }

    fn observe_change(&self, change: &StorageChange) {
        if change.key != SETTINGS_KEY {
            return;
        }
        let Some(value) = change.new_value.clone() else {
            return;
        };
        let kind = match change.area {
            AreaName::Local => StorageKind::Local,
            AreaName::Sync => StorageKind::Sync,
            AreaName::Session => return,
        };
        let document = match SettingsDocument::from_value(value) {
            Ok(document) => document,
            Err(error) => {
                warn!(area = %kind, error = %error, "ignoring invalid settings written to storage");
                return;
            }
        };

        let changes = {
            let mut state = self.lock_state();
            if document.backend() == kind {
                state.authority = Some(kind);
            } else if state.authority != Some(kind) {
                return;
            }
            let changes = state
                .last_seen
                .as_ref()
                .map(|previous| diff(previous, &document))
                .unwrap_or_default();
            state.last_seen = Some(document);
            changes
        };

        for change in &changes {
            self.changes.emit(change);
        }
    }

    fn area(&self, kind: StorageKind) -> &Arc<dyn StorageArea> {
        match kind {
            StorageKind::Local => &self.local,
            StorageKind::Sync => &self.sync,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PreferenceStore {
    fn drop(&mut self) {
        for (kind, id) in &self.watches {
            self.area(*kind).unwatch(*id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chatswap_core::{PreferredChat, ThemeSetting};
    use futures::future::join_all;

    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorageArea;

    struct Fixture {
        local: Arc<MemoryStorageArea>,
        sync: Arc<MemoryStorageArea>,
        clock: Arc<ManualClock>,
        store: Arc<PreferenceStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let local = Arc::new(MemoryStorageArea::new(AreaName::Local));
            let sync = Arc::new(MemoryStorageArea::new(AreaName::Sync));
            let clock = Arc::new(ManualClock::new(1_000));
            let store = PreferenceStore::new(local.clone(), sync.clone(), clock.clone());
            Self {
                local,
                sync,
                clock,
                store,
            }
        }

        fn reopen(&self) -> Arc<PreferenceStore> {
            PreferenceStore::new(self.local.clone(), self.sync.clone(), self.clock.clone())
        }
    }

    fn channel(name: &str) -> ChannelId {
        ChannelId::new(name).expect("channel id")
    }

    #[tokio::test]
    async fn concurrent_first_reads_initialize_once() {
        let fixture = Fixture::new();

        let documents = join_all((0..8).map(|_| fixture.store.get_settings())).await;

        let first = documents[0].clone().expect("settings should initialize");
        assert!(documents.iter().all(|document| document.as_ref() == Some(&first)));
        assert_eq!(fixture.local.write_count(SETTINGS_KEY), 1);
        assert_eq!(fixture.sync.snapshot(SETTINGS_KEY), None);
        assert_eq!(fixture.store.authority(), Some(StorageKind::Local));
        assert_eq!(first.last_updated, 1_000);
        assert!(first.keep_chats_loaded);
    }

    #[tokio::test]
    async fn channel_update_creates_then_preserves_created() {
        let fixture = Fixture::new();
        let id = channel("foo");

        assert!(
            fixture
                .store
                .update_channel_preference(&id, ChannelPreferencePatch::associate("FooStream"))
                .await
        );
        fixture.clock.advance(500);
        assert!(
            fixture
                .store
                .update_channel_preference(&id, ChannelPreferencePatch::prefer(PreferredChat::Native))
                .await
        );

        let preference = fixture
            .store
            .get_channel_preference(&id)
            .await
            .expect("preference should exist");
        assert_eq!(preference.twitch_channel_id, "foostream");
        assert_eq!(preference.preferred_chat, PreferredChat::Native);
        assert_eq!(preference.created, 1_000);
        assert_eq!(preference.last_updated, 1_500);
    }

    #[tokio::test]
    async fn invalid_write_keeps_last_known_good() {
        let fixture = Fixture::new();
        let id = channel("foo");
        let before = fixture.store.get_settings().await.expect("settings");

        let accepted = fixture
            .store
            .update_channel_preference(&id, ChannelPreferencePatch::prefer(PreferredChat::ThirdParty))
            .await;

        assert!(!accepted);
        assert_eq!(fixture.store.get_settings().await, Some(before));
    }

    #[tokio::test]
    async fn storage_failure_degrades_to_absent_and_false() {
        let fixture = Fixture::new();
        fixture.local.set_unavailable(true);
        fixture.sync.set_unavailable(true);

        assert_eq!(fixture.store.get_settings().await, None);
        assert!(
            !fixture
                .store
                .update_settings(SettingsPatch {
                    theme: Some(ThemeSetting::Dark),
                    ..SettingsPatch::default()
                })
                .await
        );
    }

    #[tokio::test]
    async fn migration_round_trip_restores_document() {
        let fixture = Fixture::new();
        let id = channel("foo");
        fixture
            .store
            .update_channel_preference(&id, ChannelPreferencePatch::associate("foostream"))
            .await;
        let original = fixture.store.get_settings().await.expect("settings");

        fixture.clock.advance(10);
        assert!(fixture.store.migrate(StorageKind::Sync).await);
        assert_eq!(fixture.local.snapshot(SETTINGS_KEY), None);
        assert!(fixture.sync.snapshot(SETTINGS_KEY).is_some());
        assert_eq!(fixture.store.authority(), Some(StorageKind::Sync));
        assert_eq!(
            fixture.local.snapshot(BACKEND_KEY),
            Some(serde_json::json!("sync"))
        );

        fixture.clock.advance(10);
        assert!(
            fixture
                .store
                .update_settings(SettingsPatch {
                    use_sync: Some(false),
                    ..SettingsPatch::default()
                })
                .await
        );
        assert_eq!(fixture.sync.snapshot(SETTINGS_KEY), None);

        let restored = fixture.store.get_settings().await.expect("settings");
        assert!(restored.same_content(&original));
        assert!(restored.last_updated > original.last_updated);
    }

    #[tokio::test]
    async fn partial_migration_resolves_to_flagged_backend() {
        let fixture = Fixture::new();
        fixture.store.get_settings().await.expect("settings");
        fixture.local.fail_next_removes(1);

        assert!(fixture.store.migrate(StorageKind::Sync).await);
        assert!(fixture.local.snapshot(SETTINGS_KEY).is_some());

        let reopened = fixture.reopen();
        let document = reopened.get_settings().await.expect("settings");

        assert!(document.use_sync);
        assert_eq!(reopened.authority(), Some(StorageKind::Sync));
        assert_eq!(fixture.local.snapshot(SETTINGS_KEY), None);
    }

    #[tokio::test]
    async fn failed_migration_write_leaves_source_authoritative() {
        let fixture = Fixture::new();
        fixture.store.get_settings().await.expect("settings");
        fixture.sync.fail_next_sets(1);

        assert!(!fixture.store.migrate(StorageKind::Sync).await);

        let document = fixture.store.get_settings().await.expect("settings");
        assert!(!document.use_sync);
        assert_eq!(fixture.store.authority(), Some(StorageKind::Local));
    }

    #[tokio::test]
    async fn timestamp_only_external_change_is_silent() {
        let fixture = Fixture::new();
        let document = fixture.store.get_settings().await.expect("settings");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        fixture.store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut touched = document.clone();
        touched.last_updated += 50;
        fixture.local.write_external(
            SETTINGS_KEY,
            Some(serde_json::to_value(&touched).expect("encode")),
        );
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let mut themed = touched;
        themed.theme = ThemeSetting::Dark;
        themed.last_updated += 1;
        fixture.local.write_external(
            SETTINGS_KEY,
            Some(serde_json::to_value(&themed).expect("encode")),
        );
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn own_writes_notify_subscribers_with_typed_changes() {
        let fixture = Fixture::new();
        fixture.store.get_settings().await.expect("settings");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        fixture.store.subscribe(move |change| {
            sink.lock().expect("sink lock").push(change.clone());
        });

        fixture
            .store
            .update_settings(SettingsPatch {
                keep_chats_loaded: Some(false),
                ..SettingsPatch::default()
            })
            .await;

        assert_eq!(
            *seen.lock().expect("sink lock"),
            vec![SettingsChange::KeepChatsLoadedChanged {
                keep_chats_loaded: false
            }]
        );
    }

    #[tokio::test]
    async fn malformed_external_write_is_ignored() {
        let fixture = Fixture::new();
        let document = fixture.store.get_settings().await.expect("settings");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        fixture.store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        fixture
            .local
            .write_external(SETTINGS_KEY, Some(serde_json::json!({ "version": 9 })));

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.store.get_settings().await, Some(document));
    }
}
