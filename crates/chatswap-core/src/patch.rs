use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::ChannelId;
use crate::settings::{
    ChannelPreference, PreferredChat, SettingsDocument, StorageKind, ThemeSetting,
};

/// Partial update of the settings document. `lastUpdated` is owned by the
/// store and is never accepted from callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<ThemeSetting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_chats_loaded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_sync: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<BTreeMap<ChannelId, ChannelPreference>>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.theme.is_none()
            && self.keep_chats_loaded.is_none()
            && self.use_sync.is_none()
            && self.channels.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPreferencePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitch_channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_chat: Option<PreferredChat>,
}

impl ChannelPreferencePatch {
    pub fn associate(twitch_channel_id: impl Into<String>) -> Self {
        Self {
            twitch_channel_id: Some(twitch_channel_id.into()),
            preferred_chat: Some(PreferredChat::ThirdParty),
        }
    }

    pub fn keep_native() -> Self {
        Self {
            twitch_channel_id: Some(String::new()),
            preferred_chat: Some(PreferredChat::Native),
        }
    }

    pub fn prefer(chat: PreferredChat) -> Self {
        Self {
            twitch_channel_id: None,
            preferred_chat: Some(chat),
        }
    }
}

/// Observable change to the settings document. Timestamps never produce a
/// change on their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsChange {
    ThemeChanged {
        theme: ThemeSetting,
    },
    KeepChatsLoadedChanged {
        keep_chats_loaded: bool,
    },
    BackendChanged {
        backend: StorageKind,
    },
    ChannelChanged {
        channel_id: ChannelId,
        preference: Option<ChannelPreference>,
    },
}

pub fn diff(old: &SettingsDocument, new: &SettingsDocument) -> Vec<SettingsChange> {
    let mut changes = Vec::new();

    if old.theme != new.theme {
        changes.push(SettingsChange::ThemeChanged { theme: new.theme });
    }
    if old.keep_chats_loaded != new.keep_chats_loaded {
        changes.push(SettingsChange::KeepChatsLoadedChanged {
            keep_chats_loaded: new.keep_chats_loaded,
        });
    }
    if old.use_sync != new.use_sync {
        changes.push(SettingsChange::BackendChanged {
            backend: new.backend(),
        });
    }

    for (channel_id, preference) in &new.channels {
        let unchanged = old
            .channels
            .get(channel_id)
            .is_some_and(|previous| previous.same_choice(preference));
        if !unchanged {
            changes.push(SettingsChange::ChannelChanged {
                channel_id: channel_id.clone(),
                preference: Some(preference.clone()),
            });
        }
    }
    for channel_id in old.channels.keys() {
        if !new.channels.contains_key(channel_id) {
            changes.push(SettingsChange::ChannelChanged {
                channel_id: channel_id.clone(),
                preference: None,
            });
        }
    }

    changes
}
