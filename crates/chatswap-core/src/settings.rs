use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

use crate::ids::ChannelId;
use crate::reducer::ReduceError;

/// Storage key of the settings document, identical in both backends.
pub const SETTINGS_KEY: &str = "yt_twitch_chat_settings";
/// Storage key of the authoritative-backend pointer, written to both backends.
pub const BACKEND_KEY: &str = "yt_twitch_chat_backend";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Sync,
}

impl StorageKind {
    pub fn from_use_sync(use_sync: bool) -> Self {
        if use_sync {
            Self::Sync
        } else {
            Self::Local
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Local => Self::Sync,
            Self::Sync => Self::Local,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Sync => "sync",
        }
    }
}

impl Display for StorageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeSetting {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferredChat {
    #[default]
    Native,
    ThirdParty,
}

impl PreferredChat {
    pub fn flipped(self) -> Self {
        match self {
            Self::Native => Self::ThirdParty,
            Self::ThirdParty => Self::Native,
        }
    }
}

impl Display for PreferredChat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Native => f.write_str("native"),
            Self::ThirdParty => f.write_str("third_party"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPreference {
    #[serde(default)]
    pub twitch_channel_id: String,
    #[serde(default)]
    pub preferred_chat: PreferredChat,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub last_updated: i64,
}

impl ChannelPreference {
    pub fn new(created: i64) -> Self {
        Self {
            twitch_channel_id: String::new(),
            preferred_chat: PreferredChat::Native,
            created,
            last_updated: created,
        }
    }

    pub fn has_association(&self) -> bool {
        !self.twitch_channel_id.is_empty()
    }

    /// Chat to render. An entry without a third-party association always
    /// resolves to the native chat.
    pub fn effective_chat(&self) -> PreferredChat {
        if self.has_association() {
            self.preferred_chat
        } else {
            PreferredChat::Native
        }
    }

    /// Equality that ignores bookkeeping timestamps.
    pub fn same_choice(&self, other: &Self) -> bool {
        self.twitch_channel_id == other.twitch_channel_id
            && self.preferred_chat == other.preferred_chat
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDocument {
    pub version: u32,
    #[serde(default)]
    pub channels: BTreeMap<ChannelId, ChannelPreference>,
    pub last_updated: i64,
    #[serde(default)]
    pub theme: ThemeSetting,
    #[serde(default = "default_keep_chats_loaded")]
    pub keep_chats_loaded: bool,
    #[serde(default)]
    pub use_sync: bool,
}

fn default_keep_chats_loaded() -> bool {
    true
}

impl SettingsDocument {
    pub fn with_defaults(now: i64) -> Self {
        Self {
            version: SCHEMA_VERSION,
            channels: BTreeMap::new(),
            last_updated: now,
            theme: ThemeSetting::System,
            keep_chats_loaded: default_keep_chats_loaded(),
            use_sync: false,
        }
    }

    pub fn backend(&self) -> StorageKind {
        StorageKind::from_use_sync(self.use_sync)
    }

    pub fn channel(&self, channel_id: &ChannelId) -> Option<&ChannelPreference> {
        self.channels.get(channel_id)
    }

    pub fn validate(&self) -> Result<(), ReduceError> {
        if self.version != SCHEMA_VERSION {
            return Err(ReduceError::UnsupportedVersion(self.version));
        }
        for (channel_id, preference) in &self.channels {
            if channel_id.as_str().trim().is_empty() {
                return Err(ReduceError::EmptyChannelId);
            }
            if preference.preferred_chat == PreferredChat::ThirdParty
                && !preference.has_association()
            {
                return Err(ReduceError::ThirdPartyWithoutChannel(channel_id.clone()));
            }
        }
        Ok(())
    }

    /// Parses a stored document, rejecting anything that does not validate.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ReduceError> {
        let document: Self = serde_json::from_value(value)
            .map_err(|error| ReduceError::Malformed(error.to_string()))?;
        document.validate()?;
        Ok(document)
    }

    /// Equality that ignores every `last_updated` stamp.
    pub fn same_content(&self, other: &Self) -> bool {
        self.version == other.version
            && self.theme == other.theme
            && self.keep_chats_loaded == other.keep_chats_loaded
            && self.use_sync == other.use_sync
            && self.channels.len() == other.channels.len()
            && self.channels.iter().all(|(id, preference)| {
                other.channels.get(id).is_some_and(|candidate| {
                    candidate.same_choice(preference) && candidate.created == preference.created
                })
            })
    }
}
