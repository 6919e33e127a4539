use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ChannelId, TabId};
use crate::patch::{ChannelPreferencePatch, SettingsPatch};
use crate::settings::{ChannelPreference, SettingsDocument};
use crate::theme::Theme;

pub const ACTION_PREFIX: &str = "yt-twitch-chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    GetSettings,
    UpdateSettings,
    GetChannelPreference,
    UpdateChannelPreference,
    ThemeChanged,
    SetCurrentChannel,
    GetCurrentChannel,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::GetSettings,
        Action::UpdateSettings,
        Action::GetChannelPreference,
        Action::UpdateChannelPreference,
        Action::ThemeChanged,
        Action::SetCurrentChannel,
        Action::GetCurrentChannel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetSettings => "yt-twitch-chat-get-settings",
            Self::UpdateSettings => "yt-twitch-chat-update-settings",
            Self::GetChannelPreference => "yt-twitch-chat-get-channel-settings",
            Self::UpdateChannelPreference => "yt-twitch-chat-update-channel-settings",
            Self::ThemeChanged => "yt-twitch-chat-theme-changed",
            Self::SetCurrentChannel => "yt-twitch-chat-set-current-channel",
            Self::GetCurrentChannel => "yt-twitch-chat-get-current-channel",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == value)
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("unknown action {0:?}")]
    UnknownAction(String),
    #[error("{0} requires a data payload")]
    MissingData(Action),
    #[error("invalid payload for {action}: {message}")]
    InvalidData { action: Action, message: String },
}

/// Untyped form of a message as it crosses a context boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelQuery {
    channel_id: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelUpdate {
    channel_id: ChannelId,
    data: ChannelPreferencePatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ThemeNotice {
    theme: Theme,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentChannel {
    channel_name: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabQuery {
    tab_id: TabId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetSettings,
    UpdateSettings(SettingsPatch),
    GetChannelPreference {
        channel_id: ChannelId,
    },
    UpdateChannelPreference {
        channel_id: ChannelId,
        data: ChannelPreferencePatch,
    },
    ThemeChanged {
        theme: Theme,
    },
    SetCurrentChannel {
        channel_name: ChannelId,
    },
    GetCurrentChannel {
        tab_id: TabId,
    },
}

impl Request {
    pub fn action(&self) -> Action {
        match self {
            Self::GetSettings => Action::GetSettings,
            Self::UpdateSettings(_) => Action::UpdateSettings,
            Self::GetChannelPreference { .. } => Action::GetChannelPreference,
            Self::UpdateChannelPreference { .. } => Action::UpdateChannelPreference,
            Self::ThemeChanged { .. } => Action::ThemeChanged,
            Self::SetCurrentChannel { .. } => Action::SetCurrentChannel,
            Self::GetCurrentChannel { .. } => Action::GetCurrentChannel,
        }
    }

    pub fn from_wire(message: WireMessage) -> Result<Self, MessageError> {
        let action = Action::parse(&message.action)
            .ok_or_else(|| MessageError::UnknownAction(message.action.clone()))?;
        let data = message.data;

        let request = match action {
            Action::GetSettings => Self::GetSettings,
            Action::UpdateSettings => Self::UpdateSettings(payload(action, data)?),
            Action::GetChannelPreference => {
                let query: ChannelQuery = payload(action, data)?;
                Self::GetChannelPreference {
                    channel_id: query.channel_id,
                }
            }
            Action::UpdateChannelPreference => {
                let update: ChannelUpdate = payload(action, data)?;
                Self::UpdateChannelPreference {
                    channel_id: update.channel_id,
                    data: update.data,
                }
            }
            Action::ThemeChanged => {
                let notice: ThemeNotice = payload(action, data)?;
                Self::ThemeChanged {
                    theme: notice.theme,
                }
            }
            Action::SetCurrentChannel => {
                let current: CurrentChannel = payload(action, data)?;
                Self::SetCurrentChannel {
                    channel_name: current.channel_name,
                }
            }
            Action::GetCurrentChannel => {
                let query: TabQuery = payload(action, data)?;
                Self::GetCurrentChannel {
                    tab_id: query.tab_id,
                }
            }
        };
        Ok(request)
    }

    pub fn to_wire(&self) -> Result<WireMessage, MessageError> {
        let action = self.action();
        let data = match self {
            Self::GetSettings => None,
            Self::UpdateSettings(patch) => Some(encode(action, patch)?),
            Self::GetChannelPreference { channel_id } => Some(encode(
                action,
                &ChannelQuery {
                    channel_id: channel_id.clone(),
                },
            )?),
            Self::UpdateChannelPreference { channel_id, data } => Some(encode(
                action,
                &ChannelUpdate {
                    channel_id: channel_id.clone(),
                    data: data.clone(),
                },
            )?),
            Self::ThemeChanged { theme } => Some(encode(action, &ThemeNotice { theme: *theme })?),
            Self::SetCurrentChannel { channel_name } => Some(encode(
                action,
                &CurrentChannel {
                    channel_name: channel_name.clone(),
                },
            )?),
            Self::GetCurrentChannel { tab_id } => {
                Some(encode(action, &TabQuery { tab_id: *tab_id })?)
            }
        };
        Ok(WireMessage {
            action: action.as_str().to_owned(),
            data,
        })
    }
}

fn payload<T: DeserializeOwned>(action: Action, data: Option<Value>) -> Result<T, MessageError> {
    let data = data.ok_or(MessageError::MissingData(action))?;
    serde_json::from_value(data).map_err(|error| MessageError::InvalidData {
        action,
        message: error.to_string(),
    })
}

fn encode<T: Serialize>(action: Action, value: &T) -> Result<Value, MessageError> {
    serde_json::to_value(value).map_err(|error| MessageError::InvalidData {
        action,
        message: error.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Settings(SettingsDocument),
    CurrentChannel(ChannelId),
    ChannelPreference(ChannelPreference),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
        }
    }

    pub fn ok_with(data: ResponseData) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            data: None,
        }
    }

    pub fn from_success(success: bool) -> Self {
        Self {
            success,
            data: None,
        }
    }
}
