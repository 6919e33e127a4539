pub mod channel;
pub mod ids;
pub mod message;
pub mod patch;
pub mod reducer;
pub mod settings;
pub mod theme;

pub use channel::{is_watch_page, third_party_embed_url, validate_twitch_channel, ChannelNameError};
pub use ids::{ChannelId, TabId};
pub use message::{Action, MessageError, Request, Response, ResponseData, WireMessage};
pub use patch::{ChannelPreferencePatch, SettingsChange, SettingsPatch};
pub use reducer::{apply_channel_patch, apply_settings_patch, ReduceError};
pub use settings::{
    ChannelPreference, PreferredChat, SettingsDocument, StorageKind, ThemeSetting, BACKEND_KEY,
    SCHEMA_VERSION, SETTINGS_KEY,
};
pub use theme::{resolve_theme, Theme};
