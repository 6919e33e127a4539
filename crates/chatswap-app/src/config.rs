use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embed: EmbedConfig,
    pub selectors: SelectorConfig,
    pub timing: TimingConfig,
}

impl Config {
    /// Parses an override document. Missing fields keep production defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.extraction_attempts == 0 {
            return Err(ConfigError::Invalid(
                "timing.extraction_attempts must be at least 1".to_owned(),
            ));
        }
        if self.timing.live_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "timing.live_poll_interval_ms must be positive".to_owned(),
            ));
        }
        if self.embed.embed_host.is_empty() || self.embed.parent_domain.is_empty() {
            return Err(ConfigError::Invalid(
                "embed host and parent domain are required".to_owned(),
            ));
        }
        if self.selectors.chat_container.is_empty() || self.selectors.native_iframe_id.is_empty() {
            return Err(ConfigError::Invalid(
                "chat container selector and native iframe id are required".to_owned(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    pub embed_host: String,
    pub parent_domain: String,
    pub third_party_iframe_id: String,
    pub iframe_allow: String,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            embed_host: "www.twitch.tv".to_owned(),
            parent_domain: "www.youtube.com".to_owned(),
            third_party_iframe_id: "twitch-chat-iframe".to_owned(),
            iframe_allow: "clipboard-read; clipboard-write".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub chat_container: String,
    pub native_iframe_id: String,
    /// Any match means the page shows a live chat surface.
    pub live_surface: Vec<String>,
    pub player_controls: String,
    pub toggle_class: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            chat_container: "ytd-live-chat-frame#chat".to_owned(),
            native_iframe_id: "chatframe".to_owned(),
            live_surface: vec![
                "#chatframe".to_owned(),
                "ytd-live-chat-frame#chat".to_owned(),
            ],
            player_controls: ".ytp-left-controls".to_owned(),
            toggle_class: "yt-chat-toggle-container".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub debounce_ms: u64,
    pub extraction_attempts: u32,
    pub extraction_interval_ms: u64,
    pub revalidate_window_ms: u64,
    pub live_poll_interval_ms: u64,
    pub live_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            extraction_attempts: 5,
            extraction_interval_ms: 500,
            revalidate_window_ms: 2_000,
            live_poll_interval_ms: 500,
            live_timeout_ms: 5_000,
        }
    }
}

impl TimingConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn extraction_interval(&self) -> Duration {
        Duration::from_millis(self.extraction_interval_ms)
    }

    pub fn revalidate_window(&self) -> Duration {
        Duration::from_millis(self.revalidate_window_ms)
    }

    pub fn live_poll_interval(&self) -> Duration {
        Duration::from_millis(self.live_poll_interval_ms)
    }

    pub fn live_timeout(&self) -> Duration {
        Duration::from_millis(self.live_timeout_ms)
    }
}
