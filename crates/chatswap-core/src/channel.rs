use std::sync::OnceLock;

use regex::Regex;

use crate::ids::ChannelId;
use crate::theme::Theme;

const MAX_TWITCH_CHANNEL_LEN: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelNameError {
    #[error("channel name is empty")]
    Empty,
    #[error("channel name is longer than {MAX_TWITCH_CHANNEL_LEN} characters")]
    TooLong,
    #[error("channel name can only contain letters, numbers and underscores")]
    InvalidCharacters,
}

fn handle_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"/@([^/?#]+)").ok())
        .as_ref()
}

impl ChannelId {
    /// Identity from an owner link such as `https://host/@Some%20Name?x=1`.
    pub fn from_handle_href(href: &str) -> Option<Self> {
        let captures = handle_pattern()?.captures(href)?;
        let raw = captures.get(1)?.as_str();
        let decoded = urlencoding::decode(raw)
            .map(|value| value.into_owned())
            .unwrap_or_else(|_| raw.to_owned());
        let cleaned = decoded
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_owned();
        Self::new(cleaned)
    }

    /// Identity from free text (channel name labels, author metadata).
    pub fn from_display_text(text: &str) -> Option<Self> {
        let cleaned: String = text
            .trim()
            .trim_start_matches('@')
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-')
            .collect();
        Self::new(cleaned)
    }
}

/// Normalizes a user supplied third-party channel name.
pub fn validate_twitch_channel(input: &str) -> Result<String, ChannelNameError> {
    let name = input.trim().to_ascii_lowercase();
    if name.is_empty() {
        return Err(ChannelNameError::Empty);
    }
    if name.chars().count() > MAX_TWITCH_CHANNEL_LEN {
        return Err(ChannelNameError::TooLong);
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
    {
        return Err(ChannelNameError::InvalidCharacters);
    }
    Ok(name)
}

pub fn is_watch_page(url: &str) -> bool {
    url.contains("/watch")
}

pub fn third_party_embed_url(
    embed_host: &str,
    twitch_channel: &str,
    parent_domain: &str,
    theme: Theme,
) -> String {
    let mut url = format!(
        "https://{embed_host}/embed/{}/chat?parent={}",
        urlencoding::encode(twitch_channel),
        urlencoding::encode(parent_domain)
    );
    if theme == Theme::Dark {
        url.push_str("&darkpopout");
    }
    url
}
