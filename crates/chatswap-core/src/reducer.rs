use crate::channel::validate_twitch_channel;
use crate::ids::ChannelId;
use crate::patch::{diff, ChannelPreferencePatch, SettingsChange, SettingsPatch};
use crate::settings::{ChannelPreference, SettingsDocument};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReduceError {
    #[error("unsupported settings version {0}")]
    UnsupportedVersion(u32),
    #[error("channel id must not be empty")]
    EmptyChannelId,
    #[error("{0} prefers third-party chat without an associated channel")]
    ThirdPartyWithoutChannel(ChannelId),
    #[error("invalid third-party channel name {0:?}")]
    InvalidTwitchChannel(String),
    #[error("malformed settings document: {0}")]
    Malformed(String),
}

/// Next `lastUpdated` stamp: wall clock, but never behind the previous one.
pub fn next_timestamp(previous: i64, now: i64) -> i64 {
    now.max(previous.saturating_add(1))
}

/// Merges `patch` into `document`. The document is only replaced when the
/// merged result validates; a patch that changes nothing leaves it untouched.
pub fn apply_settings_patch(
    document: &mut SettingsDocument,
    patch: SettingsPatch,
    now: i64,
) -> Result<Vec<SettingsChange>, ReduceError> {
    let mut candidate = document.clone();

    if let Some(theme) = patch.theme {
        candidate.theme = theme;
    }
    if let Some(keep_chats_loaded) = patch.keep_chats_loaded {
        candidate.keep_chats_loaded = keep_chats_loaded;
    }
    if let Some(use_sync) = patch.use_sync {
        candidate.use_sync = use_sync;
    }
    if let Some(channels) = patch.channels {
        for preference in channels.values() {
            if preference.has_association() {
                validate_twitch_channel(&preference.twitch_channel_id).map_err(|_| {
                    ReduceError::InvalidTwitchChannel(preference.twitch_channel_id.clone())
                })?;
            }
        }
        candidate.channels = channels;
    }

    candidate.validate()?;

    let changes = diff(document, &candidate);
    if changes.is_empty() {
        return Ok(changes);
    }

    candidate.last_updated = next_timestamp(document.last_updated, now);
    *document = candidate;
    Ok(changes)
}

/// Read-modify-write of one channel entry. Creates the entry when absent and
/// keeps `created` of an existing one.
pub fn apply_channel_patch(
    document: &mut SettingsDocument,
    channel_id: &ChannelId,
    patch: ChannelPreferencePatch,
    now: i64,
) -> Result<Vec<SettingsChange>, ReduceError> {
    let mut preference = document
        .channels
        .get(channel_id)
        .cloned()
        .unwrap_or_else(|| ChannelPreference::new(now));
    let is_new = !document.channels.contains_key(channel_id);

    if let Some(twitch_channel_id) = patch.twitch_channel_id {
        preference.twitch_channel_id = if twitch_channel_id.trim().is_empty() {
            String::new()
        } else {
            validate_twitch_channel(&twitch_channel_id)
                .map_err(|_| ReduceError::InvalidTwitchChannel(twitch_channel_id.clone()))?
        };
    }
    if let Some(preferred_chat) = patch.preferred_chat {
        preference.preferred_chat = preferred_chat;
    }

    let mut candidate = document.clone();
    let stamp = next_timestamp(document.last_updated, now);
    preference.last_updated = if is_new {
        preference.created
    } else {
        next_timestamp(preference.last_updated, now)
    };
    candidate.channels.insert(channel_id.clone(), preference);
    candidate.validate()?;

    let changes = diff(document, &candidate);
    if changes.is_empty() && !is_new {
        return Ok(changes);
    }

    candidate.last_updated = stamp;
    *document = candidate;
    Ok(changes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::settings::{PreferredChat, ThemeSetting};

    fn channel(name: &str) -> ChannelId {
        ChannelId::new(name).expect("channel id")
    }

    fn document_with_association() -> SettingsDocument {
        let mut document = SettingsDocument::with_defaults(100);
        document.channels.insert(
            channel("abc"),
            ChannelPreference {
                twitch_channel_id: "abcstream".to_owned(),
                preferred_chat: PreferredChat::Native,
                created: 100,
                last_updated: 100,
            },
        );
        document
    }

    #[test]
    fn channel_merge_preserves_association_and_created() {
        let mut document = document_with_association();

        let changes = apply_channel_patch(
            &mut document,
            &channel("abc"),
            ChannelPreferencePatch::prefer(PreferredChat::ThirdParty),
            500,
        )
        .expect("patch should apply");

        let preference = document.channel(&channel("abc")).expect("entry exists");
        assert_eq!(preference.twitch_channel_id, "abcstream");
        assert_eq!(preference.created, 100);
        assert_eq!(preference.preferred_chat, PreferredChat::ThirdParty);
        assert_eq!(preference.last_updated, 500);
        assert_eq!(document.last_updated, 500);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn creates_missing_entry() {
        let mut document = SettingsDocument::with_defaults(1);

        apply_channel_patch(
            &mut document,
            &channel("foo"),
            ChannelPreferencePatch::associate("FooStream"),
            20,
        )
        .expect("patch should apply");

        let preference = document.channel(&channel("foo")).expect("entry created");
        assert_eq!(preference.twitch_channel_id, "foostream");
        assert_eq!(preference.preferred_chat, PreferredChat::ThirdParty);
        assert_eq!(preference.created, 20);
    }

    #[test]
    fn keep_native_still_records_entry() {
        let mut document = SettingsDocument::with_defaults(1);

        apply_channel_patch(
            &mut document,
            &channel("foo"),
            ChannelPreferencePatch::keep_native(),
            20,
        )
        .expect("patch should apply");

        let preference = document.channel(&channel("foo")).expect("entry recorded");
        assert!(!preference.has_association());
        assert_eq!(document.last_updated, 20);
    }

    #[test]
    fn rejects_third_party_without_association() {
        let mut document = SettingsDocument::with_defaults(1);
        let before = document.clone();

        let result = apply_channel_patch(
            &mut document,
            &channel("foo"),
            ChannelPreferencePatch::prefer(PreferredChat::ThirdParty),
            20,
        );

        assert_eq!(
            result,
            Err(ReduceError::ThirdPartyWithoutChannel(channel("foo")))
        );
        assert_eq!(document, before, "rejected write keeps last good document");
    }

    #[test]
    fn rejects_invalid_twitch_name() {
        let mut document = SettingsDocument::with_defaults(1);

        let result = apply_channel_patch(
            &mut document,
            &channel("foo"),
            ChannelPreferencePatch::associate("not a name!"),
            20,
        );

        assert!(matches!(result, Err(ReduceError::InvalidTwitchChannel(_))));
        assert!(document.channels.is_empty());
    }

    #[test]
    fn settings_patch_bumps_timestamp_monotonically() {
        let mut document = SettingsDocument::with_defaults(1_000);

        let changes = apply_settings_patch(
            &mut document,
            SettingsPatch {
                theme: Some(ThemeSetting::Dark),
                ..SettingsPatch::default()
            },
            10,
        )
        .expect("patch should apply");

        assert_eq!(changes.len(), 1);
        assert_eq!(document.theme, ThemeSetting::Dark);
        assert_eq!(document.last_updated, 1_001);
    }

    #[test]
    fn noop_settings_patch_leaves_document_untouched() {
        let mut document = SettingsDocument::with_defaults(1);
        let before = document.clone();

        let changes = apply_settings_patch(
            &mut document,
            SettingsPatch {
                theme: Some(ThemeSetting::System),
                ..SettingsPatch::default()
            },
            50,
        )
        .expect("patch should apply");

        assert!(changes.is_empty());
        assert_eq!(document, before);
    }

    #[test]
    fn settings_patch_rejects_invalid_channel_map() {
        let mut document = document_with_association();
        let before = document.clone();
        let mut channels = BTreeMap::new();
        channels.insert(
            channel("bad"),
            ChannelPreference {
                twitch_channel_id: String::new(),
                preferred_chat: PreferredChat::ThirdParty,
                created: 1,
                last_updated: 1,
            },
        );

        let result = apply_settings_patch(
            &mut document,
            SettingsPatch {
                channels: Some(channels),
                ..SettingsPatch::default()
            },
            50,
        );

        assert!(result.is_err());
        assert_eq!(document, before);
    }
}
