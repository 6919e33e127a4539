use std::sync::{Arc, Mutex, MutexGuard};

use chatswap_core::{third_party_embed_url, ChannelId, ChannelPreference, PreferredChat, Theme};
use tracing::{debug, warn};

use crate::config::Config;
use crate::host::{ElementSpec, HostError, HostPage, NodeId};

const VISIBLE_STYLES: &[(&str, &str)] = &[
    ("opacity", "1"),
    ("pointer-events", "auto"),
    ("position", "static"),
    ("visibility", "visible"),
];

const HIDDEN_STYLES: &[(&str, &str)] = &[
    ("opacity", "0"),
    ("pointer-events", "none"),
    ("position", "absolute"),
    ("visibility", "hidden"),
];

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("chat container {0:?} not found")]
    ContainerMissing(String),
    #[error(transparent)]
    Host(#[from] HostError),
}

#[derive(Debug, Clone)]
struct NativeTemplate {
    src: Option<String>,
    class: Option<String>,
}

struct EmbedState {
    native: Option<NodeId>,
    native_template: Option<NativeTemplate>,
    third_party: Option<NodeId>,
    twitch_channel: Option<String>,
    preferred: PreferredChat,
    keep_loaded: bool,
    theme: Theme,
    saved_position: Option<String>,
    destroyed: bool,
}

/// Owns the native/third-party iframe pair inside the chat container for
/// one channel session.
pub struct EmbedCoordinator {
    host: Arc<dyn HostPage>,
    config: Arc<Config>,
    channel: ChannelId,
    container: NodeId,
    state: Mutex<EmbedState>,
}

impl EmbedCoordinator {
    pub fn mount(
        host: Arc<dyn HostPage>,
        config: Arc<Config>,
        channel: ChannelId,
        theme: Theme,
    ) -> Result<Self, EmbedError> {
        let selector = &config.selectors.chat_container;
        let container = host
            .query_selector(selector)
            .ok_or_else(|| EmbedError::ContainerMissing(selector.clone()))?;

        let native = host.element_by_id(&config.selectors.native_iframe_id);
        let native_template = native.map(|node| NativeTemplate {
            src: host.attribute(node, "src"),
            class: host.attribute(node, "class"),
        });

        let saved_position = host.style(container, "position");
        host.set_style(container, "position", Some("relative"))?;
        debug!(channel = %channel, "embed coordinator mounted");

        Ok(Self {
            host,
            config,
            channel,
            container,
            state: Mutex::new(EmbedState {
                native,
                native_template,
                third_party: None,
                twitch_channel: None,
                preferred: PreferredChat::Native,
                keep_loaded: true,
                theme,
                saved_position,
                destroyed: false,
            }),
        })
    }

    pub fn container(&self) -> NodeId {
        self.container
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn preferred(&self) -> PreferredChat {
        self.lock().preferred
    }

    pub fn third_party_iframe(&self) -> Option<NodeId> {
        self.lock().third_party
    }

    pub fn native_iframe(&self) -> Option<NodeId> {
        let state = self.lock();
        self.native_node(&state)
    }

    /// Renders `preference`. `None` means "not decided yet": native only.
    pub fn apply(
        &self,
        preference: Option<&ChannelPreference>,
        keep_loaded: bool,
    ) -> Result<(), EmbedError> {
        let mut state = self.lock();
        if state.destroyed {
            return Ok(());
        }
        state.twitch_channel = preference
            .filter(|preference| preference.has_association())
            .map(|preference| preference.twitch_channel_id.clone());
        state.preferred = preference
            .map(ChannelPreference::effective_chat)
            .unwrap_or_default();
        state.keep_loaded = keep_loaded;
        self.render(&mut state)
    }

    /// Live toggle: swaps visibility in place.
    pub fn set_preferred(&self, chat: PreferredChat) -> Result<(), EmbedError> {
        let mut state = self.lock();
        if state.destroyed {
            return Ok(());
        }
        let associated = state.twitch_channel.is_some();
        state.preferred = if associated {
            chat
        } else {
            PreferredChat::Native
        };
        self.render(&mut state)
    }

    pub fn set_keep_loaded(&self, keep_loaded: bool) -> Result<(), EmbedError> {
        let mut state = self.lock();
        if state.destroyed || state.keep_loaded == keep_loaded {
            return Ok(());
        }
        state.keep_loaded = keep_loaded;
        self.render(&mut state)
    }

    /// Reassigns the third-party `src` when the effective theme changes.
    pub fn set_theme(&self, theme: Theme) -> Result<(), EmbedError> {
        let mut state = self.lock();
        if state.destroyed || state.theme == theme {
            return Ok(());
        }
        state.theme = theme;
        if let (Some(node), Some(name)) = (state.third_party, state.twitch_channel.as_deref()) {
            let src = self.embed_url(name, theme);
            self.host.set_attribute(node, "src", &src)?;
        }
        Ok(())
    }

    /// Removes the third-party embed and hands the native chat back to the
    /// page in its original state.
    pub fn destroy(&self) {
        let mut state = self.lock();
        if state.destroyed {
            return;
        }
        state.destroyed = true;

        if let Some(node) = state.third_party.take() {
            if let Err(error) = self.host.remove_node(node) {
                debug!(error = %error, "third-party iframe already gone");
            }
        }
        let restored = match self.native_node(&state) {
            Some(node) => self.release(node),
            None => self.recreate_native(&mut state).map(|_| ()),
        };
        if let Err(error) = restored {
            warn!(channel = %self.channel, error = %error, "failed to restore native chat");
        }
        if let Err(error) =
            self.host
                .set_style(self.container, "position", state.saved_position.as_deref())
        {
            debug!(error = %error, "chat container already gone");
        }
        debug!(channel = %self.channel, "embed coordinator destroyed");
    }

    fn render(&self, state: &mut EmbedState) -> Result<(), EmbedError> {
        let third_party_wanted = state.twitch_channel.is_some()
            && (state.preferred == PreferredChat::ThirdParty || state.keep_loaded);
        let native_wanted = state.preferred == PreferredChat::Native || state.keep_loaded;

        let third_party = if third_party_wanted {
            Some(self.ensure_third_party(state)?)
        } else {
            self.remove_third_party(state)?;
            None
        };

        let native = if native_wanted {
            match self.native_node(state) {
                Some(node) => Some(node),
                None => self.recreate_native(state)?,
            }
        } else {
            if let Some(node) = self.native_node(state) {
                self.host.remove_node(node)?;
            }
            state.native = None;
            None
        };

        match (state.preferred, third_party) {
            (PreferredChat::ThirdParty, Some(third_party)) => {
                self.show(third_party)?;
                if let Some(native) = native {
                    self.hide(native)?;
                }
            }
            _ => {
                if let Some(native) = native {
                    self.show(native)?;
                }
                if let Some(third_party) = third_party {
                    self.hide(third_party)?;
                }
            }
        }
        Ok(())
    }

    fn ensure_third_party(&self, state: &mut EmbedState) -> Result<NodeId, EmbedError> {
        let name = state.twitch_channel.clone().unwrap_or_default();
        let src = self.embed_url(&name, state.theme);

        if let Some(node) = state.third_party.filter(|node| self.host.is_connected(*node)) {
            if self.host.attribute(node, "src").as_deref() != Some(src.as_str()) {
                self.host.set_attribute(node, "src", &src)?;
            }
            return Ok(node);
        }

        let spec = ElementSpec::new("iframe")
            .with_id(self.config.embed.third_party_iframe_id.clone())
            .with_attribute("src", src)
            .with_attribute("allow", self.config.embed.iframe_allow.clone())
            .with_attribute("frameborder", "0");
        let node = self.host.create_element(self.container, &spec)?;
        self.host.set_style(node, "width", Some("100%"))?;
        self.host.set_style(node, "height", Some("100%"))?;
        self.host.set_style(node, "border", Some("none"))?;
        debug!(channel = %self.channel, twitch = %name, "third-party chat created");
        state.third_party = Some(node);
        Ok(node)
    }

    fn remove_third_party(&self, state: &mut EmbedState) -> Result<(), EmbedError> {
        if let Some(node) = state.third_party.take() {
            if self.host.is_connected(node) {
                self.host.remove_node(node)?;
            }
        }
        Ok(())
    }

    fn recreate_native(&self, state: &mut EmbedState) -> Result<Option<NodeId>, HostError> {
        let Some(template) = state.native_template.clone() else {
            debug!(channel = %self.channel, "no native chat to restore");
            return Ok(None);
        };
        let mut spec = ElementSpec::new("iframe").with_id(self.config.selectors.native_iframe_id.clone());
        if let Some(class) = template.class {
            spec = spec.with_class(class);
        }
        if let Some(src) = template.src {
            spec = spec.with_attribute("src", src);
        }
        let node = self.host.create_element(self.container, &spec)?;
        state.native = Some(node);
        Ok(Some(node))
    }

    fn native_node(&self, state: &EmbedState) -> Option<NodeId> {
        state
            .native
            .filter(|node| self.host.is_connected(*node))
            .or_else(|| {
                state
                    .native_template
                    .as_ref()
                    .and_then(|_| self.host.element_by_id(&self.config.selectors.native_iframe_id))
            })
    }

    fn show(&self, node: NodeId) -> Result<(), HostError> {
        for &(property, value) in VISIBLE_STYLES {
            self.host.set_style(node, property, Some(value))?;
        }
        self.host.set_attribute(node, "aria-hidden", "false")?;
        self.host.remove_attribute(node, "tabindex")
    }

    fn hide(&self, node: NodeId) -> Result<(), HostError> {
        for &(property, value) in HIDDEN_STYLES {
            self.host.set_style(node, property, Some(value))?;
        }
        self.host.set_attribute(node, "aria-hidden", "true")?;
        self.host.set_attribute(node, "tabindex", "-1")
    }

    fn release(&self, node: NodeId) -> Result<(), HostError> {
        for &(property, _) in VISIBLE_STYLES {
            self.host.set_style(node, property, None)?;
        }
        self.host.remove_attribute(node, "aria-hidden")?;
        self.host.remove_attribute(node, "tabindex")
    }

    fn embed_url(&self, twitch_channel: &str, theme: Theme) -> String {
        third_party_embed_url(
            &self.config.embed.embed_host,
            twitch_channel,
            &self.config.embed.parent_domain,
            theme,
        )
    }

    fn lock(&self) -> MutexGuard<'_, EmbedState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::host::{HostEvent, MockHostPage, WatchPage};

    fn mounted(theme: Theme) -> (Arc<MockHostPage>, WatchPage, EmbedCoordinator) {
        let (page, nodes) = MockHostPage::watch_page("foo");
        let coordinator = EmbedCoordinator::mount(
            page.clone(),
            Arc::new(Config::default()),
            ChannelId::new("foo").expect("channel id"),
            theme,
        )
        .expect("mount should succeed");
        (page, nodes, coordinator)
    }

    fn associated(chat: PreferredChat) -> ChannelPreference {
        ChannelPreference {
            twitch_channel_id: "foostream".to_owned(),
            preferred_chat: chat,
            created: 1,
            last_updated: 1,
        }
    }

    fn assert_interactive(page: &MockHostPage, node: NodeId) {
        assert_eq!(page.attribute(node, "aria-hidden").as_deref(), Some("false"));
        assert_eq!(page.attribute(node, "tabindex"), None);
        assert_eq!(page.style(node, "pointer-events").as_deref(), Some("auto"));
        assert_eq!(page.style(node, "display"), None);
    }

    fn assert_inert(page: &MockHostPage, node: NodeId) {
        assert_eq!(page.attribute(node, "aria-hidden").as_deref(), Some("true"));
        assert_eq!(page.attribute(node, "tabindex").as_deref(), Some("-1"));
        assert_eq!(page.style(node, "pointer-events").as_deref(), Some("none"));
        assert_eq!(page.style(node, "display"), None);
    }

    #[test]
    fn third_party_preference_shows_embed_and_hides_native() {
        let (page, nodes, coordinator) = mounted(Theme::Light);

        coordinator
            .apply(Some(&associated(PreferredChat::ThirdParty)), true)
            .expect("apply should succeed");

        let third_party = coordinator.third_party_iframe().expect("third-party iframe");
        assert_eq!(
            page.attribute(third_party, "src").as_deref(),
            Some("https://www.twitch.tv/embed/foostream/chat?parent=www.youtube.com")
        );
        assert_eq!(
            page.attribute(third_party, "allow").as_deref(),
            Some("clipboard-read; clipboard-write")
        );
        assert_interactive(&page, third_party);
        assert_inert(&page, nodes.native_iframe);
    }

    #[test]
    fn missing_preference_renders_native_only() {
        let (page, nodes, coordinator) = mounted(Theme::Light);

        coordinator.apply(None, true).expect("apply should succeed");

        assert_eq!(coordinator.third_party_iframe(), None);
        assert_interactive(&page, nodes.native_iframe);
    }

    #[test]
    fn unloaded_mode_removes_and_recreates_native() {
        let (page, nodes, coordinator) = mounted(Theme::Light);

        coordinator
            .apply(Some(&associated(PreferredChat::ThirdParty)), false)
            .expect("apply should succeed");
        assert!(!page.is_connected(nodes.native_iframe));
        assert_eq!(page.element_by_id("chatframe"), None);

        coordinator
            .set_preferred(PreferredChat::Native)
            .expect("toggle should succeed");

        let native = page.element_by_id("chatframe").expect("native recreated");
        assert_ne!(native, nodes.native_iframe);
        assert_eq!(
            page.attribute(native, "src").as_deref(),
            Some("https://www.youtube.com/live_chat?v=1")
        );
        assert_eq!(coordinator.third_party_iframe(), None);
        assert_interactive(&page, native);
    }

    #[test]
    fn toggle_without_association_stays_native() {
        let (page, nodes, coordinator) = mounted(Theme::Light);
        coordinator.apply(None, true).expect("apply should succeed");

        coordinator
            .set_preferred(PreferredChat::ThirdParty)
            .expect("toggle should succeed");

        assert_eq!(coordinator.preferred(), PreferredChat::Native);
        assert_interactive(&page, nodes.native_iframe);
    }

    #[test]
    fn theme_change_reassigns_source_once() {
        let (page, _, coordinator) = mounted(Theme::Light);
        coordinator
            .apply(Some(&associated(PreferredChat::ThirdParty)), true)
            .expect("apply should succeed");
        let third_party = coordinator.third_party_iframe().expect("third-party iframe");
        page.clear_events();

        coordinator.set_theme(Theme::Dark).expect("theme should apply");
        coordinator.set_theme(Theme::Dark).expect("theme should apply");

        assert_eq!(
            page.events(),
            vec![HostEvent::AttributeSet {
                node: third_party,
                name: "src".to_owned(),
                value: "https://www.twitch.tv/embed/foostream/chat?parent=www.youtube.com&darkpopout"
                    .to_owned(),
            }]
        );
    }

    #[test]
    fn destroy_restores_page() {
        let (page, nodes, coordinator) = mounted(Theme::Light);
        coordinator
            .apply(Some(&associated(PreferredChat::ThirdParty)), true)
            .expect("apply should succeed");
        let third_party = coordinator.third_party_iframe().expect("third-party iframe");

        coordinator.destroy();

        assert!(!page.is_connected(third_party));
        assert_eq!(page.attribute(nodes.native_iframe, "aria-hidden"), None);
        assert_eq!(page.style(nodes.native_iframe, "opacity"), None);
        assert_eq!(page.style(nodes.chat_container, "position"), None);
        coordinator
            .apply(Some(&associated(PreferredChat::ThirdParty)), true)
            .expect("apply after destroy is a no-op");
        assert_eq!(coordinator.third_party_iframe(), None);
    }

    #[test]
    fn missing_container_fails_mount() {
        let (page, nodes) = MockHostPage::watch_page("foo");
        page.detach(nodes.chat_container);

        let result = EmbedCoordinator::mount(
            page,
            Arc::new(Config::default()),
            ChannelId::new("foo").expect("channel id"),
            Theme::Light,
        );

        assert!(matches!(result, Err(EmbedError::ContainerMissing(_))));
    }
}
