use std::sync::{Arc, Mutex, MutexGuard};

use chatswap_core::{
    ChannelId, ChannelPreference, ChannelPreferencePatch, PreferredChat, SettingsChange,
};
use tracing::{debug, warn};

use crate::config::Config;
use crate::host::{DomEvent, DomEventKind, ElementSpec, HostError, HostPage, ListenerId, NodeId};
use crate::signal::{Signal, SubscriptionId};
use crate::store::PreferenceStore;

#[derive(Debug, thiserror::Error)]
pub enum ToggleError {
    #[error("player controls {0:?} not found")]
    ControlsMissing(String),
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Local broadcast of a toggle click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleFlip {
    pub channel: ChannelId,
    pub chat: PreferredChat,
    /// The user asked for third-party chat but no channel name is known yet.
    pub needs_association: bool,
}

struct ToggleState {
    current: PreferredChat,
    associated: bool,
    node: Option<NodeId>,
    button: Option<NodeId>,
    listener: Option<ListenerId>,
    store_subscription: Option<SubscriptionId>,
    destroyed: bool,
}

pub struct ToggleControl {
    host: Arc<dyn HostPage>,
    store: Arc<PreferenceStore>,
    channel: ChannelId,
    state: Mutex<ToggleState>,
    flips: Signal<ToggleFlip>,
}

impl ToggleControl {
    /// Injects the control into the player controls, replacing any control
    /// left behind by an earlier injection.
    pub fn inject(
        host: Arc<dyn HostPage>,
        store: Arc<PreferenceStore>,
        config: &Config,
        channel: ChannelId,
    ) -> Result<Arc<Self>, ToggleError> {
        let controls_selector = &config.selectors.player_controls;
        let controls = host
            .query_selector(controls_selector)
            .ok_or_else(|| ToggleError::ControlsMissing(controls_selector.clone()))?;

        let stale_selector = format!(".{}", config.selectors.toggle_class);
        while let Some(stale) = host.query_selector(&stale_selector) {
            debug!("removing stale chat toggle");
            host.remove_node(stale)?;
        }

        let node = host.create_element(
            controls,
            &ElementSpec::new("div").with_class(config.selectors.toggle_class.clone()),
        )?;
        let button = host.create_element(
            node,
            &ElementSpec::new("button")
                .with_class("ytp-button")
                .with_attribute("type", "button"),
        )?;

        let toggle = Arc::new(Self {
            host: Arc::clone(&host),
            store: Arc::clone(&store),
            channel: channel.clone(),
            state: Mutex::new(ToggleState {
                current: PreferredChat::Native,
                associated: false,
                node: Some(node),
                button: Some(button),
                listener: None,
                store_subscription: None,
                destroyed: false,
            }),
            flips: Signal::new(),
        });

        let weak = Arc::downgrade(&toggle);
        let listener = host.add_listener(
            button,
            DomEventKind::Click,
            Arc::new(move |_: &DomEvent| {
                if let Some(toggle) = weak.upgrade() {
                    toggle.on_click();
                }
            }),
        )?;

        let weak = Arc::downgrade(&toggle);
        let subscription = store.subscribe(move |change| {
            let SettingsChange::ChannelChanged {
                channel_id,
                preference,
            } = change
            else {
                return;
            };
            if let Some(toggle) = weak.upgrade() {
                if *channel_id == toggle.channel {
                    toggle.set_state(preference.as_ref());
                }
            }
        });

        {
            let mut state = toggle.lock();
            state.listener = Some(listener);
            state.store_subscription = Some(subscription);
        }
        toggle.render();
        Ok(toggle)
    }

    pub fn current(&self) -> PreferredChat {
        self.lock().current
    }

    pub fn node(&self) -> Option<NodeId> {
        self.lock().node
    }

    pub fn button(&self) -> Option<NodeId> {
        self.lock().button
    }

    pub fn on_flip(&self, listener: impl Fn(&ToggleFlip) + Send + Sync + 'static) -> SubscriptionId {
        self.flips.subscribe(listener)
    }

    pub fn off_flip(&self, id: SubscriptionId) -> bool {
        self.flips.unsubscribe(id)
    }

    /// Mirrors a stored preference without broadcasting.
    pub fn set_state(&self, preference: Option<&ChannelPreference>) {
        {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.current = preference
                .map(ChannelPreference::effective_chat)
                .unwrap_or_default();
            state.associated = preference.is_some_and(ChannelPreference::has_association);
        }
        self.render();
    }

    pub fn destroy(&self) {
        let (listener, subscription, node) = {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.button = None;
            (
                state.listener.take(),
                state.store_subscription.take(),
                state.node.take(),
            )
        };
        if let Some(id) = listener {
            self.host.remove_listener(id);
        }
        if let Some(id) = subscription {
            self.store.unsubscribe(id);
        }
        if let Some(node) = node.filter(|node| self.host.is_connected(*node)) {
            if let Err(error) = self.host.remove_node(node) {
                debug!(error = %error, "toggle node already removed");
            }
        }
    }

    fn on_click(&self) {
        let flip = {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            let next = state.current.flipped();
            let needs_association = next == PreferredChat::ThirdParty && !state.associated;
            if !needs_association {
                state.current = next;
            }
            ToggleFlip {
                channel: self.channel.clone(),
                chat: next,
                needs_association,
            }
        };

        self.render();
        self.flips.emit(&flip);
        if flip.needs_association {
            return;
        }

        let store = Arc::clone(&self.store);
        let channel = flip.channel;
        let chat = flip.chat;
        tokio::spawn(async move {
            if !store
                .update_channel_preference(&channel, ChannelPreferencePatch::prefer(chat))
                .await
            {
                warn!(channel = %channel, %chat, "toggle choice could not be saved");
            }
        });
    }

    fn render(&self) {
        let (button, current) = {
            let state = self.lock();
            (state.button, state.current)
        };
        let Some(button) = button else {
            return;
        };
        let (pressed, label_key) = match current {
            PreferredChat::ThirdParty => ("true", "toggleShowingThirdParty"),
            PreferredChat::Native => ("false", "toggleShowingNative"),
        };
        let label = self.host.message(label_key);
        let result = self
            .host
            .set_attribute(button, "aria-pressed", pressed)
            .and_then(|()| self.host.set_attribute(button, "title", &label))
            .and_then(|()| self.host.set_text(button, &label));
        if let Err(error) = result {
            debug!(error = %error, "toggle button detached");
        }
    }

    fn lock(&self) -> MutexGuard<'_, ToggleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ToggleControl {
    fn drop(&mut self) {
        self.destroy();
    }
}
