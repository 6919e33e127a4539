use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chatswap_core::{ChannelId, ChannelPreference, PreferredChat, SettingsChange};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embed::EmbedCoordinator;
use crate::host::HostPage;
use crate::prompt::{AssociationPrompt, PromptSelection};
use crate::signal::SubscriptionId;
use crate::store::PreferenceStore;
use crate::theme::ThemeResolver;
use crate::toggle::{ToggleControl, ToggleFlip};

/// Page-wide services every session shares.
#[derive(Clone)]
pub struct SessionContext {
    pub host: Arc<dyn HostPage>,
    pub config: Arc<Config>,
    pub store: Arc<PreferenceStore>,
    pub theme: Arc<ThemeResolver>,
}

#[derive(Default)]
struct SessionParts {
    embed: Option<Arc<EmbedCoordinator>>,
    toggle: Option<Arc<ToggleControl>>,
    keep_loaded: bool,
    store_subscription: Option<SubscriptionId>,
    theme_subscription: Option<SubscriptionId>,
    flip_subscription: Option<SubscriptionId>,
}

/// Everything mounted for one loaded live stream. Continuations that resume
/// after [`ChatSession::close`] find the session dead and touch nothing.
pub struct ChatSession {
    context: SessionContext,
    channel: ChannelId,
    alive: AtomicBool,
    prompt: AssociationPrompt,
    parts: Mutex<SessionParts>,
}

impl ChatSession {
    pub fn open(context: SessionContext, channel: ChannelId) -> Arc<Self> {
        let prompt = AssociationPrompt::new(Arc::clone(&context.host), Arc::clone(&context.store));
        let session = Arc::new(Self {
            context,
            channel,
            alive: AtomicBool::new(true),
            prompt,
            parts: Mutex::new(SessionParts {
                keep_loaded: true,
                ..SessionParts::default()
            }),
        });
        tokio::spawn(Arc::clone(&session).start());
        session
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn embed(&self) -> Option<Arc<EmbedCoordinator>> {
        self.lock().embed.clone()
    }

    pub fn toggle(&self) -> Option<Arc<ToggleControl>> {
        self.lock().toggle.clone()
    }

    pub fn prompt_open(&self) -> bool {
        self.prompt.is_open()
    }

    /// Tears down the prompt, toggle and embed. Idempotent.
    pub fn close(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        self.prompt.destroy();

        let parts = std::mem::take(&mut *self.lock());
        if let Some(id) = parts.store_subscription {
            self.context.store.unsubscribe(id);
        }
        if let Some(id) = parts.theme_subscription {
            self.context.theme.off_theme_change(id);
        }
        if let Some(toggle) = parts.toggle {
            if let Some(id) = parts.flip_subscription {
                toggle.off_flip(id);
            }
            toggle.destroy();
        }
        if let Some(embed) = parts.embed {
            embed.destroy();
        }
        info!(channel = %self.channel, "chat session closed");
    }

    async fn start(self: Arc<Self>) {
        let settings = self.context.store.get_settings().await;
        if !self.is_alive() {
            return;
        }
        let preference = settings
            .as_ref()
            .and_then(|settings| settings.channel(&self.channel))
            .cloned();
        let keep_loaded = settings
            .as_ref()
            .map(|settings| settings.keep_chats_loaded)
            .unwrap_or(true);

        let embed = match EmbedCoordinator::mount(
            Arc::clone(&self.context.host),
            Arc::clone(&self.context.config),
            self.channel.clone(),
            self.context.theme.current_theme(),
        ) {
            Ok(embed) => Arc::new(embed),
            Err(error) => {
                warn!(channel = %self.channel, error = %error, "chat embed unavailable");
                return;
            }
        };
        if let Err(error) = embed.apply(preference.as_ref(), keep_loaded) {
            warn!(channel = %self.channel, error = %error, "failed to render chat");
        }

        let toggle = match ToggleControl::inject(
            Arc::clone(&self.context.host),
            Arc::clone(&self.context.store),
            &self.context.config,
            self.channel.clone(),
        ) {
            Ok(toggle) => {
                toggle.set_state(preference.as_ref());
                Some(toggle)
            }
            Err(error) => {
                debug!(channel = %self.channel, error = %error, "chat toggle not injected");
                None
            }
        };

        {
            let mut parts = self.lock();
            parts.embed = Some(Arc::clone(&embed));
            parts.toggle = toggle.clone();
            parts.keep_loaded = keep_loaded;
        }
        self.wire(toggle.as_deref());
        info!(
            channel = %self.channel,
            decided = preference.is_some(),
            keep_loaded,
            "chat session started"
        );

        if settings.is_some() && preference.is_none() {
            self.run_prompt().await;
        }
    }

    fn wire(self: &Arc<Self>, toggle: Option<&ToggleControl>) {
        let weak = Arc::downgrade(self);
        let store_subscription = self.context.store.subscribe(move |change| {
            if let Some(session) = weak.upgrade() {
                session.on_settings_change(change);
            }
        });

        let weak = Arc::downgrade(self);
        let theme_subscription = self.context.theme.on_theme_change(move |theme| {
            let Some(embed) = live_embed(&weak) else {
                return;
            };
            if let Err(error) = embed.set_theme(*theme) {
                debug!(error = %error, "theme not applied to chat embed");
            }
        });

        let flip_subscription = toggle.map(|toggle| {
            let weak = Arc::downgrade(self);
            toggle.on_flip(move |flip| {
                if let Some(session) = weak.upgrade() {
                    session.on_flip(flip);
                }
            })
        });

        let mut parts = self.lock();
        parts.store_subscription = Some(store_subscription);
        parts.theme_subscription = Some(theme_subscription);
        parts.flip_subscription = flip_subscription;
    }

    fn on_settings_change(&self, change: &SettingsChange) {
        if !self.is_alive() {
            return;
        }
        let result = match change {
            SettingsChange::ChannelChanged {
                channel_id,
                preference,
            } if *channel_id == self.channel => {
                let (embed, keep_loaded) = {
                    let parts = self.lock();
                    (parts.embed.clone(), parts.keep_loaded)
                };
                embed.map(|embed| embed.apply(preference.as_ref(), keep_loaded))
            }
            SettingsChange::KeepChatsLoadedChanged { keep_chats_loaded } => {
                let embed = {
                    let mut parts = self.lock();
                    parts.keep_loaded = *keep_chats_loaded;
                    parts.embed.clone()
                };
                embed.map(|embed| embed.set_keep_loaded(*keep_chats_loaded))
            }
            _ => None,
        };
        if let Some(Err(error)) = result {
            warn!(channel = %self.channel, error = %error, "failed to re-render chat");
        }
    }

    fn on_flip(self: &Arc<Self>, flip: &ToggleFlip) {
        if !self.is_alive() {
            return;
        }
        if flip.needs_association {
            if !self.prompt.is_open() {
                tokio::spawn(Arc::clone(self).run_prompt());
            }
            return;
        }
        if let Some(embed) = self.embed() {
            if let Err(error) = embed.set_preferred(flip.chat) {
                warn!(channel = %self.channel, error = %error, "failed to swap chats");
            }
        }
    }

    async fn run_prompt(self: Arc<Self>) {
        let Some(embed) = self.embed() else {
            return;
        };
        let selection = self.prompt.show_prompt(&self.channel, embed.container()).await;
        if !self.is_alive() {
            return;
        }

        // The store normally re-renders through its change event; this keeps
        // the choice on screen when the write itself failed.
        if let PromptSelection::Associate(name) = selection {
            let mut preference = ChannelPreference::new(0);
            preference.twitch_channel_id = name;
            preference.preferred_chat = PreferredChat::ThirdParty;
            let (keep_loaded, toggle) = {
                let parts = self.lock();
                (parts.keep_loaded, parts.toggle.clone())
            };
            if let Err(error) = embed.apply(Some(&preference), keep_loaded) {
                warn!(channel = %self.channel, error = %error, "failed to show third-party chat");
            }
            if let Some(toggle) = toggle {
                toggle.set_state(Some(&preference));
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionParts> {
        self.parts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn live_embed(session: &Weak<ChatSession>) -> Option<Arc<EmbedCoordinator>> {
    let session = session.upgrade()?;
    if !session.is_alive() {
        return None;
    }
    session.embed()
}
