use std::sync::{Arc, Mutex, MutexGuard};

use chatswap_core::{ChannelId, Request};
use tracing::{debug, info, warn};

use crate::bridge::Messenger;
use crate::config::{Config, ConfigError};
use crate::host::{HostError, HostPage};
use crate::navigation::{NavigationTracker, StreamEvent};
use crate::session::{ChatSession, SessionContext};
use crate::signal::SubscriptionId;
use crate::store::PreferenceStore;
use crate::theme::ThemeResolver;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("host page unavailable: {0}")]
    Host(#[from] HostError),
}

#[derive(Default)]
struct RuntimeState {
    session: Option<Arc<ChatSession>>,
    stream_subscription: Option<SubscriptionId>,
    shut_down: bool,
}

/// Content-page composition root: follows navigation and keeps exactly one
/// chat session per loaded live stream.
pub struct ContentRuntime {
    context: SessionContext,
    tracker: Arc<NavigationTracker>,
    messenger: Arc<dyn Messenger>,
    state: Mutex<RuntimeState>,
}

impl ContentRuntime {
    pub async fn bootstrap(
        host: Arc<dyn HostPage>,
        config: Config,
        store: Arc<PreferenceStore>,
        messenger: Arc<dyn Messenger>,
    ) -> Result<Arc<Self>, RuntimeError> {
        config.validate()?;
        let config = Arc::new(config);
        let theme = ThemeResolver::start(Arc::clone(&host), Arc::clone(&store)).await;
        let tracker = NavigationTracker::new(
            Arc::clone(&host),
            config.timing.clone(),
            config.selectors.live_surface.clone(),
        );

        let runtime = Arc::new(Self {
            context: SessionContext {
                host,
                config,
                store,
                theme,
            },
            tracker: Arc::clone(&tracker),
            messenger,
            state: Mutex::new(RuntimeState::default()),
        });

        let weak = Arc::downgrade(&runtime);
        let subscription = tracker.subscribe(move |event| {
            if let Some(runtime) = weak.upgrade() {
                runtime.on_stream_event(event);
            }
        });
        runtime.lock().stream_subscription = Some(subscription);

        tracker.start()?;
        info!("content runtime started");
        Ok(runtime)
    }

    pub fn tracker(&self) -> &Arc<NavigationTracker> {
        &self.tracker
    }

    pub fn theme(&self) -> &Arc<ThemeResolver> {
        &self.context.theme
    }

    pub fn session(&self) -> Option<Arc<ChatSession>> {
        self.lock().session.clone()
    }

    pub fn shutdown(&self) {
        let (session, subscription) = {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            (state.session.take(), state.stream_subscription.take())
        };
        if let Some(id) = subscription {
            self.tracker.unsubscribe(id);
        }
        self.tracker.stop();
        if let Some(session) = session {
            session.close();
        }
        self.context.theme.destroy();
        info!("content runtime shut down");
    }

    fn on_stream_event(&self, event: &StreamEvent) {
        match event {
            StreamEvent::Loaded(channel) => self.open_session(channel),
            StreamEvent::Unloaded(channel) => {
                let session = {
                    let mut state = self.lock();
                    match &state.session {
                        Some(session) if session.channel() == channel => state.session.take(),
                        _ => None,
                    }
                };
                match session {
                    Some(session) => session.close(),
                    None => debug!(channel = %channel, "unload for a channel without a session"),
                }
            }
        }
    }

    fn open_session(&self, channel: &ChannelId) {
        let previous = {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }
            let session = ChatSession::open(self.context.clone(), channel.clone());
            state.session.replace(session)
        };
        if let Some(previous) = previous {
            warn!(channel = %previous.channel(), "replacing a session that was never unloaded");
            previous.close();
        }

        let messenger = Arc::clone(&self.messenger);
        let channel = channel.clone();
        tokio::spawn(async move {
            let response = messenger
                .send(Request::SetCurrentChannel {
                    channel_name: channel.clone(),
                })
                .await;
            if !response.success {
                debug!(channel = %channel, "background did not record the current channel");
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ContentRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
