use std::collections::BTreeMap;
use std::sync::Arc;

use chatswap_core::{ChannelId, Request, Response, ResponseData, TabId, Theme, WireMessage};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::signal::{Signal, SubscriptionId};
use crate::storage::{StorageArea, StorageError};
use crate::store::PreferenceStore;

/// Session-area key holding the tab id → channel map.
pub const CURRENT_CHANNELS_KEY: &str = "currentChannels";

/// Where a message came from. Content pages carry a tab; popup-style
/// surfaces do not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sender {
    pub tab_id: Option<TabId>,
    pub url: Option<String>,
}

impl Sender {
    pub fn tab(tab_id: TabId) -> Self {
        Self {
            tab_id: Some(tab_id),
            url: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ChannelMapError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("current channel map is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

type ChannelMap = BTreeMap<String, ChannelId>;

/// Background-context dispatcher. Every request gets exactly one response.
pub struct MessageRouter {
    store: Arc<PreferenceStore>,
    session: Arc<dyn StorageArea>,
    channels_gate: AsyncMutex<()>,
    theme_relay: Signal<Theme>,
}

impl MessageRouter {
    pub fn new(store: Arc<PreferenceStore>, session: Arc<dyn StorageArea>) -> Self {
        Self {
            store,
            session,
            channels_gate: AsyncMutex::new(()),
            theme_relay: Signal::new(),
        }
    }

    pub fn on_theme_changed(&self, listener: impl Fn(&Theme) + Send + Sync + 'static) -> SubscriptionId {
        self.theme_relay.subscribe(listener)
    }

    pub fn off_theme_changed(&self, id: SubscriptionId) -> bool {
        self.theme_relay.unsubscribe(id)
    }

    /// Untyped entry point: anything that does not decode as a known request
    /// is answered with `{ "success": false }`.
    pub async fn handle_json(&self, message: Value, sender: &Sender) -> Value {
        let response = match serde_json::from_value::<WireMessage>(message) {
            Ok(wire) => self.handle_wire(wire, sender).await,
            Err(error) => {
                warn!(error = %error, "dropping undecodable message");
                Response::failure()
            }
        };
        serde_json::to_value(&response).unwrap_or_else(|error| {
            warn!(error = %error, "failed to encode response");
            serde_json::json!({ "success": false })
        })
    }

    pub async fn handle_wire(&self, wire: WireMessage, sender: &Sender) -> Response {
        match Request::from_wire(wire) {
            Ok(request) => self.dispatch(request, sender).await,
            Err(error) => {
                warn!(error = %error, "rejecting message");
                Response::failure()
            }
        }
    }

    pub async fn dispatch(&self, request: Request, sender: &Sender) -> Response {
        debug!(action = %request.action(), tab = ?sender.tab_id, "dispatching message");
        match request {
            Request::GetSettings => match self.store.get_settings().await {
                Some(settings) => Response::ok_with(ResponseData::Settings(settings)),
                None => Response::failure(),
            },
            Request::UpdateSettings(patch) => {
                Response::from_success(self.store.update_settings(patch).await)
            }
            Request::GetChannelPreference { channel_id } => {
                match self.store.get_channel_preference(&channel_id).await {
                    Some(preference) => {
                        Response::ok_with(ResponseData::ChannelPreference(preference))
                    }
                    None => Response::ok(),
                }
            }
            Request::UpdateChannelPreference { channel_id, data } => Response::from_success(
                self.store
                    .update_channel_preference(&channel_id, data)
                    .await,
            ),
            Request::ThemeChanged { theme } => {
                self.theme_relay.emit(&theme);
                Response::ok()
            }
            Request::SetCurrentChannel { channel_name } => {
                let Some(tab_id) = sender.tab_id else {
                    warn!(channel = %channel_name, "current channel reported without a tab");
                    return Response::failure();
                };
                match self.record_channel(tab_id, channel_name).await {
                    Ok(()) => Response::ok(),
                    Err(error) => {
                        warn!(tab = %tab_id, error = %error, "failed to record current channel");
                        Response::failure()
                    }
                }
            }
            Request::GetCurrentChannel { tab_id } => match self.read_channels().await {
                Ok(mut channels) => match channels.remove(&tab_key(tab_id)) {
                    Some(channel) => Response::ok_with(ResponseData::CurrentChannel(channel)),
                    None => Response::ok(),
                },
                Err(error) => {
                    warn!(tab = %tab_id, error = %error, "failed to read current channel");
                    Response::failure()
                }
            },
        }
    }

    /// Forgets the channel of a closed tab.
    pub async fn tab_removed(&self, tab_id: TabId) {
        let _gate = self.channels_gate.lock().await;
        let result = async {
            let mut channels = self.read_channels().await?;
            if channels.remove(&tab_key(tab_id)).is_some() {
                self.write_channels(&channels).await?;
            }
            Ok::<(), ChannelMapError>(())
        }
        .await;
        if let Err(error) = result {
            warn!(tab = %tab_id, error = %error, "failed to forget closed tab");
        }
    }

    async fn record_channel(&self, tab_id: TabId, channel: ChannelId) -> Result<(), ChannelMapError> {
        let _gate = self.channels_gate.lock().await;
        let mut channels = self.read_channels().await?;
        channels.insert(tab_key(tab_id), channel);
        self.write_channels(&channels).await
    }

    async fn read_channels(&self) -> Result<ChannelMap, ChannelMapError> {
        match self.session.get(CURRENT_CHANNELS_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(ChannelMap::new()),
        }
    }

    async fn write_channels(&self, channels: &ChannelMap) -> Result<(), ChannelMapError> {
        if channels.is_empty() {
            self.session.remove(CURRENT_CHANNELS_KEY).await?;
        } else {
            self.session
                .set(CURRENT_CHANNELS_KEY, serde_json::to_value(channels)?)
                .await?;
        }
        Ok(())
    }
}

fn tab_key(tab_id: TabId) -> String {
    tab_id.0.to_string()
}
