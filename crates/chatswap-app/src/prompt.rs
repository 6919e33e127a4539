use std::sync::{Arc, Mutex, MutexGuard};

use chatswap_core::{validate_twitch_channel, ChannelId, ChannelNameError, ChannelPreferencePatch};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, warn};

use crate::host::{DomEvent, DomEventKind, ElementSpec, HostError, HostPage, ListenerId, NodeId};
use crate::store::PreferenceStore;

pub const OVERLAY_CLASS: &str = "yt-twitch-chat-prompt-overlay";
pub const INPUT_CLASS: &str = "yt-twitch-chat-prompt-input";
pub const ERROR_CLASS: &str = "yt-twitch-chat-prompt-error";
pub const SAVE_CLASS: &str = "yt-twitch-chat-prompt-save";
pub const KEEP_NATIVE_CLASS: &str = "yt-twitch-chat-prompt-keep";
pub const CANCEL_CLASS: &str = "yt-twitch-chat-prompt-cancel";
pub const AUTODETECT_CLASS: &str = "yt-twitch-chat-prompt-autodetect";

/// Container styles the overlay changes and teardown puts back.
const CONTAINER_STYLES: &[&str] = &["position", "min-height"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSelection {
    Associate(String),
    KeepNative,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UiAction {
    Save,
    KeepNative,
    Cancel,
    Autodetect,
    InputChanged,
    Dismiss,
}

/// One-time "which chat for this channel?" overlay.
pub struct AssociationPrompt {
    host: Arc<dyn HostPage>,
    store: Arc<PreferenceStore>,
    dismiss: Mutex<Option<UnboundedSender<UiAction>>>,
}

impl AssociationPrompt {
    pub fn new(host: Arc<dyn HostPage>, store: Arc<PreferenceStore>) -> Self {
        Self {
            host,
            store,
            dismiss: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock_dismiss().is_some()
    }

    /// Shows the overlay over `container` and resolves once the user picks.
    /// "Keep native" and a valid channel name are written through the store;
    /// cancelling writes nothing.
    pub async fn show_prompt(&self, channel: &ChannelId, container: NodeId) -> PromptSelection {
        self.destroy();
        let (sender, mut actions) = unbounded_channel();
        let ui = match PromptUi::build(Arc::clone(&self.host), container, &sender) {
            Ok(ui) => ui,
            Err(error) => {
                warn!(channel = %channel, error = %error, "failed to show association prompt");
                return PromptSelection::Cancelled;
            }
        };
        *self.lock_dismiss() = Some(sender);
        debug!(channel = %channel, "association prompt shown");

        let selection = loop {
            let Some(action) = actions.recv().await else {
                break PromptSelection::Cancelled;
            };
            match action {
                UiAction::Save => {
                    let raw = self.host.input_value(ui.input).unwrap_or_default();
                    match validate_twitch_channel(&raw) {
                        Ok(name) => {
                            let patch = ChannelPreferencePatch::associate(name.clone());
                            if !self.store.update_channel_preference(channel, patch).await {
                                warn!(channel = %channel, "association could not be saved");
                            }
                            break PromptSelection::Associate(name);
                        }
                        Err(error) => {
                            debug!(channel = %channel, error = %error, "rejected channel name");
                            ui.show_error(&self.host.message(error_key(&error)));
                        }
                    }
                }
                UiAction::KeepNative => {
                    let patch = ChannelPreferencePatch::keep_native();
                    if !self.store.update_channel_preference(channel, patch).await {
                        warn!(channel = %channel, "keep-native choice could not be saved");
                    }
                    break PromptSelection::KeepNative;
                }
                UiAction::Cancel | UiAction::Dismiss => break PromptSelection::Cancelled,
                UiAction::Autodetect => {
                    if let Err(error) = self.host.set_input_value(ui.input, channel.as_str()) {
                        debug!(error = %error, "prompt input detached");
                    }
                    ui.sync_save_state();
                }
                UiAction::InputChanged => {
                    ui.show_error("");
                    ui.sync_save_state();
                }
            }
        };

        *self.lock_dismiss() = None;
        drop(ui);
        debug!(channel = %channel, ?selection, "association prompt closed");
        selection
    }

    /// Closes an open prompt; its `show_prompt` resolves to `Cancelled`.
    pub fn destroy(&self) {
        if let Some(sender) = self.lock_dismiss().take() {
            let _ = sender.send(UiAction::Dismiss);
        }
    }

    fn lock_dismiss(&self) -> MutexGuard<'_, Option<UnboundedSender<UiAction>>> {
        self.dismiss
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn error_key(error: &ChannelNameError) -> &'static str {
    match error {
        ChannelNameError::Empty => "promptErrorEmpty",
        ChannelNameError::TooLong => "promptErrorTooLong",
        ChannelNameError::InvalidCharacters => "promptErrorInvalid",
    }
}

/// Overlay nodes and listeners. Dropping it removes everything and restores
/// the container, so every exit path tears down.
struct PromptUi {
    host: Arc<dyn HostPage>,
    container: NodeId,
    overlay: NodeId,
    input: NodeId,
    error: NodeId,
    save: NodeId,
    listeners: Vec<ListenerId>,
    saved_styles: Vec<(&'static str, Option<String>)>,
}

impl PromptUi {
    fn build(
        host: Arc<dyn HostPage>,
        container: NodeId,
        sender: &UnboundedSender<UiAction>,
    ) -> Result<Self, HostError> {
        let saved_styles: Vec<_> = CONTAINER_STYLES
            .iter()
            .map(|property| (*property, host.style(container, property)))
            .collect();
        let overlay = host
            .set_style(container, "position", Some("relative"))
            .and_then(|()| host.set_style(container, "min-height", Some("300px")))
            .and_then(|()| {
                host.create_element(container, &ElementSpec::new("div").with_class(OVERLAY_CLASS))
            });
        let overlay = match overlay {
            Ok(overlay) => overlay,
            Err(error) => {
                restore_styles(&*host, container, &saved_styles);
                return Err(error);
            }
        };
        let mut ui = Self {
            host: Arc::clone(&host),
            container,
            overlay,
            input: overlay,
            error: overlay,
            save: overlay,
            listeners: Vec::new(),
            saved_styles,
        };
        for (property, value) in [
            ("position", "absolute"),
            ("inset", "0"),
            ("z-index", "1000"),
            ("display", "flex"),
        ] {
            host.set_style(overlay, property, Some(value))?;
        }

        let dialog = host.create_element(overlay, &ElementSpec::new("div").with_attribute("role", "dialog"))?;
        host.create_element(dialog, &ElementSpec::new("p").with_text(host.message("promptTitle")))?;
        ui.input = host.create_element(
            dialog,
            &ElementSpec::new("input")
                .with_class(INPUT_CLASS)
                .with_attribute("type", "text")
                .with_attribute("maxlength", "25")
                .with_attribute("placeholder", host.message("promptPlaceholder")),
        )?;
        ui.error = host.create_element(
            dialog,
            &ElementSpec::new("div")
                .with_class(ERROR_CLASS)
                .with_attribute("role", "alert")
                .with_text(""),
        )?;
        ui.save = ui.button(dialog, SAVE_CLASS, "promptSave")?;
        let keep = ui.button(dialog, KEEP_NATIVE_CLASS, "promptKeepNative")?;
        let cancel = ui.button(dialog, CANCEL_CLASS, "promptCancel")?;
        let autodetect = ui.button(dialog, AUTODETECT_CLASS, "promptAutodetect")?;

        for (node, action) in [
            (ui.save, UiAction::Save),
            (keep, UiAction::KeepNative),
            (cancel, UiAction::Cancel),
            (autodetect, UiAction::Autodetect),
        ] {
            ui.on(node, DomEventKind::Click, sender, move |_| Some(action))?;
        }
        ui.on(overlay, DomEventKind::Click, sender, move |event| {
            (event.target == overlay).then_some(UiAction::Cancel)
        })?;
        ui.on(ui.input, DomEventKind::KeyDown, sender, |event| {
            match event.key.as_deref() {
                Some("Enter") => Some(UiAction::Save),
                Some("Escape") => Some(UiAction::Cancel),
                _ => None,
            }
        })?;
        ui.on(ui.input, DomEventKind::Input, sender, |_| {
            Some(UiAction::InputChanged)
        })?;

        ui.sync_save_state();
        Ok(ui)
    }

    fn button(&self, parent: NodeId, class: &str, label_key: &str) -> Result<NodeId, HostError> {
        self.host.create_element(
            parent,
            &ElementSpec::new("button")
                .with_class(class)
                .with_attribute("type", "button")
                .with_text(self.host.message(label_key)),
        )
    }

    fn on(
        &mut self,
        node: NodeId,
        kind: DomEventKind,
        sender: &UnboundedSender<UiAction>,
        map: impl Fn(&DomEvent) -> Option<UiAction> + Send + Sync + 'static,
    ) -> Result<(), HostError> {
        let sender = sender.clone();
        let id = self.host.add_listener(
            node,
            kind,
            Arc::new(move |event: &DomEvent| {
                if let Some(action) = map(event) {
                    let _ = sender.send(action);
                }
            }),
        )?;
        self.listeners.push(id);
        Ok(())
    }

    fn show_error(&self, text: &str) {
        if let Err(error) = self.host.set_text(self.error, text) {
            debug!(error = %error, "prompt error label detached");
        }
    }

    fn sync_save_state(&self) {
        let empty = self
            .host
            .input_value(self.input)
            .map(|value| value.trim().is_empty())
            .unwrap_or(true);
        let result = if empty {
            self.host.set_attribute(self.save, "disabled", "true")
        } else {
            self.host.remove_attribute(self.save, "disabled")
        };
        if let Err(error) = result {
            debug!(error = %error, "prompt save button detached");
        }
    }
}

impl Drop for PromptUi {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.host.remove_listener(id);
        }
        if self.host.is_connected(self.overlay) {
            if let Err(error) = self.host.remove_node(self.overlay) {
                debug!(error = %error, "prompt overlay already removed");
            }
        }
        restore_styles(&*self.host, self.container, &self.saved_styles);
    }
}

fn restore_styles(host: &dyn HostPage, container: NodeId, saved: &[(&'static str, Option<String>)]) {
    for (property, value) in saved {
        if let Err(error) = host.set_style(container, property, value.as_deref()) {
            debug!(error = %error, "chat container gone before prompt teardown");
            break;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chatswap_core::PreferredChat;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::clock::ManualClock;
    use crate::host::{MockHostPage, WatchPage};
    use crate::storage::{AreaName, MemoryStorageArea};

    struct Harness {
        page: Arc<MockHostPage>,
        nodes: WatchPage,
        store: Arc<PreferenceStore>,
        prompt: Arc<AssociationPrompt>,
    }

    impl Harness {
        fn new() -> Self {
            let (page, nodes) = MockHostPage::watch_page("FooChannel");
            page.set_style(nodes.chat_container, "position", Some("sticky"))
                .expect("style should apply");
            let store = PreferenceStore::new(
                Arc::new(MemoryStorageArea::new(AreaName::Local)),
                Arc::new(MemoryStorageArea::new(AreaName::Sync)),
                Arc::new(ManualClock::new(10)),
            );
            let prompt = Arc::new(AssociationPrompt::new(page.clone(), Arc::clone(&store)));
            Self {
                page,
                nodes,
                store,
                prompt,
            }
        }

        async fn open(&self) -> JoinHandle<PromptSelection> {
            let prompt = Arc::clone(&self.prompt);
            let container = self.nodes.chat_container;
            let handle = tokio::spawn(async move {
                prompt.show_prompt(&channel(), container).await
            });
            pump().await;
            handle
        }

        fn node(&self, class: &str) -> NodeId {
            self.page
                .find_by_class(class)
                .first()
                .copied()
                .expect("prompt node should exist")
        }

        fn assert_torn_down(&self) {
            assert!(self.page.find_by_class(OVERLAY_CLASS).is_empty());
            assert_eq!(
                self.page.style(self.nodes.chat_container, "position").as_deref(),
                Some("sticky")
            );
            assert_eq!(self.page.style(self.nodes.chat_container, "min-height"), None);
        }
    }

    fn channel() -> ChannelId {
        ChannelId::new("FooChannel").expect("channel id")
    }

    async fn pump() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn saving_a_name_stores_the_association() {
        let harness = Harness::new();
        let task = harness.open().await;
        assert_eq!(
            harness.page.attribute(harness.node(SAVE_CLASS), "disabled").as_deref(),
            Some("true")
        );

        harness.page.type_text(harness.node(INPUT_CLASS), " FooStream ");
        pump().await;
        assert_eq!(harness.page.attribute(harness.node(SAVE_CLASS), "disabled"), None);
        harness.page.click(harness.node(SAVE_CLASS));

        let selection = task.await.expect("prompt task");
        assert_eq!(selection, PromptSelection::Associate("foostream".to_owned()));
        let stored = harness
            .store
            .get_channel_preference(&channel())
            .await
            .expect("preference stored");
        assert_eq!(stored.twitch_channel_id, "foostream");
        assert_eq!(stored.preferred_chat, PreferredChat::ThirdParty);
        harness.assert_torn_down();
    }

    #[tokio::test]
    async fn failed_overlay_creation_restores_the_container() {
        let harness = Harness::new();
        harness.page.fail_next_creates(1);

        let selection = harness
            .prompt
            .show_prompt(&channel(), harness.nodes.chat_container)
            .await;

        assert_eq!(selection, PromptSelection::Cancelled);
        assert!(!harness.prompt.is_open());
        harness.assert_torn_down();
    }

    #[tokio::test]
    async fn invalid_name_shows_inline_error_and_keeps_prompt_open() {
        let harness = Harness::new();
        harness.page.set_message("promptErrorInvalid", "Letters, numbers and _ only");
        let task = harness.open().await;

        harness.page.type_text(harness.node(INPUT_CLASS), "bad name!");
        harness.page.click(harness.node(SAVE_CLASS));
        pump().await;

        assert_eq!(
            harness.page.text_content(harness.node(ERROR_CLASS)).as_deref(),
            Some("Letters, numbers and _ only")
        );
        assert!(!task.is_finished());

        harness.page.key_down(harness.node(INPUT_CLASS), "Escape");
        assert_eq!(task.await.expect("prompt task"), PromptSelection::Cancelled);
        assert_eq!(harness.store.get_channel_preference(&channel()).await, None);
        harness.assert_torn_down();
    }

    #[tokio::test]
    async fn keep_native_writes_empty_association() {
        let harness = Harness::new();
        let task = harness.open().await;

        harness.page.click(harness.node(KEEP_NATIVE_CLASS));

        assert_eq!(task.await.expect("prompt task"), PromptSelection::KeepNative);
        let stored = harness
            .store
            .get_channel_preference(&channel())
            .await
            .expect("preference stored");
        assert_eq!(stored.twitch_channel_id, "");
        assert_eq!(stored.preferred_chat, PreferredChat::Native);
        harness.assert_torn_down();
    }

    #[tokio::test]
    async fn backdrop_click_cancels_but_dialog_click_does_not() {
        let harness = Harness::new();
        let task = harness.open().await;

        harness.page.click(harness.node(ERROR_CLASS));
        pump().await;
        assert!(!task.is_finished());

        harness.page.click(harness.node(OVERLAY_CLASS));

        assert_eq!(task.await.expect("prompt task"), PromptSelection::Cancelled);
        harness.assert_torn_down();
        assert_eq!(harness.page.listener_count(), 0);
    }

    #[tokio::test]
    async fn autodetect_then_enter_saves_detected_channel() {
        let harness = Harness::new();
        let task = harness.open().await;

        harness.page.click(harness.node(AUTODETECT_CLASS));
        pump().await;
        assert_eq!(
            harness.page.input_value(harness.node(INPUT_CLASS)).as_deref(),
            Some("FooChannel")
        );
        harness.page.key_down(harness.node(INPUT_CLASS), "Enter");

        assert_eq!(
            task.await.expect("prompt task"),
            PromptSelection::Associate("foochannel".to_owned())
        );
    }

    #[tokio::test]
    async fn destroy_resolves_as_cancelled() {
        let harness = Harness::new();
        let task = harness.open().await;
        assert!(harness.prompt.is_open());

        harness.prompt.destroy();

        assert_eq!(task.await.expect("prompt task"), PromptSelection::Cancelled);
        assert!(!harness.prompt.is_open());
        harness.assert_torn_down();
    }
}
