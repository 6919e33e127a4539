use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use crate::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "node:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomEventKind {
    Click,
    KeyDown,
    Input,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomEvent {
    pub kind: DomEventKind,
    pub target: NodeId,
    pub key: Option<String>,
}

pub type DomListener = Arc<dyn Fn(&DomEvent) + Send + Sync>;

/// What made the page report a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationTrigger {
    InitialLoad,
    PushState,
    ReplaceState,
    PopState,
    DomMutation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementSpec {
    pub tag: String,
    pub id: Option<String>,
    pub class: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("{0} is not attached to the document")]
    NodeNotFound(NodeId),
    #[error("history api unavailable: {0}")]
    HistoryUnavailable(String),
}

/// The host page as seen from the content context: DOM access, event
/// listeners, the history hook and page-level notifications.
pub trait HostPage: Send + Sync {
    fn location_href(&self) -> String;

    fn query_selector(&self, selector: &str) -> Option<NodeId>;

    fn element_by_id(&self, id: &str) -> Option<NodeId>;

    fn is_connected(&self, node: NodeId) -> bool;

    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;

    fn text_content(&self, node: NodeId) -> Option<String>;

    fn create_element(&self, parent: NodeId, spec: &ElementSpec) -> Result<NodeId, HostError>;

    fn remove_node(&self, node: NodeId) -> Result<(), HostError>;

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), HostError>;

    fn remove_attribute(&self, node: NodeId, name: &str) -> Result<(), HostError>;

    /// Inline style property, if set.
    fn style(&self, node: NodeId, property: &str) -> Option<String>;

    /// Sets (`Some`) or clears (`None`) one inline style property.
    fn set_style(&self, node: NodeId, property: &str, value: Option<&str>) -> Result<(), HostError>;

    fn input_value(&self, node: NodeId) -> Option<String>;

    fn set_input_value(&self, node: NodeId, value: &str) -> Result<(), HostError>;

    fn set_text(&self, node: NodeId, text: &str) -> Result<(), HostError>;

    fn add_listener(
        &self,
        node: NodeId,
        kind: DomEventKind,
        listener: DomListener,
    ) -> Result<ListenerId, HostError>;

    fn remove_listener(&self, id: ListenerId) -> bool;

    fn history_patched(&self) -> bool;

    /// Wraps push/replace state so they report through `navigation_events`.
    fn patch_history(&self) -> Result<(), HostError>;

    fn navigation_events(&self) -> &Signal<NavigationTrigger>;

    /// Fires after any subtree mutation of the document body.
    fn mutations(&self) -> &Signal<()>;

    fn prefers_dark_scheme(&self) -> bool;

    /// Fires with the new `prefers-color-scheme: dark` match state.
    fn color_scheme_changes(&self) -> &Signal<bool>;

    /// Localized string for `key`; the key itself when untranslated.
    fn message(&self, key: &str) -> String;
}

#[cfg(test)]
pub use mock::{HostEvent, MockHostPage, WatchPage};


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn clicks_bubble_to_ancestor_listeners() {
        let (page, nodes) = MockHostPage::watch_page("abc");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        page.add_listener(
            nodes.body,
            DomEventKind::Click,
            Arc::new(move |event: &DomEvent| {
                assert_eq!(event.kind, DomEventKind::Click);
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("listener should attach");

        page.click(nodes.owner_link);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removing_a_node_drops_its_subtree_and_listeners() {
        let (page, nodes) = MockHostPage::watch_page("abc");
        page.add_listener(nodes.native_iframe, DomEventKind::Click, Arc::new(|_: &DomEvent| {}))
            .expect("listener should attach");

        page.remove_node(nodes.chat_container)
            .expect("container should be removable");

        assert!(!page.is_connected(nodes.native_iframe));
        assert_eq!(page.listener_count(), 0);
        assert_eq!(page.query_selector("ytd-live-chat-frame#chat"), None);
        assert_eq!(
            page.remove_node(nodes.chat_container),
            Err(HostError::NodeNotFound(nodes.chat_container))
        );
    }

    #[test]
    fn untranslated_message_returns_key() {
        let page = MockHostPage::new("https://www.youtube.com/");
        page.set_message("promptSave", "Save");

        assert_eq!(page.message("promptSave"), "Save");
        assert_eq!(page.message("promptCancel"), "promptCancel");
    }
}
