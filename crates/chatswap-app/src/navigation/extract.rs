use std::fmt::{Display, Formatter, Result as FmtResult};

use chatswap_core::ChannelId;

use crate::host::HostPage;

/// Owner links whose href carries an `@handle` path segment, most specific
/// first.
const HANDLE_LINK_SELECTORS: &[&str] = &[
    "#owner a[href*=\"/@\"]",
    "#owner-name a[href*=\"/@\"]",
    ".ytd-channel-name a[href*=\"/@\"]",
    ".ytd-video-owner-renderer a[href*=\"/@\"]",
    "ytd-channel-name a[href*=\"/@\"]",
    "#upload-info ytd-channel-name a",
];

const TEXT_SELECTORS: &[&str] = &[
    "#owner a",
    "#owner-name a",
    ".ytd-channel-name a",
    "ytd-channel-name a",
];

const METADATA_SELECTORS: &[&str] = &[
    "[itemprop=\"author\"] [itemprop=\"name\"]",
    ".ytd-video-primary-info-renderer .ytd-channel-name",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    HandleLink,
    Text,
    Metadata,
}

impl Display for ExtractionSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::HandleLink => f.write_str("handle-link"),
            Self::Text => f.write_str("text"),
            Self::Metadata => f.write_str("metadata"),
        }
    }
}

/// One pass over every strategy. `None` means the page has not rendered an
/// owner element yet.
pub fn extract_channel(host: &dyn HostPage) -> Option<(ChannelId, ExtractionSource)> {
    for selector in HANDLE_LINK_SELECTORS {
        let found = host
            .query_selector(selector)
            .and_then(|node| host.attribute(node, "href"))
            .and_then(|href| ChannelId::from_handle_href(&href));
        if let Some(channel) = found {
            return Some((channel, ExtractionSource::HandleLink));
        }
    }

    for selector in TEXT_SELECTORS {
        let found = host
            .query_selector(selector)
            .and_then(|node| host.text_content(node))
            .and_then(|text| ChannelId::from_display_text(&text));
        if let Some(channel) = found {
            return Some((channel, ExtractionSource::Text));
        }
    }

    for selector in METADATA_SELECTORS {
        let found = host.query_selector(selector).and_then(|node| {
            host.attribute(node, "content")
                .or_else(|| host.text_content(node))
                .and_then(|text| ChannelId::from_display_text(&text))
        });
        if let Some(channel) = found {
            return Some((channel, ExtractionSource::Metadata));
        }
    }

    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::host::{ElementSpec, MockHostPage};

    #[test]
    fn handle_link_wins_over_text() {
        let (page, nodes) = MockHostPage::watch_page("Foo%20Bar");
        let label = page.add_node(Some(nodes.body), ElementSpec::new("a").with_text("Other"));
        page.register_selector("#owner a", label);

        let (channel, source) = extract_channel(&*page).expect("channel should extract");

        assert_eq!(channel.as_str(), "Foo Bar");
        assert_eq!(source, ExtractionSource::HandleLink);
    }

    #[test]
    fn falls_back_to_cleaned_text() {
        let page = MockHostPage::new("https://www.youtube.com/watch?v=1");
        let label = page.add_node(None, ElementSpec::new("a").with_text("  Some Channel!  "));
        page.register_selector("ytd-channel-name a", label);

        let (channel, source) = extract_channel(&page).expect("channel should extract");

        assert_eq!(channel.as_str(), "SomeChannel");
        assert_eq!(source, ExtractionSource::Text);
    }

    #[test]
    fn falls_back_to_author_metadata() {
        let page = MockHostPage::new("https://www.youtube.com/watch?v=1");
        let meta = page.add_node(
            None,
            ElementSpec::new("link").with_attribute("content", "meta_name"),
        );
        page.register_selector("[itemprop=\"author\"] [itemprop=\"name\"]", meta);

        let (channel, source) = extract_channel(&page).expect("channel should extract");

        assert_eq!(channel.as_str(), "meta_name");
        assert_eq!(source, ExtractionSource::Metadata);
    }

    #[test]
    fn empty_page_yields_nothing() {
        let page = MockHostPage::new("https://www.youtube.com/watch?v=1");

        assert_eq!(extract_channel(&page), None);
    }
}
