use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::host::{HostError, HostPage, NavigationTrigger};
use crate::signal::SubscriptionId;

/// The only place that touches the page's history API. Installing twice on
/// the same page patches it once.
pub struct HistoryHook {
    host: Arc<dyn HostPage>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl HistoryHook {
    pub fn install(
        host: Arc<dyn HostPage>,
        on_navigate: impl Fn(NavigationTrigger) + Send + Sync + 'static,
    ) -> Result<Self, HostError> {
        if host.history_patched() {
            debug!("history already patched, reusing existing hook");
        } else {
            host.patch_history()?;
        }

        let id = host
            .navigation_events()
            .subscribe(move |trigger| on_navigate(*trigger));
        Ok(Self {
            host,
            subscription: Mutex::new(Some(id)),
        })
    }

    pub fn uninstall(&self) {
        let id = self
            .subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(id) = id {
            self.host.navigation_events().unsubscribe(id);
        }
    }
}

impl Drop for HistoryHook {
    fn drop(&mut self) {
        self.uninstall();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::host::MockHostPage;

    #[test]
    fn reinstalling_does_not_patch_twice() {
        let page = Arc::new(MockHostPage::new("https://www.youtube.com/"));

        let first = HistoryHook::install(page.clone(), |_| {}).expect("install should succeed");
        let second = HistoryHook::install(page.clone(), |_| {}).expect("install should succeed");

        assert_eq!(page.patch_calls(), 1);
        assert_eq!(page.navigation_events().len(), 2);
        drop(first);
        drop(second);
        assert!(page.navigation_events().is_empty());
    }

    #[test]
    fn push_state_reports_after_install_only() {
        let page = Arc::new(MockHostPage::new("https://www.youtube.com/"));
        let seen = Arc::new(AtomicUsize::new(0));

        page.push_state("https://www.youtube.com/watch?v=1");
        let counter = Arc::clone(&seen);
        let hook = HistoryHook::install(page.clone(), move |trigger| {
            assert_eq!(trigger, NavigationTrigger::PushState);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("install should succeed");
        page.push_state("https://www.youtube.com/watch?v=2");
        hook.uninstall();
        page.push_state("https://www.youtube.com/watch?v=3");

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
