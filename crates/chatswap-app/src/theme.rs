use std::sync::{Arc, Mutex, MutexGuard};

use chatswap_core::{resolve_theme, SettingsChange, Theme, ThemeSetting};
use tracing::debug;

use crate::host::HostPage;
use crate::signal::{Signal, SubscriptionId};
use crate::store::PreferenceStore;

struct ThemeState {
    setting: ThemeSetting,
    setting_observed: bool,
    system_dark: bool,
    effective: Theme,
    destroyed: bool,
}

/// Effective light/dark theme from the stored setting and the OS scheme.
/// Subscribers only hear about changes of the effective value.
pub struct ThemeResolver {
    host: Arc<dyn HostPage>,
    store: Arc<PreferenceStore>,
    state: Mutex<ThemeState>,
    changes: Signal<Theme>,
    scheme_subscription: Mutex<Option<SubscriptionId>>,
    store_subscription: Mutex<Option<SubscriptionId>>,
}

impl ThemeResolver {
    /// Follows the OS scheme and store changes until
    /// [`ThemeResolver::destroy`], starting from the stored setting.
    pub async fn start(host: Arc<dyn HostPage>, store: Arc<PreferenceStore>) -> Arc<Self> {
        let setting = ThemeSetting::default();
        let system_dark = host.prefers_dark_scheme();

        let resolver = Arc::new(Self {
            host: Arc::clone(&host),
            store: Arc::clone(&store),
            state: Mutex::new(ThemeState {
                setting,
                setting_observed: false,
                system_dark,
                effective: resolve_theme(setting, system_dark),
                destroyed: false,
            }),
            changes: Signal::new(),
            scheme_subscription: Mutex::new(None),
            store_subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&resolver);
        let scheme_id = host.color_scheme_changes().subscribe(move |dark| {
            if let Some(resolver) = weak.upgrade() {
                resolver.update(|state| state.system_dark = *dark);
            }
        });
        *lock(&resolver.scheme_subscription) = Some(scheme_id);

        let weak = Arc::downgrade(&resolver);
        let store_id = store.subscribe(move |change| {
            if let SettingsChange::ThemeChanged { theme } = change {
                if let Some(resolver) = weak.upgrade() {
                    resolver.update(|state| {
                        state.setting = *theme;
                        state.setting_observed = true;
                    });
                }
            }
        });
        *lock(&resolver.store_subscription) = Some(store_id);

        // A change seen while reading is newer than the read.
        if let Some(settings) = store.get_settings().await {
            resolver.update(|state| {
                if !state.setting_observed {
                    state.setting = settings.theme;
                }
            });
        }

        resolver
    }

    pub fn current_theme(&self) -> Theme {
        lock(&self.state).effective
    }

    pub fn on_theme_change(&self, listener: impl Fn(&Theme) + Send + Sync + 'static) -> SubscriptionId {
        self.changes.subscribe(listener)
    }

    pub fn off_theme_change(&self, id: SubscriptionId) -> bool {
        self.changes.unsubscribe(id)
    }

    pub fn destroy(&self) {
        lock(&self.state).destroyed = true;
        if let Some(id) = lock(&self.scheme_subscription).take() {
            self.host.color_scheme_changes().unsubscribe(id);
        }
        if let Some(id) = lock(&self.store_subscription).take() {
            self.store.unsubscribe(id);
        }
    }

    fn update(&self, apply: impl FnOnce(&mut ThemeState)) {
        let changed = {
            let mut state = lock(&self.state);
            if state.destroyed {
                return;
            }
            apply(&mut state);
            let effective = resolve_theme(state.setting, state.system_dark);
            if effective == state.effective {
                None
            } else {
                state.effective = effective;
                Some(effective)
            }
        };

        if let Some(theme) = changed {
            debug!(theme = %theme, "effective theme changed");
            self.changes.emit(&theme);
        }
    }
}

impl Drop for ThemeResolver {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
