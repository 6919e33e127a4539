pub mod extract;
pub mod history;

use std::sync::{Arc, Mutex, MutexGuard};

use chatswap_core::{is_watch_page, ChannelId};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::TimingConfig;
use crate::host::{HostError, HostPage, NavigationTrigger};
use crate::signal::{Signal, SubscriptionId};

use self::extract::extract_channel;
use self::history::HistoryHook;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Detecting,
    Live,
    NotLive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Loaded(ChannelId),
    Unloaded(ChannelId),
}

struct TrackerState {
    epoch: u64,
    phase: Phase,
    active: Option<ChannelId>,
    previous: Option<ChannelId>,
    last_href: String,
    stopped: bool,
}

/// Turns page navigations into paired `Loaded`/`Unloaded` events.
///
/// Every trigger bumps the epoch and spawns a detection cycle; a cycle that
/// finds its epoch superseded at any suspension point returns without
/// touching anything.
pub struct NavigationTracker {
    host: Arc<dyn HostPage>,
    timing: TimingConfig,
    live_surface: Vec<String>,
    state: Mutex<TrackerState>,
    delivery: Mutex<()>,
    events: Signal<StreamEvent>,
    history: Mutex<Option<HistoryHook>>,
    mutation_subscription: Mutex<Option<SubscriptionId>>,
}

impl NavigationTracker {
    pub fn new(host: Arc<dyn HostPage>, timing: TimingConfig, live_surface: Vec<String>) -> Arc<Self> {
        let last_href = host.location_href();
        Arc::new(Self {
            host,
            timing,
            live_surface,
            state: Mutex::new(TrackerState {
                epoch: 0,
                phase: Phase::Idle,
                active: None,
                previous: None,
                last_href,
                stopped: false,
            }),
            delivery: Mutex::new(()),
            events: Signal::new(),
            history: Mutex::new(None),
            mutation_subscription: Mutex::new(None),
        })
    }

    /// Hooks history and DOM mutations, then runs the initial-load cycle.
    pub fn start(self: &Arc<Self>) -> Result<(), HostError> {
        let weak = Arc::downgrade(self);
        let hook = HistoryHook::install(Arc::clone(&self.host), move |trigger| {
            if let Some(tracker) = weak.upgrade() {
                tracker.trigger(trigger);
            }
        })?;
        *lock(&self.history) = Some(hook);

        let weak = Arc::downgrade(self);
        let id = self.host.mutations().subscribe(move |_| {
            if let Some(tracker) = weak.upgrade() {
                tracker.check_url_change();
            }
        });
        *lock(&self.mutation_subscription) = Some(id);

        self.trigger(NavigationTrigger::InitialLoad);
        Ok(())
    }

    /// Unhooks everything and unloads the active channel, if any.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            state.stopped = true;
            state.epoch += 1;
            state.phase = Phase::Idle;
        }
        if let Some(hook) = lock(&self.history).take() {
            hook.uninstall();
        }
        if let Some(id) = lock(&self.mutation_subscription).take() {
            self.host.mutations().unsubscribe(id);
        }
        self.unload_active();
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&StreamEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn active_channel(&self) -> Option<ChannelId> {
        lock(&self.state).active.clone()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).phase
    }

    pub fn epoch(&self) -> u64 {
        lock(&self.state).epoch
    }

    pub fn trigger(self: &Arc<Self>, trigger: NavigationTrigger) {
        let href = self.host.location_href();
        let epoch = {
            let mut state = lock(&self.state);
            if state.stopped {
                return;
            }
            state.epoch += 1;
            state.last_href = href;
            state.epoch
        };
        debug!(?trigger, epoch, "navigation triggered");
        tokio::spawn(Arc::clone(self).run_cycle(epoch));
    }

    fn check_url_change(self: &Arc<Self>) {
        let href = self.host.location_href();
        let changed = {
            let state = lock(&self.state);
            !state.stopped && state.last_href != href
        };
        if changed {
            self.trigger(NavigationTrigger::DomMutation);
        }
    }

    async fn run_cycle(self: Arc<Self>, epoch: u64) {
        sleep(self.timing.debounce()).await;
        if !self.enter_detecting(epoch) {
            return;
        }
        self.unload_active();

        let href = self.host.location_href();
        if !is_watch_page(&href) {
            debug!(href = %href, "not a watch page");
            self.finish(epoch, Phase::NotLive);
            return;
        }

        let Some(mut channel) = self.extract_with_retry(epoch).await else {
            if self.is_current(epoch) {
                info!(
                    attempts = self.timing.extraction_attempts,
                    "no channel identity found"
                );
                self.finish(epoch, Phase::NotLive);
            }
            return;
        };

        if self.previous_channel().as_ref() == Some(&channel) {
            match self.revalidate(epoch, channel).await {
                Some(confirmed) => channel = confirmed,
                None => return,
            }
        }
        self.remember(epoch, &channel);

        if !self.await_live_surface(epoch).await {
            if self.is_current(epoch) {
                info!(channel = %channel, "no live chat surface");
                self.finish(epoch, Phase::NotLive);
            }
            return;
        }

        self.commit_load(epoch, channel);
    }

    async fn extract_with_retry(&self, epoch: u64) -> Option<ChannelId> {
        let attempts = self.timing.extraction_attempts.max(1);
        for attempt in 1..=attempts {
            if !self.is_current(epoch) {
                return None;
            }
            if let Some((channel, source)) = extract_channel(&*self.host) {
                debug!(channel = %channel, %source, attempt, "channel extracted");
                return Some(channel);
            }
            if attempt < attempts {
                sleep(self.timing.extraction_interval()).await;
            }
        }
        None
    }

    /// The owner element can still show the previous channel right after an
    /// in-page navigation. Polls for a different identity until the window
    /// closes, then accepts the cached one.
    async fn revalidate(&self, epoch: u64, cached: ChannelId) -> Option<ChannelId> {
        let deadline = Instant::now() + self.timing.revalidate_window();
        while Instant::now() < deadline {
            sleep(self.timing.extraction_interval()).await;
            if !self.is_current(epoch) {
                return None;
            }
            if let Some((channel, _)) = extract_channel(&*self.host) {
                if channel != cached {
                    debug!(from = %cached, to = %channel, "channel changed during revalidation");
                    return Some(channel);
                }
            }
        }
        self.is_current(epoch).then_some(cached)
    }

    async fn await_live_surface(&self, epoch: u64) -> bool {
        let deadline = Instant::now() + self.timing.live_timeout();
        loop {
            if !self.is_current(epoch) {
                return false;
            }
            let present = self
                .live_surface
                .iter()
                .any(|selector| self.host.query_selector(selector).is_some());
            if present {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(self.timing.live_poll_interval()).await;
        }
    }

    fn enter_detecting(&self, epoch: u64) -> bool {
        let mut state = lock(&self.state);
        if state.epoch != epoch || state.stopped {
            return false;
        }
        state.phase = Phase::Detecting;
        true
    }

    fn finish(&self, epoch: u64, phase: Phase) {
        let mut state = lock(&self.state);
        if state.epoch == epoch {
            state.phase = phase;
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        let state = lock(&self.state);
        state.epoch == epoch && !state.stopped
    }

    fn previous_channel(&self) -> Option<ChannelId> {
        lock(&self.state).previous.clone()
    }

    /// Records the last identity seen on a watch page, live or not.
    fn remember(&self, epoch: u64, channel: &ChannelId) {
        let mut state = lock(&self.state);
        if state.epoch == epoch && !state.stopped {
            state.previous = Some(channel.clone());
        }
    }

    fn commit_load(&self, epoch: u64, channel: ChannelId) {
        let _delivery = lock(&self.delivery);
        {
            let mut state = lock(&self.state);
            if state.epoch != epoch || state.stopped || state.active.is_some() {
                return;
            }
            state.active = Some(channel.clone());
            state.phase = Phase::Live;
        }
        info!(channel = %channel, "chat surface loaded");
        self.events.emit(&StreamEvent::Loaded(channel));
    }

    fn unload_active(&self) {
        let _delivery = lock(&self.delivery);
        let Some(channel) = lock(&self.state).active.take() else {
            return;
        };
        info!(channel = %channel, "chat surface unloaded");
        self.events.emit(&StreamEvent::Unloaded(channel));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
