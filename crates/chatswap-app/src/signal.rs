use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Listener<T>)>,
}

/// Typed in-process notification channel with explicit subscribe and
/// unsubscribe. Each delivery pass runs over the listener set captured when
/// the pass starts, so (un)subscribing from inside a listener only affects
/// later passes.
pub struct Signal<T> {
    listeners: Mutex<Listeners<T>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Listeners {
                next_id: 1,
                entries: Vec::new(),
            }),
        }
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let mut listeners = self.lock();
        let id = SubscriptionId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry_id, _)| *entry_id != id);
        listeners.entries.len() != before
    }

    /// Delivers `value` and returns how many listeners saw it.
    pub fn emit(&self, value: &T) -> usize {
        let snapshot: Vec<Listener<T>> = self
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &snapshot {
            listener(value);
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Listeners<T>> {
        // A poisoned listener list is still structurally valid.
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{Signal, SubscriptionId};

    #[test]
    fn unsubscribed_listener_stops_receiving() {
        let signal = Signal::<u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let id = signal.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.emit(&1);
        assert!(signal.unsubscribe(id));
        signal.emit(&2);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!signal.unsubscribe(id));
    }

    #[test]
    fn mutations_inside_listener_do_not_affect_current_pass() {
        let signal = Arc::new(Signal::<u32>::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let second_id = Arc::new(Mutex::new(None::<SubscriptionId>));

        let first_signal = Arc::clone(&signal);
        let first_log = Arc::clone(&log);
        let first_second_id = Arc::clone(&second_id);
        signal.subscribe(move |value| {
            first_log.lock().expect("log lock").push(format!("first:{value}"));
            if let Some(id) = *first_second_id.lock().expect("id lock") {
                first_signal.unsubscribe(id);
            }
            let late_log = Arc::clone(&first_log);
            first_signal.subscribe(move |value| {
                late_log.lock().expect("log lock").push(format!("late:{value}"));
            });
        });
        let second_log = Arc::clone(&log);
        let id = signal.subscribe(move |value| {
            second_log.lock().expect("log lock").push(format!("second:{value}"));
        });
        *second_id.lock().expect("id lock") = Some(id);

        let delivered = signal.emit(&7);

        assert_eq!(delivered, 2);
        assert_eq!(
            *log.lock().expect("log lock"),
            vec!["first:7".to_owned(), "second:7".to_owned()]
        );
    }
}
