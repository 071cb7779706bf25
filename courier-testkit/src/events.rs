use courier::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Captures every event emitted on a bus, in emission order.
#[derive(Clone)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<SyncEvent>>>,
    changed: Arc<Notify>,
    subscriptions: Arc<Vec<Subscription>>,
}

impl EventRecorder {
    /// Subscribe to every [`EventKind`] on `bus`.
    pub fn attach(bus: &SyncEventBus) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let changed = Arc::new(Notify::new());

        let subscriptions = EventKind::ALL
            .iter()
            .map(|kind| {
                let events = Arc::clone(&events);
                let changed = Arc::clone(&changed);
                bus.subscribe(*kind, move |event: &SyncEvent| {
                    events.lock().push(event.clone());
                    changed.notify_waiters();
                })
            })
            .collect();

        Self {
            events,
            changed,
            subscriptions: Arc::new(subscriptions),
        }
    }

    /// Remove this recorder's handlers from `bus`.
    pub fn detach(&self, bus: &SyncEventBus) {
        for subscription in self.subscriptions.iter() {
            bus.unsubscribe(subscription);
        }
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    pub fn payloads(&self) -> Vec<SyncEventPayload> {
        self.events.lock().iter().map(|e| e.payload.clone()).collect()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(SyncEvent::kind).collect()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<SyncEventPayload> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .map(|e| e.payload.clone())
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Wait until `predicate` holds over the recorded events. Returns false
    /// on timeout.
    pub async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&[SyncEvent]) -> bool,
    {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if predicate(&self.events.lock()) {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Wait until at least `n` events of `kind` were recorded.
    pub async fn wait_for_count(
        &self,
        kind: EventKind,
        n: usize,
        timeout: Duration,
    ) -> bool {
        self.wait_until(timeout, |events| {
            events.iter().filter(|e| e.kind() == kind).count() >= n
        })
        .await
    }
}
