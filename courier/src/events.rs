use std::collections::HashMap;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::error;
use uuid::Uuid;

use crate::item::{ItemId, ItemKind};

/// Metadata envelope attached to every sync event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub emitted_at: DateTime<Utc>,
    /// Family of the store that produced the event.
    pub source: ItemKind,
    /// Identifies one processing pass; events emitted outside a pass carry a
    /// fresh id.
    pub correlation_id: Uuid,
}

impl EventMeta {
    pub fn new(source: ItemKind, correlation_id: Option<Uuid>) -> Self {
        Self {
            emitted_at: Utc::now(),
            source,
            correlation_id: correlation_id.unwrap_or_else(Uuid::now_v7),
        }
    }
}

/// Event payload emitted for queue lifecycle transitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEventPayload {
    /// An item was (re)submitted to the queue.
    Queued { id: ItemId },
    /// An upload attempt started.
    Uploading { id: ItemId },
    Uploaded {
        id: ItemId,
        server_id: String,
        duration_ms: u64,
    },
    /// An attempt failed. `terminal` is set once the retry budget is spent.
    Failed {
        id: ItemId,
        error: String,
        terminal: bool,
    },
    /// An attempt failed and another is scheduled after `backoff_ms`.
    Retrying {
        id: ItemId,
        attempt: u32,
        backoff_ms: u64,
        error: String,
    },
    /// A processing pass began claiming work.
    Started,
    /// A processing pass found nothing left to claim.
    Completed,
}

impl SyncEventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEventPayload::Queued { .. } => EventKind::ItemQueued,
            SyncEventPayload::Uploading { .. } => EventKind::ItemUploading,
            SyncEventPayload::Uploaded { .. } => EventKind::ItemUploaded,
            SyncEventPayload::Failed { .. } => EventKind::ItemFailed,
            SyncEventPayload::Retrying { .. } => EventKind::ItemRetrying,
            SyncEventPayload::Started => EventKind::QueueStarted,
            SyncEventPayload::Completed => EventKind::QueueCompleted,
        }
    }

    /// Item the event refers to, if any.
    pub fn item_id(&self) -> Option<ItemId> {
        match self {
            SyncEventPayload::Queued { id }
            | SyncEventPayload::Uploading { id }
            | SyncEventPayload::Uploaded { id, .. }
            | SyncEventPayload::Failed { id, .. }
            | SyncEventPayload::Retrying { id, .. } => Some(*id),
            SyncEventPayload::Started | SyncEventPayload::Completed => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncEvent {
    pub meta: EventMeta,
    pub payload: SyncEventPayload,
}

impl SyncEvent {
    pub fn new(meta: EventMeta, payload: SyncEventPayload) -> Self {
        Self { meta, payload }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Discriminant used to register handlers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ItemQueued,
    ItemUploading,
    ItemUploaded,
    ItemFailed,
    ItemRetrying,
    QueueStarted,
    QueueCompleted,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::ItemQueued,
        EventKind::ItemUploading,
        EventKind::ItemUploaded,
        EventKind::ItemFailed,
        EventKind::ItemRetrying,
        EventKind::QueueStarted,
        EventKind::QueueCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ItemQueued => "item:queued",
            EventKind::ItemUploading => "item:uploading",
            EventKind::ItemUploaded => "item:uploaded",
            EventKind::ItemFailed => "item:failed",
            EventKind::ItemRetrying => "item:retrying",
            EventKind::QueueStarted => "queue:started",
            EventKind::QueueCompleted => "queue:completed",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked synchronously on the emitting task.
pub type EventHandler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Handle returned by [`SyncEventBus::subscribe`]; pass it back to
/// [`SyncEventBus::unsubscribe`] to stop delivery.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// In-process event bus for queue lifecycle notifications.
///
/// Handlers registered with [`subscribe`](Self::subscribe) run synchronously
/// on the emitting task, in registration order. A panicking handler is
/// logged and skipped; later handlers still receive the event.
///
/// Async observers can call [`subscribe_all`](Self::subscribe_all) for a
/// broadcast receiver instead. A lagging receiver gets
/// `RecvError::Lagged` but never blocks the emitter.
pub struct SyncEventBus {
    handlers: RwLock<HashMap<EventKind, Vec<(u64, EventHandler)>>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl std::fmt::Debug for SyncEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEventBus")
            .field("handlers", &self.handler_count())
            .field("capacity", &self.capacity)
            .field("stream_subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for SyncEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl SyncEventBus {
    /// Create a bus whose broadcast stream buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            sender,
            capacity,
        }
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription { kind, id }
    }

    /// Remove a handler. Returns false if it was already removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&subscription.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&subscription.kind);
        }
        removed
    }

    /// Receive every event as an owned clone.
    pub fn subscribe_all(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Deliver an event to all handlers of its kind, then to stream
    /// subscribers. Emitting with no subscribers is a no-op.
    pub fn emit(&self, event: SyncEvent) {
        let kind = event.kind();
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if outcome.is_err() {
                error!(event = %kind, "event handler panicked");
            }
        }

        let _ = self.sender.send(event);
    }
}
