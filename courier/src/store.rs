use async_trait::async_trait;

use crate::item::{ItemId, ItemKind, NewItem, QueueItem, StatusCounts};

/// Durable storage for queue items and their lifecycle state.
///
/// Implementors own every status transition; the queue manager never edits a
/// row directly. All operations surface I/O failures to the caller and never
/// retry internally.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The item family this store is scoped to.
    fn kind(&self) -> ItemKind;

    /// Atomically claim up to `limit` eligible items, oldest first, moving
    /// them to `uploading`.
    ///
    /// Eligible rows are `pending`, plus `failed` rows whose retry count is
    /// still below `max_retries`. Concurrent callers never receive
    /// overlapping ids. Returns an empty vector when nothing is eligible.
    async fn reserve_pending(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> anyhow::Result<Vec<QueueItem>>;

    /// Record a successful upload. Repeating the call with the same
    /// `server_id` is a no-op; a different `server_id` is rejected.
    async fn mark_uploaded(&self, id: ItemId, server_id: &str) -> anyhow::Result<()>;

    /// Move an item to `failed` once its retry budget is spent.
    async fn mark_failed(&self, id: ItemId) -> anyhow::Result<()>;

    /// Return an item to `pending` without touching its retry count.
    async fn set_pending(&self, id: ItemId) -> anyhow::Result<()>;

    /// Increment `retries` unless it already reached `max`; returns the
    /// resulting count.
    async fn increment_retry_capped(&self, id: ItemId, max: u32) -> anyhow::Result<u32>;

    /// Bulk-revert every `failed` item to `pending` with zero retries.
    async fn reset_failed(&self) -> anyhow::Result<u64>;

    /// Revert a single `failed` (or still `pending`) item to `pending` with
    /// zero retries. Errors for items that are uploading or uploaded.
    async fn reset_one(&self, id: ItemId) -> anyhow::Result<()>;

    /// Number of `pending` rows, read from durable state.
    async fn count_pending(&self) -> anyhow::Result<u64>;

    /// Revert rows left in `uploading` by an interrupted process.
    async fn requeue_interrupted(&self) -> anyhow::Result<u64>;

    /// Create a new `pending` record and return its id.
    async fn insert(&self, item: NewItem) -> anyhow::Result<ItemId>;

    async fn get(&self, id: ItemId) -> anyhow::Result<Option<QueueItem>>;

    /// All records in this scope, newest first.
    async fn list(&self) -> anyhow::Result<Vec<QueueItem>>;

    /// Records captured by one user, newest first.
    async fn list_by_owner(&self, user_id: i64) -> anyhow::Result<Vec<QueueItem>>;

    /// Remove a record. Called by producers and admin tooling only.
    async fn delete(&self, id: ItemId) -> anyhow::Result<bool>;

    async fn status_counts(&self) -> anyhow::Result<StatusCounts>;
}
