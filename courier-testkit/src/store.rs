use async_trait::async_trait;
use courier::*;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Store operations that can be made to fail on demand.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StoreOp {
    Reserve,
    MarkUploaded,
    MarkFailed,
    SetPending,
    IncrementRetry,
    ResetFailed,
    ResetOne,
    CountPending,
    RequeueInterrupted,
}

/// [`RecordStore`] kept in memory. Every operation runs under one mutex, so
/// reservations are trivially atomic.
#[derive(Clone)]
pub struct InMemoryRecordStore {
    kind: ItemKind,
    items: Arc<Mutex<BTreeMap<ItemId, QueueItem>>>,
    next_id: Arc<Mutex<i64>>,
    reserve_calls: Arc<AtomicUsize>,
    failing: Arc<Mutex<HashSet<StoreOp>>>,
    failing_once: Arc<Mutex<HashSet<StoreOp>>>,
    lag: Arc<Mutex<HashMap<StoreOp, Duration>>>,
}

impl InMemoryRecordStore {
    pub fn new(kind: ItemKind) -> Self {
        Self {
            kind,
            items: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            reserve_calls: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(Mutex::new(HashSet::new())),
            failing_once: Arc::new(Mutex::new(HashSet::new())),
            lag: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of `reserve_pending` calls so far.
    pub fn reserve_calls(&self) -> usize {
        self.reserve_calls.load(Ordering::SeqCst)
    }

    pub fn assert_reserve_calls_eq(&self, expected: usize) {
        assert_eq!(
            self.reserve_calls(),
            expected,
            "Expected {} reserve_pending calls, got {}",
            expected,
            self.reserve_calls()
        );
    }

    /// Make `op` return an error until [`clear_failures`](Self::clear_failures).
    pub fn fail_on(&self, op: StoreOp) {
        self.failing.lock().insert(op);
    }

    /// Make only the next call of `op` return an error.
    pub fn fail_once(&self, op: StoreOp) {
        self.failing_once.lock().insert(op);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
        self.failing_once.lock().clear();
    }

    /// Apply `op`'s change immediately but hold its acknowledgement back
    /// for `delay`, like a slow disk or a remote database.
    pub fn lag_on(&self, op: StoreOp, delay: Duration) {
        self.lag.lock().insert(op, delay);
    }

    /// Current copy of an item, panicking if it does not exist.
    pub fn item(&self, id: ItemId) -> QueueItem {
        self.items
            .lock()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| panic!("item {id} not in store"))
    }

    /// All items in id order.
    pub fn items(&self) -> Vec<QueueItem> {
        self.items.lock().values().cloned().collect()
    }

    /// Overwrite status and retry count directly, bypassing the manager.
    pub fn force_state(&self, id: ItemId, status: ItemStatus, retries: u32) {
        let mut items = self.items.lock();
        let item = items
            .get_mut(&id)
            .unwrap_or_else(|| panic!("item {id} not in store"));
        item.status = status;
        item.retries = retries;
    }

    fn check(&self, op: StoreOp) -> anyhow::Result<()> {
        if self.failing.lock().contains(&op)
            || self.failing_once.lock().remove(&op)
        {
            anyhow::bail!("injected {op:?} failure");
        }
        Ok(())
    }

    async fn acknowledge(&self, op: StoreOp) {
        let delay = self.lag.lock().get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn with_item<T>(
        &self,
        id: ItemId,
        f: impl FnOnce(&mut QueueItem) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut items = self.items.lock();
        match items.get_mut(&id) {
            Some(item) => f(item),
            None => anyhow::bail!("{} {} not found", self.kind, id),
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn kind(&self) -> ItemKind {
        self.kind
    }

    async fn reserve_pending(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> anyhow::Result<Vec<QueueItem>> {
        self.reserve_calls.fetch_add(1, Ordering::SeqCst);
        self.check(StoreOp::Reserve)?;

        let mut items = self.items.lock();
        let mut eligible: Vec<&mut QueueItem> = items
            .values_mut()
            .filter(|item| match item.status {
                ItemStatus::Pending => true,
                ItemStatus::Failed => item.retries < max_retries,
                _ => false,
            })
            .collect();
        eligible.sort_by_key(|item| (item.created_at_ms, item.id));

        Ok(eligible
            .into_iter()
            .take(limit)
            .map(|item| {
                item.status = ItemStatus::Uploading;
                item.clone()
            })
            .collect())
    }

    async fn mark_uploaded(
        &self,
        id: ItemId,
        server_id: &str,
    ) -> anyhow::Result<()> {
        self.check(StoreOp::MarkUploaded)?;
        let result = self.with_item(id, |item| {
            match &item.server_id {
                Some(existing) if existing != server_id => anyhow::bail!(
                    "item {id} already uploaded as {existing}, refusing {server_id}"
                ),
                _ => {}
            }
            item.status = ItemStatus::Uploaded;
            item.server_id = Some(server_id.to_string());
            Ok(())
        });
        self.acknowledge(StoreOp::MarkUploaded).await;
        result
    }

    async fn mark_failed(&self, id: ItemId) -> anyhow::Result<()> {
        self.check(StoreOp::MarkFailed)?;
        let result = self.with_item(id, |item| {
            item.status = ItemStatus::Failed;
            Ok(())
        });
        self.acknowledge(StoreOp::MarkFailed).await;
        result
    }

    async fn set_pending(&self, id: ItemId) -> anyhow::Result<()> {
        self.check(StoreOp::SetPending)?;
        let result = self.with_item(id, |item| {
            item.status = ItemStatus::Pending;
            Ok(())
        });
        self.acknowledge(StoreOp::SetPending).await;
        result
    }

    async fn increment_retry_capped(
        &self,
        id: ItemId,
        max: u32,
    ) -> anyhow::Result<u32> {
        self.check(StoreOp::IncrementRetry)?;
        let result = self.with_item(id, |item| {
            if item.retries < max {
                item.retries += 1;
            }
            Ok(item.retries)
        });
        self.acknowledge(StoreOp::IncrementRetry).await;
        result
    }

    async fn reset_failed(&self) -> anyhow::Result<u64> {
        self.check(StoreOp::ResetFailed)?;
        let mut reset = 0;
        for item in self.items.lock().values_mut() {
            if item.status == ItemStatus::Failed {
                item.status = ItemStatus::Pending;
                item.retries = 0;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn reset_one(&self, id: ItemId) -> anyhow::Result<()> {
        self.check(StoreOp::ResetOne)?;
        self.with_item(id, |item| {
            if !matches!(item.status, ItemStatus::Failed | ItemStatus::Pending) {
                anyhow::bail!(
                    "item {id} is {}, only failed items can be retried",
                    item.status
                );
            }
            item.status = ItemStatus::Pending;
            item.retries = 0;
            Ok(())
        })
    }

    async fn count_pending(&self) -> anyhow::Result<u64> {
        self.check(StoreOp::CountPending)?;
        Ok(self
            .items
            .lock()
            .values()
            .filter(|item| item.status == ItemStatus::Pending)
            .count() as u64)
    }

    async fn requeue_interrupted(&self) -> anyhow::Result<u64> {
        self.check(StoreOp::RequeueInterrupted)?;
        let mut requeued = 0;
        for item in self.items.lock().values_mut() {
            if item.status == ItemStatus::Uploading {
                item.status = ItemStatus::Pending;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn insert(&self, item: NewItem) -> anyhow::Result<ItemId> {
        let id = {
            let mut next = self.next_id.lock();
            let id = ItemId(*next);
            *next += 1;
            id
        };
        self.items.lock().insert(id, item.into_item(id, self.kind));
        Ok(id)
    }

    async fn get(&self, id: ItemId) -> anyhow::Result<Option<QueueItem>> {
        Ok(self.items.lock().get(&id).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<QueueItem>> {
        let mut items = self.items();
        items.sort_by_key(|item| std::cmp::Reverse((item.created_at_ms, item.id)));
        Ok(items)
    }

    async fn list_by_owner(&self, user_id: i64) -> anyhow::Result<Vec<QueueItem>> {
        let mut items = self.list().await?;
        items.retain(|item| {
            item.owner.as_ref().map(|o| o.user_id) == Some(user_id)
        });
        Ok(items)
    }

    async fn delete(&self, id: ItemId) -> anyhow::Result<bool> {
        Ok(self.items.lock().remove(&id).is_some())
    }

    async fn status_counts(&self) -> anyhow::Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for item in self.items.lock().values() {
            counts.add(item.status, 1);
        }
        Ok(counts)
    }
}
