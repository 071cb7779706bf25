use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::backoff::calculate_backoff;
use crate::config::SyncConfig;
use crate::events::{EventMeta, SyncEvent, SyncEventBus, SyncEventPayload};
use crate::item::{ItemId, QueueItem};
use crate::metrics::{MetricsTracker, QueueMetrics};
use crate::reachability::ReachabilityProbe;
use crate::store::RecordStore;
use crate::telemetry::{self, UploadTimer};
use crate::transport::UploadTransport;

use super::monitor::RecoveryMonitor;
use super::shutdown::ShutdownToken;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// How a call to [`QueueManager::process_queue`] ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PassOutcome {
    /// Another pass was already running; it will re-check for work.
    Busy,
    /// The manager is paused or shutting down.
    Paused,
    /// The probe reported offline (or failed); nothing was claimed.
    Offline,
    /// A claim came back empty.
    Drained { dispatched: usize },
    /// Pause or shutdown was observed at a batch boundary.
    Halted { dispatched: usize },
}

/// Drives uploads for one record store.
///
/// Cloning is cheap; all clones share the same scheduler state. Construct
/// with [`QueueManagerBuilder`](super::QueueManagerBuilder).
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: SyncConfig,
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn UploadTransport>,
    probe: Arc<dyn ReachabilityProbe>,
    events: Arc<SyncEventBus>,
    metrics: MetricsTracker,
    /// Keyed by dispatch ticket; one item may briefly appear twice when a
    /// retry is reclaimed before its previous task has finished.
    in_flight: Mutex<HashMap<u64, ItemId>>,
    next_ticket: AtomicU64,
    slot_freed: Notify,
    is_processing: AtomicBool,
    /// Set when work arrives while a pass is running.
    wake_requested: AtomicBool,
    paused: AtomicBool,
    shutdown: ShutdownToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("item_kind", &self.inner.store.kind())
            .field("config", &self.inner.config)
            .field("in_flight", &self.in_flight_count())
            .field("processing", &self.is_processing())
            .field("paused", &self.is_paused())
            .finish()
    }
}

/// Resets the re-entrancy flag when a pass ends, however it ends.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Holds one concurrency slot for the lifetime of an upload attempt.
struct InFlightGuard {
    inner: Arc<ManagerInner>,
    ticket: u64,
}

impl InFlightGuard {
    fn acquire(inner: &Arc<ManagerInner>, id: ItemId) -> Self {
        let ticket = inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let in_flight = {
            let mut slots = inner.in_flight.lock();
            slots.insert(ticket, id);
            slots.len()
        };
        telemetry::set_in_flight(inner.store.kind().as_str(), in_flight);
        Self {
            inner: Arc::clone(inner),
            ticket,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let in_flight = {
            let mut slots = self.inner.in_flight.lock();
            slots.remove(&self.ticket);
            slots.len()
        };
        telemetry::set_in_flight(self.inner.store.kind().as_str(), in_flight);
        self.inner.slot_freed.notify_waiters();
    }
}

impl QueueManager {
    pub(crate) fn new(
        config: SyncConfig,
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn UploadTransport>,
        probe: Arc<dyn ReachabilityProbe>,
        events: Arc<SyncEventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                store,
                transport,
                probe,
                events,
                metrics: MetricsTracker::new(),
                in_flight: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(0),
                slot_freed: Notify::new(),
                is_processing: AtomicBool::new(false),
                wake_requested: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                shutdown: ShutdownToken::new(),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn events(&self) -> Arc<SyncEventBus> {
        Arc::clone(&self.inner.events)
    }

    /// Live queue health; the receiver always holds the latest snapshot.
    pub fn metrics(&self) -> watch::Receiver<QueueMetrics> {
        self.inner.metrics.subscribe()
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.inner.shutdown.clone()
    }

    pub fn is_processing(&self) -> bool {
        self.inner.is_processing.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Submit (or resubmit) an item and wake the scheduler.
    ///
    /// Redundant calls are harmless: the store decides what is claimable.
    pub async fn enqueue(&self, id: ItemId) -> anyhow::Result<()> {
        telemetry::record_item_enqueued(self.inner.store.kind().as_str(), id);
        self.emit(None, SyncEventPayload::Queued { id });
        self.trigger();
        self.refresh_metrics().await?;
        Ok(())
    }

    /// Manual retry: clear the retry count and resubmit.
    pub async fn retry(&self, id: ItemId) -> anyhow::Result<()> {
        self.inner.store.reset_one(id).await?;
        info!(item_kind = %self.inner.store.kind(), item_id = %id, "manual retry");
        self.enqueue(id).await
    }

    /// Startup hook: return uploads stranded by a previous process to
    /// `pending`. Returns how many were requeued.
    ///
    /// Call before the first pass; rows this manager has in flight would be
    /// requeued too.
    pub async fn recover(&self) -> anyhow::Result<u64> {
        let requeued = self.inner.store.requeue_interrupted().await?;
        self.refresh_metrics().await?;
        Ok(requeued)
    }

    /// Stop claiming new batches. In-flight uploads keep running.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        info!(item_kind = %self.inner.store.kind(), "queue paused");
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        info!(item_kind = %self.inner.store.kind(), "queue resumed");
        self.trigger();
    }

    /// Recompute and publish the metrics snapshot.
    pub async fn refresh_metrics(&self) -> anyhow::Result<QueueMetrics> {
        let total_queued = self.inner.store.count_pending().await?;
        let in_progress = self.in_flight_count();
        Ok(self.inner.metrics.publish(total_queued, in_progress))
    }

    /// Run one processing pass: claim batches and dispatch uploads until a
    /// claim comes back empty or a pause is observed.
    ///
    /// Returns once the last batch is dispatched; uploads may still be in
    /// flight. Store errors end the pass and are returned.
    pub async fn process_queue(&self) -> anyhow::Result<PassOutcome> {
        let inner = &self.inner;
        if inner.paused.load(Ordering::SeqCst) || inner.shutdown.is_cancelled() {
            return Ok(PassOutcome::Paused);
        }
        if inner
            .is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            inner.wake_requested.store(true, Ordering::SeqCst);
            return Ok(PassOutcome::Busy);
        }

        let outcome = {
            let _guard = ProcessingGuard(&inner.is_processing);
            self.run_pass().await
        };

        if matches!(outcome, Ok(PassOutcome::Drained { .. }))
            && inner.wake_requested.swap(false, Ordering::SeqCst)
        {
            debug!(item_kind = %inner.store.kind(), "work arrived during pass, re-running");
            self.trigger();
        }
        outcome
    }

    /// Wait until no upload is in flight.
    pub async fn wait_for_idle(&self) {
        loop {
            let notified = self.inner.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Start the reachability-recovery monitor as a background task. It
    /// stops when [`shutdown`](Self::shutdown) is called.
    pub fn spawn_recovery_monitor(&self) {
        let monitor = RecoveryMonitor::new(self.clone());
        let shutdown = self.inner.shutdown.clone();
        let handle = tokio::spawn(monitor.run(shutdown));
        self.inner.background.lock().push(handle);
    }

    /// Stop background tasks and let in-flight uploads drain.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        info!(item_kind = %self.inner.store.kind(), "shutting down queue manager");
        self.inner.shutdown.cancel();

        let handles = std::mem::take(&mut *self.inner.background.lock());
        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("background task failed: {e:?}"),
                Err(_) => warn!("background task timed out during shutdown"),
            }
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, self.wait_for_idle())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.in_flight_count(),
                "uploads still in flight after shutdown grace period"
            );
        }

        info!(item_kind = %self.inner.store.kind(), "queue manager shutdown complete");
        Ok(())
    }

    /// Spawn a pass if idle; otherwise ask the running pass to look again.
    pub(crate) fn trigger(&self) {
        let inner = &self.inner;
        if inner.paused.load(Ordering::SeqCst) || inner.shutdown.is_cancelled() {
            return;
        }
        if inner.is_processing.load(Ordering::SeqCst) {
            inner.wake_requested.store(true, Ordering::SeqCst);
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(err) = manager.process_queue().await {
                error!(
                    item_kind = %manager.inner.store.kind(),
                    error = %err,
                    "processing pass failed"
                );
            }
        });
    }

    pub(crate) async fn check_online(&self) -> bool {
        match self.inner.probe.is_online().await {
            Ok(online) => online,
            Err(err) => {
                warn!(error = %err, "reachability probe failed, treating as offline");
                false
            }
        }
    }

    async fn run_pass(&self) -> anyhow::Result<PassOutcome> {
        let inner = &self.inner;
        let kind = inner.store.kind();

        if !self.check_online().await {
            debug!(item_kind = %kind, "offline, skipping pass");
            return Ok(PassOutcome::Offline);
        }

        let correlation_id = Uuid::now_v7();
        self.emit(Some(correlation_id), SyncEventPayload::Started);
        info!(item_kind = %kind, %correlation_id, "processing pass started");

        let delay = Duration::from_millis(inner.config.inter_batch_delay_ms);
        let mut dispatched = 0usize;

        loop {
            if inner.paused.load(Ordering::SeqCst) || inner.shutdown.is_cancelled() {
                info!(item_kind = %kind, dispatched, "processing pass halted");
                return Ok(PassOutcome::Halted { dispatched });
            }

            inner.wake_requested.store(false, Ordering::SeqCst);
            let batch = inner
                .store
                .reserve_pending(inner.config.batch_size, inner.config.max_retries)
                .instrument(telemetry::claim_span(kind.as_str(), inner.config.batch_size))
                .await?;

            if batch.is_empty() {
                self.emit(Some(correlation_id), SyncEventPayload::Completed);
                info!(item_kind = %kind, dispatched, "processing pass completed");
                return Ok(PassOutcome::Drained { dispatched });
            }

            debug!(item_kind = %kind, claimed = batch.len(), "claimed batch");
            for item in batch {
                self.wait_for_slot().await;
                self.dispatch(item, correlation_id);
                dispatched += 1;
            }

            self.refresh_metrics().await?;

            tokio::select! {
                _ = inner.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn wait_for_slot(&self) {
        let limit = self.inner.config.max_concurrent_uploads;
        loop {
            let notified = self.inner.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight_count() < limit {
                return;
            }
            notified.await;
        }
    }

    fn dispatch(&self, item: QueueItem, correlation_id: Uuid) {
        let guard = InFlightGuard::acquire(&self.inner, item.id);
        let span = telemetry::upload_span(
            self.inner.store.kind().as_str(),
            item.id,
            item.retries,
        );
        debug!(item_id = %item.id, "dispatching upload");

        let manager = self.clone();
        tokio::spawn(
            async move { manager.upload_item(item, guard, correlation_id).await }
                .instrument(span),
        );
    }

    /// One upload attempt and its bookkeeping.
    ///
    /// If recording the outcome fails, the row is handed back to `pending`
    /// and resubmitted after the first retry delay. If even that fails it
    /// stays `uploading` until the next [`recover`](Self::recover).
    async fn upload_item(
        &self,
        item: QueueItem,
        guard: InFlightGuard,
        correlation_id: Uuid,
    ) {
        let id = item.id;
        let cid = Some(correlation_id);
        self.emit(cid, SyncEventPayload::Uploading { id });

        let timer = UploadTimer::start();
        let result = self.inner.transport.upload(&item).await;
        let elapsed = timer.elapsed();

        let accepted = match result {
            Ok(response) => match response.accepted_server_id() {
                Some(server_id) => Ok(server_id.to_string()),
                None => Err(format!(
                    "upload rejected with status {:?}",
                    response.status
                )),
            },
            Err(err) => Err(format!("{err:#}")),
        };

        let recorded = match accepted {
            Ok(server_id) => {
                let result = self
                    .complete_upload(id, &server_id, elapsed, correlation_id)
                    .await;
                drop(guard);
                result.map(|()| None)
            }
            Err(reason) => {
                self.handle_upload_failure(id, &reason, correlation_id, guard)
                    .await
            }
        };

        let retry_after = match recorded {
            Ok(backoff) => backoff,
            Err(err) => {
                error!(item_id = %id, error = %err, "failed to record upload outcome");
                self.release_stranded(id).await
            }
        };

        if let Err(err) = self.refresh_metrics().await {
            error!(error = %err, "failed to refresh metrics");
        }

        if let Some(backoff) = retry_after {
            tokio::time::sleep(backoff).await;
            if let Err(err) = self.enqueue(id).await {
                error!(item_id = %id, error = %err, "failed to resubmit after backoff");
            }
        }
    }

    async fn complete_upload(
        &self,
        id: ItemId,
        server_id: &str,
        elapsed: Duration,
        correlation_id: Uuid,
    ) -> anyhow::Result<()> {
        self.inner.store.mark_uploaded(id, server_id).await?;

        let duration_ms = elapsed.as_millis() as u64;
        self.inner.metrics.record_success(duration_ms);
        telemetry::record_upload_succeeded(
            self.inner.store.kind().as_str(),
            id,
            server_id,
            elapsed,
        );
        self.emit(
            Some(correlation_id),
            SyncEventPayload::Uploaded {
                id,
                server_id: server_id.to_string(),
                duration_ms,
            },
        );
        Ok(())
    }

    /// Count the failed attempt and either schedule a retry or give up.
    /// Returns the backoff to wait before resubmitting, if any.
    ///
    /// The slot is released before the row becomes claimable again, so a
    /// reclaim of the same item is counted as a separate upload.
    async fn handle_upload_failure(
        &self,
        id: ItemId,
        reason: &str,
        correlation_id: Uuid,
        guard: InFlightGuard,
    ) -> anyhow::Result<Option<Duration>> {
        let inner = &self.inner;
        let max = inner.config.max_retries;
        let kind = inner.store.kind();
        let attempt = inner.store.increment_retry_capped(id, max).await?;

        if attempt >= max {
            inner.store.mark_failed(id).await?;
            inner.metrics.record_terminal_failure();
            telemetry::record_upload_failed(kind.as_str(), id, attempt, reason);
            self.emit(
                Some(correlation_id),
                SyncEventPayload::Failed {
                    id,
                    error: reason.to_string(),
                    terminal: true,
                },
            );
            return Ok(None);
        }

        drop(guard);
        inner.store.set_pending(id).await?;
        let backoff = calculate_backoff(attempt, &inner.config);
        telemetry::record_upload_retrying(kind.as_str(), id, attempt, backoff, reason);
        self.emit(
            Some(correlation_id),
            SyncEventPayload::Retrying {
                id,
                attempt,
                backoff_ms: backoff.as_millis() as u64,
                error: reason.to_string(),
            },
        );
        Ok(Some(backoff))
    }

    async fn release_stranded(&self, id: ItemId) -> Option<Duration> {
        match self.inner.store.set_pending(id).await {
            Ok(()) => {
                warn!(item_id = %id, "item returned to pending");
                Some(calculate_backoff(1, &self.inner.config))
            }
            Err(err) => {
                error!(
                    item_id = %id,
                    error = %err,
                    "item left uploading until next recover"
                );
                None
            }
        }
    }

    fn emit(&self, correlation_id: Option<Uuid>, payload: SyncEventPayload) {
        let meta = EventMeta::new(self.inner.store.kind(), correlation_id);
        self.inner.events.emit(SyncEvent::new(meta, payload));
    }
}
