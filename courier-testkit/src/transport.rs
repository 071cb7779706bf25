use async_trait::async_trait;
use courier::*;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a single scripted upload call returns.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UploadOutcome {
    /// `Ok` response with server id `srv-<item id>`.
    Accept,
    /// Transport-level error.
    Fail(String),
    /// Well-formed response with `Error` status.
    Reject,
    /// `Ok` status but no server id.
    AcceptWithoutId,
}

#[derive(Clone, Debug)]
pub struct UploadRecord {
    pub id: ItemId,
    pub filename: String,
    pub outcome: UploadOutcome,
}

/// [`UploadTransport`] that plays back a script, then falls back to a
/// default outcome. Tracks concurrent calls and their high-water mark.
#[derive(Clone)]
pub struct ScriptedTransport {
    delay: Duration,
    fallback: UploadOutcome,
    script: Arc<Mutex<VecDeque<UploadOutcome>>>,
    calls: Arc<Mutex<Vec<UploadRecord>>>,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    fn with_fallback(fallback: UploadOutcome) -> Self {
        Self {
            delay: Duration::ZERO,
            fallback,
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn always_ok() -> Self {
        Self::with_fallback(UploadOutcome::Accept)
    }

    pub fn always_fail() -> Self {
        Self::with_fallback(UploadOutcome::Fail("connection reset".into()))
    }

    /// Play `outcomes` in order, then accept everything.
    pub fn scripted(outcomes: impl IntoIterator<Item = UploadOutcome>) -> Self {
        let transport = Self::always_ok();
        transport.script.lock().extend(outcomes);
        transport
    }

    /// Hold every call for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_outcome(&self, outcome: UploadOutcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn record(&self) -> Vec<UploadRecord> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Calls made for one item.
    pub fn attempts_for(&self, id: ItemId) -> usize {
        self.calls.lock().iter().filter(|c| c.id == id).count()
    }

    pub fn in_flight(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn assert_call_count_eq(&self, expected: usize) {
        assert_eq!(
            self.call_count(),
            expected,
            "Expected {} upload calls, got {}",
            expected,
            self.call_count()
        );
    }
}

struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    async fn upload(&self, item: &QueueItem) -> anyhow::Result<UploadResponse> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = CallGuard(&self.current);

        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        self.calls.lock().push(UploadRecord {
            id: item.id,
            filename: item.filename.clone(),
            outcome: outcome.clone(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match outcome {
            UploadOutcome::Accept => Ok(UploadResponse::ok(format!("srv-{}", item.id))),
            UploadOutcome::Fail(message) => Err(anyhow::anyhow!(message)),
            UploadOutcome::Reject => Ok(UploadResponse::error()),
            UploadOutcome::AcceptWithoutId => Ok(UploadResponse {
                status: UploadStatus::Ok,
                server_id: None,
            }),
        }
    }
}
