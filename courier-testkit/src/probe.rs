use async_trait::async_trait;
use courier::ReachabilityProbe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// [`ReachabilityProbe`] whose answer is flipped by the test.
#[derive(Clone, Debug)]
pub struct ToggleProbe {
    online: Arc<AtomicBool>,
    erroring: Arc<AtomicBool>,
    polls: Arc<AtomicUsize>,
}

impl ToggleProbe {
    fn with_state(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
            erroring: Arc::new(AtomicBool::new(false)),
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn online() -> Self {
        Self::with_state(true)
    }

    pub fn offline() -> Self {
        Self::with_state(false)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// While set, every poll returns an error.
    pub fn set_erroring(&self, erroring: bool) {
        self.erroring.store(erroring, Ordering::SeqCst);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for ToggleProbe {
    async fn is_online(&self) -> anyhow::Result<bool> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.erroring.load(Ordering::SeqCst) {
            anyhow::bail!("network state unavailable");
        }
        Ok(self.online.load(Ordering::SeqCst))
    }
}
