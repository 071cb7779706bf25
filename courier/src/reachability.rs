use async_trait::async_trait;

/// Reports whether the remote endpoint is currently reachable.
///
/// Polled before every processing pass and by the recovery monitor. An
/// error is treated as offline.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_online(&self) -> anyhow::Result<bool>;
}

/// Probe that always reports online, for deployments without a
/// connectivity signal.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysOnline;

#[async_trait]
impl ReachabilityProbe for AlwaysOnline {
    async fn is_online(&self) -> anyhow::Result<bool> {
        Ok(true)
    }
}
