use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::events::SyncEventBus;
use crate::reachability::ReachabilityProbe;
use crate::store::RecordStore;
use crate::transport::UploadTransport;

use super::manager::QueueManager;

/// Builder for constructing a [`QueueManager`] with explicit dependencies.
///
/// The store, transport and probe are required. When no event bus is
/// supplied a fresh one is created; fetch it with
/// [`QueueManager::events`].
///
/// # Example
///
/// ```ignore
/// use courier::*;
///
/// let manager = QueueManagerBuilder::new(SyncConfig::default())
///     .with_store(Arc::new(store))
///     .with_transport(Arc::new(transport))
///     .with_probe(Arc::new(AlwaysOnline))
///     .build()?;
/// ```
pub struct QueueManagerBuilder {
    config: SyncConfig,
    store: Option<(Arc<dyn RecordStore>, &'static str)>,
    transport: Option<(Arc<dyn UploadTransport>, &'static str)>,
    probe: Option<(Arc<dyn ReachabilityProbe>, &'static str)>,
    events: Option<Arc<SyncEventBus>>,
}

impl fmt::Debug for QueueManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("QueueManagerBuilder");
        debug.field("config", &self.config);
        debug.field("events_set", &self.events.is_some());

        if let Some((_, name)) = &self.store {
            debug.field("store_type", name);
        }
        if let Some((_, name)) = &self.transport {
            debug.field("transport_type", name);
        }
        if let Some((_, name)) = &self.probe {
            debug.field("probe_type", name);
        }

        debug.finish()
    }
}

impl QueueManagerBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            store: None,
            transport: None,
            probe: None,
            events: None,
        }
    }

    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: RecordStore + 'static,
    {
        let store: Arc<dyn RecordStore> = store;
        self.store = Some((store, type_name::<S>()));
        self
    }

    pub fn with_transport<T>(mut self, transport: Arc<T>) -> Self
    where
        T: UploadTransport + 'static,
    {
        let transport: Arc<dyn UploadTransport> = transport;
        self.transport = Some((transport, type_name::<T>()));
        self
    }

    pub fn with_probe<P>(mut self, probe: Arc<P>) -> Self
    where
        P: ReachabilityProbe + 'static,
    {
        let probe: Arc<dyn ReachabilityProbe> = probe;
        self.probe = Some((probe, type_name::<P>()));
        self
    }

    /// Share an existing event bus, e.g. between asset and file managers.
    pub fn with_events(mut self, events: Arc<SyncEventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the manager.
    ///
    /// # Errors
    ///
    /// Returns an error if a required dependency is missing or the config
    /// fails validation.
    pub fn build(self) -> anyhow::Result<QueueManager> {
        self.config.validate()?;

        let (store, _) = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store dependency missing"))?;
        let (transport, _) = self
            .transport
            .ok_or_else(|| anyhow::anyhow!("transport dependency missing"))?;
        let (probe, _) = self
            .probe
            .ok_or_else(|| anyhow::anyhow!("probe dependency missing"))?;
        let events = self.events.unwrap_or_default();

        Ok(QueueManager::new(self.config, store, transport, probe, events))
    }
}
