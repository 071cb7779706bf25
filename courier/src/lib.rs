//! Courier - offline upload queue and synchronization engine.
//!
//! Records captured on a device (photos, imported files) are persisted
//! locally first and pushed to a remote server whenever connectivity allows.
//! Courier owns the part in between: a durable work queue that claims
//! batches, uploads with bounded concurrency, retries failures with
//! exponential backoff, caps retry attempts, and reports progress.
//!
//! # Core Concepts
//!
//! - **Store**: The [`RecordStore`] trait abstracts durable item storage and
//!   owns every status transition. [`SqliteRecordStore`] is the bundled
//!   backend.
//!
//! - **Transport / Probe**: [`UploadTransport`] sends one item;
//!   [`ReachabilityProbe`] says whether trying is worthwhile.
//!
//! - **Manager**: [`QueueManager`] runs processing passes, tracks in-flight
//!   uploads and applies the retry policy. Build one with
//!   [`QueueManagerBuilder`].
//!
//! - **Events and metrics**: [`SyncEventBus`] delivers lifecycle
//!   notifications; [`QueueMetrics`] snapshots are published on a
//!   `tokio::sync::watch` channel.
//!
//! # Feature Flags
//!
//! - `sqlite` (default) - SQLite persistence via sqlx
//! - `prometheus` - Prometheus collectors
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use courier::*;
//!
//! let store = Arc::new(SqliteRecordStore::open_in_memory(ItemKind::Asset).await?);
//! let manager = QueueManagerBuilder::new(SyncConfig::default())
//!     .with_store(Arc::clone(&store))
//!     .with_transport(Arc::new(MyHttpTransport::new()))
//!     .with_probe(Arc::new(AlwaysOnline))
//!     .build()?;
//!
//! manager.recover().await?;
//! manager.spawn_recovery_monitor();
//!
//! let id = store.insert(NewItem::new("IMG_0001.jpg", "image/jpeg", payload)).await?;
//! manager.enqueue(id).await?;
//! ```

/// Retry delay calculation.
pub mod backoff;

/// Configuration for the manager and the SQLite store.
pub mod config;

/// Lifecycle events and the in-process event bus.
///
/// - [`SyncEvent`] and [`SyncEventPayload`] for event data
/// - [`EventKind`] for handler registration
/// - [`SyncEventBus`] for synchronous handlers and broadcast streams
pub mod events;

/// Queue item model: ids, kinds, statuses and payloads.
pub mod item;

/// Queue health snapshots and optional Prometheus export.
pub mod metrics;

/// Network reachability seam.
pub mod reachability;

/// The [`RecordStore`] contract.
pub mod store;

/// Tracing spans and upload outcome helpers.
pub mod telemetry;

/// Upload transport seam.
pub mod transport;

#[cfg(feature = "sqlite")]
/// SQLite persistence implementation.
pub mod persistence;

/// Queue manager, recovery monitor and shutdown signaling.
///
/// - [`QueueManager`] - processing passes, uploads, retries
/// - [`QueueManagerBuilder`] - dependency wiring
/// - [`RecoveryMonitor`] - offline to online reset
/// - [`ShutdownToken`] - background task cancellation
pub mod runtime;

pub use backoff::*;
pub use config::*;
pub use events::*;
pub use item::*;
pub use metrics::{MetricsTracker, QueueMetrics};
pub use reachability::*;
pub use store::*;
pub use transport::*;

#[cfg(feature = "sqlite")]
pub use persistence::SqliteRecordStore;

pub use runtime::{
    PassOutcome, ProbeOutcome, QueueManager, QueueManagerBuilder,
    RecoveryMonitor, ShutdownToken,
};
