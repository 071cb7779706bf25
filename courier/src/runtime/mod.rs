/// Builder wiring a manager to its store, transport and probe.
pub mod builder;
/// The processing loop, upload tasks and retry handling.
pub mod manager;
/// Reachability polling and failed-item recovery.
pub mod monitor;
pub mod shutdown;

pub use builder::QueueManagerBuilder;
pub use manager::{PassOutcome, QueueManager};
pub use monitor::{ProbeOutcome, RecoveryMonitor};
pub use shutdown::ShutdownToken;
